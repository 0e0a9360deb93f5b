//! Fleet coordination tests

use async_trait::async_trait;
use fireload_core::*;
use std::cell::Cell;
use std::time::Duration;

struct FixedProbe(bool);

#[async_trait]
impl ServerProbe for FixedProbe {
    async fn is_available(&self) -> bool {
        self.0
    }

    async fn measure_latency(&self) -> Option<f64> {
        self.0.then_some(5.0)
    }
}

/// Sends `player` bytes per packet so every connection leaves a
/// recognisable trace in its own stats
struct PlayerSizedRunner {
    identity: ConnectionIdentity,
}

#[async_trait]
impl ActivityRunner for PlayerSizedRunner {
    async fn run(&mut self, _activity: Activity, stats: &mut TrafficStats) -> Result<(), LoadError> {
        stats.record_optimistic_udp_send(self.identity.player as usize);
        Ok(())
    }
}

/// Keeps its tally in a `Cell`: movable between threads, not shareable
struct CellTallyRunner {
    sent: Cell<u64>,
}

#[async_trait]
impl ActivityRunner for CellTallyRunner {
    async fn run(&mut self, _activity: Activity, stats: &mut TrafficStats) -> Result<(), LoadError> {
        self.sent.set(self.sent.get() + 1);
        stats.record_optimistic_udp_send(self.sent.get() as usize);
        Ok(())
    }
}

fn test_config(players: u32, per_player: u32) -> SimulationConfig {
    let mut config = SimulationConfig {
        num_players: players,
        connections_per_player: per_player,
        target_server: "127.0.0.1".to_string(),
        ..SimulationConfig::default()
    };
    config.tuning.stagger_min = Duration::from_millis(10);
    config.tuning.stagger_max = Duration::from_millis(10);
    config
}

fn mock_driver(
    identity: ConnectionIdentity,
    available: bool,
    max_failures: u32,
) -> ConnectionDriver<FixedProbe, PlayerSizedRunner> {
    let settings = DriverSettings {
        max_consecutive_failures: max_failures,
        ..DriverSettings::default()
    };
    ConnectionDriver::new(
        identity,
        settings,
        FixedProbe(available),
        PlayerSizedRunner { identity },
    )
}

#[tokio::test(start_paused = true)]
async fn test_every_connection_reports_in_start_order() {
    let fleet = Fleet::new(test_config(2, 3)).unwrap();

    let outcome = fleet.run_with(|identity| mock_driver(identity, false, 2)).await;

    let identities: Vec<String> = outcome
        .connections
        .iter()
        .map(|c| c.identity.to_string())
        .collect();
    assert_eq!(identities, ["1-1", "1-2", "1-3", "2-1", "2-2", "2-3"]);
    assert!(outcome
        .connections
        .iter()
        .all(|c| c.reason == TerminationReason::Unreachable));
}

#[tokio::test(start_paused = true)]
async fn test_connections_do_not_share_stats() {
    let fleet = Fleet::new(test_config(3, 2)).unwrap();

    let outcome = fleet.run_with(|identity| mock_driver(identity, false, 2)).await;

    for connection in &outcome.connections {
        let counters = connection.stats.counters();
        assert_eq!(connection.stats.identity(), connection.identity);
        assert!(counters.udp_packets_sent > 0);
        assert_eq!(
            counters.bytes_sent,
            counters.udp_packets_sent * connection.identity.player as u64
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_session_deadline_stops_fleet_gracefully() {
    let mut config = test_config(2, 2);
    config.session_deadline = Some(Duration::from_secs(30));
    let fleet = Fleet::new(config).unwrap();

    let outcome = fleet.run_with(|identity| mock_driver(identity, true, 3)).await;

    assert_eq!(outcome.connections.len(), 4);
    assert!(outcome
        .connections
        .iter()
        .all(|c| c.reason == TerminationReason::Graceful));
    assert!(outcome.session_duration >= Duration::from_secs(30));
    assert!(outcome.session_duration < Duration::from_secs(40));
}

#[tokio::test(start_paused = true)]
async fn test_mixed_terminations_are_counted() {
    let fleet = Fleet::new(test_config(2, 1)).unwrap();

    // player 1 loses the server, player 2 is stopped from outside
    let mut states = Vec::new();
    let handle = {
        let drivers: Vec<_> = [
            mock_driver(ConnectionIdentity::new(1, 1), false, 1),
            mock_driver(ConnectionIdentity::new(2, 1), true, 1),
        ]
        .into_iter()
        .inspect(|d| states.push(d.run_state()))
        .collect();
        let mut drivers = drivers.into_iter();
        let fleet = fleet.clone();
        tokio::spawn(async move {
            fleet
                .run_with(move |_| drivers.next().expect("one driver per connection"))
                .await
        })
    };

    tokio::time::sleep(Duration::from_secs(20)).await;
    states[1].request_shutdown();
    let outcome = handle.await.unwrap();

    let report = AggregateReport::from_outcomes(&outcome.connections, outcome.session_duration);
    assert_eq!(report.total_players, 2);
    assert_eq!(report.terminations.unreachable, 1);
    assert_eq!(report.terminations.graceful, 1);
    assert_eq!(report.terminations.crashed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_runner_need_not_be_sync() {
    let fleet = Fleet::new(test_config(2, 1)).unwrap();
    let settings = DriverSettings {
        max_consecutive_failures: 1,
        ..DriverSettings::default()
    };

    let outcome = fleet
        .run_with(|identity| {
            ConnectionDriver::new(
                identity,
                settings.clone(),
                FixedProbe(false),
                CellTallyRunner { sent: Cell::new(0) },
            )
        })
        .await;

    assert_eq!(outcome.connections.len(), 2);
    assert!(outcome
        .connections
        .iter()
        .all(|c| c.reason == TerminationReason::Unreachable));
}
