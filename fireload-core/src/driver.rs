//! Per-connection simulation loop
//!
//! A [`ConnectionDriver`] owns one connection's statistics and runs its
//! loop until the server stops answering, a shutdown token arrives, or
//! something inside the loop breaks. Each iteration runs, in order:
//!
//! 1. the shutdown check,
//! 2. a latency probe when one is due,
//! 3. a throughput snapshot when one is due,
//! 4. a liveness probe when one is due, ending the loop once the failure
//!    threshold is reached,
//! 5. one weighted random traffic activity followed by a pause.
//!
//! Panics and fatal errors inside an iteration end the connection as
//! crashed; the statistics gathered so far are always kept.

use crate::config::SimulationConfig;
use crate::error::LoadError;
use crate::identity::ConnectionIdentity;
use crate::probe::ServerProbe;
use crate::shutdown::{ListenerExit, RunState, ShutdownListener, ShutdownListenerConfig};
use crate::stats::TrafficStats;
use crate::traffic::{Activity, ActivityRunner};
use futures::FutureExt;
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Why a connection stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminationReason {
    /// Shutdown token received
    Graceful,
    /// Liveness probe failure threshold reached
    Unreachable,
    /// The loop itself failed
    Crashed,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TerminationReason::Graceful => "graceful",
            TerminationReason::Unreachable => "unreachable",
            TerminationReason::Crashed => "crashed",
        };
        f.write_str(name)
    }
}

/// Loop timing of one driver
#[derive(Debug, Clone, PartialEq)]
pub struct DriverSettings {
    /// Time between latency probes
    pub ping_interval: Duration,
    /// Time between liveness probes
    pub availability_check_interval: Duration,
    /// Time between throughput snapshots
    pub throughput_snapshot_interval: Duration,
    /// Failed liveness probes in a row that end the connection
    pub max_consecutive_failures: u32,
    /// Pause after a gameplay burst
    pub tick_interval: Duration,
    /// Lower bound of the pause after any other activity
    pub activity_delay_min: Duration,
    /// Upper bound of the pause after any other activity
    pub activity_delay_max: Duration,
    /// Pause after a failed activity
    pub error_pause: Duration,
    /// Pause between starting the listener and the first iteration
    pub startup_delay: Duration,
}

impl DriverSettings {
    /// Settings derived from the session configuration
    pub fn from_config(config: &SimulationConfig) -> Self {
        let tuning = &config.tuning;
        Self {
            ping_interval: tuning.ping_interval,
            availability_check_interval: tuning.availability_check_interval,
            throughput_snapshot_interval: tuning.throughput_snapshot_interval,
            max_consecutive_failures: tuning.max_consecutive_failures.max(1),
            tick_interval: config.ut.tick_interval(),
            activity_delay_min: tuning.activity_delay_min,
            activity_delay_max: tuning.activity_delay_max.max(tuning.activity_delay_min),
            error_pause: tuning.error_pause,
            startup_delay: tuning.startup_delay,
        }
    }

    fn delay_after<R: Rng + ?Sized>(&self, activity: Activity, rng: &mut R) -> Duration {
        match activity {
            Activity::Gameplay => self.tick_interval,
            _ if self.activity_delay_max <= self.activity_delay_min => self.activity_delay_min,
            _ => rng.gen_range(self.activity_delay_min..=self.activity_delay_max),
        }
    }
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self::from_config(&SimulationConfig::default())
    }
}

/// Final result of one connection
#[derive(Debug, Clone)]
pub struct ConnectionOutcome {
    /// Which connection this was
    pub identity: ConnectionIdentity,
    /// Why it stopped
    pub reason: TerminationReason,
    /// Time from start to termination
    pub runtime: Duration,
    /// Everything it recorded
    pub stats: TrafficStats,
}

impl ConnectionOutcome {
    /// Outcome for a connection whose task was lost before it could report
    pub fn lost(identity: ConnectionIdentity, reason: impl Into<String>) -> Self {
        let mut stats = TrafficStats::new(identity);
        stats.record_error(reason);
        Self {
            identity,
            reason: TerminationReason::Crashed,
            runtime: Duration::ZERO,
            stats,
        }
    }
}

/// Result of one loop iteration
enum Step {
    Continue,
    Stop(TerminationReason),
}

#[derive(Debug, Default)]
struct Schedule {
    last_ping: Option<Instant>,
    last_snapshot: Option<Instant>,
    last_check: Option<Instant>,
}

fn due(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
    match last {
        None => true,
        Some(at) => now.saturating_duration_since(at) >= interval,
    }
}

/// Drives one simulated connection
pub struct ConnectionDriver<P, A> {
    identity: ConnectionIdentity,
    settings: DriverSettings,
    probe: P,
    runner: A,
    state: Arc<RunState>,
    listener: Option<ShutdownListenerConfig>,
    rng: StdRng,
}

impl<P, A> fmt::Debug for ConnectionDriver<P, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDriver")
            .field("identity", &self.identity)
            .field("settings", &self.settings)
            .field("listener", &self.listener)
            .finish_non_exhaustive()
    }
}

impl<P, A> ConnectionDriver<P, A>
where
    P: ServerProbe,
    A: ActivityRunner,
{
    /// Create a driver without a shutdown listener
    pub fn new(identity: ConnectionIdentity, settings: DriverSettings, probe: P, runner: A) -> Self {
        Self {
            identity,
            settings,
            probe,
            runner,
            state: RunState::new(),
            listener: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// Listen for the shutdown token while running
    pub fn with_shutdown_listener(mut self, config: ShutdownListenerConfig) -> Self {
        self.listener = Some(config);
        self
    }

    /// Use a deterministic random source for activity selection
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Connection this driver simulates
    pub fn identity(&self) -> ConnectionIdentity {
        self.identity
    }

    /// Handle on the shared run state, e.g. to request shutdown from outside
    pub fn run_state(&self) -> Arc<RunState> {
        self.state.clone()
    }

    /// Run the connection to completion
    pub async fn run(mut self) -> ConnectionOutcome {
        let mut stats = TrafficStats::new(self.identity);
        self.state.start();

        let listener = match self.listener.clone() {
            Some(config) => {
                start_listener(self.identity, config, self.state.clone(), &mut stats).await
            }
            None => None,
        };
        sleep(self.settings.startup_delay).await;
        info!(connection = %self.identity, "Starting traffic simulation");

        let reason = self.drive(&mut stats).await;

        self.state.stop();
        if let Some(handle) = listener {
            match handle.await {
                Ok(ListenerExit::TokenReceived) | Ok(ListenerExit::Stopped) => {}
                Err(e) => warn!(connection = %self.identity, error = %e, "Shutdown listener task failed"),
            }
        }

        let runtime = stats.start_time().elapsed();
        let counters = stats.counters();
        info!(
            connection = %self.identity,
            reason = %reason,
            runtime_secs = runtime.as_secs_f64(),
            udp_packets = counters.udp_packets_sent,
            tcp_ok = counters.tcp_connections_succeeded,
            tcp_failed = counters.tcp_connections_failed,
            errors = stats.errors().len(),
            "Connection finished"
        );

        ConnectionOutcome {
            identity: self.identity,
            reason,
            runtime,
            stats,
        }
    }

    async fn drive(&mut self, stats: &mut TrafficStats) -> TerminationReason {
        let mut schedule = Schedule::default();
        loop {
            if self.state.shutdown_requested() {
                info!(connection = %self.identity, "Shutdown requested, stopping");
                return TerminationReason::Graceful;
            }

            let step = AssertUnwindSafe(self.iterate(stats, &mut schedule))
                .catch_unwind()
                .await;
            match step {
                Ok(Ok(Step::Continue)) => {}
                Ok(Ok(Step::Stop(reason))) => return reason,
                Ok(Err(e)) => {
                    error!(connection = %self.identity, error = %e, "Traffic loop failed");
                    stats.record_error(format!("Fatal: {}", e));
                    return TerminationReason::Crashed;
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(connection = %self.identity, panic = %message, "Traffic loop panicked");
                    stats.record_error(format!("Panic: {}", message));
                    return TerminationReason::Crashed;
                }
            }
        }
    }

    async fn iterate(
        &mut self,
        stats: &mut TrafficStats,
        schedule: &mut Schedule,
    ) -> Result<Step, LoadError> {
        let now = Instant::now();

        if due(schedule.last_ping, now, self.settings.ping_interval) {
            let latency = self.probe.measure_latency().await;
            stats.record_ping(latency);
            schedule.last_ping = Some(now);
            debug!(connection = %self.identity, latency_ms = ?latency, "Ping");
        }

        if due(schedule.last_snapshot, now, self.settings.throughput_snapshot_interval) {
            let point = stats.record_throughput_snapshot();
            schedule.last_snapshot = Some(now);
            debug!(connection = %self.identity, packets_per_sec = point.value, "Throughput snapshot");
        }

        if due(schedule.last_check, now, self.settings.availability_check_interval) {
            schedule.last_check = Some(now);
            let available = self.probe.is_available().await;
            let failures = self.state.record_probe(available);
            if !available {
                warn!(
                    connection = %self.identity,
                    failures,
                    max = self.settings.max_consecutive_failures,
                    "Server availability check failed"
                );
                if failures >= self.settings.max_consecutive_failures {
                    // a token that raced in wins over the failure run
                    if self.state.shutdown_requested() {
                        return Ok(Step::Stop(TerminationReason::Graceful));
                    }
                    info!(connection = %self.identity, failures, "Server unreachable, stopping");
                    return Ok(Step::Stop(TerminationReason::Unreachable));
                }
            }
        }

        let activity = Activity::choose(&mut self.rng);
        match self.runner.run(activity, stats).await {
            Ok(()) => {
                let pause = self.settings.delay_after(activity, &mut self.rng);
                sleep(pause).await;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!(connection = %self.identity, activity = %activity, error = %e, "Activity failed");
                stats.record_error(format!("Activity {}: {}", activity, e));
                sleep(self.settings.error_pause).await;
            }
        }

        Ok(Step::Continue)
    }
}

/// Bind and spawn the shutdown listener; a bind failure is recorded and the
/// connection carries on, relying on liveness probing to end it.
async fn start_listener(
    identity: ConnectionIdentity,
    config: ShutdownListenerConfig,
    state: Arc<RunState>,
    stats: &mut TrafficStats,
) -> Option<JoinHandle<ListenerExit>> {
    match ShutdownListener::bind(identity, &config, state).await {
        Ok(listener) => Some(listener.spawn()),
        Err(e) => {
            warn!(
                connection = %identity,
                addr = %config.bind_addr,
                error = %e,
                "Could not bind shutdown listener, continuing without it"
            );
            stats.record_error(format!("Shutdown listener: {}", e));
            None
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_on_first_iteration() {
        let now = Instant::now();
        assert!(due(None, now, Duration::from_secs(5)));
        assert!(!due(Some(now), now, Duration::from_secs(5)));
        assert!(due(Some(now), now + Duration::from_secs(5), Duration::from_secs(5)));
    }

    #[test]
    fn test_gameplay_pause_is_one_tick() {
        let settings = DriverSettings::default();
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(
            settings.delay_after(Activity::Gameplay, &mut rng),
            settings.tick_interval
        );
        for activity in [Activity::Query, Activity::Join, Activity::Heartbeat, Activity::TcpProbe] {
            let pause = settings.delay_after(activity, &mut rng);
            assert!(pause >= settings.activity_delay_min);
            assert!(pause <= settings.activity_delay_max);
        }
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn test_reason_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TerminationReason::Unreachable).unwrap(),
            "\"unreachable\""
        );
        assert_eq!(TerminationReason::Crashed.to_string(), "crashed");
    }

    #[test]
    fn test_lost_outcome_is_crashed_and_empty() {
        let outcome = ConnectionOutcome::lost(ConnectionIdentity::new(4, 2), "task aborted");
        assert_eq!(outcome.reason, TerminationReason::Crashed);
        assert_eq!(outcome.stats.counters().udp_packets_sent, 0);
        assert_eq!(outcome.stats.errors(), ["task aborted".to_string()]);
    }
}
