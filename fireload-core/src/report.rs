//! Session reporting
//!
//! Turns a [`FleetOutcome`] into an [`AggregateReport`] and the full
//! [`SessionReport`] document, and writes that document as JSON.

use crate::config::{SimulationConfig, UtNetworkSpecs};
use crate::driver::{ConnectionOutcome, TerminationReason};
use crate::error::LoadError;
use crate::fleet::FleetOutcome;
use crate::stats::{PingSummary, StatsExport, TrafficCounters};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Per-connection section of the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionReport {
    /// `"{player}-{connection}"`
    pub player_id: String,
    /// Logical player number
    pub player: u32,
    /// Connection index within the player
    pub connection: u32,
    /// Why the connection stopped
    pub termination_reason: TerminationReason,
    /// Seconds from start to termination
    pub runtime_secs: f64,
    /// Recorded statistics
    #[serde(flatten)]
    pub stats: StatsExport,
}

impl From<&ConnectionOutcome> for ConnectionReport {
    fn from(outcome: &ConnectionOutcome) -> Self {
        Self {
            player_id: outcome.identity.to_string(),
            player: outcome.identity.player,
            connection: outcome.identity.sub,
            termination_reason: outcome.reason,
            runtime_secs: outcome.runtime.as_secs_f64(),
            stats: outcome.stats.export(),
        }
    }
}

/// How many connections ended for each reason
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationCounts {
    /// Ended by shutdown token
    pub graceful: u64,
    /// Ended by failed liveness probes
    pub unreachable: u64,
    /// Ended by a fault in the loop
    pub crashed: u64,
}

impl TerminationCounts {
    fn count(&mut self, reason: TerminationReason) {
        match reason {
            TerminationReason::Graceful => self.graceful += 1,
            TerminationReason::Unreachable => self.unreachable += 1,
            TerminationReason::Crashed => self.crashed += 1,
        }
    }
}

/// Session-wide totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    /// Number of connections that took part
    pub total_players: u64,
    /// Successful TCP connects
    pub total_tcp_connections: u64,
    /// Failed TCP connects
    pub total_tcp_failed: u64,
    /// UDP datagrams sent
    pub total_udp_packets: u64,
    /// UDP datagrams counted as answered
    pub total_udp_responses: u64,
    /// UDP sends that timed out
    pub total_udp_timeouts: u64,
    /// Bytes sent
    pub total_bytes_sent: u64,
    /// Bytes counted as received
    pub total_bytes_received: u64,
    /// Errors recorded across all connections
    pub total_errors: u64,
    /// Latency over every successful sample of every connection
    #[serde(flatten)]
    pub ping: PingSummary,
    /// UDP responses over packets sent, in percent
    pub udp_success_rate: f64,
    /// Successful TCP connects over attempts, in percent
    pub tcp_success_rate: f64,
    /// Connections per termination reason
    pub terminations: TerminationCounts,
    /// Seconds from the first start until the last connection finished
    pub session_duration_secs: f64,
}

impl AggregateReport {
    /// Aggregate the outcomes of a session
    pub fn from_outcomes(outcomes: &[ConnectionOutcome], session_duration: Duration) -> Self {
        let mut totals = TrafficCounters::default();
        let mut terminations = TerminationCounts::default();
        let mut total_errors = 0u64;
        for outcome in outcomes {
            totals.accumulate(outcome.stats.counters());
            terminations.count(outcome.reason);
            total_errors += outcome.stats.errors().len() as u64;
        }
        let ping = PingSummary::from_samples(
            outcomes
                .iter()
                .flat_map(|outcome| outcome.stats.successful_pings()),
        );

        Self {
            total_players: outcomes.len() as u64,
            total_tcp_connections: totals.tcp_connections_succeeded,
            total_tcp_failed: totals.tcp_connections_failed,
            total_udp_packets: totals.udp_packets_sent,
            total_udp_responses: totals.udp_responses_counted,
            total_udp_timeouts: totals.udp_timeouts,
            total_bytes_sent: totals.bytes_sent,
            total_bytes_received: totals.bytes_received,
            total_errors,
            ping,
            udp_success_rate: percent(totals.udp_responses_counted, totals.udp_packets_sent),
            tcp_success_rate: percent(totals.tcp_connections_succeeded, totals.tcp_attempts()),
            terminations,
            session_duration_secs: session_duration.as_secs_f64(),
        }
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Configuration section of the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfigReport {
    /// Logical players
    pub num_players: u32,
    /// Connections per player
    pub connections_per_player: u32,
    /// How the session was bounded
    pub mode: String,
    /// Configured nominal duration in seconds
    pub original_duration_setting: u64,
    /// Actual duration in whole seconds
    pub duration_seconds: u64,
    /// Actual duration in seconds
    pub session_duration: f64,
    /// Target server as configured
    pub target_server: String,
    /// Packet sizing model
    pub ut_specs: UtNetworkSpecs,
}

/// The complete session document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    /// When the report was built
    pub timestamp: DateTime<Utc>,
    /// Random identifier of this session
    pub session_id: Uuid,
    /// Configuration the session ran with
    pub simulation_config: SimulationConfigReport,
    /// Session-wide totals
    pub summary_stats: AggregateReport,
    /// One entry per connection, in start order
    pub player_details: Vec<ConnectionReport>,
}

impl SessionReport {
    /// Build the document for a finished session
    pub fn build(config: &SimulationConfig, outcome: &FleetOutcome) -> Self {
        let mode = if config.session_deadline.is_some() {
            "continuous_with_deadline"
        } else {
            "continuous_until_server_down"
        };
        Self {
            timestamp: Utc::now(),
            session_id: Uuid::new_v4(),
            simulation_config: SimulationConfigReport {
                num_players: config.num_players,
                connections_per_player: config.connections_per_player,
                mode: mode.to_string(),
                original_duration_setting: config.duration.as_secs(),
                duration_seconds: outcome.session_duration.as_secs(),
                session_duration: outcome.session_duration.as_secs_f64(),
                target_server: config.target_server.clone(),
                ut_specs: config.ut,
            },
            summary_stats: AggregateReport::from_outcomes(
                &outcome.connections,
                outcome.session_duration,
            ),
            player_details: outcome.connections.iter().map(ConnectionReport::from).collect(),
        }
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String, LoadError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a previously written report
    pub fn from_json(json: &str) -> Result<Self, LoadError> {
        Ok(serde_json::from_str(json)?)
    }

    /// File name the report is saved under
    pub fn file_name(&self) -> String {
        format!("client-report-{}.json", self.timestamp.format("%Y%m%d-%H%M%S"))
    }
}

/// Writes session reports into a directory
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    /// Write reports into `dir`, creating it when needed
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Write `report` and return the path it was written to
    pub async fn save(&self, report: &SessionReport) -> Result<PathBuf, LoadError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| report_error(&self.dir, e))?;
        let path = self.dir.join(report.file_name());
        let json = report.to_json()?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| report_error(&path, e))?;
        info!(path = %path.display(), session = %report.session_id, "Report saved");
        Ok(path)
    }
}

fn report_error(path: &Path, err: std::io::Error) -> LoadError {
    LoadError::Report {
        reason: format!("{}: {}", path.display(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ConnectionIdentity;
    use crate::stats::TrafficStats;

    fn outcome(player: u32, reason: TerminationReason) -> ConnectionOutcome {
        ConnectionOutcome {
            identity: ConnectionIdentity::new(player, 1),
            reason,
            runtime: Duration::from_secs(10),
            stats: TrafficStats::new(ConnectionIdentity::new(player, 1)),
        }
    }

    #[test]
    fn test_rates_are_zero_without_traffic() {
        let report = AggregateReport::from_outcomes(
            &[outcome(1, TerminationReason::Graceful)],
            Duration::from_secs(1),
        );
        assert_eq!(report.udp_success_rate, 0.0);
        assert_eq!(report.tcp_success_rate, 0.0);
        assert_eq!(report.ping.avg_ms, None);
    }

    #[test]
    fn test_ping_spans_all_connections() {
        let mut first = outcome(1, TerminationReason::Graceful);
        first.stats.record_ping(Some(10.0));
        first.stats.record_ping(None);
        let mut second = outcome(2, TerminationReason::Unreachable);
        second.stats.record_ping(Some(30.0));

        let report = AggregateReport::from_outcomes(&[first, second], Duration::from_secs(1));
        assert_eq!(report.ping.count, 2);
        assert_eq!(report.ping.min_ms, Some(10.0));
        assert_eq!(report.ping.max_ms, Some(30.0));
        assert_eq!(report.ping.avg_ms, Some(20.0));
        assert_eq!(report.terminations.graceful, 1);
        assert_eq!(report.terminations.unreachable, 1);
    }

    #[test]
    fn test_file_name_uses_timestamp() {
        let fleet = FleetOutcome {
            started_at: Utc::now(),
            session_duration: Duration::from_secs(3),
            connections: vec![outcome(1, TerminationReason::Graceful)],
        };
        let mut report = SessionReport::build(&SimulationConfig::default(), &fleet);
        report.timestamp = DateTime::parse_from_rfc3339("2024-03-05T07:08:09Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(report.file_name(), "client-report-20240305-070809.json");
    }
}
