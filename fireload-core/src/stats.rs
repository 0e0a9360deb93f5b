//! Per-connection traffic statistics
//!
//! A [`TrafficStats`] belongs to exactly one connection driver and is only
//! ever touched from that driver's task, so it needs no synchronisation.
//! Recording never fails: history appends that cannot allocate are dropped
//! so that the load generator keeps running even when its own bookkeeping
//! cannot.

use crate::identity::ConnectionIdentity;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Number of error messages included in an exported report
pub const REPORTED_ERROR_LIMIT: usize = 10;

/// Monotonic counters of one connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficCounters {
    /// TCP connects that succeeded
    #[serde(rename = "tcp_connections")]
    pub tcp_connections_succeeded: u64,
    /// TCP connects that failed or timed out
    #[serde(rename = "tcp_failed")]
    pub tcp_connections_failed: u64,
    /// UDP datagrams handed to the kernel
    pub udp_packets_sent: u64,
    /// UDP datagrams counted as answered
    #[serde(rename = "udp_responses")]
    pub udp_responses_counted: u64,
    /// UDP sends that timed out
    pub udp_timeouts: u64,
    /// Payload bytes sent over UDP and TCP
    #[serde(rename = "total_bytes_sent")]
    pub bytes_sent: u64,
    /// Payload bytes counted as received
    #[serde(rename = "total_bytes_received")]
    pub bytes_received: u64,
}

impl TrafficCounters {
    /// Add another connection's counters to these
    pub fn accumulate(&mut self, other: &TrafficCounters) {
        self.tcp_connections_succeeded = self
            .tcp_connections_succeeded
            .saturating_add(other.tcp_connections_succeeded);
        self.tcp_connections_failed = self
            .tcp_connections_failed
            .saturating_add(other.tcp_connections_failed);
        self.udp_packets_sent = self.udp_packets_sent.saturating_add(other.udp_packets_sent);
        self.udp_responses_counted = self
            .udp_responses_counted
            .saturating_add(other.udp_responses_counted);
        self.udp_timeouts = self.udp_timeouts.saturating_add(other.udp_timeouts);
        self.bytes_sent = self.bytes_sent.saturating_add(other.bytes_sent);
        self.bytes_received = self.bytes_received.saturating_add(other.bytes_received);
    }

    /// Total TCP connect attempts
    pub fn tcp_attempts(&self) -> u64 {
        self.tcp_connections_succeeded
            .saturating_add(self.tcp_connections_failed)
    }
}

/// A value observed at a point in time, relative to connection start
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimePoint {
    /// Seconds since the connection started
    pub timestamp: f64,
    /// Observed value
    pub value: f64,
}

/// One throughput snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputPoint {
    /// Seconds since the connection started
    pub timestamp: f64,
    /// Packets per second since the previous snapshot
    pub value: f64,
    /// Packets sent so far
    pub total_packets: u64,
    /// Bytes sent so far
    pub total_bytes: u64,
}

/// Min/max/avg over successful latency samples.
///
/// All three are `None` when there were no successful samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PingSummary {
    /// Lowest latency in milliseconds
    #[serde(rename = "ping_min_ms")]
    pub min_ms: Option<f64>,
    /// Highest latency in milliseconds
    #[serde(rename = "ping_max_ms")]
    pub max_ms: Option<f64>,
    /// Mean latency in milliseconds
    #[serde(rename = "ping_avg_ms")]
    pub avg_ms: Option<f64>,
    /// Number of successful samples
    #[serde(rename = "ping_count")]
    pub count: u64,
}

impl PingSummary {
    /// Summarise a sequence of successful latency samples
    pub fn from_samples<I>(samples: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut count = 0u64;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for sample in samples.into_iter().filter(|s| s.is_finite()) {
            count += 1;
            sum += sample;
            min = min.min(sample);
            max = max.max(sample);
        }
        if count == 0 {
            return Self::default();
        }
        Self {
            min_ms: Some(min),
            max_ms: Some(max),
            avg_ms: Some(sum / count as f64),
            count,
        }
    }
}

/// Serializable view of a connection's statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsExport {
    /// Counters at the time of export
    #[serde(flatten)]
    pub counters: TrafficCounters,
    /// Total number of recorded errors
    pub error_count: u64,
    /// First errors, capped at [`REPORTED_ERROR_LIMIT`]
    pub errors: Vec<String>,
    /// Latency summary
    #[serde(flatten)]
    pub ping: PingSummary,
    /// Successful latency samples over time
    pub ping_history: Vec<TimePoint>,
    /// Throughput snapshots over time
    pub throughput_history: Vec<ThroughputPoint>,
}

/// Statistics recorder for one connection
#[derive(Debug, Clone)]
pub struct TrafficStats {
    identity: ConnectionIdentity,
    start_time: Instant,
    counters: TrafficCounters,
    errors: Vec<String>,
    ping_samples: Vec<Option<f64>>,
    ping_history: Vec<TimePoint>,
    throughput_history: Vec<ThroughputPoint>,
    last_snapshot: Option<(Instant, u64)>,
}

impl TrafficStats {
    /// Create a recorder whose clock starts now
    pub fn new(identity: ConnectionIdentity) -> Self {
        Self::started_at(identity, Instant::now())
    }

    /// Create a recorder with an explicit start time
    pub fn started_at(identity: ConnectionIdentity, start_time: Instant) -> Self {
        Self {
            identity,
            start_time,
            counters: TrafficCounters::default(),
            errors: Vec::new(),
            ping_samples: Vec::new(),
            ping_history: Vec::new(),
            throughput_history: Vec::new(),
            last_snapshot: None,
        }
    }

    /// Connection these statistics belong to
    pub fn identity(&self) -> ConnectionIdentity {
        self.identity
    }

    /// Instant the connection started
    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    /// Current counters
    pub fn counters(&self) -> &TrafficCounters {
        &self.counters
    }

    /// Every recorded error, in order
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Every latency attempt, `None` for failed ones
    pub fn ping_samples(&self) -> &[Option<f64>] {
        &self.ping_samples
    }

    /// Successful latency samples with their timestamps
    pub fn ping_history(&self) -> &[TimePoint] {
        &self.ping_history
    }

    /// Throughput snapshots
    pub fn throughput_history(&self) -> &[ThroughputPoint] {
        &self.throughput_history
    }

    /// Record a successful TCP connect
    pub fn record_tcp_success(&mut self) {
        self.counters.tcp_connections_succeeded =
            self.counters.tcp_connections_succeeded.saturating_add(1);
    }

    /// Record a failed TCP connect
    pub fn record_tcp_failure(&mut self) {
        self.counters.tcp_connections_failed =
            self.counters.tcp_connections_failed.saturating_add(1);
    }

    /// Record a UDP datagram of `bytes` bytes leaving the socket
    pub fn record_udp_sent(&mut self, bytes: usize) {
        self.counters.udp_packets_sent = self.counters.udp_packets_sent.saturating_add(1);
        self.record_bytes_sent(bytes);
    }

    /// Record a UDP response
    pub fn record_udp_response(&mut self) {
        self.counters.udp_responses_counted =
            self.counters.udp_responses_counted.saturating_add(1);
    }

    /// Record a UDP send that timed out
    pub fn record_udp_timeout(&mut self) {
        self.counters.udp_timeouts = self.counters.udp_timeouts.saturating_add(1);
    }

    /// Record a fire-and-forget UDP send.
    ///
    /// The datagram is counted as answered at send time without waiting for
    /// a reply. Historical reports were produced this way and the UDP
    /// success rate only stays comparable across runs if it is kept. Real
    /// round trips are measured by the latency probe instead.
    pub fn record_optimistic_udp_send(&mut self, bytes: usize) {
        self.record_udp_sent(bytes);
        self.record_udp_response();
    }

    /// Record payload bytes sent outside of UDP datagram accounting
    pub fn record_bytes_sent(&mut self, bytes: usize) {
        self.counters.bytes_sent = self.counters.bytes_sent.saturating_add(bytes as u64);
    }

    /// Record payload bytes received
    pub fn record_bytes_received(&mut self, bytes: usize) {
        self.counters.bytes_received = self.counters.bytes_received.saturating_add(bytes as u64);
    }

    /// Append a diagnostic message
    pub fn record_error(&mut self, message: impl Into<String>) {
        push_best_effort(&mut self.errors, message.into());
    }

    /// Record one latency attempt taken now
    pub fn record_ping(&mut self, latency_ms: Option<f64>) {
        self.record_ping_at(latency_ms, Instant::now());
    }

    /// Record one latency attempt taken at `now`.
    ///
    /// Failed attempts still occupy a slot in the sample series so that it
    /// stays aligned with the attempt schedule.
    pub fn record_ping_at(&mut self, latency_ms: Option<f64>, now: Instant) {
        push_best_effort(&mut self.ping_samples, latency_ms);
        if let Some(value) = latency_ms {
            let timestamp = self.elapsed_secs(now);
            push_best_effort(&mut self.ping_history, TimePoint { timestamp, value });
        }
    }

    /// Record a throughput snapshot taken now
    pub fn record_throughput_snapshot(&mut self) -> ThroughputPoint {
        self.record_throughput_snapshot_at(Instant::now())
    }

    /// Record a throughput snapshot taken at `now`.
    ///
    /// The rate covers the interval since the previous snapshot; the first
    /// snapshot averages over the whole time since start.
    pub fn record_throughput_snapshot_at(&mut self, now: Instant) -> ThroughputPoint {
        let packets = self.counters.udp_packets_sent;
        let (since, base_packets) = self.last_snapshot.unwrap_or((self.start_time, 0));
        let window = now.saturating_duration_since(since).as_secs_f64();
        let delta = packets.saturating_sub(base_packets);
        let rate = if window > 0.0 {
            delta as f64 / window
        } else {
            0.0
        };

        let point = ThroughputPoint {
            timestamp: self.elapsed_secs(now),
            value: rate,
            total_packets: packets,
            total_bytes: self.counters.bytes_sent,
        };
        push_best_effort(&mut self.throughput_history, point);
        self.last_snapshot = Some((now, packets));
        point
    }

    /// Latency summary over successful samples
    pub fn ping_summary(&self) -> PingSummary {
        PingSummary::from_samples(self.successful_pings())
    }

    /// Successful latency samples in order
    pub fn successful_pings(&self) -> impl Iterator<Item = f64> + '_ {
        self.ping_samples.iter().flatten().copied()
    }

    /// Serializable view with errors capped at [`REPORTED_ERROR_LIMIT`]
    pub fn export(&self) -> StatsExport {
        StatsExport {
            counters: self.counters,
            error_count: self.errors.len() as u64,
            errors: self
                .errors
                .iter()
                .take(REPORTED_ERROR_LIMIT)
                .cloned()
                .collect(),
            ping: self.ping_summary(),
            ping_history: self.ping_history.clone(),
            throughput_history: self.throughput_history.clone(),
        }
    }

    fn elapsed_secs(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.start_time).as_secs_f64()
    }
}

fn push_best_effort<T>(items: &mut Vec<T>, item: T) {
    if items.try_reserve(1).is_ok() {
        items.push(item);
    }
}
