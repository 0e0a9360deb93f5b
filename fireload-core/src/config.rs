//! Simulation configuration and tuning profiles
//!
//! All values that shape a run live here: fleet size, target server, the UT
//! network model used to size gameplay packets, and the timing knobs of the
//! per-connection loop. Timing knobs have been retuned repeatedly against
//! real deployments, so they are grouped into [`TuningProfile`] presets and
//! can be overridden individually from the environment.

use crate::endpoints::ProtocolEndpointSet;
use crate::error::LoadError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Unreal Tournament network model parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtNetworkSpecs {
    /// IP + UDP header bytes subtracted from every packet budget
    #[serde(rename = "udp_overhead")]
    pub udp_overhead_bytes: u32,
    /// Server tickrate in Hz
    #[serde(rename = "tickrate")]
    pub tickrate_hz: u32,
    /// Netspeed most clients run with, in bytes per second
    pub default_netspeed: u32,
    /// Highest netspeed a client may select, in bytes per second
    pub max_netspeed: u32,
}

impl UtNetworkSpecs {
    /// Payload bytes one tick can carry at the given netspeed
    pub fn payload_size(&self, netspeed: u32) -> usize {
        let per_tick = netspeed / self.tickrate_hz.max(1);
        per_tick.saturating_sub(self.udp_overhead_bytes) as usize
    }

    /// Payload size at the default netspeed
    pub fn default_payload_size(&self) -> usize {
        self.payload_size(self.default_netspeed)
    }

    /// Payload size at the maximum netspeed
    pub fn max_payload_size(&self) -> usize {
        self.payload_size(self.max_netspeed)
    }

    /// Time between two server ticks
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tickrate_hz.max(1) as f64)
    }
}

impl Default for UtNetworkSpecs {
    fn default() -> Self {
        Self {
            udp_overhead_bytes: 28,
            tickrate_hz: 85,
            default_netspeed: 40_000,
            max_netspeed: 100_000,
        }
    }
}

/// Timing and tolerance parameters of the connection loop
#[derive(Debug, Clone, PartialEq)]
pub struct TuningProfile {
    /// Time between latency probes
    pub ping_interval: Duration,
    /// Time between liveness probes
    pub availability_check_interval: Duration,
    /// Time between throughput snapshots
    pub throughput_snapshot_interval: Duration,
    /// Consecutive failed liveness probes that end a connection
    pub max_consecutive_failures: u32,
    /// Upper bound on a single UDP send
    pub udp_send_timeout: Duration,
    /// Upper bound on a TCP connect (and the identification write)
    pub tcp_connect_timeout: Duration,
    /// How long the liveness probe waits for a reply on each port
    pub availability_timeout: Duration,
    /// How long the latency probe waits for a reply on each port
    pub ping_timeout: Duration,
    /// Lower bound of the pause after a non-gameplay activity
    pub activity_delay_min: Duration,
    /// Upper bound of the pause after a non-gameplay activity
    pub activity_delay_max: Duration,
    /// Pause after a failed activity
    pub error_pause: Duration,
    /// Delay between spawning the shutdown listener and the first activity
    pub startup_delay: Duration,
    /// Lower bound of the stagger between connection starts
    pub stagger_min: Duration,
    /// Upper bound of the stagger between connection starts
    pub stagger_max: Duration,
}

impl TuningProfile {
    /// Short timeouts, frequent checks and a high failure tolerance to make
    /// up for them
    pub fn responsive() -> Self {
        Self {
            ping_interval: Duration::from_secs(2),
            availability_check_interval: Duration::from_secs(5),
            throughput_snapshot_interval: Duration::from_secs(2),
            max_consecutive_failures: 8,
            udp_send_timeout: Duration::from_millis(100),
            tcp_connect_timeout: Duration::from_millis(500),
            availability_timeout: Duration::from_millis(300),
            ping_timeout: Duration::from_millis(500),
            activity_delay_min: Duration::from_millis(50),
            activity_delay_max: Duration::from_millis(500),
            error_pause: Duration::from_millis(1),
            startup_delay: Duration::from_millis(100),
            stagger_min: Duration::from_millis(10),
            stagger_max: Duration::from_millis(50),
        }
    }

    /// Gives up quickly once the server stops answering
    pub fn fail_fast() -> Self {
        Self {
            availability_check_interval: Duration::from_secs(2),
            max_consecutive_failures: 2,
            ..Self::responsive()
        }
    }

    /// Slower cadence with longer waits, for congested links
    pub fn conservative() -> Self {
        Self {
            ping_interval: Duration::from_secs(5),
            availability_check_interval: Duration::from_secs(15),
            throughput_snapshot_interval: Duration::from_secs(5),
            max_consecutive_failures: 5,
            availability_timeout: Duration::from_millis(1000),
            ping_timeout: Duration::from_millis(1000),
            activity_delay_min: Duration::from_millis(100),
            activity_delay_max: Duration::from_millis(2000),
            ..Self::responsive()
        }
    }

    /// Look up a preset by name
    pub fn by_name(name: &str) -> Result<Self, LoadError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "responsive" => Ok(Self::responsive()),
            "fail_fast" | "fail-fast" => Ok(Self::fail_fast()),
            "conservative" => Ok(Self::conservative()),
            other => Err(LoadError::InvalidConfiguration {
                field: "FIRELOAD_PROFILE".to_string(),
                reason: format!("unknown tuning profile '{}'", other),
            }),
        }
    }
}

impl Default for TuningProfile {
    fn default() -> Self {
        Self::responsive()
    }
}

/// Out-of-band shutdown channel settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownConfig {
    /// Exact datagram text that requests a shutdown
    pub token: String,
    /// First port of the shutdown port range
    pub base_port: u16,
    /// Number of ports in the shutdown port range; one per connection, so
    /// it bounds the fleet size
    pub port_span: u16,
    /// Receive timeout of one listener poll
    pub poll_interval: Duration,
}

impl ShutdownConfig {
    /// Last port of the range, or `None` when the range is empty or runs
    /// past `u16::MAX`
    pub fn last_port(&self) -> Option<u16> {
        let span = self.port_span.checked_sub(1)?;
        self.base_port.checked_add(span)
    }

    /// Every port of the range, in order
    pub fn ports(&self) -> impl Iterator<Item = u16> {
        let base = self.base_port;
        (0..self.port_span).filter_map(move |offset| base.checked_add(offset))
    }

    /// Reject empty ranges and ranges that overflow the port space
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.port_span == 0 {
            return Err(invalid("shutdown.port_span", "must be at least 1"));
        }
        if self.last_port().is_none() {
            return Err(invalid(
                "shutdown.port_span",
                &format!(
                    "{} ports from {} run past port {}",
                    self.port_span,
                    self.base_port,
                    u16::MAX
                ),
            ));
        }
        Ok(())
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            token: "SERVER_SHUTDOWN".to_string(),
            base_port: 7778,
            port_span: 100,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Full configuration of one simulation session
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Number of logical players
    pub num_players: u32,
    /// Concurrent connections opened by each player
    pub connections_per_player: u32,
    /// Nominal session length; reported, never enforced
    pub duration: Duration,
    /// Host name or IP address of the server under test
    pub target_server: String,
    /// Packet sizing model
    pub ut: UtNetworkSpecs,
    /// Loop timing and tolerance
    pub tuning: TuningProfile,
    /// Shutdown listener settings
    pub shutdown: ShutdownConfig,
    /// Ports the traffic targets
    pub endpoints: ProtocolEndpointSet,
    /// Hard wall-clock limit for the whole fleet (None = run until the
    /// server goes away)
    pub session_deadline: Option<Duration>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_players: 18,
            connections_per_player: 3,
            duration: Duration::from_secs(120),
            target_server: "nftables-test-container".to_string(),
            ut: UtNetworkSpecs::default(),
            tuning: TuningProfile::default(),
            shutdown: ShutdownConfig::default(),
            endpoints: ProtocolEndpointSet::default(),
            session_deadline: None,
        }
    }
}

impl SimulationConfig {
    /// Total number of connection drivers the fleet will run
    pub fn total_connections(&self) -> u32 {
        self.num_players.saturating_mul(self.connections_per_player)
    }

    /// Build a configuration from the process environment
    pub fn from_env() -> Result<Self, LoadError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup, starting from the
    /// defaults and overriding every key that is present.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(profile) = lookup("FIRELOAD_PROFILE") {
            config.tuning = TuningProfile::by_name(&profile)?;
        }
        if let Some(v) = parse_key::<u32, _>(&lookup, "NUM_CLIENTS")? {
            config.num_players = v;
        }
        if let Some(v) = parse_key::<u32, _>(&lookup, "CONNECTIONS_PER_PLAYER")? {
            config.connections_per_player = v;
        }
        if let Some(v) = parse_key::<u64, _>(&lookup, "DURATION")? {
            config.duration = Duration::from_secs(v);
        }
        if let Some(host) = lookup("SERVER_IP") {
            config.target_server = host;
        }
        if let Some(v) = parse_key::<u32, _>(&lookup, "UT_UDP_OVERHEAD")? {
            config.ut.udp_overhead_bytes = v;
        }
        if let Some(v) = parse_key::<u32, _>(&lookup, "UT_TICKRATE")? {
            config.ut.tickrate_hz = v;
        }
        if let Some(v) = parse_key::<u32, _>(&lookup, "UT_DEFAULT_NETSPEED")? {
            config.ut.default_netspeed = v;
        }
        if let Some(v) = parse_key::<u32, _>(&lookup, "UT_MAX_NETSPEED")? {
            config.ut.max_netspeed = v;
        }
        if let Some(v) = parse_key::<f64, _>(&lookup, "PING_INTERVAL_SECS")? {
            config.tuning.ping_interval = secs_f64("PING_INTERVAL_SECS", v)?;
        }
        if let Some(v) = parse_key::<f64, _>(&lookup, "SERVER_CHECK_INTERVAL_SECS")? {
            config.tuning.availability_check_interval =
                secs_f64("SERVER_CHECK_INTERVAL_SECS", v)?;
        }
        if let Some(v) = parse_key::<u32, _>(&lookup, "MAX_CONSECUTIVE_FAILURES")? {
            config.tuning.max_consecutive_failures = v;
        }
        if let Some(v) = parse_key::<u16, _>(&lookup, "SHUTDOWN_BASE_PORT")? {
            config.shutdown.base_port = v;
        }
        if let Some(v) = parse_key::<u16, _>(&lookup, "SHUTDOWN_PORT_SPAN")? {
            config.shutdown.port_span = v;
        }
        if let Some(v) = parse_key::<u64, _>(&lookup, "SESSION_DEADLINE_SECS")? {
            config.session_deadline = (v > 0).then(|| Duration::from_secs(v));
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the simulation cannot run with
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.num_players == 0 {
            return Err(invalid("num_players", "must be at least 1"));
        }
        if self.connections_per_player == 0 {
            return Err(invalid("connections_per_player", "must be at least 1"));
        }
        if self.target_server.trim().is_empty() {
            return Err(LoadError::MissingConfiguration {
                field: "target_server".to_string(),
            });
        }
        if self.ut.tickrate_hz == 0 {
            return Err(invalid("tickrate_hz", "must be greater than zero"));
        }
        if self.ut.max_netspeed < self.ut.default_netspeed {
            return Err(invalid(
                "max_netspeed",
                &format!(
                    "{} is below default_netspeed {}",
                    self.ut.max_netspeed, self.ut.default_netspeed
                ),
            ));
        }
        if self.tuning.max_consecutive_failures == 0 {
            return Err(invalid("max_consecutive_failures", "must be at least 1"));
        }
        if self.tuning.activity_delay_max < self.tuning.activity_delay_min {
            return Err(invalid("activity_delay_max", "is below activity_delay_min"));
        }
        if self.tuning.stagger_max < self.tuning.stagger_min {
            return Err(invalid("stagger_max", "is below stagger_min"));
        }
        if self.endpoints.availability_ports.is_empty() {
            return Err(invalid("availability_ports", "at least one port is required"));
        }
        if self.endpoints.ping_ports.is_empty() {
            return Err(invalid("ping_ports", "at least one port is required"));
        }
        if self.endpoints.ordinary.len() < 2 {
            return Err(invalid("ordinary", "discovery queries need two ports"));
        }
        if self.endpoints.bot_query.is_empty() || self.endpoints.tcp.is_empty() {
            return Err(invalid("endpoints", "bot query and TCP port lists must not be empty"));
        }
        if self.shutdown.token.is_empty() {
            return Err(invalid("shutdown.token", "must not be empty"));
        }
        self.shutdown.validate()?;
        if self.total_connections() > u32::from(self.shutdown.port_span) {
            return Err(invalid(
                "shutdown.port_span",
                &format!(
                    "{} connections need one shutdown port each, span is {}",
                    self.total_connections(),
                    self.shutdown.port_span
                ),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> LoadError {
    LoadError::InvalidConfiguration {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_key<T, F>(lookup: &F, key: &str) -> Result<Option<T>, LoadError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(key, &format!("'{}': {}", raw, e))),
    }
}

fn secs_f64(key: &str, value: f64) -> Result<Duration, LoadError> {
    Duration::try_from_secs_f64(value).map_err(|e| invalid(key, &e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_payload_size() {
        let specs = UtNetworkSpecs {
            udp_overhead_bytes: 28,
            tickrate_hz: 85,
            default_netspeed: 40_000,
            max_netspeed: 100_000,
        };
        assert_eq!(specs.default_payload_size(), 442);
        assert_eq!(specs.max_payload_size(), 1148);
    }

    #[test]
    fn test_payload_size_never_underflows() {
        let specs = UtNetworkSpecs {
            udp_overhead_bytes: 28,
            tickrate_hz: 85,
            default_netspeed: 1_000,
            max_netspeed: 1_000,
        };
        assert_eq!(specs.default_payload_size(), 0);
    }

    #[test]
    fn test_tick_interval() {
        let interval = UtNetworkSpecs::default().tick_interval();
        assert!((interval.as_secs_f64() - 0.011_764).abs() < 1e-5);
    }

    #[test]
    fn test_profiles_differ_in_tolerance() {
        assert_eq!(TuningProfile::responsive().max_consecutive_failures, 8);
        assert_eq!(TuningProfile::fail_fast().max_consecutive_failures, 2);
        assert_eq!(TuningProfile::conservative().max_consecutive_failures, 5);
        assert!(TuningProfile::by_name("warp-speed").is_err());
    }

    #[test]
    fn test_from_lookup_overrides_defaults() {
        let config = SimulationConfig::from_lookup(lookup_from(&[
            ("NUM_CLIENTS", "4"),
            ("CONNECTIONS_PER_PLAYER", "2"),
            ("SERVER_IP", "10.0.0.5"),
            ("UT_TICKRATE", "60"),
            ("FIRELOAD_PROFILE", "fail-fast"),
            ("PING_INTERVAL_SECS", "3.5"),
            ("SESSION_DEADLINE_SECS", "90"),
        ]))
        .unwrap();

        assert_eq!(config.num_players, 4);
        assert_eq!(config.connections_per_player, 2);
        assert_eq!(config.total_connections(), 8);
        assert_eq!(config.target_server, "10.0.0.5");
        assert_eq!(config.ut.tickrate_hz, 60);
        assert_eq!(config.tuning.max_consecutive_failures, 2);
        assert_eq!(config.tuning.ping_interval, Duration::from_millis(3500));
        assert_eq!(config.session_deadline, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = SimulationConfig::from_lookup(lookup_from(&[("NUM_CLIENTS", "many")]))
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIGURATION");
    }

    #[test]
    fn test_validate_rejects_inverted_netspeed() {
        let mut config = SimulationConfig::default();
        config.ut.max_netspeed = 10_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_fleet_larger_than_port_span() {
        let mut config = SimulationConfig {
            num_players: 10,
            connections_per_player: 3,
            ..SimulationConfig::default()
        };
        config.shutdown.port_span = 29;
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIGURATION");

        config.shutdown.port_span = 30;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_port_range_overflow() {
        let mut config = SimulationConfig::default();
        config.shutdown.base_port = u16::MAX - 10;
        assert!(config.validate().is_err());

        config.shutdown.port_span = 11;
        config.num_players = 11;
        config.connections_per_player = 1;
        assert!(config.validate().is_ok());
        assert_eq!(config.shutdown.last_port(), Some(u16::MAX));
    }

    #[test]
    fn test_default_fleet_fits_port_span() {
        let config = SimulationConfig::default();
        assert!(config.total_connections() <= u32::from(config.shutdown.port_span));
        assert_eq!(config.shutdown.ports().count(), 100);
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = SimulationConfig::default();
        config.tuning.max_consecutive_failures = 0;
        assert!(config.validate().is_err());
    }
}
