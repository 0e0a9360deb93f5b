//! Command line overrides layered on top of the environment configuration

use clap::Args;
use fireload_core::{LoadError, SimulationConfig, TuningProfile};
use std::path::PathBuf;
use std::time::Duration;

#[cfg(feature = "server")]
use fireload_server::ServerConfig;
#[cfg(feature = "server")]
use std::net::IpAddr;

/// Default directory reports are written to
pub const DEFAULT_REPORT_DIR: &str = "/shared";

/// Client flags; anything left unset keeps its environment value
#[derive(Debug, Clone, Default, Args)]
pub struct ClientOverrides {
    /// Number of logical players
    #[arg(short = 'n', long)]
    pub players: Option<u32>,
    /// Concurrent connections per player
    #[arg(short = 'c', long)]
    pub connections: Option<u32>,
    /// Host name or address of the server under test
    #[arg(short = 't', long)]
    pub target: Option<String>,
    /// Tuning preset (responsive, fail_fast, conservative)
    #[arg(long)]
    pub profile: Option<String>,
    /// Stop every connection after this many seconds
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,
}

impl ClientOverrides {
    /// Apply the flags that were given and re-validate
    pub fn apply(&self, config: &mut SimulationConfig) -> Result<(), LoadError> {
        if let Some(profile) = &self.profile {
            config.tuning = TuningProfile::by_name(profile)?;
        }
        if let Some(players) = self.players {
            config.num_players = players;
        }
        if let Some(connections) = self.connections {
            config.connections_per_player = connections;
        }
        if let Some(target) = &self.target {
            config.target_server = target.clone();
        }
        if let Some(secs) = self.deadline {
            config.session_deadline = (secs > 0).then(|| Duration::from_secs(secs));
        }
        config.validate()
    }
}

/// Flags shared by both binaries
#[derive(Debug, Clone, Args)]
pub struct OutputOptions {
    /// Directory the JSON report is written to
    #[arg(long, default_value = DEFAULT_REPORT_DIR)]
    pub report_dir: PathBuf,
    /// Default log filter when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Server flags; anything left unset keeps its environment value
#[cfg(feature = "server")]
#[derive(Debug, Clone, Default, Args)]
pub struct ServerOverrides {
    /// Address every listener binds to
    #[arg(long)]
    pub bind: Option<IpAddr>,
    /// Additional hosts to notify on shutdown
    #[arg(long = "notify", value_name = "HOST")]
    pub extra_targets: Vec<String>,
}

#[cfg(feature = "server")]
impl ServerOverrides {
    /// Apply the flags that were given and re-validate
    pub fn apply(&self, config: &mut ServerConfig) -> Result<(), LoadError> {
        if let Some(bind) = self.bind {
            config.bind_ip = bind;
        }
        for target in &self.extra_targets {
            if !config.extra_targets.contains(target) {
                config.extra_targets.push(target.clone());
            }
        }
        config.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_flags_keep_config() {
        let mut config = SimulationConfig::default();
        ClientOverrides::default().apply(&mut config).unwrap();
        assert_eq!(config.num_players, 18);
        assert_eq!(config.connections_per_player, 3);
        assert!(config.session_deadline.is_none());
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = SimulationConfig::default();
        let overrides = ClientOverrides {
            players: Some(4),
            connections: Some(2),
            target: Some("10.0.0.5".to_string()),
            profile: Some("fail_fast".to_string()),
            deadline: Some(30),
        };

        overrides.apply(&mut config).unwrap();

        assert_eq!(config.total_connections(), 8);
        assert_eq!(config.target_server, "10.0.0.5");
        assert_eq!(config.tuning, TuningProfile::fail_fast());
        assert_eq!(config.session_deadline, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_zero_deadline_means_none() {
        let mut config = SimulationConfig {
            session_deadline: Some(Duration::from_secs(5)),
            ..SimulationConfig::default()
        };
        let overrides = ClientOverrides {
            deadline: Some(0),
            ..ClientOverrides::default()
        };
        overrides.apply(&mut config).unwrap();
        assert!(config.session_deadline.is_none());
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut config = SimulationConfig::default();
        let overrides = ClientOverrides {
            players: Some(0),
            ..ClientOverrides::default()
        };
        let err = overrides.apply(&mut config).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIGURATION");
    }

    #[cfg(feature = "server")]
    #[test]
    fn test_server_overrides_merge_targets() {
        let mut config = ServerConfig {
            extra_targets: vec!["client-a".to_string()],
            ..ServerConfig::default()
        };
        let overrides = ServerOverrides {
            bind: Some("127.0.0.1".parse().unwrap()),
            extra_targets: vec!["client-a".to_string(), "client-b".to_string()],
        };

        overrides.apply(&mut config).unwrap();

        assert_eq!(config.bind_ip, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(config.extra_targets, ["client-a", "client-b"]);
    }
}
