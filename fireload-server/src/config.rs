//! Test server configuration

use fireload_core::{LoadError, ShutdownConfig};
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

/// Ports and timing of the companion test server
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address every listener binds to
    pub bind_ip: IpAddr,
    /// TCP ports to accept connections on
    pub tcp_ports: Vec<u16>,
    /// UDP ports to answer datagrams on
    pub udp_ports: Vec<u16>,
    /// Receive/accept timeout of one listener poll
    pub poll_interval: Duration,
    /// Time between status log lines while running
    pub status_interval: Duration,
    /// Shutdown token and the client port range it is sent to
    pub shutdown: ShutdownConfig,
    /// Hosts notified on stop in addition to every client seen
    pub extra_targets: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tcp_ports: vec![21, 1194, 6567, 19999],
            udp_ports: vec![6962, 6963, 9090, 9091, 7787, 19999, 6979, 9696],
            poll_interval: Duration::from_secs(1),
            status_interval: Duration::from_secs(10),
            shutdown: ShutdownConfig::default(),
            extra_targets: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Build a configuration from the process environment
    pub fn from_env() -> Result<Self, LoadError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Port lists are comma separated; `SHUTDOWN_TARGETS` lists extra host
    /// names or addresses to notify on stop.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup("SERVER_BIND_IP") {
            config.bind_ip = parse_value("SERVER_BIND_IP", &raw)?;
        }
        if let Some(raw) = lookup("SERVER_TCP_PORTS") {
            config.tcp_ports = parse_list("SERVER_TCP_PORTS", &raw)?;
        }
        if let Some(raw) = lookup("SERVER_UDP_PORTS") {
            config.udp_ports = parse_list("SERVER_UDP_PORTS", &raw)?;
        }
        if let Some(raw) = lookup("SHUTDOWN_BASE_PORT") {
            config.shutdown.base_port = parse_value("SHUTDOWN_BASE_PORT", &raw)?;
        }
        if let Some(raw) = lookup("SHUTDOWN_PORT_SPAN") {
            config.shutdown.port_span = parse_value("SHUTDOWN_PORT_SPAN", &raw)?;
        }
        if let Some(raw) = lookup("SHUTDOWN_TARGETS") {
            config.extra_targets = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the server cannot run with
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.tcp_ports.is_empty() && self.udp_ports.is_empty() {
            return Err(LoadError::MissingConfiguration {
                field: "tcp_ports/udp_ports".to_string(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(LoadError::InvalidConfiguration {
                field: "poll_interval".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.shutdown.token.is_empty() {
            return Err(LoadError::InvalidConfiguration {
                field: "shutdown.token".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        self.shutdown.validate()
    }

    /// Every client port the shutdown token is sent to
    pub fn shutdown_ports(&self) -> impl Iterator<Item = u16> {
        self.shutdown.ports()
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, LoadError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| LoadError::InvalidConfiguration {
        field: key.to_string(),
        reason: format!("'{}': {}", raw, e),
    })
}

fn parse_list(key: &str, raw: &str) -> Result<Vec<u16>, LoadError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_value(key, s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        let config = ServerConfig::default();
        assert_eq!(config.tcp_ports, vec![21, 1194, 6567, 19999]);
        assert_eq!(config.udp_ports.len(), 8);
        let ports: Vec<u16> = config.shutdown_ports().collect();
        assert_eq!(ports.first(), Some(&7778));
        assert_eq!(ports.last(), Some(&7877));
    }

    #[test]
    fn test_shutdown_range_from_lookup() {
        let config = ServerConfig::from_lookup(|key| match key {
            "SHUTDOWN_BASE_PORT" => Some("40000".to_string()),
            "SHUTDOWN_PORT_SPAN" => Some("12".to_string()),
            _ => None,
        })
        .unwrap();
        let ports: Vec<u16> = config.shutdown_ports().collect();
        assert_eq!(ports, (40000..40012).collect::<Vec<_>>());
    }

    #[test]
    fn test_overflowing_shutdown_range_rejected() {
        let err = ServerConfig::from_lookup(|key| match key {
            "SHUTDOWN_BASE_PORT" => Some("65530".to_string()),
            "SHUTDOWN_PORT_SPAN" => Some("10".to_string()),
            _ => None,
        })
        .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIGURATION");
    }

    #[test]
    fn test_port_lists_from_lookup() {
        let config = ServerConfig::from_lookup(|key| match key {
            "SERVER_TCP_PORTS" => Some("21, 8080".to_string()),
            "SERVER_UDP_PORTS" => Some("6962".to_string()),
            "SHUTDOWN_TARGETS" => Some("game-client, 10.0.0.7,".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.tcp_ports, vec![21, 8080]);
        assert_eq!(config.udp_ports, vec![6962]);
        assert_eq!(config.extra_targets, vec!["game-client", "10.0.0.7"]);
    }

    #[test]
    fn test_bad_port_rejected() {
        let err = ServerConfig::from_lookup(|key| {
            (key == "SERVER_UDP_PORTS").then(|| "6962,seventy".to_string())
        })
        .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIGURATION");
    }
}
