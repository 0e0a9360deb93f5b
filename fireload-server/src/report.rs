//! Server-side session report

use crate::listener::Protocol;
use chrono::{DateTime, Utc};
use fireload_core::LoadError;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Totals of one listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortReport {
    /// Listener protocol
    pub protocol: Protocol,
    /// Listener port
    pub port: u16,
    /// TCP connections accepted
    pub connections: u64,
    /// UDP datagrams received
    pub packets: u64,
    /// UDP payload bytes received
    pub bytes_received: u64,
}

/// What the test server saw during one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerReport {
    /// When the listeners started
    pub started_at: DateTime<Utc>,
    /// When the server stopped
    pub stopped_at: DateTime<Utc>,
    /// Seconds between start and stop
    pub uptime_secs: f64,
    /// Per-listener totals, TCP first, each by port
    pub ports: Vec<PortReport>,
    /// TCP connections over all listeners
    pub total_tcp_connections: u64,
    /// UDP datagrams over all listeners
    pub total_udp_packets: u64,
    /// Distinct client addresses seen
    pub tracked_clients: Vec<IpAddr>,
    /// Shutdown datagrams sent on stop
    pub shutdown_notifications_sent: u64,
}

impl ServerReport {
    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String, LoadError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report into `dir` and return its path
    pub async fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf, LoadError> {
        let dir = dir.as_ref();
        let path = dir.join(format!(
            "server-report-{}.json",
            self.stopped_at.format("%Y%m%d-%H%M%S")
        ));
        let to_report_error = |e: std::io::Error| LoadError::Report {
            reason: format!("{}: {}", path.display(), e),
        };
        tokio::fs::create_dir_all(dir).await.map_err(to_report_error)?;
        tokio::fs::write(&path, self.to_json()?)
            .await
            .map_err(to_report_error)?;
        Ok(path)
    }
}
