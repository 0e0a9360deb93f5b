//! Error types for fireload

use std::time::Duration;
use thiserror::Error;

/// Main error type for fireload operations
#[derive(Error, Debug)]
pub enum LoadError {
    /// Socket could not be created, bound, or used
    #[error("Socket error on {protocol}/{port}: {reason}")]
    Socket {
        /// Transport protocol ("udp" or "tcp")
        protocol: &'static str,
        /// Remote or local port the operation targeted
        port: u16,
        /// Reason for the socket failure
        reason: String,
    },

    /// Operation timed out error
    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Duration after which timeout occurred
        duration: Duration,
    },

    /// Target host name could not be resolved
    #[error("Failed to resolve target server {host}: {reason}")]
    Resolve {
        /// Host name that failed to resolve
        host: String,
        /// Reason for the resolution failure
        reason: String,
    },

    /// Missing configuration error
    #[error("Missing required configuration: {field}")]
    MissingConfiguration {
        /// Missing configuration field
        field: String,
    },

    /// Configuration value is present but unusable
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration {
        /// Offending configuration field
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Report could not be serialized or written
    #[error("Report error: {reason}")]
    Report {
        /// Reason for the report failure
        reason: String,
    },

    /// Server start failed
    #[error("Failed to start listener on {address}: {source}")]
    ServerStartFailed {
        /// Address that failed to bind
        address: std::net::SocketAddr,
        /// Underlying error
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Internal invariant violated; never caused by the network
    #[error("Internal error: {reason}")]
    Internal {
        /// Description of the violated invariant
        reason: String,
    },
}

impl LoadError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            LoadError::Socket { .. } => "SOCKET_ERROR".to_string(),
            LoadError::Timeout { .. } => "TIMEOUT".to_string(),
            LoadError::Resolve { .. } => "RESOLVE_FAILED".to_string(),
            LoadError::MissingConfiguration { .. } => "MISSING_CONFIGURATION".to_string(),
            LoadError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION".to_string(),
            LoadError::Report { .. } => "REPORT_ERROR".to_string(),
            LoadError::ServerStartFailed { .. } => "SERVER_START_FAILED".to_string(),
            LoadError::Internal { .. } => "INTERNAL_ERROR".to_string(),
        }
    }

    /// Whether this error should end a connection instead of being logged
    /// and skipped.
    ///
    /// Network failures are transient: the traffic loop records them and keeps
    /// going. Only internal faults are fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LoadError::Internal { .. })
    }

    pub(crate) fn udp(port: u16, err: impl std::fmt::Display) -> Self {
        LoadError::Socket {
            protocol: "udp",
            port,
            reason: err.to_string(),
        }
    }

    pub(crate) fn tcp(port: u16, err: impl std::fmt::Display) -> Self {
        LoadError::Socket {
            protocol: "tcp",
            port,
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for LoadError {
    fn from(err: serde_json::Error) -> Self {
        LoadError::Report {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = LoadError::udp(6962, "connection refused");
        assert_eq!(err.error_code(), "SOCKET_ERROR");
        assert_eq!(
            err.to_string(),
            "Socket error on udp/6962: connection refused"
        );

        let err = LoadError::Timeout {
            operation: "tcp connect".to_string(),
            duration: Duration::from_millis(500),
        };
        assert_eq!(err.error_code(), "TIMEOUT");
    }

    #[test]
    fn test_only_internal_errors_are_fatal() {
        assert!(!LoadError::tcp(21, "refused").is_fatal());
        assert!(!LoadError::Timeout {
            operation: "send".to_string(),
            duration: Duration::from_millis(100),
        }
        .is_fatal());
        assert!(LoadError::Internal {
            reason: "activity table empty".to_string(),
        }
        .is_fatal());
    }
}
