//! # Fireload - Firewall Load Testing with Simulated Game Clients
//!
//! Fireload checks a firewall ruleset under realistic load. It runs a fleet
//! of simulated Unreal Tournament style clients against a server behind the
//! firewall. Each connection mixes UDP gameplay, query and heartbeat
//! traffic with occasional TCP probes, measures latency, and keeps going
//! until the server tells it to stop or stops answering.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fireload::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), LoadError> {
//!     let config = SimulationConfig::from_env()?;
//!     let outcome = Fleet::new(config.clone())?.run().await?;
//!
//!     let report = SessionReport::build(&config, &outcome);
//!     ReportWriter::new("/shared").save(&report).await?;
//!     Ok(())
//! }
//! ```
//!
//! The `server` feature adds the companion test server that answers the
//! clients and broadcasts the shutdown token when it stops. The
//! `diagnostics` feature adds logging setup and the console summary.

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use fireload_core::{
    resolve_target, Activity, ActivityRunner, AggregateReport, ConnectionDriver,
    ConnectionIdentity, ConnectionOutcome, ConnectionReport, DriverSettings, Fleet, FleetOutcome,
    LoadError, ProtocolEndpointSet, ReportWriter, RunState, ServerProbe, SessionReport,
    ShutdownConfig, ShutdownListener, SimulationConfig, TerminationReason, TrafficGenerator,
    TrafficStats, TuningProfile, UdpServerProbe, UtNetworkSpecs,
};

#[cfg(feature = "server")]
pub use fireload_server::{Protocol, ServerConfig, ServerReport, TestServer};

#[cfg(feature = "diagnostics")]
pub use fireload_diagnostics::{init_logging, print_summary, render_summary};

// Command line layer
pub mod config;

pub use config::{ClientOverrides, OutputOptions, DEFAULT_REPORT_DIR};

#[cfg(feature = "server")]
pub use config::ServerOverrides;

/// Commonly used types
pub mod prelude {
    pub use crate::{
        ConnectionIdentity, Fleet, FleetOutcome, LoadError, ReportWriter, SessionReport,
        SimulationConfig, TerminationReason, TuningProfile,
    };

    #[cfg(feature = "server")]
    pub use crate::{ServerConfig, TestServer};
}
