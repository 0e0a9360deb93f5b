//! # Fireload Core
//!
//! Concurrent game-client simulation for firewall load testing.
//! This crate runs a fleet of simulated Unreal Tournament style clients
//! against a firewalled server, each connection generating realistic UDP
//! and TCP traffic, probing the server's liveness and latency, and
//! listening for an out-of-band shutdown token. When every connection has
//! ended, their statistics are aggregated into a session report.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod driver;
pub mod endpoints;
pub mod error;
pub mod fleet;
pub mod identity;
pub mod packet;
pub mod probe;
pub mod report;
pub mod shutdown;
pub mod stats;
pub mod traffic;

// Re-export main types
pub use config::{ShutdownConfig, SimulationConfig, TuningProfile, UtNetworkSpecs};
pub use driver::{ConnectionDriver, ConnectionOutcome, DriverSettings, TerminationReason};
pub use endpoints::{ProtocolEndpointSet, ServerRole};
pub use error::LoadError;
pub use fleet::{resolve_target, Fleet, FleetOutcome};
pub use identity::ConnectionIdentity;
pub use packet::{GameplayPacket, GameplayPacketKind, NetspeedChoice};
pub use probe::{ServerProbe, UdpServerProbe};
pub use report::{
    AggregateReport, ConnectionReport, ReportWriter, SessionReport, SimulationConfigReport,
    TerminationCounts,
};
pub use shutdown::{ListenerExit, RunState, ShutdownListener, ShutdownListenerConfig};
pub use stats::{
    PingSummary, StatsExport, ThroughputPoint, TimePoint, TrafficCounters, TrafficStats,
    REPORTED_ERROR_LIMIT,
};
pub use traffic::{Activity, ActivityRunner, TrafficGenerator, TrafficTimeouts};
