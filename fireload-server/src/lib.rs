//! # Fireload Server
//!
//! Companion test server for fireload. It listens on the TCP and UDP ports
//! the firewall under test should let through, acknowledges client
//! traffic so liveness and latency probes get answers, counts what arrives
//! per port, and broadcasts the shutdown token to every known client when
//! it stops.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod broadcast;
pub mod config;
pub mod listener;
pub mod report;
pub mod server;

// Re-export main types
pub use broadcast::{resolve_targets, BroadcastSummary, ShutdownBroadcaster};
pub use config::ServerConfig;
pub use listener::{ClientSet, ListenerStats, PortListener, Protocol};
pub use report::{PortReport, ServerReport};
pub use server::{PortStatsMap, TestServer};
