//! # Fireload Diagnostics
//!
//! Logging setup and console output for fireload.
//! Installs the tracing subscriber and renders the end-of-session summary.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod console;
pub mod debug_logger;

// Re-export main types
pub use console::{print_summary, render_summary, top_connections, TOP_CONNECTIONS};
pub use debug_logger::{init_logging, log_filter, LOG_FILTER_ENV};
