//! Human-readable session summary

use fireload_core::{ConnectionReport, SessionReport};
use std::fmt::Write;

/// Number of connections listed in the activity ranking
pub const TOP_CONNECTIONS: usize = 5;

const RULE: &str = "============================================================";

/// Render the end-of-session summary
pub fn render_summary(report: &SessionReport) -> String {
    let mut out = String::new();
    // writing into a String cannot fail
    let _ = write_summary(&mut out, report);
    out
}

/// Print the end-of-session summary to stdout
pub fn print_summary(report: &SessionReport) {
    print!("{}", render_summary(report));
}

/// Connections with the most UDP packets sent, busiest first
pub fn top_connections(report: &SessionReport, limit: usize) -> Vec<&ConnectionReport> {
    let mut ranked: Vec<&ConnectionReport> = report.player_details.iter().collect();
    ranked.sort_by(|a, b| {
        b.stats
            .counters
            .udp_packets_sent
            .cmp(&a.stats.counters.udp_packets_sent)
    });
    ranked.truncate(limit);
    ranked
}

fn write_summary(out: &mut String, report: &SessionReport) -> std::fmt::Result {
    let config = &report.simulation_config;
    let summary = &report.summary_stats;
    let duration = config.session_duration.max(f64::EPSILON);

    writeln!(out)?;
    writeln!(out, "{}", RULE)?;
    writeln!(out, "CLIENT SIMULATION REPORT")?;
    writeln!(out, "{}", RULE)?;
    writeln!(out, "Session: {}", report.session_id)?;
    writeln!(out, "Target Server: {}", config.target_server)?;
    writeln!(out, "Session Duration: {:.1} seconds", config.session_duration)?;
    writeln!(
        out,
        "Connections: {} ({} players x {})",
        summary.total_players, config.num_players, config.connections_per_player
    )?;
    writeln!(
        out,
        "Terminations: {} graceful, {} unreachable, {} crashed",
        summary.terminations.graceful, summary.terminations.unreachable, summary.terminations.crashed
    )?;
    writeln!(out)?;

    writeln!(out, "TRAFFIC SUMMARY:")?;
    writeln!(out, "  Total UDP Packets Sent: {}", summary.total_udp_packets)?;
    writeln!(out, "  UDP Responses Counted: {}", summary.total_udp_responses)?;
    writeln!(out, "  UDP Timeouts: {}", summary.total_udp_timeouts)?;
    writeln!(out, "  UDP Success Rate: {:.2}%", summary.udp_success_rate)?;
    writeln!(
        out,
        "  Total TCP Connection Attempts: {}",
        summary.total_tcp_connections + summary.total_tcp_failed
    )?;
    writeln!(out, "  TCP Connections Successful: {}", summary.total_tcp_connections)?;
    writeln!(out, "  TCP Connections Failed: {}", summary.total_tcp_failed)?;
    writeln!(out, "  TCP Success Rate: {:.2}%", summary.tcp_success_rate)?;
    writeln!(out)?;

    writeln!(out, "BANDWIDTH:")?;
    writeln!(
        out,
        "  Total Bytes Sent: {} ({:.2} KB)",
        summary.total_bytes_sent,
        summary.total_bytes_sent as f64 / 1024.0
    )?;
    writeln!(
        out,
        "  Total Bytes Received: {} ({:.2} KB)",
        summary.total_bytes_received,
        summary.total_bytes_received as f64 / 1024.0
    )?;
    if summary.total_players > 0 {
        writeln!(
            out,
            "  Average per Connection: {:.0} bytes sent",
            summary.total_bytes_sent as f64 / summary.total_players as f64
        )?;
    }
    writeln!(out)?;

    writeln!(out, "PERFORMANCE:")?;
    writeln!(
        out,
        "  Packets per Second: {:.2}",
        summary.total_udp_packets as f64 / duration
    )?;
    writeln!(
        out,
        "  Bytes per Second: {:.2}",
        summary.total_bytes_sent as f64 / duration
    )?;
    writeln!(out, "  Total Errors: {}", summary.total_errors)?;
    match (summary.ping.min_ms, summary.ping.max_ms, summary.ping.avg_ms) {
        (Some(min), Some(max), Some(avg)) => writeln!(
            out,
            "  Ping (ms): min={:.2}, max={:.2}, avg={:.2}, count={}",
            min, max, avg, summary.ping.count
        )?,
        _ => writeln!(out, "  Ping (ms): No data")?,
    }
    writeln!(out)?;

    writeln!(out, "TOP {} MOST ACTIVE CONNECTIONS:", TOP_CONNECTIONS)?;
    for connection in top_connections(report, TOP_CONNECTIONS) {
        writeln!(
            out,
            "  Player {}: {} UDP, {} TCP, {} errors ({})",
            connection.player_id,
            connection.stats.counters.udp_packets_sent,
            connection.stats.counters.tcp_connections_succeeded,
            connection.stats.error_count,
            connection.termination_reason
        )?;
    }
    writeln!(out)?;
    Ok(())
}
