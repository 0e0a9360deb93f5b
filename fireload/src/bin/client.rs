//! Simulated game client fleet
//!
//! Reads its configuration from the environment, applies command line
//! overrides, runs every connection until the server shuts down or stops
//! answering, then prints a summary and saves the JSON report.

use anyhow::Context;
use clap::Parser;
use fireload::{
    init_logging, print_summary, ClientOverrides, Fleet, OutputOptions, ReportWriter,
    SessionReport, SimulationConfig,
};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "fireload-client", version, about = "Simulate game clients against a firewalled server")]
struct Cli {
    #[command(flatten)]
    overrides: ClientOverrides,
    #[command(flatten)]
    output: OutputOptions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.output.log_level)?;

    let mut config = SimulationConfig::from_env().context("invalid client configuration")?;
    cli.overrides.apply(&mut config)?;

    info!(
        players = config.num_players,
        connections_per_player = config.connections_per_player,
        total_connections = config.total_connections(),
        target = %config.target_server,
        "Starting client simulation"
    );
    if let Some(deadline) = config.session_deadline {
        info!(deadline_secs = deadline.as_secs(), "Session deadline set");
    } else {
        info!("Running until the server shuts down or becomes unreachable");
    }

    let fleet = Fleet::new(config.clone())?;
    let outcome = fleet
        .run()
        .await
        .with_context(|| format!("could not start fleet against {}", config.target_server))?;

    let report = SessionReport::build(&config, &outcome);
    print_summary(&report);

    match ReportWriter::new(&cli.output.report_dir).save(&report).await {
        Ok(path) => info!(path = %path.display(), "Session report written"),
        Err(e) => warn!(error = %e, "Could not write session report"),
    }
    Ok(())
}
