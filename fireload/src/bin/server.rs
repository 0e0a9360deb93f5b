//! Companion test server
//!
//! Listens on the allowed ports until the duration elapses or Ctrl-C
//! arrives, then notifies every client it has seen and saves its report.

use anyhow::Context;
use clap::Parser;
use fireload::{init_logging, OutputOptions, ServerConfig, ServerOverrides, TestServer};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "fireload-server", version, about = "Answer fireload clients behind the firewall")]
struct Cli {
    /// Seconds to serve before shutting down (0 = until Ctrl-C)
    #[arg(short, long, default_value_t = 0)]
    duration: u64,
    #[command(flatten)]
    overrides: ServerOverrides,
    #[command(flatten)]
    output: OutputOptions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.output.log_level)?;

    let mut config = ServerConfig::from_env().context("invalid server configuration")?;
    cli.overrides.apply(&mut config)?;

    let mut server = TestServer::new(config);
    let listeners = server.start().await.context("no listener could be started")?;
    info!(listeners, "Serving, press Ctrl-C to stop");

    if cli.duration == 0 {
        tokio::select! {
            _ = serve_forever(&server) => {}
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Ctrl-C handler failed, stopping");
                }
            }
        }
    } else {
        tokio::select! {
            _ = server.run_for(Duration::from_secs(cli.duration)) => {
                info!(secs = cli.duration, "Run duration elapsed");
            }
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    let report = server.stop().await;
    match report.save(&cli.output.report_dir).await {
        Ok(path) => info!(path = %path.display(), "Server report written"),
        Err(e) => warn!(error = %e, "Could not write server report"),
    }
    Ok(())
}

async fn serve_forever(server: &TestServer) {
    loop {
        server.run_for(Duration::from_secs(3600)).await;
    }
}
