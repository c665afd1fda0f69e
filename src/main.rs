//! line-server: accepts TCP connections and logs one message from each.

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use line_server::{error::Result, Cli, LogSink, Server};

fn main() -> Result<()> {
    // Invalid or missing arguments print usage and exit here.
    let cli = Cli::parse();
    let config = cli.into_config()?;

    let sink = Arc::new(LogSink::open(&config.log_file, config.console)?);
    setup_logging(config.verbose, Arc::clone(&sink));

    let server = match Server::bind(&config, sink) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start server: {}", e);
            return Err(e);
        }
    };
    info!(
        workers = config.workers,
        log_file = %config.log_file.display(),
        "line server listening on {}",
        server.local_endpoint()
    );

    let status = server.serve();
    info!(code = status.code(), "line server exiting");
    Ok(())
}

/// Routes `tracing` output into the log sink; `RUST_LOG` overrides the level.
fn setup_logging(verbose: bool, sink: Arc<LogSink>) {
    use tracing_subscriber::prelude::*;

    let default_level = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(sink)
                .with_ansi(false)
                .with_target(false)
                .with_thread_names(true),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .init();
}
