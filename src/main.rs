//! pebblekv - A Small In-Memory Key-Value Server
//!
//! Entry point: parses the command line, sets up logging, binds the
//! listener and serves until Ctrl+C.

use anyhow::Context;
use pebblekv::config::{Config, Invocation, HELP};
use pebblekv::server::Server;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match Config::from_args(std::env::args().skip(1)) {
        Ok(Invocation::Serve(config)) => config,
        Ok(Invocation::Help) => {
            println!("{}", HELP);
            return Ok(());
        }
        Ok(Invocation::Version) => {
            println!("pebblekv version {}", pebblekv::VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("{}", HELP);
            std::process::exit(1);
        }
    };

    let directives = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    FmtSubscriber::builder()
        .with_env_filter(config.log_filter(&directives))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let server = Server::bind(&config)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;

    info!(version = pebblekv::VERSION, "pebblekv started");

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    server.run_until(shutdown).await;
    Ok(())
}
