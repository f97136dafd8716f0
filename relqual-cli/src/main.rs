mod cli;
mod commands;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::info;
use tracing_subscriber::EnvFilter;

use cli::Cli;

/// Routes `log` records from the library into a stderr tracing subscriber.
/// `RUST_LOG` overrides the default `info` level.
fn init_logging() -> anyhow::Result<()> {
    tracing_log::LogTracer::init().context("failed to install log bridge")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging()?;

    info!("Starting relqual v{}", env!("CARGO_PKG_VERSION"));

    let success = commands::run(cli).await?;
    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
