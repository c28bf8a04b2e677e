//! # carbond
//!
//! Run with: `carbond -c /etc/carbon/carbon.conf [-d]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use carbond_core::config::DEFAULT_CONFIG_FILE;
use carbond_server::{terminate_signal, Daemon};

#[derive(Parser)]
#[command(name = "carbond")]
#[command(about = "Graphite-compatible metric receiver writing Whisper files", long_about = None)]
#[command(version)]
struct Cli {
    /// Main configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(true)
        .init();

    let daemon = Daemon::start(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    let stats = daemon.run_until(terminate_signal()).await?;

    info!(
        received = stats.points_received,
        written = stats.points_written,
        malformed = stats.malformed_lines,
        "bye"
    );
    Ok(())
}
