//! okup - OKE cluster and node pool upgrade cascade CLI tool.
//!
//! Drives clusters listed in a version report through upgrades:
//! - Control plane upgrades run concurrently under a bounded pool
//! - Node pools upgrade only after their cluster reaches a healthy state
//! - Dry-run mode walks the same plan without mutating anything

use anyhow::Result;
use clap::Parser;
use tracing::error;

use okup::config::{Args, Config};
use okup::output;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = Config::from_args(args);

    if let Err(e) = init_tracing(config.log_level()) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    match okup::run(&config).await {
        Ok(summary) => {
            output::print_summary(&summary);
            std::process::exit(summary.exit_code());
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber.
fn init_tracing(log_level: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {}", e))?;

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
