//! vaultkeeper daemon
//!
//! Runs scheduled database backups until interrupted, or a single pass with `--once`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vaultkeeper::{app::App, config::Config, telemetry};

#[derive(Parser, Debug)]
#[command(name = "vaultkeeper", version, about, rename_all = "kebab-case")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, short, default_value = "config.yaml")]
    config: PathBuf,

    /// Run every enabled backup once, sweep retention, print a JSON report and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    telemetry::init(&config.app)?;

    let app = App::new(&config).await.context("failed to initialize")?;

    let shutdown = CancellationToken::new();
    let watcher = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            warn!("Shutdown signal received");
            shutdown.cancel();
        })
    };

    if args.once {
        let report = app.run_once(&shutdown).await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        watcher.abort();
        if !report.failed.is_empty() {
            anyhow::bail!("{} backup(s) failed", report.failed.len());
        }
        return Ok(());
    }

    app.run(shutdown).await?;
    info!("Goodbye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
