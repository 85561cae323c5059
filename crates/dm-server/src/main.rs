//! doorman server daemon
//!
//! Loads every hallway file from the hallway directory and runs one
//! isolated gatekeeping instance per hallway.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dm_core::config::{self, default_server_hallway_dir};
use dm_server::run_hallway;

#[derive(Parser)]
#[command(name = "dm-server")]
#[command(about = "doorman gatekeeping daemon")]
#[command(version)]
struct Args {
    /// Directory to load hallway files from
    #[arg(long)]
    hallway_dir: Option<PathBuf>,

    /// Debug mode: dry-run every hallway, accept the ADVANCE_ and
    /// ENDKNOCK wire commands, stretch session timeouts
    #[arg(short, long)]
    debug: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("doorman server starting...");

    let hallway_dir = args.hallway_dir.unwrap_or_else(default_server_hallway_dir);
    if !hallway_dir.is_dir() {
        std::fs::create_dir_all(&hallway_dir)
            .with_context(|| format!("Failed to create {:?}", hallway_dir))?;
        tracing::info!("Put your hallways in {:?}", hallway_dir);
        return Ok(());
    }

    let hallways = config::load_server_hallways(&hallway_dir)
        .with_context(|| format!("Failed to scan {:?}", hallway_dir))?;
    if hallways.is_empty() {
        tracing::info!("Put your hallways in {:?}", hallway_dir);
        return Ok(());
    }

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    let mut handles = Vec::new();
    for (name, mut hallway) in hallways {
        if args.debug {
            hallway.debug = true;
        }

        tracing::info!("Starting hallway {}", name);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = run_hallway(name.clone(), hallway, cancel).await {
                tracing::error!("Hallway failure: {}: {}", name, e);
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!("doorman server shutdown complete");
    Ok(())
}
