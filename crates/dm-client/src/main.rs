//! doorman knock client
//!
//! Loads a client hallway file, rings the doorbell with the current
//! period, and performs the derived knock sequence in order with
//! fixed pacing.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dm_core::config::{self, default_client_hallway_dir};
use dm_core::{ClientHallway, Clock, SystemClock};
use dm_protocol::{sequence, DoorbellCommand};

mod knocker;

#[derive(Parser)]
#[command(name = "dm-client")]
#[command(about = "doorman knock client")]
#[command(version)]
struct Args {
    /// Name (without extension) of the hallway to knock
    hallway: String,

    /// Directory to load hallway files from
    #[arg(long)]
    hallway_dir: Option<PathBuf>,

    /// Print each knock as it is sent
    #[arg(short, long)]
    verbose: bool,

    /// Debug servers only: send ADVANCE_ instead of knocking
    #[arg(short = 'A', long, conflicts_with_all = ["end", "end_after"])]
    advance: bool,

    /// Debug servers only: send ENDKNOCK instead of knocking
    #[arg(short = 'T', long, conflicts_with = "end_after")]
    end: bool,

    /// Debug servers only: send ENDKNOCK after completing the sequence
    #[arg(short = 't', long)]
    end_after: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let hallway_dir = args.hallway_dir.unwrap_or_else(default_client_hallway_dir);
    let path = hallway_dir.join(format!("{}.toml", args.hallway));
    let hallway: ClientHallway = config::load_config(&path)
        .with_context(|| format!("Failed to load hallway from {:?}", path))?;
    hallway.validate().context("Invalid hallway")?;

    let target = resolve(&hallway).await?;

    if args.end {
        knocker::ring(target, &DoorbellCommand::End.encode()).await?;
        tracing::info!("Sent ENDKNOCK to {}", target);
        return Ok(());
    }
    if args.advance {
        knocker::ring(target, &DoorbellCommand::Advance.encode()).await?;
        tracing::info!("Sent ADVANCE_ to {}", target);
        return Ok(());
    }

    let key = hallway.profile.normalized_key();
    let period = sequence::period_at(SystemClock.now_unix(), hallway.profile.interval);
    let pause = Duration::from_millis(hallway.pause_ms);

    knocker::ring(target, &DoorbellCommand::Announce { period }.encode()).await?;
    tracing::info!("Rang {} for period {}", target, period);
    tokio::time::sleep(pause).await;

    for knock in sequence::generate(&key, period, hallway.profile.length) {
        knocker::knock(target.ip(), knock).await?;
        tracing::info!("Knocked {}", knock);
        tokio::time::sleep(pause).await;
    }

    if args.end_after {
        knocker::ring(target, &DoorbellCommand::End.encode()).await?;
        tracing::info!("Sent ENDKNOCK to {}", target);
    }

    Ok(())
}

/// Resolve the hallway's hostname to the doorbell socket address.
async fn resolve(hallway: &ClientHallway) -> Result<SocketAddr> {
    let host = format!("{}:{}", hallway.hostname, hallway.profile.doorbell);
    let resolved = tokio::net::lookup_host(&host)
        .await
        .with_context(|| format!("Failed to resolve {}", hallway.hostname))?
        .next()
        .with_context(|| format!("No addresses for {}", hallway.hostname));
    resolved
}
