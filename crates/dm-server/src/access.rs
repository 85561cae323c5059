//! Access-granting boundary
//!
//! The Doorkeeper reports terminal outcomes through
//! [`AccessController`]; implementations turn those into real-world
//! effects. [`CommandAccess`] runs the hallway's configured shell
//! commands; [`NullAccess`] only logs.

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;

use dm_core::ServerHallway;

/// Receiver of terminal knock outcomes.
#[async_trait]
pub trait AccessController: Send + Sync {
    /// Invoked exactly once when a guest completes its sequence.
    async fn open(&self, source: IpAddr);

    /// Invoked exactly once on failure, timeout, or a rejected
    /// doorbell.
    async fn banish(&self, source: IpAddr);
}

/// Runs the hallway's configured shell commands.
///
/// `%IP%` in a command is replaced with the source address. Commands
/// run detached; a non-zero exit is logged, never propagated.
pub struct CommandAccess {
    open_command: String,
    close: Option<(String, Duration)>,
    banish_command: Option<String>,
    debug: bool,
}

impl CommandAccess {
    /// Build from a validated server hallway configuration.
    pub fn from_hallway(hallway: &ServerHallway) -> Self {
        let close = match (&hallway.close_command, hallway.close_delay) {
            (Some(command), Some(delay)) => {
                Some((command.clone(), Duration::from_secs(u64::from(delay))))
            }
            _ => None,
        };
        Self {
            open_command: hallway.open_command.clone(),
            close,
            banish_command: hallway.banish_command.clone(),
            debug: hallway.debug,
        }
    }

    fn execute(&self, command: &str, source: IpAddr) {
        // Commands must never run in debug mode, even if a caller
        // bypasses the Doorkeeper's own suppression.
        if self.debug {
            tracing::error!("Refusing to run a command in debug mode: {}", command);
            return;
        }
        spawn_command(command.replace("%IP%", &source.to_string()));
    }
}

#[async_trait]
impl AccessController for CommandAccess {
    async fn open(&self, source: IpAddr) {
        tracing::info!("Opening for {}", source);
        self.execute(&self.open_command, source);

        if let Some((command, delay)) = &self.close {
            if self.debug {
                return;
            }
            let rendered = command.replace("%IP%", &source.to_string());
            let delay = *delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                spawn_command(rendered);
            });
        }
    }

    async fn banish(&self, source: IpAddr) {
        tracing::info!("Banishing {}", source);
        if let Some(command) = &self.banish_command {
            self.execute(command, source);
        }
    }
}

fn spawn_command(rendered: String) {
    tokio::spawn(async move {
        match tokio::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(&rendered)
            .status()
            .await
        {
            Ok(status) if !status.success() => {
                tracing::warn!("Command exited with {}: {}", status, rendered);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Failed to run command {:?}: {}", rendered, e);
            }
        }
    });
}

/// Logs outcomes without side effects.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAccess;

#[async_trait]
impl AccessController for NullAccess {
    async fn open(&self, source: IpAddr) {
        tracing::info!("Would open for {}", source);
    }

    async fn banish(&self, source: IpAddr) {
        tracing::info!("Would banish {}", source);
    }
}
