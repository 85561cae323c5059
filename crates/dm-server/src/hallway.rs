//! Per-hallway runtime wiring
//!
//! One hallway is one isolated gatekeeping instance: its own
//! Doorkeeper, its own sockets, its own actions. A hallway failing to
//! start (bad config, doorbell port taken) never affects its
//! siblings; the daemon logs the failure and keeps the rest running.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use dm_core::{HallwayError, ServerHallway, SystemClock};

use crate::access::{AccessController, CommandAccess};
use crate::doorkeeper::Doorkeeper;
use crate::listen::SocketSource;

/// Validate, wire, and drive one hallway until cancellation.
pub async fn run_hallway(
    name: String,
    config: ServerHallway,
    cancel: CancellationToken,
) -> Result<(), HallwayError> {
    config.validate()?;

    if config.debug {
        tracing::info!("Hallway {} running in debug mode: no actions will fire", name);
    }

    let access: Arc<dyn AccessController> = Arc::new(CommandAccess::from_hallway(&config));
    let doorkeeper = Doorkeeper::new(name, config.clone(), access, Arc::new(SystemClock));
    let source = SocketSource::bind(
        config.profile.doorbell,
        doorkeeper.subscribe_sequence(),
        cancel.child_token(),
    )
    .await?;

    doorkeeper.run(source, cancel).await;
    Ok(())
}
