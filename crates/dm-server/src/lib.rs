//! dm-server: The doorman gatekeeping daemon
//!
//! The server passively observes traffic, recognizes doorbell packets
//! announcing a knock attempt, tracks each caller's progress through
//! the expected sequence, and runs the configured open/banish actions
//! on completion or failure. Each configured hallway runs fully
//! isolated from its siblings.

pub mod access;
pub mod doorkeeper;
pub mod guest;
pub mod hallway;
pub mod listen;
pub mod source;

pub use access::{AccessController, CommandAccess, NullAccess};
pub use doorkeeper::Doorkeeper;
pub use guest::Outcome;
pub use hallway::run_hallway;
pub use listen::SocketSource;
pub use source::{ChannelSource, Packet, PacketSource};
