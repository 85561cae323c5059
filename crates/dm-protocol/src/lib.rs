//! dm-protocol: Wire protocol and sequence derivation for doorman
//!
//! This crate defines the pieces of the knock protocol shared between
//! the server and the client: the (port, protocol) knock pair, the
//! keyed time-windowed sequence generator, and the doorbell payload
//! codec.

pub mod doorbell;
pub mod error;
pub mod sequence;
pub mod types;

pub use doorbell::{DoorbellCommand, TAG_SIZE};
pub use error::DoorbellError;
pub use sequence::{generate, normalize_key, period_at};
pub use types::{Knock, Protocol};
