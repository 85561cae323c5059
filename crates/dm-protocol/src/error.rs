//! Protocol error types

use thiserror::Error;

/// Errors from parsing a doorbell payload.
///
/// The server treats every variant as noise to ignore, never as a
/// fault; the distinction only matters for diagnostics.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DoorbellError {
    /// Payload shorter than the 8-byte command tag
    #[error("payload too short for a command tag: {0} bytes")]
    TooShort(usize),

    /// First 8 bytes are not a recognized command tag
    #[error("unrecognized command tag")]
    UnknownTag,

    /// DOORBELL remainder is not a decimal period
    #[error("invalid period in doorbell payload")]
    BadPeriod,
}
