//! Doorbell payload codec
//!
//! A doorbell payload starts with an 8-byte ASCII command tag. The
//! normal flow uses `DOORBELL` followed by the decimal period the
//! caller believes is current. `ADVANCE_` and `ENDKNOCK` exist for
//! debug-mode servers only; their remainder is ignored.

use crate::error::DoorbellError;

/// Size of the ASCII command tag in bytes
pub const TAG_SIZE: usize = 8;

/// A parsed doorbell-port command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorbellCommand {
    /// Announce a knock attempt for the claimed period
    Announce {
        /// The period the caller believes is current
        period: i64,
    },
    /// Debug only: force-advance the caller's session index
    Advance,
    /// Debug only: force-terminate the caller's session
    End,
}

impl DoorbellCommand {
    /// Parse a raw doorbell payload.
    ///
    /// Returns an error for anything that is not a well-formed
    /// command; callers on the server side ignore these.
    pub fn parse(payload: &[u8]) -> Result<Self, DoorbellError> {
        if payload.len() < TAG_SIZE {
            return Err(DoorbellError::TooShort(payload.len()));
        }

        let (tag, rest) = payload.split_at(TAG_SIZE);
        match tag {
            b"DOORBELL" => {
                let period = parse_period(rest)?;
                Ok(Self::Announce { period })
            }
            b"ADVANCE_" => Ok(Self::Advance),
            b"ENDKNOCK" => Ok(Self::End),
            _ => Err(DoorbellError::UnknownTag),
        }
    }

    /// Encode this command as a wire payload.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Announce { period } => format!("DOORBELL{}", period).into_bytes(),
            Self::Advance => b"ADVANCE_".to_vec(),
            Self::End => b"ENDKNOCK".to_vec(),
        }
    }
}

fn parse_period(rest: &[u8]) -> Result<i64, DoorbellError> {
    if rest.is_empty() || !rest.iter().all(u8::is_ascii_digit) {
        return Err(DoorbellError::BadPeriod);
    }
    std::str::from_utf8(rest)
        .map_err(|_| DoorbellError::BadPeriod)?
        .parse()
        .map_err(|_| DoorbellError::BadPeriod)
}
