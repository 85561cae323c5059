//! Wall-clock access for doorman
//!
//! Period computation depends on the current Unix time; routing it
//! through the [`Clock`] trait lets tests pin the clock instead of
//! racing the real one.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of Unix wall-clock time.
pub trait Clock: Send + Sync {
    /// Current Unix timestamp in seconds.
    fn now_unix(&self) -> i64;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        current_time_secs()
    }
}

/// Get the current Unix timestamp in seconds.
///
/// # Panics
/// Panics if the system time is before the Unix epoch (1970-01-01),
/// which would indicate a severely misconfigured system.
pub fn current_time_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_secs() as i64
}
