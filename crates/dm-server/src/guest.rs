//! Per-address knock session
//!
//! A guest exists from a validated doorbell until exactly one terminal
//! outcome. The terminal transition is claimed through a
//! compare-and-set on a shared flag: the knock path (running inside
//! the Doorkeeper loop) and the deadline task are racing writers, and
//! only the winner of the CAS tears the session down. The loser
//! observes "already terminal" and does nothing. Timer cancellation
//! alone is not enough here since cancelling races with firing.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dm_protocol::Knock;

/// Terminal outcome of a guest session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Completed the full sequence in order
    Succeeded,
    /// Mismatched knock (or a consumed mismatch exhausted the sequence)
    Failed,
    /// Deadline fired before completion
    TimedOut,
    /// Force-terminated by the debug ENDKNOCK command
    Ended,
}

/// Emitted to the Doorkeeper loop when a deadline task wins the
/// terminal claim.
#[derive(Debug)]
pub(crate) struct GuestEvent {
    pub source: IpAddr,
    pub generation: u64,
    pub outcome: Outcome,
}

/// Result of feeding one knock (or debug advance) to a guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KnockStep {
    /// Still active, expecting the next element
    Progressed,
    /// Sequence complete; caller removes the guest and opens
    Succeeded,
    /// Attempt failed; caller removes the guest and banishes
    Failed,
    /// The deadline task already claimed the terminal transition;
    /// caller does nothing and lets the pending event remove the guest
    AlreadyTerminal,
}

pub(crate) struct Guest {
    source: IpAddr,
    generation: u64,
    sequence: Arc<Vec<Knock>>,
    index: usize,
    advance_on_failure: bool,
    terminal: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Guest {
    /// Register a new guest and arm its deadline.
    pub fn new(
        source: IpAddr,
        generation: u64,
        sequence: Arc<Vec<Knock>>,
        advance_on_failure: bool,
        timeout: Duration,
        events: mpsc::UnboundedSender<GuestEvent>,
    ) -> Self {
        let terminal = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let deadline_flag = Arc::clone(&terminal);
        let deadline_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = deadline_cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if claim(&deadline_flag) {
                        // The loop performs removal and the banish
                        // callback; a send failure means the hallway
                        // is already shutting down.
                        let _ = events.send(GuestEvent {
                            source,
                            generation,
                            outcome: Outcome::TimedOut,
                        });
                    }
                }
            }
        });

        Self {
            source,
            generation,
            sequence,
            index: 0,
            advance_on_failure,
            terminal,
            cancel,
        }
    }

    #[cfg(test)]
    pub fn source(&self) -> IpAddr {
        self.source
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[cfg(test)]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Compare one observed knock against the expected element.
    pub fn knock(&mut self, observed: Knock) -> KnockStep {
        if self.terminal.load(Ordering::Acquire) {
            return KnockStep::AlreadyTerminal;
        }
        debug_assert!(
            self.index < self.sequence.len(),
            "active guest with exhausted index"
        );

        let expected = self.sequence[self.index];
        if observed == expected {
            self.index += 1;
            if self.index == self.sequence.len() {
                return self.finish(KnockStep::Succeeded);
            }
            KnockStep::Progressed
        } else if self.advance_on_failure {
            // The bad knock is consumed; the next expected element is
            // the one after it. Tolerates a single dropped or
            // reordered packet at the cost of weaker verification.
            tracing::debug!(
                "Guest {} missed knock {} (expected {}), advancing",
                self.source,
                observed,
                expected
            );
            self.index += 1;
            if self.index == self.sequence.len() {
                // Nothing left that could complete the attempt.
                return self.finish(KnockStep::Failed);
            }
            KnockStep::Progressed
        } else {
            self.finish(KnockStep::Failed)
        }
    }

    /// Debug only: force-advance the index without a matching packet.
    pub fn advance(&mut self) -> KnockStep {
        if self.terminal.load(Ordering::Acquire) {
            return KnockStep::AlreadyTerminal;
        }
        debug_assert!(
            self.index < self.sequence.len(),
            "active guest with exhausted index"
        );

        self.index += 1;
        if self.index == self.sequence.len() {
            return self.finish(KnockStep::Succeeded);
        }
        KnockStep::Progressed
    }

    /// Debug only: force-terminate. Returns false if the deadline task
    /// already claimed the transition.
    pub fn end(&mut self) -> bool {
        if !claim(&self.terminal) {
            return false;
        }
        self.cancel.cancel();
        true
    }

    fn finish(&mut self, step: KnockStep) -> KnockStep {
        if !claim(&self.terminal) {
            return KnockStep::AlreadyTerminal;
        }
        self.cancel.cancel();
        step
    }
}

/// Atomically claim the terminal transition.
fn claim(flag: &AtomicBool) -> bool {
    flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}
