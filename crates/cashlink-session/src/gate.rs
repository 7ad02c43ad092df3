//! # Write-Serialization Gate
//!
//! At most one in-flight write per unit, and no poll in between.
//!
//! ## Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  caller A ──► lock (FIFO) ──► pause polls ──► op ──► settle ──► resume │
//! │  caller B ──► lock ········ waits ··········································│
//! │                                                      └──► B proceeds   │
//! │                                                                         │
//! │  `resume` runs from a Drop guard: an op that fails, or a caller that    │
//! │  drops the future midway, still leaves polling restored and the lock    │
//! │  released.                                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::trace;

/// Pause/resume hooks for a unit's polling cycles.
pub trait PollControl: Send + Sync {
    /// Called with the lock held, before the operation starts.
    fn pause(&self);

    /// Called after the settle delay, before the lock is released.
    fn resume(&self);
}

/// Resumes polling when dropped.
struct PauseGuard<'a> {
    control: &'a dyn PollControl,
}

impl<'a> PauseGuard<'a> {
    fn engage(control: &'a dyn PollControl) -> Self {
        control.pause();
        PauseGuard { control }
    }
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        self.control.resume();
    }
}

/// Per-unit write lock plus settle delay.
#[derive(Debug)]
pub struct WriteGate {
    lock: Mutex<()>,
    settle: Duration,
}

impl WriteGate {
    pub fn new(settle: Duration) -> Self {
        WriteGate {
            lock: Mutex::new(()),
            settle,
        }
    }

    /// Runs `op` with the unit's polling paused.
    ///
    /// Waiters are served in arrival order (tokio's mutex is fair). The
    /// settle delay applies whether `op` succeeded or not.
    pub async fn with_exclusive_write<Fut, T>(&self, control: &dyn PollControl, op: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        let _lock = self.lock.lock().await;
        let _paused = PauseGuard::engage(control);

        let output = op.await;

        trace!(settle_ms = self.settle.as_millis() as u64, "Write settling");
        tokio::time::sleep(self.settle).await;

        output
    }
}
