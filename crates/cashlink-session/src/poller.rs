//! # Polling Cycles
//!
//! Two independent, cancellable tasks per polled unit.
//!
//! ## Cycle Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   loop {                                                                │
//! │       select! { cancelled => exit, tick => {} }                         │
//! │       select! { cancelled => exit, fetch() => result }                  │
//! │       target.deliver(unit, generation, result)                          │
//! │   }                                                                     │
//! │                                                                         │
//! │   • a failed fetch is delivered like any other result; the loop keeps   │
//! │     its cadence                                                         │
//! │   • a cancelled fetch is dropped, never delivered                       │
//! │   • the target re-checks `generation` under its own lock before         │
//! │     publishing, so a late result never overwrites newer state           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use cashlink_core::{DenominationAssignment, UnitKind};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::device::{DeviceApi, DeviceResult};

/// The two polling cadences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Short period: status classification.
    Status,
    /// Long period: full denomination snapshot.
    Snapshot,
}

/// Receiver of poll results.
pub trait PollTarget: Send + Sync + 'static {
    fn device(&self, unit: UnitKind) -> Arc<dyn DeviceApi>;

    fn on_status(&self, unit: UnitKind, generation: u64, result: DeviceResult<Option<String>>);

    fn on_snapshot(
        &self,
        unit: UnitKind,
        generation: u64,
        result: DeviceResult<Vec<DenominationAssignment>>,
    );
}

/// Running cycles for one unit.
#[derive(Debug)]
pub struct PollHandle {
    generation: u64,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl PollHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Signals both cycles to stop at their next suspension point.
    ///
    /// Does not wait for an in-flight iteration.
    pub fn stop(self) {
        self.cancel.cancel();
        drop(self.tasks);
    }
}

/// Spawns the status and snapshot cycles for `unit`.
pub fn spawn_cycles<T: PollTarget>(
    runtime: &Handle,
    target: Weak<T>,
    unit: UnitKind,
    generation: u64,
    status_every: Duration,
    snapshot_every: Duration,
) -> PollHandle {
    let cancel = CancellationToken::new();

    let tasks = [(Cadence::Status, status_every), (Cadence::Snapshot, snapshot_every)]
        .into_iter()
        .map(|(cadence, period)| {
            runtime.spawn(run_cycle(
                target.clone(),
                unit,
                cadence,
                period,
                generation,
                cancel.clone(),
            ))
        })
        .collect();

    debug!(unit = %unit, generation, "Polling started");

    PollHandle {
        generation,
        cancel,
        tasks,
    }
}

async fn run_cycle<T: PollTarget>(
    target: Weak<T>,
    unit: UnitKind,
    cadence: Cadence,
    period: Duration,
    generation: u64,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(target) = target.upgrade() else {
            break;
        };
        let device = target.device(unit);

        match cadence {
            Cadence::Status => {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = device.get_status() => result,
                };
                target.on_status(unit, generation, result);
            }
            Cadence::Snapshot => {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = device.get_currency_assignments() => result,
                };
                target.on_snapshot(unit, generation, result);
            }
        }
    }

    trace!(unit = %unit, ?cadence, generation, "Polling cycle exited");
}
