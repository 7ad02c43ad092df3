//! # Amount Tracker
//!
//! Converts periodic denomination snapshots into session / lifetime figures
//! and a rolling log of stock changes.
//!
//! ## Accounting Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  snapshot(t0) {100:10, 200:5}  ── fresh start ──► baseline = 2000      │
//! │        │                                                                │
//! │        ▼ diff per value                                                 │
//! │  snapshot(t1) {100:8, 200:6}   ──► RecentChange (100, -2)              │
//! │                                    RecentChange (200, +1)              │
//! │                                    total   = 800 + 1200 = 2000          │
//! │                                    session = max(0, 2000 - 2000) = 0    │
//! │                                                                         │
//! │  reset() ──► history dropped, next snapshot is a fresh start again     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The tracker never reads the clock; callers pass the poll timestamp.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, VecDeque};

use crate::money::Money;
use crate::types::{
    counts_of, counts_total, DenominationAssignment, DenominationCounts, RecentChange,
    SessionAmount, UnitKind,
};
use crate::DEFAULT_RECENT_CHANGE_CAPACITY;

/// Per-unit accounting state.
#[derive(Debug, Clone, Default)]
struct UnitLedger {
    /// Counts from the previous snapshot; `None` means fresh start.
    previous: Option<DenominationCounts>,
    /// Total of the latest snapshot.
    current_total: Money,
    /// Zero point for the session figure.
    baseline_total: Option<Money>,
    /// Rolling window, oldest first.
    recent: VecDeque<RecentChange>,
}

/// Session / lifetime accounting for both units.
#[derive(Debug, Clone)]
pub struct AmountTracker {
    capacity: usize,
    ledgers: [UnitLedger; 2],
}

impl Default for AmountTracker {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_CHANGE_CAPACITY)
    }
}

impl AmountTracker {
    /// Creates a tracker keeping at most `capacity` recent changes per unit.
    pub fn new(capacity: usize) -> Self {
        AmountTracker {
            capacity: capacity.max(1),
            ledgers: [UnitLedger::default(), UnitLedger::default()],
        }
    }

    fn ledger(&self, unit: UnitKind) -> &UnitLedger {
        &self.ledgers[unit.index()]
    }

    fn ledger_mut(&mut self, unit: UnitKind) -> &mut UnitLedger {
        &mut self.ledgers[unit.index()]
    }

    /// Feeds one complete snapshot.
    ///
    /// Returns the changes recorded by this update (only non-zero deltas,
    /// ordered by face value). The first snapshot after construction or
    /// [`reset`](Self::reset) is not diffed; if no baseline was set it also
    /// becomes the baseline.
    pub fn update_from_snapshot(
        &mut self,
        unit: UnitKind,
        snapshot: &[DenominationAssignment],
        at: DateTime<Utc>,
    ) -> Vec<RecentChange> {
        let counts = counts_of(snapshot);
        let total = counts_total(&counts);
        let capacity = self.capacity;
        let ledger = self.ledger_mut(unit);

        let changes = match ledger.previous.as_ref() {
            Some(previous) => diff_counts(previous, &counts, at),
            None => {
                if ledger.baseline_total.is_none() {
                    ledger.baseline_total = Some(total);
                }
                Vec::new()
            }
        };

        for change in &changes {
            if ledger.recent.len() == capacity {
                ledger.recent.pop_front();
            }
            ledger.recent.push_back(change.clone());
        }

        ledger.previous = Some(counts);
        ledger.current_total = total;
        changes
    }

    /// `total(now) − total(baseline)`, floored at zero.
    ///
    /// Without a baseline the zero point is zero.
    pub fn session_cents(&self, unit: UnitKind) -> i64 {
        let ledger = self.ledger(unit);
        let baseline = ledger.baseline_total.unwrap_or_default();
        (ledger.current_total - baseline).floor_zero().cents()
    }

    /// Session and total figures for publishing.
    pub fn session_amount(&self, unit: UnitKind) -> SessionAmount {
        SessionAmount {
            session_cents: self.session_cents(unit),
            total_cents: self.ledger(unit).current_total.cents(),
        }
    }

    /// Installs `snapshot` as the authoritative zero point.
    ///
    /// Leaves the diff history untouched.
    pub fn set_baseline(&mut self, unit: UnitKind, snapshot: &[DenominationAssignment]) {
        let total = counts_total(&counts_of(snapshot));
        self.ledger_mut(unit).baseline_total = Some(total);
    }

    /// Drops all per-unit history, baselines included.
    pub fn reset(&mut self) {
        for ledger in self.ledgers.iter_mut() {
            *ledger = UnitLedger::default();
        }
    }

    /// Recent changes for a unit, oldest first.
    pub fn recent_changes(&self, unit: UnitKind) -> Vec<RecentChange> {
        self.ledger(unit).recent.iter().cloned().collect()
    }
}

/// Per-value count deltas between two snapshots, non-zero only.
fn diff_counts(
    previous: &DenominationCounts,
    current: &DenominationCounts,
    at: DateTime<Utc>,
) -> Vec<RecentChange> {
    let values: BTreeSet<i64> = previous.keys().chain(current.keys()).copied().collect();

    values
        .into_iter()
        .filter_map(|value| {
            let before = previous.get(&value).copied().unwrap_or(0) as i64;
            let after = current.get(&value).copied().unwrap_or(0) as i64;
            let delta = after - before;
            (delta != 0).then_some(RecentChange { value, delta, at })
        })
        .collect()
}
