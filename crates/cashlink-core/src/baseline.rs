//! # Baseline Store
//!
//! Keeps the last explicitly captured "zero" snapshot per unit.
//!
//! Resetting a baseline is local accounting only: nothing here (or in the
//! session layer's `reset_baseline`) issues a device command or touches the
//! stored counts.

use crate::types::{
    counts_of, counts_total, BaselineFigures, DenominationAssignment, DenominationCounts, UnitKind,
};

/// Frozen value → count snapshots, one per unit.
#[derive(Debug, Clone, Default)]
pub struct BaselineStore {
    baselines: [Option<DenominationCounts>; 2],
}

impl BaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures `snapshot` unless the unit already has a baseline.
    ///
    /// Returns true if a baseline was installed.
    pub fn capture_if_absent(&mut self, unit: UnitKind, snapshot: &[DenominationAssignment]) -> bool {
        let slot = &mut self.baselines[unit.index()];
        if slot.is_some() {
            return false;
        }
        *slot = Some(counts_of(snapshot));
        true
    }

    /// Overwrites the unit's baseline with `snapshot`.
    pub fn replace(&mut self, unit: UnitKind, snapshot: &[DenominationAssignment]) {
        self.baselines[unit.index()] = Some(counts_of(snapshot));
    }

    /// Frozen counts for a unit.
    pub fn get(&self, unit: UnitKind) -> Option<&DenominationCounts> {
        self.baselines[unit.index()].as_ref()
    }

    /// `(baseline, current, current − baseline)` for a live snapshot.
    ///
    /// The delta is signed. A unit without a baseline reports a zero
    /// baseline.
    pub fn figures(&self, unit: UnitKind, current: &[DenominationAssignment]) -> BaselineFigures {
        let baseline = self.get(unit).map(counts_total).unwrap_or_default();
        let current = counts_total(&counts_of(current));

        BaselineFigures {
            baseline_cents: baseline.cents(),
            current_cents: current.cents(),
            delta_cents: (current - baseline).cents(),
        }
    }

    /// Drops every baseline.
    pub fn clear(&mut self) {
        self.baselines = [None, None];
    }
}
