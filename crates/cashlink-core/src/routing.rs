//! # Denomination Routing
//!
//! Pure half of the denomination router: the explicit change modes, the
//! pending-change buffer and the combined route plan.
//!
//! ## Change Modes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      toggle_recyclable(value, flag)                     │
//! │                                                                         │
//! │  IMMEDIATE                          │  BUFFERED (edit mode, bill only)  │
//! │  ─────────                          │  ────────                         │
//! │  • route write through the gate     │  • PendingRoutes[value] = flag    │
//! │  • snapshot refresh                 │  • device untouched               │
//! │                                     │  • applied later as ONE combined  │
//! │                                     │    update by apply_pending_routes │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Overlay Rule
//! The target recyclable set is the current routing state with `pending`
//! laid on top. Denominations absent from `pending` keep their classification.
//! Only rows in the configured currency take part.
//!
//! ```text
//! current  {100: rec, 200: vault, 500: rec}
//! pending  {200 → true, 500 → false}
//! target   {100, 200}
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{DenominationAssignment, RouteAssignment, RouteCode};

// =============================================================================
// Change Mode
// =============================================================================

/// How a recyclable toggle is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteChangeMode {
    /// Write to the device now.
    #[default]
    Immediate,
    /// Record in the pending buffer; apply later in one batch.
    Buffered,
}

// =============================================================================
// Pending Routes
// =============================================================================

/// Not-yet-applied value → desired recyclable flag edits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRoutes(BTreeMap<i64, bool>);

impl PendingRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records (or overwrites) the desired flag for a value.
    pub fn set(&mut self, value: i64, recyclable: bool) {
        self.0.insert(value, recyclable);
    }

    pub fn get(&self, value: i64) -> Option<bool> {
        self.0.get(&value).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Drops the edits `applied` carried out. An entry edited again since
    /// then holds a different flag and stays pending.
    pub fn remove_applied(&mut self, applied: &PendingRoutes) {
        self.0.retain(|value, recyclable| applied.get(*value) != Some(*recyclable));
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, bool)> + '_ {
        self.0.iter().map(|(v, r)| (*v, *r))
    }
}

impl FromIterator<(i64, bool)> for PendingRoutes {
    fn from_iter<I: IntoIterator<Item = (i64, bool)>>(iter: I) -> Self {
        PendingRoutes(iter.into_iter().collect())
    }
}

// =============================================================================
// Route Plan
// =============================================================================

/// Result of overlaying pending edits on the live routing state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutePlan {
    /// Face values that end up recyclable.
    pub recyclable: BTreeSet<i64>,
    /// One entry per known denomination: the combined update.
    pub routes: Vec<RouteAssignment>,
    /// Pending values with no denomination in the configured currency (skipped).
    pub unknown: Vec<i64>,
}

/// Computes the full target routing for a combined update.
///
/// Rows held in another currency are left out of the update.
pub fn plan_route_update(
    current: &[DenominationAssignment],
    pending: &PendingRoutes,
    currency: &str,
) -> RoutePlan {
    let mut plan = RoutePlan::default();
    let in_currency: Vec<&DenominationAssignment> = current
        .iter()
        .filter(|a| a.currency.eq_ignore_ascii_case(currency))
        .collect();

    for assignment in &in_currency {
        let recyclable = pending.get(assignment.value).unwrap_or(assignment.recyclable);
        if recyclable {
            plan.recyclable.insert(assignment.value);
        }
        plan.routes.push(RouteAssignment {
            value: assignment.value,
            currency: assignment.currency.clone(),
            route: RouteCode::from_recyclable(recyclable),
        });
    }

    plan.unknown = pending
        .iter()
        .map(|(value, _)| value)
        .filter(|value| !in_currency.iter().any(|a| a.value == *value))
        .collect();

    plan
}
