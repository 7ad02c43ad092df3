//! # Domain Types
//!
//! Core domain types shared by the accounting logic and the session runtime.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────────┐   ┌─────────────────────┐                      │
//! │  │ DenominationAssign. │   │   RecentChange      │                      │
//! │  │  ─────────────────  │   │  ─────────────────  │                      │
//! │  │  value (cents)      │   │  value              │                      │
//! │  │  currency           │   │  delta (signed)     │                      │
//! │  │  stored             │   │  at                 │                      │
//! │  │  recyclable         │   └─────────────────────┘                      │
//! │  │  inhibited          │                                                │
//! │  │  accept_route (raw) │   ┌─────────────────────┐                      │
//! │  └──────────┬──────────┘   │   UnitView          │                      │
//! │             │ snapshot     │  ─────────────────  │                      │
//! │             ▼              │  phase, device_id   │                      │
//! │  ┌─────────────────────┐   │  enabled, payout    │                      │
//! │  │ DenominationCounts  │   │  status, events     │                      │
//! │  │  value → count      │──►│  session, baseline  │                      │
//! │  └─────────────────────┘   │  assignments        │                      │
//! │                            └─────────────────────┘                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A snapshot (`&[DenominationAssignment]`) is always replaced wholesale;
//! nothing in this crate merges two snapshots field by field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;

// =============================================================================
// Unit Kind
// =============================================================================

/// One of the two physical cash peripherals in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum UnitKind {
    /// Bill acceptor / note recycler.
    Bill,
    /// Coin acceptor / coin recycler.
    Coin,
}

impl UnitKind {
    /// Both units, in a stable order.
    pub const ALL: [UnitKind; 2] = [UnitKind::Bill, UnitKind::Coin];

    /// Stable index for per-unit arrays.
    #[inline]
    pub const fn index(&self) -> usize {
        match self {
            UnitKind::Bill => 0,
            UnitKind::Coin => 1,
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Bill => write!(f, "bill"),
            UnitKind::Coin => write!(f, "coin"),
        }
    }
}

impl FromStr for UnitKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bill" | "note" | "notes" => Ok(UnitKind::Bill),
            "coin" | "coins" => Ok(UnitKind::Coin),
            _ => Err(ValidationError::NotAllowed {
                field: "unit".to_string(),
                allowed: vec!["bill".to_string(), "coin".to_string()],
            }),
        }
    }
}

// =============================================================================
// Routing
// =============================================================================

/// Destination a route write asks the device to use for a denomination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum RouteCode {
    /// Held in the recycler and available for dispensing change.
    Payout,
    /// Sent to the vault; cannot be dispensed.
    Cashbox,
}

impl RouteCode {
    /// Maps the UI's "recyclable" toggle onto a route.
    #[inline]
    pub const fn from_recyclable(recyclable: bool) -> Self {
        if recyclable {
            RouteCode::Payout
        } else {
            RouteCode::Cashbox
        }
    }

    /// Code sent over the device-control API.
    pub const fn device_code(&self) -> &'static str {
        match self {
            RouteCode::Payout => "PAYOUT",
            RouteCode::Cashbox => "CASHBOX",
        }
    }

    /// Returns true for the payout-capable destination.
    #[inline]
    pub const fn is_recyclable(&self) -> bool {
        matches!(self, RouteCode::Payout)
    }
}

impl fmt::Display for RouteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.device_code())
    }
}

/// One entry of a combined route update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RouteAssignment {
    /// Face value in minor units.
    pub value: i64,
    /// Currency code recorded on the denomination.
    pub currency: String,
    /// Requested destination.
    pub route: RouteCode,
}

// =============================================================================
// Denomination Assignment
// =============================================================================

/// One denomination as reported by the device in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DenominationAssignment {
    /// Face value in minor units (e.g. 500 = 5.00).
    pub value: i64,

    /// Currency / country code reported by the device (e.g. "EUR").
    pub currency: String,

    /// Pieces currently stored for this denomination.
    pub stored: u32,

    /// Routed to a payout-capable (recyclable) destination.
    pub recyclable: bool,

    /// Not accepted: the device rejects further deposits of this value.
    pub inhibited: bool,

    /// Raw accept-route classification string from the device.
    pub accept_route: String,
}

impl DenominationAssignment {
    /// Value held for this denomination (`value × stored`).
    #[inline]
    pub fn stored_value(&self) -> Money {
        Money::from_cents(self.value).times_count(self.stored)
    }
}

/// Frozen value → count view of a snapshot.
pub type DenominationCounts = BTreeMap<i64, u32>;

/// Builds the value → count map for a snapshot.
///
/// Duplicate face values (the same value reported on two routes) are summed.
pub fn counts_of(snapshot: &[DenominationAssignment]) -> DenominationCounts {
    let mut counts = DenominationCounts::new();
    for a in snapshot {
        let count = counts.entry(a.value).or_insert(0);
        *count = count.saturating_add(a.stored);
    }
    counts
}

/// `Σ value × count` over a frozen count map.
pub fn counts_total(counts: &DenominationCounts) -> Money {
    counts
        .iter()
        .map(|(value, count)| Money::from_cents(*value).times_count(*count))
        .sum()
}

/// Finds a denomination by face value.
pub fn find_denomination(
    snapshot: &[DenominationAssignment],
    value: i64,
) -> Option<&DenominationAssignment> {
    snapshot.iter().find(|a| a.value == value)
}

/// First row for `value` in `currency` (codes compared case-insensitively).
pub fn find_denomination_in<'a>(
    snapshot: &'a [DenominationAssignment],
    value: i64,
    currency: &str,
) -> Option<&'a DenominationAssignment> {
    snapshot
        .iter()
        .find(|a| a.value == value && a.currency.eq_ignore_ascii_case(currency))
}

// =============================================================================
// Recent Change
// =============================================================================

/// A stock change detected between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RecentChange {
    /// Face value in minor units.
    pub value: i64,
    /// Signed count delta (+ deposited, - dispensed / emptied).
    pub delta: i64,
    /// When the poll that detected the change completed.
    #[ts(as = "String")]
    pub at: DateTime<Utc>,
}

// =============================================================================
// Monetary Figures
// =============================================================================

/// Session and lifetime figures derived by the amount tracker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SessionAmount {
    /// Accumulated this session, floored at zero.
    pub session_cents: i64,
    /// Total value held by the unit right now.
    pub total_cents: i64,
}

impl SessionAmount {
    /// Decimal display form of the session figure.
    pub fn session_display(&self) -> String {
        Money::from_cents(self.session_cents).to_string()
    }

    /// Decimal display form of the total figure.
    pub fn total_display(&self) -> String {
        Money::from_cents(self.total_cents).to_string()
    }
}

/// Baseline-store figures: frozen zero point, live total, signed delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BaselineFigures {
    pub baseline_cents: i64,
    pub current_cents: i64,
    pub delta_cents: i64,
}

impl BaselineFigures {
    /// Decimal display form of the signed delta.
    pub fn delta_display(&self) -> String {
        Money::from_cents(self.delta_cents).to_string()
    }
}

// =============================================================================
// Unit View
// =============================================================================

/// Connectivity phase of a unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum UnitPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Read-only view of a unit, published as a whole value.
///
/// ## Invariants
/// - `device_id` is `Some` exactly when `phase == Connected`
/// - `enabled` / `payout_enabled` are false whenever not connected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct UnitView {
    pub unit: UnitKind,
    pub phase: UnitPhase,
    pub device_id: Option<String>,
    pub enabled: bool,
    pub payout_enabled: bool,
    pub event_count: u64,
    pub last_status: Option<String>,
    pub last_event: Option<String>,
    pub assignments: Vec<DenominationAssignment>,
    pub session: SessionAmount,
    pub baseline: BaselineFigures,
    pub recent_changes: Vec<RecentChange>,
}

impl UnitView {
    /// Initial view of a unit that was never connected.
    pub fn disconnected(unit: UnitKind) -> Self {
        UnitView {
            unit,
            phase: UnitPhase::Disconnected,
            device_id: None,
            enabled: false,
            payout_enabled: false,
            event_count: 0,
            last_status: None,
            last_event: None,
            assignments: Vec::new(),
            session: SessionAmount::default(),
            baseline: BaselineFigures::default(),
            recent_changes: Vec::new(),
        }
    }

    /// Returns true if the unit is connected.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.phase == UnitPhase::Connected
    }
}
