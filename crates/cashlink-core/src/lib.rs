//! # cashlink-core: Pure Session Logic for Cash Peripherals
//!
//! This crate holds every rule of a bill/coin acceptor session that can be
//! expressed without touching a device: snapshot arithmetic, session and
//! baseline accounting, status transitions, routing plans and payout
//! pre-checks.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Cashlink Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            Front-end (renders UnitView, issues commands)        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │      cashlink-session (controller, poller, gate, router)        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ cashlink-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌─────────┐ ┌──────────┐ ┌─────────┐ ┌─────────┐  │   │
//! │  │   │ tracker │ │baseline │ │ routing  │ │validat. │ │activity │  │   │
//! │  │   └─────────┘ └─────────┘ └──────────┘ └─────────┘ └─────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO CLOCK • NO TASKS • PURE FUNCTIONS                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Integer minor-unit amounts
//! - [`types`] - Units, denominations, snapshots, the published view
//! - [`error`] - Domain error types
//! - [`status`] - Status transition counting
//! - [`tracker`] - Session / lifetime figures and recent changes
//! - [`baseline`] - Frozen zero-point snapshots
//! - [`routing`] - Pending route edits and combined route plans
//! - [`validation`] - Dispense pre-checks
//! - [`activity`] - Bounded activity journal
//! - [`polling`] - The polling-should-run decision
//!
//! ## Example Usage
//!
//! ```rust
//! use cashlink_core::tracker::AmountTracker;
//! use cashlink_core::types::{DenominationAssignment, UnitKind};
//!
//! let denom = |value, stored| DenominationAssignment {
//!     value,
//!     currency: "EUR".into(),
//!     stored,
//!     recyclable: true,
//!     inhibited: false,
//!     accept_route: "PAYOUT".into(),
//! };
//!
//! let mut tracker = AmountTracker::default();
//! let now = chrono::Utc::now();
//! tracker.update_from_snapshot(UnitKind::Bill, &[denom(500, 2)], now);
//! tracker.update_from_snapshot(UnitKind::Bill, &[denom(500, 5)], now);
//!
//! assert_eq!(tracker.session_cents(UnitKind::Bill), 1500);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod activity;
pub mod baseline;
pub mod error;
pub mod money;
pub mod polling;
pub mod routing;
pub mod status;
pub mod tracker;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use activity::{ActivityEntry, ActivityLevel, ActivityLog};
pub use baseline::BaselineStore;
pub use error::{CoreError, CoreResult, DispenseRejection, ValidationError};
pub use money::Money;
pub use polling::PollingPolicy;
pub use routing::{plan_route_update, PendingRoutes, RouteChangeMode, RoutePlan};
pub use status::{StatusTracker, StatusTransition};
pub use tracker::AmountTracker;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Activity entries kept before the oldest is dropped.
pub const DEFAULT_ACTIVITY_LOG_CAPACITY: usize = 200;

/// Recent stock changes kept per unit for display.
pub const DEFAULT_RECENT_CHANGE_CAPACITY: usize = 10;
