//! # Device Boundary
//!
//! The request/response device-control API the session layer drives.
//!
//! ## Call Surface
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          DeviceApi (per unit)                           │
//! │                                                                         │
//! │  LIFECYCLE          OBSERVATION                  WRITES                 │
//! │  ─────────          ───────────                  ──────                 │
//! │  connect            get_status                   enable / disable       │
//! │  disconnect         get_currency_assignments     enable_payout / ...    │
//! │                                                  dispense               │
//! │                                                  set_denomination_route │
//! │                                                  set_routes (combined)  │
//! │                                                  set_denomination_inh.  │
//! │                                                  smart_empty            │
//! │                                                                         │
//! │  Nothing is pushed: every observation is a poll.                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Implementations own transport, framing and timeouts. The session layer
//! only adds an outer bound on `connect`.

use async_trait::async_trait;
use cashlink_core::{DenominationAssignment, RouteAssignment, RouteCode};
use thiserror::Error;

/// Failure reported by a device implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The device answered and refused the request.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The device could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The device did not answer in time.
    #[error("timed out")]
    Timeout,
}

/// Result type for device calls.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Device-control API for one bill or coin unit.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Opens the session; returns the device identifier if one was issued.
    async fn connect(&self) -> DeviceResult<Option<String>>;

    async fn disconnect(&self) -> DeviceResult<()>;

    /// Starts accepting cash.
    async fn enable(&self) -> DeviceResult<()>;

    /// Stops accepting cash.
    async fn disable(&self) -> DeviceResult<()>;

    async fn enable_payout(&self) -> DeviceResult<()>;

    async fn disable_payout(&self) -> DeviceResult<()>;

    /// Status classification string, if the device reported one.
    async fn get_status(&self) -> DeviceResult<Option<String>>;

    /// Full denomination snapshot.
    async fn get_currency_assignments(&self) -> DeviceResult<Vec<DenominationAssignment>>;

    async fn dispense(&self, value: i64, currency: &str) -> DeviceResult<()>;

    async fn set_denomination_route(
        &self,
        value: i64,
        currency: &str,
        route: RouteCode,
    ) -> DeviceResult<()>;

    /// Combined route update.
    ///
    /// The default issues one `set_denomination_route` per entry and stops
    /// at the first failure. Devices with a native batch command override it.
    async fn set_routes(&self, routes: &[RouteAssignment]) -> DeviceResult<()> {
        for entry in routes {
            self.set_denomination_route(entry.value, &entry.currency, entry.route)
                .await?;
        }
        Ok(())
    }

    async fn set_denomination_inhibit(
        &self,
        value: i64,
        currency: &str,
        inhibit: bool,
    ) -> DeviceResult<()>;

    /// Moves all recyclable stock to the vault.
    async fn smart_empty(&self) -> DeviceResult<()>;
}
