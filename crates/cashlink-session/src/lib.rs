//! # cashlink-session: Live Device Sessions for Cash Peripherals
//!
//! Runs the bill and coin units: connectivity, enablement, background
//! polling, serialized writes, payouts and denomination routing.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Session Architecture                             │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SessionController (per process)                  │  │
//! │  │                                                                  │  │
//! │  │  connect / disconnect / enable / disable / payout / dispense    │  │
//! │  │  set_active_unit / set_visible → one polling decision           │  │
//! │  │  publishes UnitView per unit over watch channels                │  │
//! │  └───────────┬───────────────────────┬──────────────────────────────┘  │
//! │              │                       │                                  │
//! │              ▼                       ▼                                  │
//! │  ┌────────────────────┐  ┌────────────────────┐  ┌──────────────────┐  │
//! │  │      Poller        │  │     WriteGate      │  │ DenominationRouter│ │
//! │  │                    │  │                    │  │                  │  │
//! │  │ status cycle       │  │ FIFO lock per unit │  │ immediate or     │  │
//! │  │ snapshot cycle     │  │ pause → op →       │  │ buffered routes, │  │
//! │  │ CancellationToken  │  │ settle → resume    │  │ batched apply    │  │
//! │  └─────────┬──────────┘  └─────────┬──────────┘  └────────┬─────────┘  │
//! │            └───────────────────────┼──────────────────────┘            │
//! │                                    ▼                                    │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │            DeviceApi (SimulatedDevice for tests / demo)          │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - Session configuration (currency, cadences, settle delay)
//! - [`error`] - Session error types
//! - [`device`] - The device-control trait
//! - [`sim`] - In-memory simulated device
//! - [`gate`] - Write-serialization gate
//! - [`poller`] - Cancellable polling cycles
//! - [`controller`] - `SessionController`
//! - [`router`] - `DenominationRouter`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cashlink_session::{SessionConfig, SessionController, SimulatedDevice};
//! use std::sync::Arc;
//!
//! let config = SessionConfig::load_or_default(None);
//! let controller = SessionController::new(
//!     config.clone(),
//!     Arc::new(SimulatedDevice::bill_recycler(config.currency())),
//!     Arc::new(SimulatedDevice::coin_recycler(config.currency())),
//! )?;
//!
//! controller.set_visible(true);
//! controller.connect(UnitKind::Bill).await?;
//! controller.enable(UnitKind::Bill).await?;
//!
//! let mut view = controller.subscribe(UnitKind::Bill);
//! view.changed().await?;
//! println!("session: {}", view.borrow().session.session_display());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod gate;
pub mod poller;
pub mod router;
pub mod sim;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::SessionConfig;
pub use controller::SessionController;
pub use device::{DeviceApi, DeviceError, DeviceResult};
pub use error::{SessionError, SessionResult};
pub use gate::WriteGate;
pub use router::DenominationRouter;
pub use sim::{SimCommand, SimulatedDevice};
