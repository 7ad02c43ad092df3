//! # Validation Module
//!
//! Pre-flight checks run before a payout command is sent to a device.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Dispense Validation Layers                         │
//! │                                                                         │
//! │  Layer 1: THIS MODULE (advisory)                                       │
//! │  ├── Runs against a freshly fetched snapshot, never a cached one       │
//! │  └── Blocks obviously impossible requests before any device call       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Device API (final arbiter)                                   │
//! │  └── May still reject a request that passed layer 1                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use cashlink_core::types::DenominationAssignment;
//! use cashlink_core::validation::validate_dispense;
//!
//! let snapshot = vec![DenominationAssignment {
//!     value: 500,
//!     currency: "EUR".into(),
//!     stored: 0,
//!     recyclable: true,
//!     inhibited: false,
//!     accept_route: "PAYOUT".into(),
//! }];
//!
//! // Zero stock blocks the request before the device is asked.
//! assert!(validate_dispense(&snapshot, 500, "EUR").is_err());
//! ```

use crate::error::{DispenseRejection, ValidationError};
use crate::types::{find_denomination, find_denomination_in, DenominationAssignment, RouteCode};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Checks that `value` can plausibly be dispensed from `snapshot`.
///
/// ## Rules (checked in order)
/// 1. `value` is positive
/// 2. the denomination exists
/// 3. it is held in `currency`
/// 4. it is routed to a payout-capable destination
/// 5. its stored count is non-zero
/// 6. it is not inhibited
///
/// Returns the target denomination so the caller can use its recorded
/// currency code.
pub fn validate_dispense<'a>(
    snapshot: &'a [DenominationAssignment],
    value: i64,
    currency: &str,
) -> Result<&'a DenominationAssignment, DispenseRejection> {
    if value <= 0 {
        return Err(DispenseRejection::NonPositiveValue { value });
    }

    let any = find_denomination(snapshot, value)
        .ok_or(DispenseRejection::UnknownDenomination { value })?;

    let target = find_denomination_in(snapshot, value, currency).ok_or_else(|| {
        DispenseRejection::WrongCurrency {
            value,
            expected: currency.to_string(),
            found: any.currency.clone(),
        }
    })?;

    if !target.recyclable {
        return Err(DispenseRejection::NotRecyclable {
            value,
            route: RouteCode::from_recyclable(target.recyclable),
        });
    }

    if target.stored == 0 {
        return Err(DispenseRejection::OutOfStock { value });
    }

    if target.inhibited {
        return Err(DispenseRejection::Inhibited { value });
    }

    Ok(target)
}

/// Validates a currency code from configuration.
///
/// ## Rules
/// - Must not be empty
/// - Must be three ASCII letters (ISO 4217 style)
pub fn validate_currency(code: &str) -> ValidationResult<()> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "currency".to_string(),
        });
    }

    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ValidationError::OutOfRange {
            field: "currency length".to_string(),
            min: 3,
            max: 3,
        });
    }

    Ok(())
}
