//! # Error Types
//!
//! Domain-specific error types for cashlink-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  cashlink-core errors (this file)                                      │
//! │  ├── CoreError          - General domain errors                        │
//! │  ├── DispenseRejection  - Payout pre-check failures                    │
//! │  └── ValidationError    - Input validation failures                    │
//! │                                                                         │
//! │  cashlink-session errors (separate crate)                              │
//! │  └── SessionError       - Device, config and command failures          │
//! │                                                                         │
//! │  Flow: DispenseRejection → SessionError → activity log                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::RouteCode;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A payout request failed pre-validation.
    #[error("Dispense rejected: {0}")]
    Dispense(#[from] DispenseRejection),

    /// A denomination is not part of the latest snapshot.
    #[error("Denomination {value} is not configured on this unit")]
    UnknownDenomination { value: i64 },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Dispense Rejection
// =============================================================================

/// Why a dispense request was blocked before reaching the device.
///
/// Each variant names the specific unmet condition so the activity log can
/// say more than "failed".
///
/// ## Check Order
/// ```text
/// value > 0 ──► denomination exists ──► configured currency ──► routed to payout
///           ──► stock > 0 ──► not inhibited
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispenseRejection {
    /// Requested amount is zero or negative.
    #[error("requested value {value} must be positive")]
    NonPositiveValue { value: i64 },

    /// No denomination with this face value in the latest snapshot.
    #[error("denomination {value} is not configured")]
    UnknownDenomination { value: i64 },

    /// The face value is only held in a currency other than the configured one.
    #[error("denomination {value} is held in {found}, not {expected}")]
    WrongCurrency {
        value: i64,
        expected: String,
        found: String,
    },

    /// Denomination exists but is routed to the vault.
    #[error("denomination {value} is not recyclable (route {route})")]
    NotRecyclable { value: i64, route: RouteCode },

    /// Denomination is recyclable but holds no pieces.
    #[error("denomination {value} has zero stock")]
    OutOfStock { value: i64 },

    /// Denomination is configured to reject deposits.
    #[error("denomination {value} is inhibited")]
    Inhibited { value: i64 },
}

impl DispenseRejection {
    /// Face value the rejection refers to.
    pub fn value(&self) -> i64 {
        match self {
            DispenseRejection::NonPositiveValue { value }
            | DispenseRejection::UnknownDenomination { value }
            | DispenseRejection::WrongCurrency { value, .. }
            | DispenseRejection::NotRecyclable { value, .. }
            | DispenseRejection::OutOfStock { value }
            | DispenseRejection::Inhibited { value } => *value,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_messages_name_the_condition() {
        assert_eq!(
            DispenseRejection::OutOfStock { value: 500 }.to_string(),
            "denomination 500 has zero stock"
        );
        assert_eq!(
            DispenseRejection::NotRecyclable {
                value: 200,
                route: RouteCode::Cashbox
            }
            .to_string(),
            "denomination 200 is not recyclable (route CASHBOX)"
        );
    }

    #[test]
    fn test_rejection_converts_to_core_error() {
        let err: CoreError = DispenseRejection::Inhibited { value: 100 }.into();
        assert!(matches!(err, CoreError::Dispense(_)));
        assert_eq!(err.to_string(), "Dispense rejected: denomination 100 is inhibited");
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::MustBePositive {
            field: "value".to_string(),
        };
        assert_eq!(err.to_string(), "value must be positive");
    }
}
