//! # Session Error Types
//!
//! Error types for device sessions.
//!
//! ## Error Taxonomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Session Error Categories                          │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │  Connectivity   │  │  Command rejection      │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │ ConnectionFailed│  │  CommandRejected        │ │
//! │  │  ConfigLoad...  │  │ NoDeviceIdent.  │  │  UnknownDenomination    │ │
//! │  │  ConfigSave...  │  │ Timeout         │  │  BufferingUnsupported   │ │
//! │  │                 │  │ NotConnected    │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐                                                   │
//! │  │  Validation     │   Transient poll failures never become a         │
//! │  │                 │   SessionError: the poller logs them and keeps    │
//! │  │ DispenseRejected│   its cadence.                                    │
//! │  └─────────────────┘                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use cashlink_core::{DispenseRejection, UnitKind, ValidationError};
use thiserror::Error;

use crate::device::DeviceError;

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Session error type covering every command-path failure.
///
/// ## Design Principles
/// - Each variant carries the unit / denomination context it failed on
/// - Every command path returns this as a value; nothing panics
/// - All errors are `Send + Sync` for async compatibility
#[derive(Debug, Error)]
pub enum SessionError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid session configuration.
    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Connectivity Errors
    // =========================================================================
    /// The device API refused or failed the connect / disconnect call.
    #[error("Connection to {unit} unit failed: {reason}")]
    ConnectionFailed { unit: UnitKind, reason: String },

    /// Connect returned without a device identifier.
    #[error("{0} unit connected without a device identifier")]
    NoDeviceIdentifier(UnitKind),

    /// Connect did not complete within the configured timeout.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// The operation needs a connected unit.
    #[error("{0} unit is not connected")]
    NotConnected(UnitKind),

    // =========================================================================
    // Command Errors
    // =========================================================================
    /// The device reported failure for a write command.
    #[error("{command} on {unit} unit rejected: {reason}")]
    CommandRejected {
        unit: UnitKind,
        command: String,
        reason: String,
    },

    /// Dispense pre-validation blocked the request.
    #[error("Dispense rejected: {0}")]
    DispenseRejected(#[from] DispenseRejection),

    /// The denomination is not in the unit's latest snapshot.
    #[error("Denomination {value} is not configured on {unit} unit")]
    UnknownDenomination { unit: UnitKind, value: i64 },

    /// Buffered route edits are only kept for the bill unit.
    #[error("Buffered route changes are not supported on {0} unit")]
    BufferingUnsupported(UnitKind),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Input validation failed.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Internal session error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SessionError {
    fn from(err: toml::de::Error) -> Self {
        SessionError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SessionError {
    fn from(err: toml::ser::Error) -> Self {
        SessionError::ConfigSaveFailed(err.to_string())
    }
}

impl SessionError {
    /// Wraps a device failure for a named write command.
    pub fn rejected(unit: UnitKind, command: &str, err: DeviceError) -> Self {
        SessionError::CommandRejected {
            unit,
            command: command.to_string(),
            reason: err.to_string(),
        }
    }

    /// Returns true if re-invoking the same operation may succeed.
    ///
    /// ## Retryable Errors
    /// - Connectivity failures and timeouts
    /// - Device-side command rejections
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Pre-validation failures (the snapshot must change first)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::ConnectionFailed { .. }
                | SessionError::NoDeviceIdentifier(_)
                | SessionError::Timeout(_)
                | SessionError::CommandRejected { .. }
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SessionError::InvalidConfig(_)
                | SessionError::ConfigLoadFailed(_)
                | SessionError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SessionError::Timeout(10).is_retryable());
        assert!(SessionError::rejected(
            UnitKind::Bill,
            "enable",
            DeviceError::Rejected("busy".into())
        )
        .is_retryable());

        assert!(!SessionError::InvalidConfig("bad".into()).is_retryable());
        assert!(!SessionError::DispenseRejected(DispenseRejection::OutOfStock { value: 500 })
            .is_retryable());
    }

    #[test]
    fn test_error_display_carries_context() {
        let err = SessionError::rejected(
            UnitKind::Coin,
            "set_denomination_inhibit(200)",
            DeviceError::Rejected("invalid denomination".into()),
        );
        let text = err.to_string();
        assert!(text.contains("coin"));
        assert!(text.contains("200"));
        assert!(text.contains("invalid denomination"));
    }

    #[test]
    fn test_config_classifier() {
        assert!(SessionError::ConfigSaveFailed("disk".into()).is_config_error());
        assert!(!SessionError::NotConnected(UnitKind::Bill).is_config_error());
    }
}
