//! # Polling Policy
//!
//! The single decision "should this unit be polled right now?".
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  should_poll(unit) = visible                                            │
//! │                    ∧ unit == active                                     │
//! │                    ∧ connected(unit)                                    │
//! │                    ∧ ¬writing(unit)                                     │
//! │                                                                         │
//! │  Re-evaluated on: connect, disconnect, set_active_unit, set_visible,    │
//! │                   write start, write end                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::types::UnitKind;

/// Which unit is on screen, and whether the screen is showing at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingPolicy {
    pub active: UnitKind,
    pub visible: bool,
}

impl Default for PollingPolicy {
    fn default() -> Self {
        PollingPolicy {
            active: UnitKind::Bill,
            visible: false,
        }
    }
}

impl PollingPolicy {
    /// Returns true if `unit` should have its polling cycles running.
    #[inline]
    pub fn should_poll(&self, unit: UnitKind, connected: bool, writing: bool) -> bool {
        self.visible && self.active == unit && connected && !writing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_active_visible_connected_idle_unit_polls() {
        let policy = PollingPolicy {
            active: UnitKind::Coin,
            visible: true,
        };
        assert!(policy.should_poll(UnitKind::Coin, true, false));
        assert!(!policy.should_poll(UnitKind::Bill, true, false));
        assert!(!policy.should_poll(UnitKind::Coin, false, false));
        assert!(!policy.should_poll(UnitKind::Coin, true, true));
    }

    #[test]
    fn test_hidden_view_stops_everything() {
        let policy = PollingPolicy {
            active: UnitKind::Bill,
            visible: false,
        };
        assert!(UnitKind::ALL
            .iter()
            .all(|unit| !policy.should_poll(*unit, true, false)));
    }
}
