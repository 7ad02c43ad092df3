//! # Status Transitions
//!
//! Turns the stream of polled status strings into counted transition events.
//!
//! ```text
//!  tick 1: "IDLE"   → first value, no event
//!  tick 2: "IDLE"   → unchanged
//!  tick 3: "BUSY"   → event #1  "IDLE → BUSY"
//!  tick 4: (absent) → republished as absent, comparison value stays "BUSY"
//!  tick 5: "IDLE"   → event #2  "BUSY → IDLE"
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// A change between two consecutive present status values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: String,
    pub to: String,
}

impl fmt::Display for StatusTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.from, self.to)
    }
}

/// Per-unit status history.
#[derive(Debug, Clone, Default)]
pub struct StatusTracker {
    last: Option<String>,
    event_count: u64,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one polled status value.
    ///
    /// Returns the transition when the value differs from the previous
    /// present value.
    pub fn observe(&mut self, status: Option<&str>) -> Option<StatusTransition> {
        let current = status?;
        let transition = match self.last.as_deref() {
            Some(previous) if previous != current => Some(StatusTransition {
                from: previous.to_string(),
                to: current.to_string(),
            }),
            _ => None,
        };

        if transition.is_some() {
            self.event_count += 1;
        }
        self.last = Some(current.to_string());
        transition
    }

    /// Number of transitions observed.
    pub fn event_count(&self) -> u64 {
        self.event_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_tick_establishes_baseline() {
        let mut tracker = StatusTracker::new();
        assert_eq!(tracker.observe(Some("IDLE")), None);
        assert_eq!(tracker.event_count(), 0);

        let transition = tracker.observe(Some("BUSY")).unwrap();
        assert_eq!(transition.to_string(), "IDLE → BUSY");
        assert_eq!(tracker.event_count(), 1);
    }

    #[test]
    fn test_unchanged_status_is_not_an_event() {
        let mut tracker = StatusTracker::new();
        tracker.observe(Some("IDLE"));
        assert_eq!(tracker.observe(Some("IDLE")), None);
        assert_eq!(tracker.event_count(), 0);
    }

    #[test]
    fn test_absent_status_keeps_comparison_value() {
        let mut tracker = StatusTracker::new();
        tracker.observe(Some("BUSY"));
        assert_eq!(tracker.observe(None), None);
        assert_eq!(tracker.observe(Some("BUSY")), None);

        let transition = tracker.observe(Some("IDLE")).unwrap();
        assert_eq!(transition.from, "BUSY");
        assert_eq!(tracker.event_count(), 1);
    }
}
