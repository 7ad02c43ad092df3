//! # Activity Log
//!
//! Bounded, append-only, human-readable journal of session events.
//! Oldest entries are dropped on overflow; readers get an ordered copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use ts_rs::TS;

use crate::types::UnitKind;
use crate::DEFAULT_ACTIVITY_LOG_CAPACITY;

/// Severity of an activity entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ActivityLevel {
    Info,
    Warning,
    Error,
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ActivityEntry {
    #[ts(as = "String")]
    pub at: DateTime<Utc>,
    pub unit: Option<UnitKind>,
    pub level: ActivityLevel,
    pub message: String,
}

impl fmt::Display for ActivityEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = self.at.format("%H:%M:%S");
        match self.unit {
            Some(unit) => write!(f, "[{}] {}: {}", time, unit, self.message),
            None => write!(f, "[{}] {}", time, self.message),
        }
    }
}

/// Ring buffer of activity entries.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    capacity: usize,
    entries: VecDeque<ActivityEntry>,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVITY_LOG_CAPACITY)
    }
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        ActivityLog {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends an entry, evicting the oldest when full.
    pub fn push(
        &mut self,
        at: DateTime<Utc>,
        unit: Option<UnitKind>,
        level: ActivityLevel,
        message: impl Into<String>,
    ) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(ActivityEntry {
            at,
            unit,
            level,
            message: message.into(),
        });
    }

    /// Entries, oldest first.
    pub fn entries(&self) -> Vec<ActivityEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oldest_dropped_on_overflow() {
        let mut log = ActivityLog::new(2);
        let now = Utc::now();
        log.push(now, None, ActivityLevel::Info, "one");
        log.push(now, Some(UnitKind::Bill), ActivityLevel::Info, "two");
        log.push(now, Some(UnitKind::Coin), ActivityLevel::Error, "three");

        let messages: Vec<String> = log.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["two", "three"]);
    }

    #[test]
    fn test_display_includes_unit() {
        let mut log = ActivityLog::default();
        log.push(Utc::now(), Some(UnitKind::Bill), ActivityLevel::Warning, "IDLE → BUSY");
        let line = log.entries()[0].to_string();
        assert!(line.ends_with("bill: IDLE → BUSY"));
        assert_eq!(log.capacity(), DEFAULT_ACTIVITY_LOG_CAPACITY);
    }
}
