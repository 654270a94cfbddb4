//! Pinned clock for deterministic event timestamps.

use chrono::{DateTime, TimeZone, Utc};
use evented_core::clock::Clock;

/// A clock that always reports the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Pins the clock to `instant`.
    #[must_use]
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self(instant)
    }
}

impl Default for FixedClock {
    /// Noon UTC on 2026-01-15.
    fn default() -> Self {
        Self(
            Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0)
                .single()
                .unwrap_or(DateTime::UNIX_EPOCH),
        )
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
