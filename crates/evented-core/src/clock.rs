//! Time source used when stamping event metadata.

use chrono::{DateTime, Utc};

/// Supplies `occurred_at` timestamps for new events.
///
/// Aggregate commands take a `&dyn Clock` so tests can pin time.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
