//! Time source for the job registry.

use chrono::{DateTime, Utc};

/// Supplies the current time.
///
/// Injected into the [`crate::registry::JobRegistry`] so retention sweeps
/// can be exercised without waiting on the wall clock.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock [`Clock`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
