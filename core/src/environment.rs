//! Injected dependencies.
//!
//! External effects the pipeline needs beyond the broker and the store are
//! abstracted here so tests can substitute deterministic versions.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time for testability.
///
/// # Examples
///
/// ```
/// use order_pipeline_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let before = chrono::Utc::now();
/// assert!(clock.now() >= before);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time.
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
