//! Clock abstraction for testable time.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability.
///
/// Production uses [`SystemClock`]; tests inject a fixed clock so created
/// and processed timestamps are deterministic.
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
