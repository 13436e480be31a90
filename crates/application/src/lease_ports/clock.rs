use chrono::{DateTime, Utc};

/// Source of the current time for all lease expiry math.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}
