use chrono::{DateTime, Utc};

/// Source of wall-clock time. Token expiry and quota day keys are computed
/// against this so tests can pin the date.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
