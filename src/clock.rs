use chrono::{DateTime, NaiveDate, Utc};

/// Source of "now" for past-date checks and reminder windows.
/// Clinic-local time is taken to be UTC.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
