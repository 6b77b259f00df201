use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

/// Time source for "today" truncation and past-date validation.
///
/// Services read the wall clock through this trait so tests can pin "now"
/// to a fixed instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    fn time_of_day(&self) -> NaiveTime {
        self.now().time()
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a single instant, for deterministic tests.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
