use std::fmt;

use chrono::{DateTime, Datelike, Local, Month, TimeZone, Utc};
use thiserror::Error;

pub type ClockResult<T> = core::result::Result<T, ClockError>;

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("timestamp {0}ms is outside the representable calendar range")]
    OutOfRange(i64),
}

/// A calendar month of a given year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Period {
    pub month: u32,
    pub year: i32,
}

impl Period {
    pub fn of<Tz: TimeZone>(at: &DateTime<Tz>) -> Self {
        Self {
            month: at.month(),
            year: at.year(),
        }
    }

    pub fn month_name(&self) -> &'static str {
        u8::try_from(self.month)
            .ok()
            .and_then(|m| Month::try_from(m).ok())
            .map(|m| m.name())
            .unwrap_or_default()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.month_name(), self.year)
    }
}

/// Source of wall-clock time and the month boundaries used by the monthly leaderboard.
pub trait MonthClock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;

    fn period_of(&self, at: DateTime<Utc>) -> Period;

    fn current_period(&self) -> Period {
        self.period_of(self.now())
    }

    fn period_of_millis(&self, ms: i64) -> ClockResult<Period> {
        DateTime::from_timestamp_millis(ms)
            .map(|at| self.period_of(at))
            .ok_or(ClockError::OutOfRange(ms))
    }
}

/// Months follow the host's local timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl MonthClock for LocalClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn period_of(&self, at: DateTime<Utc>) -> Period {
        Period::of(&at.with_timezone(&Local))
    }
}

#[cfg(test)]
pub use fixed::FixedClock;
