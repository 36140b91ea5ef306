//! Clock & Cron (spec.md §4.1).
//!
//! Cron expressions are standard 5-field (minute, hour, day-of-month, month,
//! day-of-week) and always evaluated in UTC; timezone rendering is a
//! presentation concern that lives outside the core. The `cron` crate parses
//! 6- or 7-field expressions (seconds first), so a bare 5-field expression is
//! normalized by prepending `"0 "` for seconds before parsing.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

use crate::error::CoreError;

/// Supplies the current time; injectable so tests can script execution
/// sequences without a real clock (spec.md §8 end-to-end scenarios).
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that can be advanced manually, for deterministic workflow tests.
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    pub struct FakeClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl FakeClock {
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                now: Mutex::new(start),
            }
        }

        pub fn advance(&self, delta: chrono::Duration) {
            let mut now = self.now.lock().unwrap();
            *now += delta;
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }
}

fn normalize(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

/// Parse and validate a cron expression, independent of any particular
/// `after` time. Used by `TaskService` to reject invalid schedules before
/// persistence (spec.md §4.1).
pub fn validate_cron(expr: &str) -> Result<(), CoreError> {
    Schedule::from_str(&normalize(expr))
        .map(|_| ())
        .map_err(|e| CoreError::InvalidSchedule(format!("'{expr}' does not parse: {e}")))
}

/// Compute the next fire time strictly after `after`, in UTC.
pub fn next_fire(expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, CoreError> {
    let schedule = Schedule::from_str(&normalize(expr))
        .map_err(|e| CoreError::InvalidSchedule(format!("'{expr}' does not parse: {e}")))?;

    schedule
        .after(&after)
        .next()
        .ok_or_else(|| CoreError::InvalidSchedule(format!("no future occurrences for '{expr}'")))
}

/// Reject schedules whose next-fire delta is below the configured minimum
/// interval (spec.md §6 `schedule.min_interval`, §8 boundary behavior).
pub fn validate_min_interval(
    expr: &str,
    now: DateTime<Utc>,
    min_interval: chrono::Duration,
) -> Result<(), CoreError> {
    validate_cron(expr)?;
    let next = next_fire(expr, now)?;
    let delta = next - now;
    if delta < min_interval {
        return Err(CoreError::InvalidSchedule(format!(
            "next fire is only {delta} away, below the minimum interval of {min_interval}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_five_field_expressions() {
        assert!(validate_cron("*/1 * * * *").is_ok());
        assert!(validate_cron("0 9 * * 1-5").is_ok());
        assert!(validate_cron("not a cron expression").is_err());
    }

    #[test]
    fn computes_next_fire_in_utc() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let next = next_fire("0 13 * * *", now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 13, 0, 0).unwrap());
    }

    #[test]
    fn rejects_schedules_below_min_interval() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let err = validate_min_interval("*/1 * * * *", now, chrono::Duration::minutes(2));
        assert!(err.is_err());
        assert!(validate_min_interval("*/5 * * * *", now, chrono::Duration::minutes(2)).is_ok());
    }
}
