//! The `Schedule` DSL accepted by `ManifestScheduler::ScheduleAsync`. Callers
//! express intent as either a raw cron expression or a plain interval;
//! intervals that don't evenly divide an hour are snapped down to the
//! nearest minute-divisor cron can express exactly.

use std::time::Duration;

use cron::Schedule as CronSchedule;
use std::str::FromStr;
use thiserror::Error;

/// Minute-divisors of 60 that a `Schedule::Interval` snaps to when the
/// requested interval does not divide evenly. Ordered ascending so the
/// first divisor not exceeding the request wins.
const MINUTE_DIVISORS: [u64; 11] = [1, 2, 3, 4, 5, 6, 10, 12, 15, 20, 30];

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("cron expression `{expression}` is invalid: {source}")]
    InvalidCron {
        expression: String,
        #[source]
        source: cron::error::Error,
    },
    #[error("interval must be at least 1 minute, got {0:?}")]
    IntervalTooShort(Duration),
}

/// A schedule as the caller expresses it, before persistence splits it into
/// the `schedule_type`/`cron_expression`/`interval_seconds` columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// A raw five- or six-field cron expression, validated at construction.
    Cron(String),
    /// Run every `Duration`, snapped to a minute-divisor when it doesn't
    /// evenly divide an hour (see [`Schedule::to_cron`]).
    Interval(Duration),
}

impl Schedule {
    /// Validate a cron expression, returning a `Schedule::Cron` on success.
    pub fn cron(expression: impl Into<String>) -> Result<Self, ScheduleError> {
        let expression = expression.into();
        CronSchedule::from_str(&expression).map_err(|source| ScheduleError::InvalidCron {
            expression: expression.clone(),
            source,
        })?;
        Ok(Self::Cron(expression))
    }

    /// Build an interval schedule. Rejects sub-minute intervals since cron
    /// cannot express them and the scheduler's poll cadence wouldn't
    /// observe them reliably anyway.
    pub fn interval(duration: Duration) -> Result<Self, ScheduleError> {
        if duration.as_secs() < 60 {
            return Err(ScheduleError::IntervalTooShort(duration));
        }
        Ok(Self::Interval(duration))
    }

    /// Render this schedule as a cron expression, applying the interval
    /// approximation rule when needed.
    ///
    /// Intervals under an hour that don't evenly divide 60 are snapped down
    /// to the nearest value in `MINUTE_DIVISORS` not exceeding the
    /// requested minute count, so `every 7 minutes` becomes `every 6`
    /// rather than silently drifting across the hour boundary. Intervals of
    /// an hour or more are expressed as an hourly-field cron using the same
    /// divisor search against 24.
    pub fn to_cron(&self) -> String {
        match self {
            Schedule::Cron(expr) => expr.clone(),
            Schedule::Interval(duration) => {
                let total_minutes = (duration.as_secs() / 60).max(1);
                if total_minutes < 60 {
                    let step = snap_to_divisor(total_minutes, &MINUTE_DIVISORS);
                    format!("0 0/{step} * * * *")
                } else {
                    let hours = (total_minutes / 60).max(1);
                    let step = snap_to_divisor(hours, &[1, 2, 3, 4, 6, 8, 12]);
                    format!("0 0 0/{step} * * *")
                }
            }
        }
    }
}

/// Largest entry in `divisors` that does not exceed `requested`, falling
/// back to the smallest divisor if `requested` is below all of them.
fn snap_to_divisor(requested: u64, divisors: &[u64]) -> u64 {
    divisors
        .iter()
        .rev()
        .find(|&&d| d <= requested)
        .copied()
        .unwrap_or(divisors[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_cron_expression_is_accepted() {
        let schedule = Schedule::cron("0 0 * * * *").unwrap();
        assert_eq!(schedule.to_cron(), "0 0 * * * *");
    }

    #[test]
    fn invalid_cron_expression_is_rejected() {
        let err = Schedule::cron("not a cron expression").unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCron { .. }));
    }

    #[test]
    fn sub_minute_interval_is_rejected() {
        let err = Schedule::interval(Duration::from_secs(30)).unwrap_err();
        assert!(matches!(err, ScheduleError::IntervalTooShort(_)));
    }

    #[test]
    fn evenly_dividing_interval_round_trips_exactly() {
        let schedule = Schedule::interval(Duration::from_secs(5 * 60)).unwrap();
        assert_eq!(schedule.to_cron(), "0 0/5 * * * *");
    }

    #[test]
    fn non_dividing_interval_snaps_down() {
        // 7 minutes does not divide 60; nearest divisor not exceeding it is 6.
        let schedule = Schedule::interval(Duration::from_secs(7 * 60)).unwrap();
        assert_eq!(schedule.to_cron(), "0 0/6 * * * *");
    }

    #[test]
    fn interval_below_smallest_divisor_snaps_up_to_it() {
        // unreachable via the public constructor (min 60s = 1 minute) but
        // exercised directly to document snap_to_divisor's floor behavior.
        assert_eq!(snap_to_divisor(0, &MINUTE_DIVISORS), 1);
    }

    #[test]
    fn hour_scale_interval_uses_hour_field() {
        let schedule = Schedule::interval(Duration::from_secs(3 * 3600)).unwrap();
        assert_eq!(schedule.to_cron(), "0 0 0/3 * * *");
    }
}
