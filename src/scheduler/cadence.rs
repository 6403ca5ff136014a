//! Cadence policies: when a task is expected to run.
//!
//! [`last_expected_run`] is the anchored grid computation. It is a pure
//! function of its arguments so it can be exercised without a clock. The
//! [`Cadence`] enum wraps the three readiness rules a task can follow.

use chrono::{DateTime, TimeDelta, Utc};

/// Most recent grid point `anchor + k * period` (k >= 0) at or before `now`.
///
/// Returns `None` ("never expected") when `now` is before `anchor` or the
/// period is not a positive whole number of milliseconds. A `now` that falls
/// exactly on a grid point returns that grid point.
#[must_use]
pub fn last_expected_run(
    anchor: DateTime<Utc>,
    period: TimeDelta,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if now < anchor {
        return None;
    }
    let period_ms = whole_millis(period)?;
    // Both operands are non-negative, so integer division is a floor.
    let elapsed_ms = (now - anchor).num_milliseconds();
    let k = elapsed_ms / period_ms;
    Some(anchor + TimeDelta::milliseconds(k * period_ms))
}

/// Readiness rule for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Due whenever `period` has elapsed since the last attempt.
    Periodic {
        /// Minimum gap between attempts.
        period: TimeDelta,
    },
    /// Due once per point on the grid `anchor + k * period`.
    ///
    /// After downtime spanning several grid points only the most recent one
    /// triggers a run.
    Anchored {
        /// First grid point.
        anchor: DateTime<Utc>,
        /// Grid spacing.
        period: TimeDelta,
    },
    /// Due until it has succeeded once.
    OneOff,
}

impl Cadence {
    /// Unanchored interval cadence.
    pub fn periodic(period: TimeDelta) -> crate::Result<Self> {
        validate_period(period)?;
        Ok(Self::Periodic { period })
    }

    /// Anchored grid cadence.
    pub fn anchored(anchor: DateTime<Utc>, period: TimeDelta) -> crate::Result<Self> {
        validate_period(period)?;
        Ok(Self::Anchored { anchor, period })
    }

    /// Run-once cadence.
    #[must_use]
    pub fn one_off() -> Self {
        Self::OneOff
    }

    /// Run interval, if the cadence has one.
    #[must_use]
    pub fn period(&self) -> Option<TimeDelta> {
        match self {
            Self::Periodic { period } | Self::Anchored { period, .. } => Some(*period),
            Self::OneOff => None,
        }
    }

    /// Whether a task with the given history is due at `now`.
    ///
    /// This is the cadence half of readiness; the re-entrancy guard lives on
    /// the task.
    #[must_use]
    pub fn is_due(
        &self,
        last_attempt: Option<DateTime<Utc>>,
        last_success: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        match self {
            Self::Periodic { period } => match last_attempt {
                None => true,
                Some(attempt) => now - attempt >= *period,
            },
            Self::Anchored { anchor, period } => {
                match last_expected_run(*anchor, *period, now) {
                    None => false,
                    Some(expected) => last_success.is_none_or(|success| success < expected),
                }
            }
            Self::OneOff => last_success.is_none(),
        }
    }

    /// Next instant at which the task becomes due.
    ///
    /// Returns an instant at or before `now` when the task is already due, and
    /// `None` for a one-off that has already succeeded.
    #[must_use]
    pub fn next_due(
        &self,
        last_attempt: Option<DateTime<Utc>>,
        last_success: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self {
            Self::Periodic { period } => Some(match last_attempt {
                None => now,
                Some(attempt) => attempt + *period,
            }),
            Self::Anchored { anchor, period } => {
                if self.is_due(last_attempt, last_success, now) {
                    return last_expected_run(*anchor, *period, now);
                }
                let base = last_success.map_or(now, |success| success.max(now));
                match last_expected_run(*anchor, *period, base) {
                    Some(point) => Some(point + *period),
                    None => Some(*anchor),
                }
            }
            Self::OneOff => last_success.is_none().then_some(now),
        }
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Periodic { period } => write!(f, "every {}", format_period(*period)),
            Self::Anchored { anchor, period } => write!(
                f,
                "every {} from {}",
                format_period(*period),
                anchor.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            ),
            Self::OneOff => f.write_str("once"),
        }
    }
}

fn validate_period(period: TimeDelta) -> crate::Result<()> {
    if whole_millis(period).is_none() {
        return Err(crate::SchedulerError::InvalidCadence(format!(
            "period must be a positive whole number of milliseconds, got {period}"
        )));
    }
    Ok(())
}

/// `period` in milliseconds, if it is positive and has no sub-millisecond part.
fn whole_millis(period: TimeDelta) -> Option<i64> {
    let ms = period.num_milliseconds();
    let exact = period.subsec_nanos() % 1_000_000 == 0;
    (ms > 0 && exact).then_some(ms)
}

/// Compact period label: `1d`, `6h`, `30m`, `45s` or `250ms`.
#[must_use]
pub fn format_period(period: TimeDelta) -> String {
    let ms = period.num_milliseconds();
    if ms % 1000 != 0 {
        return format!("{ms}ms");
    }
    let secs = ms / 1000;
    if secs != 0 && secs % 86_400 == 0 {
        format!("{}d", secs / 86_400)
    } else if secs != 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn daily_anchor() -> DateTime<Utc> {
        at(2024, 11, 20, 0, 0, 0)
    }

    #[test]
    fn grid_point_is_returned_on_exact_hit() {
        let expected = last_expected_run(daily_anchor(), TimeDelta::days(1), at(2024, 11, 25, 0, 0, 0));
        assert_eq!(expected, Some(at(2024, 11, 25, 0, 0, 0)));
    }

    #[test]
    fn one_second_before_grid_point_returns_previous_point() {
        let expected =
            last_expected_run(daily_anchor(), TimeDelta::days(1), at(2024, 11, 24, 23, 59, 59));
        assert_eq!(expected, Some(at(2024, 11, 24, 0, 0, 0)));
    }

    #[test]
    fn before_anchor_is_never_expected() {
        let expected =
            last_expected_run(daily_anchor(), TimeDelta::days(1), at(2024, 11, 19, 12, 0, 0));
        assert_eq!(expected, None);
    }

    #[test]
    fn anchor_itself_is_first_grid_point() {
        assert_eq!(
            last_expected_run(daily_anchor(), TimeDelta::days(1), daily_anchor()),
            Some(daily_anchor())
        );
    }

    #[test]
    fn grid_floor_property_holds_across_offsets() {
        let anchor = at(2024, 1, 1, 3, 17, 0);
        let period = TimeDelta::minutes(37);
        for offset_secs in (0..20_000).step_by(131) {
            let now = anchor + TimeDelta::seconds(offset_secs);
            let point = last_expected_run(anchor, period, now).unwrap();
            assert!(point <= now, "point {point} after now {now}");
            assert!(now < point + period, "now {now} past next point");
            let k = (point - anchor).num_milliseconds() / period.num_milliseconds();
            assert_eq!(anchor + period * k as i32, point);
        }
    }

    #[test]
    fn last_expected_run_is_monotonic() {
        let anchor = daily_anchor();
        let period = TimeDelta::hours(5);
        let mut previous = None;
        for offset_mins in (-600..6000).step_by(17) {
            let now = anchor + TimeDelta::minutes(offset_mins);
            let point = last_expected_run(anchor, period, now);
            assert!(point >= previous, "not monotonic at {now}");
            previous = point;
        }
    }

    #[test]
    fn non_positive_period_is_rejected() {
        assert!(Cadence::periodic(TimeDelta::zero()).is_err());
        assert!(Cadence::anchored(daily_anchor(), TimeDelta::seconds(-5)).is_err());
        assert_eq!(last_expected_run(daily_anchor(), TimeDelta::zero(), daily_anchor()), None);
    }

    #[test]
    fn fractional_millisecond_period_is_rejected() {
        let period = TimeDelta::microseconds(1500);
        let err = Cadence::anchored(daily_anchor(), period).unwrap_err();
        assert!(matches!(err, crate::SchedulerError::InvalidCadence(_)));
        assert!(Cadence::periodic(TimeDelta::nanoseconds(999_999)).is_err());
        assert_eq!(last_expected_run(daily_anchor(), period, daily_anchor() + period), None);

        let whole = Cadence::periodic(TimeDelta::milliseconds(1500)).unwrap();
        assert_eq!(whole.period(), Some(TimeDelta::milliseconds(1500)));
    }

    #[test]
    fn periodic_due_after_period_elapses() {
        let cadence = Cadence::periodic(TimeDelta::minutes(10)).unwrap();
        let t0 = at(2024, 6, 1, 12, 0, 0);
        assert!(cadence.is_due(None, None, t0));
        assert!(!cadence.is_due(Some(t0), Some(t0), t0 + TimeDelta::minutes(9)));
        assert!(cadence.is_due(Some(t0), Some(t0), t0 + TimeDelta::minutes(10)));
    }

    #[test]
    fn anchored_triggers_single_catch_up_after_outage() {
        let cadence = Cadence::anchored(daily_anchor(), TimeDelta::days(1)).unwrap();
        let last_success = Some(at(2024, 11, 20, 0, 0, 5));
        // Five grid points were missed; one check says "due" once.
        let now = at(2024, 11, 25, 8, 0, 0);
        assert!(cadence.is_due(last_success, last_success, now));
        // After the catch-up run succeeds, the remaining missed points do not re-trigger.
        assert!(!cadence.is_due(Some(now), Some(now), now + TimeDelta::hours(1)));
        assert!(cadence.is_due(Some(now), Some(now), at(2024, 11, 26, 0, 0, 0)));
    }

    #[test]
    fn anchored_never_due_before_anchor() {
        let cadence = Cadence::anchored(daily_anchor(), TimeDelta::days(1)).unwrap();
        assert!(!cadence.is_due(None, None, at(2024, 11, 19, 12, 0, 0)));
        assert!(cadence.is_due(None, None, daily_anchor()));
    }

    #[test]
    fn one_off_due_only_without_success() {
        let cadence = Cadence::one_off();
        let now = at(2024, 3, 3, 3, 3, 3);
        assert!(cadence.is_due(None, None, now));
        assert!(!cadence.is_due(Some(now), Some(now), now + TimeDelta::days(365)));
        assert_eq!(cadence.period(), None);
    }

    #[test]
    fn next_due_for_each_variant() {
        let now = at(2024, 11, 22, 6, 0, 0);

        let periodic = Cadence::periodic(TimeDelta::hours(1)).unwrap();
        let attempt = at(2024, 11, 22, 5, 30, 0);
        assert_eq!(
            periodic.next_due(Some(attempt), Some(attempt), now),
            Some(at(2024, 11, 22, 6, 30, 0))
        );

        let anchored = Cadence::anchored(daily_anchor(), TimeDelta::days(1)).unwrap();
        let success = at(2024, 11, 22, 0, 0, 1);
        assert_eq!(
            anchored.next_due(Some(success), Some(success), now),
            Some(at(2024, 11, 23, 0, 0, 0))
        );
        assert_eq!(
            anchored.next_due(None, None, now),
            Some(at(2024, 11, 22, 0, 0, 0)),
            "overdue task reports the grid point it is catching up on"
        );
        assert_eq!(
            anchored.next_due(None, None, at(2024, 11, 1, 0, 0, 0)),
            Some(daily_anchor())
        );

        assert_eq!(Cadence::one_off().next_due(None, None, now), Some(now));
        assert_eq!(Cadence::one_off().next_due(Some(now), Some(now), now), None);
    }

    #[test]
    fn display_labels() {
        assert_eq!(
            Cadence::periodic(TimeDelta::hours(6)).unwrap().to_string(),
            "every 6h"
        );
        assert_eq!(
            Cadence::anchored(daily_anchor(), TimeDelta::days(1))
                .unwrap()
                .to_string(),
            "every 1d from 2024-11-20T00:00:00Z"
        );
        assert_eq!(Cadence::one_off().to_string(), "once");
        assert_eq!(format_period(TimeDelta::seconds(90)), "90s");
        assert_eq!(format_period(TimeDelta::milliseconds(250)), "250ms");
    }
}
