use chrono::{Datelike, Duration as ChronoDuration, NaiveDateTime, NaiveTime, Weekday};
use std::time::Duration;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// When a task fires.
///
/// Calendar cadences compute only their first delay from local wall time;
/// later firings follow a flat 24 h / 7 d period, so they drift by an hour
/// across daylight-saving transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Every(Duration),
    DailyAt { hour: u32 },
    WeeklyAt { weekday: Weekday, hour: u32 },
}

impl Cadence {
    pub fn first_delay(&self, local_now: NaiveDateTime) -> Duration {
        match *self {
            Cadence::Every(period) => period,
            Cadence::DailyAt { hour } => delay_until_daily(local_now, hour),
            Cadence::WeeklyAt { weekday, hour } => delay_until_weekly(local_now, weekday, hour),
        }
    }

    pub fn period(&self) -> Duration {
        match *self {
            Cadence::Every(period) => period,
            Cadence::DailyAt { .. } => DAY,
            Cadence::WeeklyAt { .. } => WEEK,
        }
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cadence::Every(period) => write!(f, "every {}s", period.as_secs()),
            Cadence::DailyAt { hour } => write!(f, "daily at {hour:02}:00"),
            Cadence::WeeklyAt { weekday, hour } => write!(f, "weekly on {weekday} at {hour:02}:00"),
        }
    }
}

fn at_hour(now: NaiveDateTime, days_ahead: i64, hour: u32) -> NaiveDateTime {
    let time = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or_default();
    (now.date() + ChronoDuration::days(days_ahead)).and_time(time)
}

fn until(now: NaiveDateTime, target: NaiveDateTime) -> Duration {
    (target - now).to_std().unwrap_or(Duration::ZERO)
}

/// Time until the next `hour:00:00`: today if still ahead, otherwise tomorrow.
pub fn delay_until_daily(now: NaiveDateTime, hour: u32) -> Duration {
    let mut target = at_hour(now, 0, hour);
    if target <= now {
        target = at_hour(now, 1, hour);
    }
    until(now, target)
}

/// Time until the next `weekday` at `hour:00:00`. On that weekday past the
/// hour, the following week.
pub fn delay_until_weekly(now: NaiveDateTime, weekday: Weekday, hour: u32) -> Duration {
    let today = now.weekday().num_days_from_sunday() as i64;
    let wanted = weekday.num_days_from_sunday() as i64;
    let days_ahead = (wanted - today).rem_euclid(7);

    let mut target = at_hour(now, days_ahead, hour);
    if target <= now {
        target = at_hour(now, days_ahead + 7, hour);
    }
    until(now, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    const HOUR: u64 = 60 * 60;

    #[test]
    fn test_daily_later_today() {
        let delay = delay_until_daily(at(2024, 6, 1, 0, 30), 2);
        assert_eq!(delay, Duration::from_secs(90 * 60));
    }

    #[test]
    fn test_daily_already_passed() {
        let delay = delay_until_daily(at(2024, 6, 1, 2, 30), 2);
        assert_eq!(delay, Duration::from_secs(23 * HOUR + 30 * 60));
    }

    #[test]
    fn test_daily_exactly_on_the_hour_waits_a_day() {
        assert_eq!(delay_until_daily(at(2024, 6, 1, 3, 0), 3), DAY);
    }

    #[test]
    fn test_weekly_from_midweek() {
        // 2024-06-05 is a Wednesday
        let delay = delay_until_weekly(at(2024, 6, 5, 10, 0), Weekday::Sun, 4);
        assert_eq!(delay, Duration::from_secs(3 * 24 * HOUR + 18 * HOUR));
    }

    #[test]
    fn test_weekly_same_day_before_hour() {
        // 2024-06-02 is a Sunday
        let delay = delay_until_weekly(at(2024, 6, 2, 1, 0), Weekday::Sun, 4);
        assert_eq!(delay, Duration::from_secs(3 * HOUR));
    }

    #[test]
    fn test_weekly_same_day_after_hour() {
        let delay = delay_until_weekly(at(2024, 6, 2, 5, 0), Weekday::Sun, 4);
        assert_eq!(delay, Duration::from_secs(7 * 24 * HOUR - HOUR));
    }

    #[test]
    fn test_periods() {
        assert_eq!(Cadence::DailyAt { hour: 2 }.period(), DAY);
        assert_eq!(
            Cadence::WeeklyAt { weekday: Weekday::Sun, hour: 4 }.period(),
            WEEK
        );
        let every = Cadence::Every(Duration::from_secs(300));
        assert_eq!(every.first_delay(at(2024, 6, 1, 0, 0)), Duration::from_secs(300));
    }
}
