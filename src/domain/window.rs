//! Weekly accounting window.
//!
//! All window arithmetic is done in UTC. The clock port, the stores and the
//! reaper all speak `DateTime<Utc>`, so there is exactly one reference clock.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use serde::Serialize;

/// The accounting window an admission is counted against.
///
/// `start` is Monday 00:00:00 UTC on or before `end`; `end` is the instant
/// the window was computed for. Counting covers `[start, end]`.
///
/// # Example
/// ```
/// use chrono::{TimeZone, Utc};
/// use priority_quota::Window;
///
/// // Thursday afternoon
/// let now = Utc.with_ymd_and_hms(2024, 5, 16, 15, 30, 0).unwrap();
/// let window = Window::current(now);
///
/// assert_eq!(window.start(), Utc.with_ymd_and_hms(2024, 5, 13, 0, 0, 0).unwrap());
/// assert_eq!(window.end(), now);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Window {
    /// Compute the window containing `now`.
    pub fn current(now: DateTime<Utc>) -> Self {
        Self {
            start: week_start(now),
            end: now,
        }
    }

    /// Monday 00:00:00 UTC of this window.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// The instant this window was computed for.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Monday 00:00:00 UTC of the preceding window.
    pub fn previous_start(&self) -> DateTime<Utc> {
        self.start - Duration::weeks(1)
    }

    /// Monday 00:00:00 UTC of the following window, when this one rolls over.
    pub fn next_start(&self) -> DateTime<Utc> {
        self.start + Duration::weeks(1)
    }

    /// Whether `timestamp` is counted in this window.
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

/// Midnight of the Monday on or before `now`.
pub fn week_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_since_monday = i64::from(now.weekday().num_days_from_monday());
    let monday = now.date_naive() - Duration::days(days_since_monday);
    Utc.from_utc_datetime(&monday.and_time(NaiveTime::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn test_monday_midnight_is_its_own_start() {
        let monday = at(2024, 5, 13, 0, 0, 0);
        assert_eq!(week_start(monday), monday);
    }

    #[test]
    fn test_every_day_maps_to_same_monday() {
        let monday = at(2024, 5, 13, 0, 0, 0);
        for day in 0..7 {
            let now = monday + Duration::days(day) + Duration::hours(13);
            assert_eq!(week_start(now), monday, "day offset {}", day);
        }
    }

    #[test]
    fn test_sunday_last_second_belongs_to_previous_week() {
        let sunday = at(2024, 5, 19, 23, 59, 59);
        assert_eq!(week_start(sunday), at(2024, 5, 13, 0, 0, 0));

        let next_monday = sunday + Duration::seconds(1);
        assert_eq!(week_start(next_monday), at(2024, 5, 20, 0, 0, 0));
    }

    #[test]
    fn test_across_month_and_year_boundary() {
        // Wednesday 1 January 2025 -> Monday 30 December 2024
        assert_eq!(
            week_start(at(2025, 1, 1, 8, 0, 0)),
            at(2024, 12, 30, 0, 0, 0)
        );
    }

    #[test]
    fn test_window_bounds_and_neighbours() {
        let now = at(2024, 5, 16, 12, 0, 0);
        let window = Window::current(now);

        assert_eq!(window.previous_start(), at(2024, 5, 6, 0, 0, 0));
        assert_eq!(window.next_start(), at(2024, 5, 20, 0, 0, 0));

        assert!(window.contains(window.start()));
        assert!(window.contains(now));
        assert!(!window.contains(window.start() - Duration::seconds(1)));
        assert!(!window.contains(now + Duration::seconds(1)));
    }
}
