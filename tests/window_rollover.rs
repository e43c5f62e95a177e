//! Integration tests for the Monday-anchored accounting window.

use chrono::{Datelike, Duration as ChronoDuration, TimeZone, Utc, Weekday};
use priority_quota::infrastructure::mocks::MockClock;
use priority_quota::{QuotaService, SubmitRequest, Window};
use std::sync::Arc;

#[tokio::test]
async fn test_sunday_night_grant_not_counted_on_monday() {
    let sunday_night = Utc.with_ymd_and_hms(2024, 5, 19, 23, 59, 59).unwrap();
    let clock = Arc::new(MockClock::new(sunday_night));
    let service = QuotaService::builder()
        .with_default_limit(1)
        .with_clock(clock.clone())
        .without_background_reaper()
        .build_in_memory()
        .unwrap();

    let late = service.submit(SubmitRequest::priority("X")).await.unwrap();
    assert!(late.is_granted());
    assert!(service
        .submit(SubmitRequest::priority("X"))
        .await
        .unwrap()
        .is_denied());

    clock.advance(ChronoDuration::seconds(1));
    let status = service.query("X").await.unwrap();
    assert_eq!(status.total_this_week, 0);
    assert!(!status.limit_reached);

    let fresh = service.submit(SubmitRequest::priority("X")).await.unwrap();
    assert!(fresh.is_granted());
    assert_eq!(fresh.total(), 1);

    // Both events still exist; only the window moved.
    assert_eq!(service.status().await.unwrap().total_stored_events, 2);
    assert_eq!(service.history("X").await.unwrap().len(), 1);
}

#[test]
fn test_every_day_of_a_week_maps_to_its_monday() {
    let monday = Utc.with_ymd_and_hms(2024, 12, 30, 0, 0, 0).unwrap();
    for hours in [0, 1, 25, 72, 100, 160, 167] {
        let now = monday + ChronoDuration::hours(hours);
        let window = Window::current(now);
        assert_eq!(window.start(), monday, "at {}", now);
        assert_eq!(window.start().weekday(), Weekday::Mon);
        assert_eq!(window.end(), now);
    }
}

#[test]
fn test_window_spans_year_boundary() {
    let new_year = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
    let window = Window::current(new_year);
    assert_eq!(
        window.start(),
        Utc.with_ymd_and_hms(2024, 12, 30, 0, 0, 0).unwrap()
    );
    assert_eq!(
        window.previous_start(),
        Utc.with_ymd_and_hms(2024, 12, 23, 0, 0, 0).unwrap()
    );
}
