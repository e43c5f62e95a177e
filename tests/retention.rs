//! Integration tests for the retention reaper.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use priority_quota::infrastructure::mocks::{FlakyStore, MockClock, MockLogCapture};
use priority_quota::{
    CircuitBreakerConfig, CircuitState, EventStore, MemoryEventStore, QuotaError, QuotaService,
    ReapOutcome, SubmitRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 10, 15, 0, 0).unwrap()
}

async fn grant_at(
    service: &QuotaService<MemoryEventStore>,
    clock: &MockClock,
    at: DateTime<Utc>,
    reference: &str,
) {
    clock.set(at);
    let outcome = service
        .submit(SubmitRequest::priority("CRESOL PATO BRANCO").with_external_ref(reference))
        .await
        .unwrap();
    assert!(outcome.is_granted(), "{:?}", outcome);
}

#[tokio::test]
async fn test_fifteen_day_event_reaped_thirteen_day_event_kept() {
    let clock = Arc::new(MockClock::new(now()));
    let service = QuotaService::builder()
        .with_default_limit(5)
        .with_clock(clock.clone())
        .without_background_reaper()
        .build_in_memory()
        .unwrap();

    grant_at(&service, &clock, now() - ChronoDuration::days(15), "old").await;
    grant_at(&service, &clock, now() - ChronoDuration::days(13), "recent").await;
    clock.set(now());

    let ReapOutcome::Completed(report) = service.reap_now().await.unwrap() else {
        panic!("reap did not run");
    };
    assert_eq!(report.expired, 1);
    assert_eq!(service.status().await.unwrap().total_stored_events, 1);
    assert_eq!(service.metrics().events_reaped(), 1);

    // The reaped reference may be reused.
    let reused = service
        .submit(SubmitRequest::priority("CRESOL PATO BRANCO").with_external_ref("old"))
        .await
        .unwrap();
    assert!(reused.is_granted());
}

#[tokio::test]
async fn test_capacity_cap_keeps_newest() {
    let clock = Arc::new(MockClock::new(now()));
    let service = QuotaService::builder()
        .with_default_limit(10)
        .with_max_records(3)
        .with_clock(clock.clone())
        .without_background_reaper()
        .build_in_memory()
        .unwrap();

    for i in 0..5 {
        grant_at(
            &service,
            &clock,
            now() - ChronoDuration::minutes(10 - i),
            &format!("p-{}", i),
        )
        .await;
    }

    let ReapOutcome::Completed(report) = service.reap_now().await.unwrap() else {
        panic!("reap did not run");
    };
    assert_eq!(report.trimmed, 2);

    let refs: Vec<_> = service
        .history("cresol pato branco")
        .await
        .unwrap()
        .into_iter()
        .filter_map(|e| e.external_ref)
        .collect();
    assert_eq!(refs, vec!["p-2", "p-3", "p-4"]);
}

#[tokio::test]
async fn test_background_reaper_runs_on_start() {
    let clock = Arc::new(MockClock::new(now()));
    let store = MemoryEventStore::new(clock.clone());
    clock.set(now() - ChronoDuration::days(30));
    store
        .append(priority_quota::NewEvent::granted(
            priority_quota::AgencyName::parse("X").unwrap(),
            None,
        ))
        .await
        .unwrap();
    clock.set(now());

    let service = QuotaService::builder()
        .with_clock(clock)
        .with_reap_interval(Duration::from_secs(3600))
        .build(store)
        .unwrap();

    let mut remaining = u64::MAX;
    for _ in 0..50 {
        remaining = service.status().await.unwrap().total_stored_events;
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(remaining, 0);
    assert!(service.is_reaping());

    service.shutdown().await.unwrap();
    assert!(!service.is_reaping());
}

#[tokio::test]
async fn test_reap_failure_is_logged_and_counted() {
    let capture = MockLogCapture::new();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let _default = tracing::subscriber::set_default(subscriber);

    let clock = Arc::new(MockClock::new(now()));
    let store = Arc::new(FlakyStore::new(MemoryEventStore::new(clock.clone())));
    let service = QuotaService::builder()
        .with_clock(clock)
        .without_background_reaper()
        .build(Arc::clone(&store))
        .unwrap();

    store.set_failing(true);
    let err = service.reap_now().await.unwrap_err();
    assert!(matches!(err, QuotaError::StoreUnavailable(_)));
    assert_eq!(service.metrics().reap_failures(), 1);

    let warnings = capture.at_level(Level::WARN);
    assert!(warnings
        .iter()
        .any(|log| log.message == "retention reap failed"));
    assert!(warnings
        .iter()
        .any(|log| log.field("operation") == Some("delete_older_than")));

    // Admissions are unaffected once the store is back.
    store.set_failing(false);
    assert!(service
        .submit(SubmitRequest::priority("X"))
        .await
        .unwrap()
        .is_granted());
}

#[tokio::test]
async fn test_reaper_failures_do_not_open_admission_breaker() {
    let clock = Arc::new(MockClock::new(now()));
    let store = Arc::new(FlakyStore::new(MemoryEventStore::new(clock.clone())));
    let service = QuotaService::builder()
        .with_clock(clock)
        .with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
        })
        .without_background_reaper()
        .build(Arc::clone(&store))
        .unwrap();

    store.set_failing(true);
    assert!(service.reap_now().await.is_err());
    assert_eq!(service.reaper_circuit_breaker().state(), CircuitState::Open);
    assert_eq!(service.circuit_breaker().state(), CircuitState::Closed);

    store.set_failing(false);
    assert!(service
        .submit(SubmitRequest::priority("X"))
        .await
        .unwrap()
        .is_granted());
}
