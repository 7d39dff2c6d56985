use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use price_trigger::{
    config,
    error::Result,
    models::{Alert, AlertStatus, AlertTriggered},
    services::{
        alerts_service,
        memory_store::InMemoryAlertStore,
        mirror::{InMemoryMirror, MirrorBackend, MirrorEntry},
        notifier::NotificationSink,
    },
    AppState,
};
use rust_decimal_macros::dec;
use tokio::sync::Barrier;

#[derive(Default)]
struct Recorder(Mutex<Vec<AlertTriggered>>);

impl NotificationSink for Recorder {
    fn notify(&self, event: &AlertTriggered) {
        self.0.lock().push(event.clone());
    }
}

fn test_state() -> AppState {
    AppState::in_memory(config::Settings::default())
}

async fn assert_mirror_matches_store(state: &AppState, owner: &str) {
    let stored = state.store.list_by_owner(owner).await.unwrap();
    let mirrored = state.mirror.load_or_seed(owner).await.unwrap().unwrap();
    assert_eq!(mirrored, stored);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_for_one_owner_all_land() {
    let state = test_state();

    let mut handles = Vec::new();
    for i in 0..24 {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            alerts_service::create_alert(&state, "a@x.com", "BTC", dec!(100) + rust_decimal::Decimal::from(i))
                .await
                .unwrap()
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let mirrored = state.mirror.load_or_seed("a@x.com").await.unwrap().unwrap();
    assert_eq!(mirrored.len(), 24);
    assert_mirror_matches_store(&state, "a@x.com").await;
}

/// A mirror backend with a round trip, like a remote cache.
struct SlowMirror(InMemoryMirror);

#[async_trait]
impl MirrorBackend for SlowMirror {
    async fn load(&self, owner: &str) -> Result<Option<MirrorEntry>> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.0.load(owner).await
    }

    async fn compare_and_swap(&self, owner: &str, expected: Option<u64>, alerts: &[Alert]) -> Result<bool> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.0.compare_and_swap(owner, expected, alerts).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn heavy_contention_on_a_slow_mirror_loses_nothing() {
    let state = AppState::new(
        config::Settings::default(),
        Arc::new(InMemoryAlertStore::new()),
        Arc::new(SlowMirror(InMemoryMirror::new())),
    );
    alerts_service::create_alert(&state, "a@x.com", "BTC", dec!(1)).await.unwrap();

    let barrier = Arc::new(Barrier::new(200));
    let mut handles = Vec::new();
    for i in 0..200 {
        let state = state.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            alerts_service::create_alert(&state, "a@x.com", "BTC", dec!(2) + rust_decimal::Decimal::from(i)).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let mirrored = state.mirror.load_or_seed("a@x.com").await.unwrap().unwrap();
    assert_eq!(mirrored.len(), 201);
    assert_mirror_matches_store(&state, "a@x.com").await;
}

#[tokio::test]
async fn two_concurrent_creates_both_appear() {
    let state = test_state();

    let (a, b) = tokio::join!(
        alerts_service::create_alert(&state, "a@x.com", "BTC", dec!(100)),
        alerts_service::create_alert(&state, "a@x.com", "ETH", dec!(5)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let mirrored = state.mirror.load_or_seed("a@x.com").await.unwrap().unwrap();
    let ids: Vec<i64> = mirrored.iter().map(|x| x.id).collect();
    assert!(ids.contains(&a.id) && ids.contains(&b.id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_create_delete_trigger_converges() {
    let state = test_state();
    let matcher = state.matcher(Arc::new(Recorder::default()));

    let mut seeded = Vec::new();
    for i in 0..10 {
        let target = if i % 2 == 0 { dec!(100) } else { dec!(500) };
        seeded.push(alerts_service::create_alert(&state, "a@x.com", "BTC", target).await.unwrap());
    }

    let mut handles = Vec::new();

    // API side: delete every third alert and keep creating new ones
    for (i, alert) in seeded.iter().enumerate() {
        let state = state.clone();
        let id = alert.id;
        handles.push(tokio::spawn(async move {
            if i % 3 == 0 {
                // may lose against the matcher; either terminal state is fine
                let _ = alerts_service::delete_alert(&state, "a@x.com", id).await;
            }
            alerts_service::create_alert(&state, "a@x.com", "ETH", dec!(1)).await.unwrap();
        }));
    }

    // ingestion side: ticks at 100 trigger the even alerts
    for _ in 0..3 {
        let matcher = matcher.clone();
        handles.push(tokio::spawn(async move {
            matcher.evaluate("BTC", dec!(100)).await.unwrap();
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    assert_mirror_matches_store(&state, "a@x.com").await;

    let stored = state.store.list_by_owner("a@x.com").await.unwrap();
    assert_eq!(stored.len(), 20);
    assert!(stored
        .iter()
        .filter(|a| a.instrument == "BTC" && a.target_price == dec!(100))
        .all(|a| a.status.is_terminal()));
}

#[tokio::test]
async fn end_to_end_tick_triggers_once_and_mirrors() {
    let state = test_state();
    let sink = Arc::new(Recorder::default());
    let matcher = state.matcher(sink.clone());

    let alert = alerts_service::create_alert(&state, "a@x.com", "BTC", dec!(100)).await.unwrap();

    // 0.1% of 100 is 0.1, so 99.95 is inside the band
    let fired = matcher.evaluate("BTC", dec!(99.95)).await.unwrap();
    assert_eq!(fired.len(), 1);

    // the same tick again changes nothing
    assert!(matcher.evaluate("BTC", dec!(99.95)).await.unwrap().is_empty());

    let events = sink.0.lock().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].alert_id, alert.id);
    assert_eq!(events[0].owner, "a@x.com");
    assert_eq!(events[0].target_price, dec!(100));
    assert_eq!(events[0].current_price, dec!(99.95));

    let page = alerts_service::list_alerts(&state, "a@x.com", Some(AlertStatus::Triggered), 1, 10)
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, alert.id);
    assert_mirror_matches_store(&state, "a@x.com").await;
}

#[tokio::test]
async fn band_edges_through_the_matcher() {
    let state = test_state();
    let matcher = state.matcher(Arc::new(Recorder::default()));

    alerts_service::create_alert(&state, "a@x.com", "BTC", dec!(100)).await.unwrap();

    assert!(matcher.evaluate("BTC", dec!(100.1001)).await.unwrap().is_empty());
    assert_eq!(matcher.evaluate("BTC", dec!(100.1)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn query_seeds_mirror_for_rows_written_behind_its_back() {
    let state = test_state();

    // written straight to the store, no mirror sync
    state.store.create("old@x.com", "BTC", dec!(10)).await.unwrap();
    state.store.create("old@x.com", "BTC", dec!(20)).await.unwrap();

    let page = alerts_service::list_alerts(&state, "old@x.com", None, 1, 10).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_mirror_matches_store(&state, "old@x.com").await;
}
