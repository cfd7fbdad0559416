//! Wiring and lifecycle of the client core façade.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::storage::{InMemoryKeyValueStore, KeyValueStore};
use bridge_traits::time::ManualClock;
use core_runtime::events::SyncEvent;
use core_service::{ClientCore, ComponentConfigs, CoreConfig, CoreError, CoreEvent};
use core_sync::{OfflineQueue, OutgoingRequest, QueueConfig};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingHttp {
    replayed: Mutex<Vec<String>>,
}

#[async_trait]
impl HttpClient for RecordingHttp {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        if request.method != HttpMethod::Head {
            self.replayed.lock().unwrap().push(request.url);
        }
        Ok(HttpResponse::with_status(200))
    }
}

fn config(store: Arc<dyn KeyValueStore>, http: Arc<RecordingHttp>) -> CoreConfig {
    CoreConfig::builder()
        .key_value_store(store)
        .http_client(http)
        .clock(Arc::new(ManualClock::default()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_cache_round_trip_through_core() {
    let core = ClientCore::new(
        config(
            Arc::new(InMemoryKeyValueStore::new()),
            Arc::new(RecordingHttp::default()),
        ),
        ComponentConfigs::default(),
    )
    .unwrap();

    core.cache()
        .set("user:1", &json!({"name": "Ada"}), Some(60))
        .await
        .unwrap();
    let cached: Option<serde_json::Value> = core.cache().get("user:1").await.unwrap();
    assert_eq!(cached, Some(json!({"name": "Ada"})));
}

#[tokio::test]
async fn test_realtime_requires_opt_in() {
    let core = ClientCore::new(
        config(
            Arc::new(InMemoryKeyValueStore::new()),
            Arc::new(RecordingHttp::default()),
        ),
        ComponentConfigs::default(),
    )
    .unwrap();

    assert!(matches!(
        core.realtime(),
        Err(CoreError::CapabilityMissing { .. })
    ));
}

#[tokio::test]
async fn test_start_replays_restored_queue_and_shutdown_stops_tasks() {
    let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
    let http = Arc::new(RecordingHttp::default());

    // A request left over from a previous run
    let previous = OfflineQueue::new(
        QueueConfig::default(),
        http.clone(),
        store.clone(),
        Arc::new(ManualClock::default()),
    )
    .unwrap();
    previous
        .enqueue(OutgoingRequest::post(
            "https://api.example.com/messages",
            json!({"text": "sent offline"}),
        ))
        .await
        .unwrap();
    drop(previous);

    let core = ClientCore::new(config(store, http.clone()), ComponentConfigs::default()).unwrap();
    let mut events = core.event_bus().subscribe();

    core.start().await.unwrap();
    assert!(core.is_started());
    assert!(core.network_monitor().is_monitoring());
    assert!(core.sync_manager().is_started());
    assert!(core.cache().is_cleanup_running());

    let synced = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let CoreEvent::Sync(SyncEvent::Completed { synced, .. }) =
                events.recv().await.unwrap()
            {
                break synced;
            }
        }
    })
    .await
    .expect("first probe should trigger a sync");

    assert_eq!(synced, 1);
    assert_eq!(
        *http.replayed.lock().unwrap(),
        vec!["https://api.example.com/messages".to_string()]
    );
    assert!(core.offline_queue().is_empty().await);

    // Second start is a no-op
    core.start().await.unwrap();

    core.shutdown().await;
    assert!(!core.is_started());
    assert!(!core.network_monitor().is_monitoring());
    assert!(!core.sync_manager().is_started());
    assert!(!core.cache().is_cleanup_running());
}
