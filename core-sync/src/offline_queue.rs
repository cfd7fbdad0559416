//! # Offline Queue
//!
//! Durable priority queue of HTTP requests made while offline.
//!
//! ## Overview
//!
//! - **Ordering**: the queue is kept sorted by `(priority, enqueued_at)` after
//!   every mutation, so the head is always the most urgent, oldest request
//! - **Persistence**: the full queue is written to the [`KeyValueStore`] after
//!   every mutation and restored lazily on first use
//! - **Replay**: [`OfflineQueue::process_queue`] replays requests strictly one at
//!   a time from the head, retrying transient failures on a delay table
//! - **Single-flight**: only one replay runs at a time; a concurrent call gets
//!   [`SyncError::QueueBusy`]
//!
//! ## Failure Handling
//!
//! | Outcome | Action |
//! |---------|--------|
//! | 2xx | removed |
//! | 4xx other than 408/429 | dropped immediately |
//! | 5xx, 408, 429, transport error | `retry_count += 1`, wait, retry head |
//! | `retry_count >= max_retries` | dropped |
//!
//! Snapshot reads and writes are fail-open: a corrupt or unreadable snapshot
//! starts an empty queue and a failed write is logged while the in-memory
//! queue stays authoritative.

use bridge_traits::auth::TokenProvider;
use bridge_traits::http::{HttpClient, HttpRequest};
use bridge_traits::storage::KeyValueStore;
use bridge_traits::time::Clock;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::config::QueueConfig;
use crate::error::{Result, SyncError};
use crate::request::{OutgoingRequest, QueuedRequest, RequestId, RequestPriority};

/// Why a request left the queue without succeeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Permanent 4xx response
    Rejected,
    /// Transient failures used up `max_retries`
    RetriesExhausted,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Rejected => "rejected",
            DropReason::RetriesExhausted => "retries_exhausted",
        }
    }
}

/// A request removed from the queue without succeeding.
///
/// Both reasons are permanent for the queue: the request will not be replayed again.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedRequest {
    pub request: QueuedRequest,
    pub message: String,
    pub reason: DropReason,
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessReport {
    pub succeeded: Vec<RequestId>,
    pub dropped: Vec<DroppedRequest>,
}

/// Queue composition snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    /// Requests that have failed at least once
    pub retrying: usize,
    pub oldest_enqueued_at: Option<i64>,
    pub is_processing: bool,
}

#[derive(Default)]
struct QueueState {
    requests: Vec<QueuedRequest>,
    loaded: bool,
}

/// Clears the processing flag when replay ends, including by panic or cancellation.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct OfflineQueue {
    http_client: Arc<dyn HttpClient>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    event_bus: Option<EventBus>,
    config: QueueConfig,
    state: Mutex<QueueState>,
    processing: AtomicBool,
}

impl OfflineQueue {
    pub fn new(
        config: QueueConfig,
        http_client: Arc<dyn HttpClient>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            http_client,
            store,
            clock,
            token_provider: None,
            event_bus: None,
            config,
            state: Mutex::new(QueueState::default()),
            processing: AtomicBool::new(false),
        })
    }

    /// Authenticate replayed requests with a bearer token fetched at send time.
    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    // ------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------

    async fn state(&self) -> MutexGuard<'_, QueueState> {
        let mut state = self.state.lock().await;
        if !state.loaded {
            state.requests = self.read_snapshot().await;
            sort_queue(&mut state.requests);
            state.loaded = true;
            if !state.requests.is_empty() {
                info!(count = state.requests.len(), "Restored offline queue");
            }
        }
        state
    }

    async fn read_snapshot(&self) -> Vec<QueuedRequest> {
        match self.store.get(&self.config.storage_key).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, "Offline queue snapshot is corrupt, starting empty");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read offline queue snapshot, starting empty");
                Vec::new()
            }
        }
    }

    async fn persist(&self, requests: &[QueuedRequest]) {
        let bytes = match serde_json::to_vec(requests) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to serialize offline queue");
                return;
            }
        };
        if let Err(e) = self.store.set(&self.config.storage_key, &bytes).await {
            warn!(error = %e, count = requests.len(), "Failed to persist offline queue");
        }
    }

    /// Restore the snapshot if it has not been read yet. Returns the queue length.
    pub async fn load(&self) -> usize {
        self.state().await.requests.len()
    }

    // ------------------------------------------------------------------
    // Queue operations
    // ------------------------------------------------------------------

    /// Add a request. Returns its assigned id.
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn enqueue(&self, request: OutgoingRequest) -> Result<RequestId> {
        if request.url.trim().is_empty() {
            return Err(SyncError::InvalidRequest("url cannot be empty".to_string()));
        }

        let queued = QueuedRequest::from_outgoing(
            request,
            self.clock.unix_timestamp_millis(),
            self.config.default_max_retries,
        );
        let id = queued.id;
        let priority = queued.priority;

        let mut state = self.state().await;
        state.requests.push(queued);
        sort_queue(&mut state.requests);
        self.persist(&state.requests).await;

        debug!(
            request_id = %id,
            priority = %priority,
            size = state.requests.len(),
            "Enqueued request"
        );
        Ok(id)
    }

    /// Remove and return the head.
    pub async fn dequeue(&self) -> Option<QueuedRequest> {
        let mut state = self.state().await;
        if state.requests.is_empty() {
            return None;
        }
        let head = state.requests.remove(0);
        self.persist(&state.requests).await;
        Some(head)
    }

    /// The head without removing it.
    pub async fn peek(&self) -> Option<QueuedRequest> {
        self.state().await.requests.first().cloned()
    }

    /// Remove a specific request. Returns whether it was queued.
    pub async fn remove(&self, id: &RequestId) -> bool {
        let mut state = self.state().await;
        let before = state.requests.len();
        state.requests.retain(|r| r.id != *id);
        let removed = state.requests.len() != before;
        if removed {
            self.persist(&state.requests).await;
        }
        removed
    }

    pub async fn clear(&self) {
        let mut state = self.state().await;
        state.requests.clear();
        self.persist(&state.requests).await;
    }

    pub async fn size(&self) -> usize {
        self.state().await.requests.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state().await.requests.is_empty()
    }

    /// Number of queued requests whose URL contains any of `tags`.
    pub async fn count_matching(&self, tags: &[String]) -> usize {
        self.state()
            .await
            .requests
            .iter()
            .filter(|r| r.matches_any(tags))
            .count()
    }

    /// Copy of the queue in replay order.
    pub async fn snapshot(&self) -> Vec<QueuedRequest> {
        self.state().await.requests.clone()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state().await;
        let count = |p: RequestPriority| state.requests.iter().filter(|r| r.priority == p).count();

        QueueStats {
            total: state.requests.len(),
            critical: count(RequestPriority::Critical),
            high: count(RequestPriority::High),
            normal: count(RequestPriority::Normal),
            low: count(RequestPriority::Low),
            retrying: state.requests.iter().filter(|r| r.retry_count > 0).count(),
            oldest_enqueued_at: state.requests.iter().map(|r| r.enqueued_at).min(),
            is_processing: self.is_processing(),
        }
    }

    /// Drop requests queued longer than `max_age`, whatever their retry state.
    #[instrument(skip(self))]
    pub async fn cleanup_stale_requests(&self, max_age: Duration) -> usize {
        let now = self.clock.unix_timestamp_millis();
        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);

        let mut state = self.state().await;
        let before = state.requests.len();
        state.requests.retain(|r| r.age_ms(now) <= max_age_ms);
        let removed = before - state.requests.len();

        if removed > 0 {
            self.persist(&state.requests).await;
            info!(removed, "Removed stale queued requests");
        }
        removed
    }

    // ------------------------------------------------------------------
    // Replay
    // ------------------------------------------------------------------

    /// Replay the whole queue until it is empty.
    pub async fn process_queue(&self) -> Result<ProcessReport> {
        self.process_where(|_| true).await
    }

    /// Replay only requests accepted by `filter`, in queue order.
    ///
    /// Returns once no matching request is left. Requests that fail
    /// transiently hold the head position while they wait out their delay.
    #[instrument(skip(self, filter))]
    pub async fn process_where<F>(&self, filter: F) -> Result<ProcessReport>
    where
        F: Fn(&QueuedRequest) -> bool + Send + Sync,
    {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SyncError::QueueBusy);
        }
        let _guard = ProcessingGuard(&self.processing);

        let mut report = ProcessReport::default();

        loop {
            let next = self.state().await.requests.iter().find(|&r| filter(r)).cloned();
            let Some(request) = next else {
                break;
            };

            match self.execute(&request).await {
                Ok(()) => {
                    self.remove(&request.id).await;
                    debug!(request_id = %request.id, "Replayed queued request");
                    report.succeeded.push(request.id);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(
                        request_id = %request.id,
                        url = %request.url,
                        error = %e,
                        "Request rejected, dropping"
                    );
                    report.dropped.push(
                        self.drop_request(request, e.to_string(), DropReason::Rejected)
                            .await,
                    );
                }
                Err(e) => {
                    let Some(retry_count) = self.record_failure(&request.id).await else {
                        continue;
                    };

                    if retry_count >= request.max_retries {
                        warn!(
                            request_id = %request.id,
                            attempts = retry_count,
                            error = %e,
                            "Retries exhausted, dropping request"
                        );
                        let mut request = request;
                        request.retry_count = retry_count;
                        report.dropped.push(
                            self.drop_request(request, e.to_string(), DropReason::RetriesExhausted)
                                .await,
                        );
                        continue;
                    }

                    let delay = self.config.retry_delay(retry_count);
                    debug!(
                        request_id = %request.id,
                        retry_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            dropped = report.dropped.len(),
            "Finished processing offline queue"
        );
        Ok(report)
    }

    async fn execute(&self, request: &QueuedRequest) -> Result<()> {
        let mut http_request =
            HttpRequest::new(request.method, request.url.clone()).headers(request.headers.clone());

        if let Some(body) = &request.body {
            http_request = http_request
                .json(body)
                .map_err(|e| SyncError::Serialization(e.to_string()))?;
        }

        if let Some(provider) = &self.token_provider {
            match provider.access_token().await {
                Ok(Some(token)) => http_request = http_request.bearer_token(token),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Token provider failed, sending without credentials"),
            }
        }

        let response = self
            .http_client
            .execute(http_request)
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        if response.is_success() {
            return Ok(());
        }
        Err(SyncError::HttpStatus {
            status: response.status,
            retryable: response.is_retryable() || !response.is_client_error(),
        })
    }

    /// Bump the retry count of a queued request. `None` if it left the queue meanwhile.
    async fn record_failure(&self, id: &RequestId) -> Option<u32> {
        let mut state = self.state().await;
        let request = state.requests.iter_mut().find(|r| r.id == *id)?;
        request.retry_count += 1;
        let retry_count = request.retry_count;
        self.persist(&state.requests).await;
        Some(retry_count)
    }

    async fn drop_request(
        &self,
        request: QueuedRequest,
        message: String,
        reason: DropReason,
    ) -> DroppedRequest {
        self.remove(&request.id).await;

        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Sync(SyncEvent::RequestDropped {
                request_id: request.id.to_string(),
                url: request.url.clone(),
                retries_exhausted: reason == DropReason::RetriesExhausted,
            }))
            .ok();
        }

        DroppedRequest {
            request,
            message,
            reason,
        }
    }
}

fn sort_queue(requests: &mut [QueuedRequest]) {
    // Stable, so equal keys keep insertion order
    requests.sort_by_key(QueuedRequest::sort_key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::BridgeError;
    use bridge_traits::http::{HttpMethod, HttpResponse};
    use bridge_traits::storage::InMemoryKeyValueStore;
    use bridge_traits::time::ManualClock;
    use bridge_traits::StaticTokenProvider;
    use mockall::mock;
    use serde_json::json;

    mock! {
        Http {}

        #[async_trait]
        impl HttpClient for Http {
            async fn execute(&self, request: HttpRequest) -> bridge_traits::error::Result<HttpResponse>;
        }
    }

    fn queue_with(http: MockHttp) -> (OfflineQueue, Arc<InMemoryKeyValueStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let clock = Arc::new(ManualClock::default());
        let queue = OfflineQueue::new(
            QueueConfig::default(),
            Arc::new(http),
            store.clone(),
            clock.clone(),
        )
        .unwrap();
        (queue, store, clock)
    }

    fn request(url: &str, priority: RequestPriority) -> OutgoingRequest {
        OutgoingRequest::new(HttpMethod::Post, url).with_priority(priority)
    }

    #[tokio::test]
    async fn test_enqueue_orders_by_priority_then_age() {
        let (queue, _, clock) = queue_with(MockHttp::new());
        for (url, priority) in [
            ("/low", RequestPriority::Low),
            ("/critical", RequestPriority::Critical),
            ("/normal", RequestPriority::Normal),
            ("/high", RequestPriority::High),
            ("/critical-later", RequestPriority::Critical),
        ] {
            queue.enqueue(request(url, priority)).await.unwrap();
            clock.advance(Duration::from_millis(1));
        }

        let mut order = Vec::new();
        while let Some(request) = queue.dequeue().await {
            order.push(request.url);
        }
        assert_eq!(
            order,
            ["/critical", "/critical-later", "/high", "/normal", "/low"]
        );
    }

    #[tokio::test]
    async fn test_snapshot_survives_restart() {
        let (queue, store, clock) = queue_with(MockHttp::new());
        queue
            .enqueue(request("/a", RequestPriority::Low))
            .await
            .unwrap();
        let id = queue
            .enqueue(request("/b", RequestPriority::High))
            .await
            .unwrap();

        let restored = OfflineQueue::new(
            QueueConfig::default(),
            Arc::new(MockHttp::new()),
            store,
            clock,
        )
        .unwrap();
        assert_eq!(restored.load().await, 2);
        assert_eq!(restored.peek().await.unwrap().id, id);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_starts_empty() {
        let (queue, store, _) = queue_with(MockHttp::new());
        store.set("offline_queue", b"{not json").await.unwrap();

        assert!(queue.is_empty().await);
        queue
            .enqueue(request("/a", RequestPriority::Normal))
            .await
            .unwrap();
        assert_eq!(queue.size().await, 1);
    }

    #[tokio::test]
    async fn test_empty_url_rejected() {
        let (queue, _, _) = queue_with(MockHttp::new());
        let result = queue.enqueue(request("  ", RequestPriority::Normal)).await;
        assert!(matches!(result, Err(SyncError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_process_sends_body_and_token() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .withf(|request| {
                request.headers.get("Authorization").map(String::as_str) == Some("Bearer abc")
                    && request.headers.get("Content-Type").map(String::as_str)
                        == Some("application/json")
                    && request.body.as_deref() == Some(&br#"{"text":"hi"}"#[..])
            })
            .times(1)
            .returning(|_| Ok(HttpResponse::with_status(201)));

        let (queue, _, _) = queue_with(http);
        let queue = queue.with_token_provider(Arc::new(StaticTokenProvider::new("abc")));
        queue
            .enqueue(OutgoingRequest::post("/api/messages", json!({"text": "hi"})))
            .await
            .unwrap();

        let report = queue.process_queue().await.unwrap();
        assert_eq!(report.succeeded.len(), 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_client_error_dropped_without_retry() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::with_status(404)));

        let (queue, _, _) = queue_with(http);
        queue
            .enqueue(request("/gone", RequestPriority::Normal))
            .await
            .unwrap();

        let report = queue.process_queue().await.unwrap();
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].reason, DropReason::Rejected);
        assert_eq!(report.dropped[0].request.retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retries_then_succeeds() {
        let mut http = MockHttp::new();
        let mut calls = 0;
        http.expect_execute().times(3).returning(move |_| {
            calls += 1;
            match calls {
                1 => Ok(HttpResponse::with_status(503)),
                2 => Err(BridgeError::Timeout("upstream".to_string())),
                _ => Ok(HttpResponse::with_status(200)),
            }
        });

        let (queue, _, _) = queue_with(http);
        queue
            .enqueue(request("/flaky", RequestPriority::Normal))
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        let report = queue.process_queue().await.unwrap();

        assert_eq!(report.succeeded.len(), 1);
        assert!(report.dropped.is_empty());
        // 1s after the first failure, 5s after the second
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(6));
        assert!(elapsed < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_processing_rejected() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .returning(|_| Ok(HttpResponse::with_status(500)));

        let (queue, _, _) = queue_with(http);
        let queue = Arc::new(queue);
        queue
            .enqueue(request("/slow", RequestPriority::Normal))
            .await
            .unwrap();

        let background = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.process_queue().await })
        };
        tokio::task::yield_now().await;
        assert!(queue.is_processing());

        assert!(matches!(
            queue.process_queue().await,
            Err(SyncError::QueueBusy)
        ));

        let report = background.await.unwrap().unwrap();
        assert_eq!(report.dropped.len(), 1);
        assert!(!queue.is_processing());
    }

    #[tokio::test]
    async fn test_process_where_leaves_other_requests() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .withf(|request| request.url.contains("messages"))
            .times(2)
            .returning(|_| Ok(HttpResponse::with_status(200)));

        let (queue, _, _) = queue_with(http);
        queue.enqueue(request("/api/messages/1", RequestPriority::Normal)).await.unwrap();
        queue.enqueue(request("/api/users/1", RequestPriority::Critical)).await.unwrap();
        queue.enqueue(request("/api/messages/2", RequestPriority::Low)).await.unwrap();

        let tags = vec!["messages".to_string()];
        let report = queue.process_where(|r| r.matches_any(&tags)).await.unwrap();

        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(queue.size().await, 1);
        assert_eq!(queue.peek().await.unwrap().url, "/api/users/1");
    }

    #[tokio::test]
    async fn test_cleanup_stale_requests() {
        let (queue, _, clock) = queue_with(MockHttp::new());
        queue.enqueue(request("/old", RequestPriority::Critical)).await.unwrap();
        clock.advance(Duration::from_secs(3600));
        queue.enqueue(request("/new", RequestPriority::Low)).await.unwrap();
        clock.advance(Duration::from_secs(60));

        assert_eq!(queue.cleanup_stale_requests(Duration::from_secs(600)).await, 1);
        assert_eq!(queue.peek().await.unwrap().url, "/new");
    }

    #[tokio::test]
    async fn test_stats_and_remove() {
        let (queue, _, _) = queue_with(MockHttp::new());
        let id = queue.enqueue(request("/a", RequestPriority::High)).await.unwrap();
        queue.enqueue(request("/b", RequestPriority::Low)).await.unwrap();
        queue.enqueue(request("/c", RequestPriority::Low)).await.unwrap();

        let stats = queue.stats().await;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.high, 1);
        assert_eq!(stats.low, 2);
        assert_eq!(stats.oldest_enqueued_at, Some(1_700_000_000_000));

        assert!(queue.remove(&id).await);
        assert!(!queue.remove(&id).await);
        queue.clear().await;
        assert!(queue.is_empty().await);
    }
}
