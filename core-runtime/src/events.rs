//! # Event Bus System
//!
//! Provides an event-driven architecture for the client core using `tokio::sync::broadcast`.
//! This module enables decoupled communication between core modules through typed events.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: Strongly-typed enum hierarchies for different domains
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//! - **Subscription Management**: Multiple subscribers can listen independently
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    emit      ┌───────────┐
//! │ CacheManager ├─────────────>│           │
//! └──────────────┘              │           │
//!                               │ EventBus  │
//! ┌──────────────┐    emit      │ (broadcast│     subscribe    ┌────────────┐
//! │ SyncManager  ├─────────────>│  channel) ├─────────────────>│ Subscriber │
//! └──────────────┘              │           │                  └────────────┘
//!                               │           │
//! ┌──────────────┐    emit      │           │     subscribe    ┌────────────┐
//! │ WebSockets   ├─────────────>│           ├─────────────────>│ Subscriber │
//! └──────────────┘              └───────────┘                  └────────────┘
//! ```
//!
//! Emitting is fire-and-forget: components ignore the "no subscribers" error,
//! so the bus never changes the outcome of the operation that emitted.
//!
//! ## Event Types
//!
//! ### Cache Events
//! - `CleanupCompleted`: Periodic or manual cleanup finished
//! - `PatternInvalidated`: Keys matching a glob were removed
//!
//! ### Network Events
//! - `StatusChanged`: Connectivity snapshot differs from the previous one
//!
//! ### Sync Events
//! - `Started`: Queue replay began
//! - `Completed`: Queue replay finished
//! - `Failed`: Queue replay stopped with an error
//! - `RequestDropped`: A queued request was discarded
//!
//! ### Realtime Events
//! - `Connected`: Socket for an endpoint opened
//! - `Disconnected`: Socket closed
//! - `Reconnecting`: Reconnect scheduled
//! - `ReconnectFailed`: Reconnect attempts exhausted
//!
//! ## Error Handling
//!
//! The event bus uses `tokio::sync::broadcast`, which can produce two types of errors:
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Subscribers should handle `Lagged` gracefully and treat `Closed` as a signal to exit.

use bridge_traits::network::NetworkStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Cache(CacheEvent),
    Network(NetworkEvent),
    Sync(SyncEvent),
    Realtime(RealtimeEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Cache(e) => e.description(),
            CoreEvent::Network(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Realtime(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Realtime(RealtimeEvent::ReconnectFailed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::RequestDropped { .. }) => EventSeverity::Warning,
            CoreEvent::Realtime(RealtimeEvent::Reconnecting { .. }) => EventSeverity::Warning,
            CoreEvent::Network(NetworkEvent::StatusChanged { .. }) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Realtime(RealtimeEvent::Connected { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Cache Events
// ============================================================================

/// Events related to the tiered cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// Expired and over-limit entries were removed.
    CleanupCompleted {
        /// Entries removed because their TTL elapsed.
        expired: u64,
        /// Entries removed to bring a tier back under its limits.
        evicted: u64,
    },
    /// Keys matching a glob pattern were invalidated.
    PatternInvalidated { pattern: String, removed: u64 },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::CleanupCompleted { .. } => "Cache cleanup completed",
            CacheEvent::PatternInvalidated { .. } => "Cache pattern invalidated",
        }
    }
}

// ============================================================================
// Network Events
// ============================================================================

/// Events related to connectivity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum NetworkEvent {
    /// Connectivity snapshot changed.
    StatusChanged { status: NetworkStatus },
}

impl NetworkEvent {
    fn description(&self) -> &str {
        match self {
            NetworkEvent::StatusChanged { status } if status.is_online() => "Network online",
            NetworkEvent::StatusChanged { .. } => "Network offline",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events related to offline queue replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Queue replay began.
    Started {
        /// Requests waiting when the sync started.
        queued: u64,
    },
    /// Queue replay finished.
    Completed {
        /// Requests that succeeded.
        synced: u64,
        /// Requests dropped or still waiting for a retry.
        failed: u64,
        /// Wall-clock duration of the sync in milliseconds.
        duration_ms: u64,
    },
    /// Queue replay stopped with an error.
    Failed { message: String },
    /// A request was removed from the queue without succeeding.
    RequestDropped {
        request_id: String,
        url: String,
        /// `true` when transient failures used up every retry, `false` when
        /// the server rejected the request outright.
        retries_exhausted: bool,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::Completed { .. } => "Sync completed",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::RequestDropped { .. } => "Queued request dropped",
        }
    }
}

// ============================================================================
// Realtime Events
// ============================================================================

/// Events related to WebSocket connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RealtimeEvent {
    Connected { endpoint: String },
    Disconnected { endpoint: String, code: u16 },
    Reconnecting {
        endpoint: String,
        /// 1-based attempt number.
        attempt: u32,
        delay_ms: u64,
    },
    ReconnectFailed { endpoint: String, attempts: u32 },
}

impl RealtimeEvent {
    fn description(&self) -> &str {
        match self {
            RealtimeEvent::Connected { .. } => "WebSocket connected",
            RealtimeEvent::Disconnected { .. } => "WebSocket disconnected",
            RealtimeEvent::Reconnecting { .. } => "WebSocket reconnecting",
            RealtimeEvent::ReconnectFailed { .. } => "WebSocket reconnect failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends (events are cloned for each subscriber)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{EventBus, CoreEvent, NetworkEvent};
/// use bridge_traits::network::NetworkStatus;
///
/// # #[tokio::main]
/// # async fn main() {
/// let event_bus = EventBus::new(100);
///
/// // Subscribe to events
/// let mut subscriber1 = event_bus.subscribe();
/// let mut subscriber2 = event_bus.subscribe();
///
/// // Emit an event
/// let event = CoreEvent::Network(NetworkEvent::StatusChanged {
///     status: NetworkStatus::offline(),
/// });
/// event_bus.emit(event).ok();
///
/// // Both subscribers receive the event
/// # tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
/// # }
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    ///   When a subscriber falls behind by more than this amount, it will
    ///   receive a `RecvError::Lagged` error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    ///
    /// # Example
    ///
    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::default();
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// Returns an error if there are no active subscribers.
    ///
    /// # Example
    ///
    /// ```rust
    /// use core_runtime::events::{EventBus, CoreEvent, SyncEvent};
    ///
    /// let event_bus = EventBus::new(100);
    /// let event = CoreEvent::Sync(SyncEvent::Started { queued: 3 });
    ///
    /// match event_bus.emit(event) {
    ///     Ok(n) => println!("Event sent to {} subscribers", n),
    ///     Err(_) => println!("No active subscribers"),
    /// }
    /// ```
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each call creates an independent receiver that will receive all future events.
    /// Past events are not replayed.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use core_runtime::events::EventBus;
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let event_bus = EventBus::new(100);
    /// let mut subscriber = event_bus.subscribe();
    ///
    /// tokio::spawn(async move {
    ///     while let Ok(event) = subscriber.recv().await {
    ///         println!("Received: {:?}", event);
    ///     }
    /// });
    /// # }
    /// ```
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    ///
    /// # Example
    ///
    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.subscriber_count(), 0);
    ///
    /// let _subscriber = event_bus.subscribe();
    /// assert_eq!(event_bus.subscriber_count(), 1);
    /// ```
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with additional filtering capabilities.
///
/// This provides a more ergonomic API for consuming events with optional filtering
/// by event type or severity.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream, CoreEvent};
///
/// # #[tokio::main]
/// # async fn main() {
/// let event_bus = EventBus::new(100);
/// let stream = EventStream::new(event_bus.subscribe());
///
/// // Filter for realtime events only
/// let mut realtime_stream = stream.filter(|event| {
///     matches!(event, CoreEvent::Realtime(_))
/// });
/// # }
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Adds a filter function to this stream.
    ///
    /// Only events that match the filter will be returned by `recv()`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use core_runtime::events::{EventBus, EventStream, CoreEvent};
    ///
    /// let event_bus = EventBus::new(100);
    /// let stream = EventStream::new(event_bus.subscribe());
    ///
    /// let realtime_stream = stream.filter(|event| {
    ///     matches!(event, CoreEvent::Realtime(_))
    /// });
    /// ```
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// This will skip events that don't match the filter and return the next matching event.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            // If no filter, return immediately
            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            // Apply filter
            if filter(&event) {
                return Ok(event);
            }

            // Event didn't match filter, continue to next event
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    // If no filter, return immediately
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    // Apply filter
                    if filter(&event) {
                        return Some(Ok(event));
                    }

                    // Event didn't match filter, continue
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::network::ConnectionType;

    fn connected(endpoint: &str) -> CoreEvent {
        CoreEvent::Realtime(RealtimeEvent::Connected {
            endpoint: endpoint.to_string(),
        })
    }

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);

        // Should error when no subscribers
        assert!(bus.emit(connected("chat")).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CoreEvent::Sync(SyncEvent::Started { queued: 4 });
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Realtime(_)));

        bus.emit(CoreEvent::Cache(CacheEvent::CleanupCompleted {
            expired: 3,
            evicted: 1,
        }))
        .ok();
        bus.emit(connected("notifications")).ok();

        assert_eq!(stream.recv().await.unwrap(), connected("notifications"));
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for attempt in 1..=5 {
            bus.emit(CoreEvent::Realtime(RealtimeEvent::Reconnecting {
                endpoint: "chat".to_string(),
                attempt,
                delay_ms: 1000,
            }))
            .ok();
        }

        let result = sub.recv().await;
        assert!(matches!(result, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let failed = CoreEvent::Sync(SyncEvent::Failed {
            message: "storage unavailable".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);

        let dropped = CoreEvent::Sync(SyncEvent::RequestDropped {
            request_id: "r-1".to_string(),
            url: "/api/items".to_string(),
            retries_exhausted: false,
        });
        assert_eq!(dropped.severity(), EventSeverity::Warning);

        let cleanup = CoreEvent::Cache(CacheEvent::PatternInvalidated {
            pattern: "user:*".to_string(),
            removed: 2,
        });
        assert_eq!(cleanup.severity(), EventSeverity::Debug);
    }

    #[test]
    fn test_network_description_follows_status() {
        let online = CoreEvent::Network(NetworkEvent::StatusChanged {
            status: NetworkStatus::online(ConnectionType::Wifi),
        });
        let offline = CoreEvent::Network(NetworkEvent::StatusChanged {
            status: NetworkStatus::offline(),
        });
        assert_eq!(online.description(), "Network online");
        assert_eq!(offline.description(), "Network offline");
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Sync(SyncEvent::Completed {
            synced: 5,
            failed: 1,
            duration_ms: 320,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Sync");
        assert_eq!(json["payload"]["event"], "Completed");
        assert_eq!(json["payload"]["synced"], 5);

        let deserialized: CoreEvent = serde_json::from_value(json).unwrap();
        assert_eq!(deserialized, event);
    }

    #[tokio::test]
    async fn test_try_recv() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe());
        assert!(stream.try_recv().is_none());

        bus.emit(connected("chat")).ok();
        let received = stream.try_recv().unwrap().unwrap();
        assert_eq!(received, connected("chat"));
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = EventBus::new(100);
        let mut sub = bus.subscribe();

        let handles: Vec<_> = (0..2)
            .map(|n| {
                let bus = bus.clone();
                tokio::spawn(async move {
                    for i in 0..10 {
                        bus.emit(CoreEvent::Cache(CacheEvent::PatternInvalidated {
                            pattern: format!("p{}-{}", n, i),
                            removed: 0,
                        }))
                        .ok();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.ok();
        }

        let mut count = 0;
        while sub.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 20);
    }
}
