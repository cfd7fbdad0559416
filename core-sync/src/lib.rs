//! # Offline Queue & Sync
//!
//! Keeps writes made while offline and delivers them when the network returns.
//!
//! ## Components
//!
//! - **Offline Queue** (`offline_queue`): Durable priority queue of HTTP
//!   requests with single-flight replay and a fixed retry table
//! - **Network Monitor** (`network`): HTTP reachability probe, polling and
//!   change notification
//! - **Sync Manager** (`sync_manager`): Replays the queue on reconnect and
//!   tracks sync status for the UI
//!
//! ## Example
//!
//! ```no_run
//! use bridge_traits::{HttpClient, InMemoryKeyValueStore, SystemClock};
//! use core_sync::{
//!     NetworkMonitor, NetworkMonitorConfig, OfflineQueue, OutgoingRequest, QueueConfig,
//!     RequestPriority, SyncManager, SyncManagerConfig,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example(http: Arc<dyn HttpClient>) -> core_sync::Result<()> {
//! let clock = Arc::new(SystemClock);
//! let queue = Arc::new(OfflineQueue::new(
//!     QueueConfig::default(),
//!     http.clone(),
//!     Arc::new(InMemoryKeyValueStore::new()),
//!     clock.clone(),
//! )?);
//! let monitor = Arc::new(NetworkMonitor::new(NetworkMonitorConfig::default(), http)?);
//! let sync = Arc::new(SyncManager::new(
//!     SyncManagerConfig::default(),
//!     queue.clone(),
//!     monitor.clone(),
//!     clock,
//! ));
//!
//! queue
//!     .enqueue(
//!         OutgoingRequest::post("https://api.example.com/messages", json!({"text": "hi"}))
//!             .with_priority(RequestPriority::High),
//!     )
//!     .await?;
//!
//! sync.start();
//! monitor.start_monitoring();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod network;
pub mod offline_queue;
pub mod request;
pub mod sync_manager;

pub use config::{NetworkMonitorConfig, QueueConfig, SyncManagerConfig};
pub use error::{Result, SyncError};
pub use network::{NetworkMonitor, StatusListener, SubscriptionId};
pub use offline_queue::{DropReason, DroppedRequest, OfflineQueue, ProcessReport, QueueStats};
pub use request::{OutgoingRequest, QueuedRequest, RequestId, RequestPriority};
pub use sync_manager::{SyncManager, SyncRequestError, SyncResult, SyncStatus};
