//! # Host Bridge Traits
//!
//! Collaborator interfaces that the client data layer depends on but does not
//! implement itself.
//!
//! ## Overview
//!
//! This crate defines the contract between the data-layer core (cache, offline
//! queue, sync, realtime) and the host application. Each trait represents a
//! capability that is provided by surrounding code: a durable key-value store,
//! an HTTP executor, a raw WebSocket transport, a clock, and a credential
//! provider.
//!
//! ## Traits
//!
//! ### Storage
//! - [`KeyValueStore`](storage::KeyValueStore) - Durable byte store used by the
//!   persistent cache tier and the offline queue snapshot
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Executes queued requests and reachability probes
//! - [`ConnectionTypeProvider`](network::ConnectionTypeProvider) - Best-effort link type reporting
//! - [`WebSocketTransport`](websocket::WebSocketTransport) - Opens a single logical socket
//!
//! ### Credentials
//! - [`TokenProvider`](auth::TokenProvider) - Supplies bearer tokens for outgoing calls
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Reference Implementations
//!
//! A few small implementations ship with the traits so that tests and simple
//! hosts do not have to write their own:
//!
//! | Trait | Implementation |
//! |-------|----------------|
//! | `KeyValueStore` | [`InMemoryKeyValueStore`](storage::InMemoryKeyValueStore) |
//! | `Clock` | [`SystemClock`](time::SystemClock), [`ManualClock`](time::ManualClock) |
//! | `LoggerSink` | [`ConsoleLogger`](time::ConsoleLogger) |
//!
//! Desktop adapters (reqwest, SQLite) live in `bridge-desktop`.
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Host
//! implementations should convert platform errors into `BridgeError` and keep
//! messages actionable (include the key, URL or endpoint involved).
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so that implementations can be
//! shared across async tasks behind an `Arc`.

pub mod auth;
pub mod error;
pub mod http;
pub mod network;
pub mod storage;
pub mod time;
pub mod websocket;

pub use error::BridgeError;

// Re-export commonly used types
pub use auth::{StaticTokenProvider, TokenProvider};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use network::{ConnectionType, ConnectionTypeProvider, NetworkStatus};
pub use storage::{InMemoryKeyValueStore, KeyValueStore};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
pub use websocket::{
    close_code, TransportEvent, WebSocketEventStream, WebSocketSink, WebSocketTransport,
};
