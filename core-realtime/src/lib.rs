//! # Realtime Connections
//!
//! WebSocket connection management for streaming features such as chat.
//!
//! ## Overview
//!
//! [`WebSocketManager`] keeps any number of logical connections, each keyed by
//! its endpoint path and each with its own:
//! - connect timeout and heartbeat (`ping` every `heartbeat_interval`, incoming
//!   `ping` answered with `pong`)
//! - reconnect loop with capped exponential backoff after an unexpected close
//! - listener registry for [`WebSocketEvent`]s
//!
//! Messages travel as JSON [`Envelope`]s of the form `{type, data, id, timestamp}`.
//!
//! The socket itself comes from a host-provided
//! [`WebSocketTransport`](bridge_traits::websocket::WebSocketTransport).
//!
//! ## Example
//!
//! ```no_run
//! use bridge_traits::{SystemClock, WebSocketTransport};
//! use core_realtime::{EventKind, WebSocketConfig, WebSocketEvent, WebSocketManager};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example(transport: Arc<dyn WebSocketTransport>) -> core_realtime::Result<()> {
//! let manager = WebSocketManager::new(
//!     WebSocketConfig::new("wss://api.example.com/ws"),
//!     transport,
//!     Arc::new(SystemClock),
//! )?;
//!
//! manager.on("/chat/stream/abc", EventKind::Message, |event| {
//!     if let WebSocketEvent::Message(envelope) = event {
//!         println!("{}: {}", envelope.kind, envelope.data);
//!     }
//! });
//!
//! manager.connect("/chat/stream/abc").await?;
//! manager.send("/chat/stream/abc", "chat.message", json!({"text": "hi"}))?;
//! manager.disconnect_all().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod listener;
pub mod manager;
pub mod message;

pub use config::WebSocketConfig;
pub use error::{RealtimeError, Result};
pub use listener::{EventKind, Listener, ListenerId, WebSocketEvent};
pub use manager::{ConnectionState, WebSocketManager};
pub use message::{Envelope, PING, PONG};
