//! WebSocket Transport Abstraction
//!
//! The realtime manager owns connection state, heartbeats and reconnection.
//! Hosts only provide a way to open one socket and split it into a write half
//! and a stream of events.

use async_trait::async_trait;

use crate::error::Result;

/// Close codes used by the realtime layer.
pub mod close_code {
    /// Client-initiated or server-confirmed clean shutdown.
    pub const NORMAL_CLOSURE: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    /// Connection dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;
}

/// Event produced by an open socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed
    Open,
    /// Text frame received
    Message(String),
    /// Socket closed, by either side
    Close { code: u16, reason: String },
    /// Transport-level failure; a `Close` usually follows
    Error(String),
}

/// Write half of an open socket.
#[async_trait]
pub trait WebSocketSink: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;

    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;
}

/// Read half of an open socket.
///
/// `None` means the stream ended without a close frame; the realtime manager
/// treats it as an abnormal closure.
#[async_trait]
pub trait WebSocketEventStream: Send {
    async fn next(&mut self) -> Option<TransportEvent>;
}

/// Socket factory
///
/// `open` starts the handshake and returns immediately. The event stream
/// yields [`TransportEvent::Open`] once the socket is usable; the caller
/// applies its own connect timeout while waiting for it.
///
/// # Platform Support
///
/// - **Desktop**: tungstenite-based client
/// - **iOS**: URLSessionWebSocketTask
/// - **Android**: OkHttp WebSocket
#[async_trait]
pub trait WebSocketTransport: Send + Sync {
    async fn open(
        &self,
        url: &str,
    ) -> Result<(Box<dyn WebSocketSink>, Box<dyn WebSocketEventStream>)>;
}
