//! # WebSocket Manager
//!
//! Owns any number of logical connections, keyed by endpoint.
//!
//! ## Connection lifecycle
//!
//! ```text
//! Disconnected ─connect()─► Connecting ─Open─► Connected ─disconnect()─► Closing ─► Disconnected
//!                                                  │
//!                                      unexpected close (not 1000/1001)
//!                                                  ▼
//!                      Reconnecting ─(backoff)─► Connecting ─Open─► Connected
//!                           │
//!                 max attempts reached ─► ReconnectFailed ─► Disconnected
//! ```
//!
//! Each connected endpoint has one task that owns the socket. It forwards
//! outbound messages, sends heartbeats, answers `ping` with `pong`, dispatches
//! incoming messages and runs the reconnect loop. Every piece of it, including
//! a pending reconnect timer, stops when the connection's cancellation token
//! fires, which is what [`WebSocketManager::disconnect`] does.

use bridge_traits::auth::TokenProvider;
use bridge_traits::time::Clock;
use bridge_traits::websocket::{
    close_code, TransportEvent, WebSocketEventStream, WebSocketSink, WebSocketTransport,
};
use core_runtime::events::{CoreEvent, EventBus, RealtimeEvent};
use core_runtime::logging::redact_url_token;
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::WebSocketConfig;
use crate::error::{RealtimeError, Result};
use crate::listener::{EventKind, ListenerId, ListenerRegistry, WebSocketEvent};
use crate::message::Envelope;

/// State of one logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closing,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closing => "closing",
        }
    }
}

type Socket = (Box<dyn WebSocketSink>, Box<dyn WebSocketEventStream>);

struct Connection {
    /// Distinguishes this connection from a later one on the same endpoint
    session: u64,
    state: ConnectionState,
    reconnect_attempts: u32,
    cancellation_token: CancellationToken,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

enum SessionEnd {
    Cancelled,
    Closed { code: u16, reason: String },
}

struct Inner {
    transport: Arc<dyn WebSocketTransport>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
    config: WebSocketConfig,
    connections: Mutex<HashMap<String, Connection>>,
    listeners: ListenerRegistry,
    next_session: AtomicU64,
}

pub struct WebSocketManager {
    inner: Arc<Inner>,
}

impl WebSocketManager {
    pub fn new(
        config: WebSocketConfig,
        transport: Arc<dyn WebSocketTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                token_provider: None,
                clock,
                event_bus: None,
                config,
                connections: Mutex::new(HashMap::new()),
                listeners: ListenerRegistry::default(),
                next_session: AtomicU64::new(1),
            }),
        })
    }

    /// Authenticate sockets with a bearer token query parameter.
    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.token_provider = Some(provider),
            None => warn!("Token provider set after connections were opened, ignoring"),
        }
        self
    }

    /// Publish connection lifecycle events on the core event bus.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.event_bus = Some(event_bus),
            None => warn!("Event bus set after connections were opened, ignoring"),
        }
        self
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Open a logical connection and wait for the handshake.
    ///
    /// # Errors
    ///
    /// - [`RealtimeError::AlreadyConnected`] if the endpoint is connecting,
    ///   connected or reconnecting
    /// - [`RealtimeError::ConnectTimeout`] if no `Open` arrives within `connect_timeout`
    /// - [`RealtimeError::Cancelled`] if [`disconnect`](Self::disconnect) ran meanwhile
    #[instrument(skip(self))]
    pub async fn connect(&self, endpoint: &str) -> Result<()> {
        let inner = &self.inner;
        let (session, token) = {
            let mut connections = inner.lock_connections()?;
            if connections.contains_key(endpoint) {
                return Err(RealtimeError::AlreadyConnected {
                    endpoint: endpoint.to_string(),
                });
            }
            let session = inner.next_session.fetch_add(1, Ordering::Relaxed);
            let token = CancellationToken::new();
            connections.insert(
                endpoint.to_string(),
                Connection {
                    session,
                    state: ConnectionState::Connecting,
                    reconnect_attempts: 0,
                    cancellation_token: token.clone(),
                    outbound: None,
                    task: None,
                },
            );
            (session, token)
        };

        let opened = tokio::select! {
            _ = token.cancelled() => Err(RealtimeError::Cancelled {
                endpoint: endpoint.to_string(),
            }),
            opened = inner.open_socket(endpoint) => opened,
        };
        let (sink, stream) = match opened {
            Ok(socket) => socket,
            Err(e) => {
                inner.forget(endpoint, session);
                warn!(endpoint, error = %e, "WebSocket connect failed");
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if !inner.mark_connected(endpoint, session, Some(tx)) {
            return Err(RealtimeError::Cancelled {
                endpoint: endpoint.to_string(),
            });
        }
        inner.opened(endpoint);

        let task = tokio::spawn(Inner::run_connection(
            Arc::clone(inner),
            endpoint.to_string(),
            session,
            token.clone(),
            sink,
            stream,
            rx,
        ));
        let mut connections = inner.lock_connections()?;
        match connections.get_mut(endpoint) {
            Some(connection) if connection.session == session => connection.task = Some(task),
            // Disconnected from inside an open listener; the task sees the cancelled token
            _ => token.cancel(),
        }
        Ok(())
    }

    /// Close a connection with a normal-closure code and cancel any pending reconnect.
    ///
    /// Returns whether the endpoint was tracked.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, endpoint: &str) -> bool {
        let closing = self.inner.connections.lock().ok().and_then(|mut connections| {
            connections.get_mut(endpoint).map(|connection| {
                connection.state = ConnectionState::Closing;
                connection.outbound = None;
                connection.cancellation_token.cancel();
                (connection.session, connection.task.take())
            })
        });
        let Some((session, task)) = closing else {
            return false;
        };

        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(endpoint, error = %e, "WebSocket task ended abnormally");
            }
        }
        self.inner.forget(endpoint, session);
        info!(endpoint, "WebSocket disconnected");
        true
    }

    /// Cleanly close every tracked connection.
    pub async fn disconnect_all(&self) {
        let endpoints = self.active_endpoints();
        if endpoints.is_empty() {
            return;
        }
        info!(count = endpoints.len(), "Disconnecting all WebSockets");
        join_all(endpoints.iter().map(|endpoint| self.disconnect(endpoint))).await;
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    /// Send a typed message. Returns the generated message id.
    pub fn send(&self, endpoint: &str, kind: &str, data: Value) -> Result<String> {
        let envelope = Envelope::new(kind, data, self.inner.clock.unix_timestamp_millis());
        let text = serde_json::to_string(&envelope)?;

        let not_connected = || RealtimeError::NotConnected {
            endpoint: endpoint.to_string(),
        };
        let connections = self.inner.lock_connections()?;
        let outbound = connections
            .get(endpoint)
            .filter(|c| c.state == ConnectionState::Connected)
            .and_then(|c| c.outbound.as_ref())
            .ok_or_else(not_connected)?;
        outbound.send(text).map_err(|_| not_connected())?;

        debug!(endpoint, kind, id = %envelope.id, "Queued WebSocket message");
        Ok(envelope.id)
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    pub fn on<F>(&self, endpoint: &str, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&WebSocketEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(endpoint, kind, Arc::new(listener))
    }

    pub fn off(&self, endpoint: &str, id: ListenerId) -> bool {
        self.inner.listeners.remove(endpoint, id)
    }

    /// Drop every listener registered for the endpoint. Returns how many were removed.
    pub fn remove_all_listeners(&self, endpoint: &str) -> usize {
        self.inner.listeners.remove_all(endpoint)
    }

    pub fn listener_count(&self, endpoint: &str) -> usize {
        self.inner.listeners.count(endpoint)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn connection_state(&self, endpoint: &str) -> ConnectionState {
        self.inner
            .connections
            .lock()
            .ok()
            .and_then(|connections| connections.get(endpoint).map(|c| c.state))
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn reconnect_attempts(&self, endpoint: &str) -> u32 {
        self.inner
            .connections
            .lock()
            .ok()
            .and_then(|connections| connections.get(endpoint).map(|c| c.reconnect_attempts))
            .unwrap_or(0)
    }

    /// Tracked endpoints, sorted.
    pub fn active_endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = self
            .inner
            .connections
            .lock()
            .map(|connections| connections.keys().cloned().collect())
            .unwrap_or_default();
        endpoints.sort();
        endpoints
    }
}

impl Drop for WebSocketManager {
    fn drop(&mut self) {
        if let Ok(connections) = self.inner.connections.lock() {
            for connection in connections.values() {
                connection.cancellation_token.cancel();
            }
        }
    }
}

impl Inner {
    fn lock_connections(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Connection>>> {
        self.connections
            .lock()
            .map_err(|_| RealtimeError::Transport("connection table lock poisoned".to_string()))
    }

    /// Apply `f` to the endpoint's connection if it still belongs to `session` and is not closing.
    fn with_session<R>(
        &self,
        endpoint: &str,
        session: u64,
        f: impl FnOnce(&mut Connection) -> R,
    ) -> Option<R> {
        let mut connections = self.connections.lock().ok()?;
        connections
            .get_mut(endpoint)
            .filter(|c| c.session == session && c.state != ConnectionState::Closing)
            .map(f)
    }

    fn forget(&self, endpoint: &str, session: u64) {
        if let Ok(mut connections) = self.connections.lock() {
            if connections.get(endpoint).is_some_and(|c| c.session == session) {
                connections.remove(endpoint);
            }
        }
    }

    fn mark_connected(
        &self,
        endpoint: &str,
        session: u64,
        outbound: Option<mpsc::UnboundedSender<String>>,
    ) -> bool {
        self.with_session(endpoint, session, |c| {
            c.state = ConnectionState::Connected;
            c.reconnect_attempts = 0;
            if outbound.is_some() {
                c.outbound = outbound;
            }
        })
        .is_some()
    }

    fn emit(&self, event: RealtimeEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Realtime(event)).ok();
        }
    }

    fn opened(&self, endpoint: &str) {
        info!(endpoint, "WebSocket connected");
        self.listeners.dispatch(endpoint, &WebSocketEvent::Open);
        self.emit(RealtimeEvent::Connected {
            endpoint: endpoint.to_string(),
        });
    }

    async fn connection_url(&self, endpoint: &str) -> String {
        let url = self.config.endpoint_url(endpoint);
        let Some(provider) = &self.token_provider else {
            return url;
        };

        match provider.access_token().await {
            Ok(Some(token)) => {
                let separator = if url.contains('?') { '&' } else { '?' };
                format!("{}{}{}={}", url, separator, self.config.token_query_param, token)
            }
            Ok(None) => url,
            Err(e) => {
                warn!(
                    endpoint,
                    error = %e,
                    "Token provider failed, connecting without credentials"
                );
                url
            }
        }
    }

    /// Open a socket and wait for its `Open` event within `connect_timeout`.
    async fn open_socket(&self, endpoint: &str) -> Result<Socket> {
        let url = self.connection_url(endpoint).await;
        debug!(
            endpoint,
            url = %redact_url_token(&url, &self.config.token_query_param),
            "Opening WebSocket"
        );

        let handshake = self.handshake(&url);
        match tokio::time::timeout(self.config.connect_timeout, handshake).await {
            Ok(result) => result,
            Err(_) => Err(RealtimeError::ConnectTimeout {
                endpoint: endpoint.to_string(),
                timeout_ms: self.config.connect_timeout.as_millis() as u64,
            }),
        }
    }

    async fn handshake(&self, url: &str) -> Result<Socket> {
        let (sink, mut stream) = self.transport.open(url).await?;
        loop {
            match stream.next().await {
                Some(TransportEvent::Open) => return Ok((sink, stream)),
                Some(TransportEvent::Message(_)) => continue,
                Some(TransportEvent::Error(message)) => {
                    return Err(RealtimeError::Transport(message));
                }
                Some(TransportEvent::Close { code, reason }) => {
                    return Err(RealtimeError::Transport(format!(
                        "closed during handshake ({}): {}",
                        code, reason
                    )))
                }
                None => {
                    return Err(RealtimeError::Transport(
                        "stream ended during handshake".to_string(),
                    ))
                }
            }
        }
    }

    /// Lifetime task of one logical connection.
    async fn run_connection(
        self: Arc<Self>,
        endpoint: String,
        session: u64,
        token: CancellationToken,
        mut sink: Box<dyn WebSocketSink>,
        mut stream: Box<dyn WebSocketEventStream>,
        mut outbound: mpsc::UnboundedReceiver<String>,
    ) {
        loop {
            let end = self
                .drive(&endpoint, &token, &mut sink, &mut stream, &mut outbound)
                .await;

            let (code, reason) = match end {
                SessionEnd::Cancelled => {
                    if let Err(e) = sink
                        .close(close_code::NORMAL_CLOSURE, "Client disconnect")
                        .await
                    {
                        debug!(endpoint = %endpoint, error = %e, "Close frame not sent");
                    }
                    self.closed(
                        &endpoint,
                        close_code::NORMAL_CLOSURE,
                        "Client disconnect".to_string(),
                    );
                    return;
                }
                SessionEnd::Closed { code, reason } => (code, reason),
            };

            self.closed(&endpoint, code, reason);
            if code == close_code::NORMAL_CLOSURE || code == close_code::GOING_AWAY {
                info!(endpoint = %endpoint, code, "WebSocket closed by server");
                self.forget(&endpoint, session);
                return;
            }

            warn!(endpoint = %endpoint, code, "WebSocket closed unexpectedly");
            match self.reconnect(&endpoint, session, &token).await {
                Some((new_sink, new_stream)) => {
                    sink = new_sink;
                    stream = new_stream;
                }
                None => return,
            }
        }
    }

    async fn drive(
        &self,
        endpoint: &str,
        token: &CancellationToken,
        sink: &mut Box<dyn WebSocketSink>,
        stream: &mut Box<dyn WebSocketEventStream>,
        outbound: &mut mpsc::UnboundedReceiver<String>,
    ) -> SessionEnd {
        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => return SessionEnd::Cancelled,
                Some(text) = outbound.recv() => {
                    if let Err(e) = sink.send_text(text).await {
                        warn!(endpoint, error = %e, "WebSocket send failed");
                        self.listeners.dispatch(endpoint, &WebSocketEvent::Error(e.to_string()));
                    }
                }
                _ = heartbeat.tick() => {
                    let ping = Envelope::ping(self.clock.unix_timestamp_millis());
                    self.send_envelope(endpoint, sink, ping).await;
                }
                event = stream.next() => match event {
                    Some(TransportEvent::Message(text)) => {
                        self.handle_text(endpoint, sink, &text).await;
                    }
                    Some(TransportEvent::Close { code, reason }) => {
                        return SessionEnd::Closed { code, reason };
                    }
                    Some(TransportEvent::Error(message)) => {
                        warn!(endpoint, error = %message, "WebSocket transport error");
                        self.listeners.dispatch(endpoint, &WebSocketEvent::Error(message));
                    }
                    Some(TransportEvent::Open) => {}
                    None => {
                        return SessionEnd::Closed {
                            code: close_code::ABNORMAL,
                            reason: "Stream ended".to_string(),
                        };
                    }
                },
            }
        }
    }

    async fn handle_text(&self, endpoint: &str, sink: &mut Box<dyn WebSocketSink>, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(endpoint, error = %e, "Discarding malformed WebSocket message");
                return;
            }
        };

        if envelope.is_ping() {
            self.send_envelope(endpoint, sink, Envelope::pong(self.clock.unix_timestamp_millis()))
                .await;
            return;
        }
        self.listeners
            .dispatch(endpoint, &WebSocketEvent::Message(envelope));
    }

    async fn send_envelope(
        &self,
        endpoint: &str,
        sink: &mut Box<dyn WebSocketSink>,
        envelope: Envelope,
    ) {
        let text = match serde_json::to_string(&envelope) {
            Ok(text) => text,
            Err(e) => {
                warn!(endpoint, error = %e, "Failed to encode WebSocket message");
                return;
            }
        };
        if let Err(e) = sink.send_text(text).await {
            debug!(endpoint, kind = %envelope.kind, error = %e, "Control message not sent");
        }
    }

    fn closed(&self, endpoint: &str, code: u16, reason: String) {
        self.listeners
            .dispatch(endpoint, &WebSocketEvent::Close { code, reason });
        self.emit(RealtimeEvent::Disconnected {
            endpoint: endpoint.to_string(),
            code,
        });
    }

    /// Retry with capped exponential backoff until a socket opens, attempts
    /// run out, or the connection is cancelled.
    async fn reconnect(
        &self,
        endpoint: &str,
        session: u64,
        token: &CancellationToken,
    ) -> Option<Socket> {
        loop {
            let attempts = self.with_session(endpoint, session, |c| {
                c.state = ConnectionState::Reconnecting;
                c.reconnect_attempts
            })?;

            if attempts >= self.config.max_reconnect_attempts {
                warn!(endpoint, attempts, "Giving up on WebSocket reconnection");
                self.forget(endpoint, session);
                self.listeners
                    .dispatch(endpoint, &WebSocketEvent::ReconnectFailed { attempts });
                self.emit(RealtimeEvent::ReconnectFailed {
                    endpoint: endpoint.to_string(),
                    attempts,
                });
                return None;
            }

            let delay = self.config.reconnect_delay(attempts);
            let attempt = attempts + 1;
            self.with_session(endpoint, session, |c| c.reconnect_attempts = attempt)?;

            info!(
                endpoint,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Scheduling WebSocket reconnect"
            );
            self.listeners
                .dispatch(endpoint, &WebSocketEvent::Reconnecting { attempt, delay });
            self.emit(RealtimeEvent::Reconnecting {
                endpoint: endpoint.to_string(),
                attempt,
                delay_ms: delay.as_millis() as u64,
            });

            tokio::select! {
                _ = token.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            self.with_session(endpoint, session, |c| c.state = ConnectionState::Connecting)?;
            let opened = tokio::select! {
                _ = token.cancelled() => return None,
                opened = self.open_socket(endpoint) => opened,
            };

            match opened {
                Ok(socket) => {
                    if !self.mark_connected(endpoint, session, None) {
                        return None;
                    }
                    self.opened(endpoint);
                    return Some(socket);
                }
                Err(e) => {
                    warn!(endpoint, attempt, error = %e, "WebSocket reconnect attempt failed");
                    self.listeners
                        .dispatch(endpoint, &WebSocketEvent::Error(e.to_string()));
                }
            }
        }
    }
}
