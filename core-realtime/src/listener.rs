//! Per-endpoint listener registry.
//!
//! Listeners are grouped by endpoint and [`EventKind`] and survive
//! disconnects and reconnects. Dispatch clones the matching callbacks out of
//! the lock first, so a listener may register or remove listeners itself.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::error;

use crate::message::Envelope;

/// Something that happened on a logical connection.
#[derive(Debug, Clone, PartialEq)]
pub enum WebSocketEvent {
    Open,
    Message(Envelope),
    Close { code: u16, reason: String },
    Error(String),
    /// `attempt` is 1-based
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnection gave up; only an explicit `connect` revives the endpoint
    ReconnectFailed { attempts: u32 },
}

impl WebSocketEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WebSocketEvent::Open => EventKind::Open,
            WebSocketEvent::Message(_) => EventKind::Message,
            WebSocketEvent::Close { .. } => EventKind::Close,
            WebSocketEvent::Error(_) => EventKind::Error,
            WebSocketEvent::Reconnecting { .. } => EventKind::Reconnecting,
            WebSocketEvent::ReconnectFailed { .. } => EventKind::ReconnectFailed,
        }
    }
}

/// Event type a listener subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Message,
    Close,
    Error,
    Reconnecting,
    ReconnectFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Open => "open",
            EventKind::Message => "message",
            EventKind::Close => "close",
            EventKind::Error => "error",
            EventKind::Reconnecting => "reconnecting",
            EventKind::ReconnectFailed => "reconnect_failed",
        }
    }
}

pub type Listener = Arc<dyn Fn(&WebSocketEvent) + Send + Sync>;

/// Handle returned by [`ListenerRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type EndpointListeners = HashMap<EventKind, Vec<(ListenerId, Listener)>>;

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    listeners: Mutex<HashMap<String, EndpointListeners>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub(crate) fn add(&self, endpoint: &str, kind: EventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners
                .entry(endpoint.to_string())
                .or_default()
                .entry(kind)
                .or_default()
                .push((id, listener));
        }
        id
    }

    pub(crate) fn remove(&self, endpoint: &str, id: ListenerId) -> bool {
        let Ok(mut listeners) = self.listeners.lock() else {
            return false;
        };
        let Some(by_kind) = listeners.get_mut(endpoint) else {
            return false;
        };

        let mut removed = false;
        for entries in by_kind.values_mut() {
            let before = entries.len();
            entries.retain(|(existing, _)| *existing != id);
            removed |= entries.len() != before;
        }
        by_kind.retain(|_, entries| !entries.is_empty());
        if by_kind.is_empty() {
            listeners.remove(endpoint);
        }
        removed
    }

    pub(crate) fn remove_all(&self, endpoint: &str) -> usize {
        self.listeners
            .lock()
            .ok()
            .and_then(|mut listeners| listeners.remove(endpoint))
            .map(|by_kind| by_kind.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub(crate) fn count(&self, endpoint: &str) -> usize {
        self.listeners
            .lock()
            .ok()
            .and_then(|listeners| {
                listeners
                    .get(endpoint)
                    .map(|by_kind| by_kind.values().map(Vec::len).sum())
            })
            .unwrap_or(0)
    }

    /// Invoke every listener for the event's kind. A panicking listener is logged and skipped.
    pub(crate) fn dispatch(&self, endpoint: &str, event: &WebSocketEvent) {
        let kind = event.kind();
        let matching: Vec<Listener> = match self.listeners.lock() {
            Ok(listeners) => listeners
                .get(endpoint)
                .and_then(|by_kind| by_kind.get(&kind))
                .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
                .unwrap_or_default(),
            Err(_) => return,
        };

        for listener in matching {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(endpoint, event = kind.as_str(), "WebSocket listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Listener {
        let log = log.clone();
        Arc::new(move |_: &WebSocketEvent| log.lock().unwrap().push(tag))
    }

    #[test]
    fn test_dispatch_is_scoped_by_endpoint_and_kind() {
        let registry = ListenerRegistry::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.add("/a", EventKind::Open, recorder(&log, "a-open"));
        registry.add("/a", EventKind::Close, recorder(&log, "a-close"));
        registry.add("/b", EventKind::Open, recorder(&log, "b-open"));

        registry.dispatch("/a", &WebSocketEvent::Open);
        assert_eq!(*log.lock().unwrap(), vec!["a-open"]);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let registry = ListenerRegistry::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.add("/a", EventKind::Error, Arc::new(|_: &WebSocketEvent| panic!("listener bug")));
        registry.add("/a", EventKind::Error, recorder(&log, "after"));

        registry.dispatch("/a", &WebSocketEvent::Error("boom".to_string()));
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }

    #[test]
    fn test_remove_and_remove_all() {
        let registry = ListenerRegistry::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = registry.add("/a", EventKind::Open, recorder(&log, "x"));
        registry.add("/a", EventKind::Message, recorder(&log, "y"));
        registry.add("/a", EventKind::Message, recorder(&log, "z"));

        assert!(registry.remove("/a", id));
        assert!(!registry.remove("/a", id));
        assert_eq!(registry.count("/a"), 2);
        assert_eq!(registry.remove_all("/a"), 2);
        assert_eq!(registry.count("/a"), 0);
    }
}
