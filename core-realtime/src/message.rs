//! JSON message envelope exchanged over every socket.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Heartbeat request type.
pub const PING: &str = "ping";
/// Heartbeat reply type.
pub const PONG: &str = "pong";

/// `{type, data, id, timestamp}` wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    pub id: String,
    /// Unix milliseconds
    pub timestamp: i64,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value, timestamp: i64) -> Self {
        Self {
            kind: kind.into(),
            data,
            id: Uuid::new_v4().to_string(),
            timestamp,
        }
    }

    pub fn ping(timestamp: i64) -> Self {
        Self::new(PING, Value::Null, timestamp)
    }

    pub fn pong(timestamp: i64) -> Self {
        Self::new(PONG, Value::Null, timestamp)
    }

    pub fn is_ping(&self) -> bool {
        self.kind == PING
    }
}
