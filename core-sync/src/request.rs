//! # Queued Requests
//!
//! Types for HTTP requests captured while offline.
//!
//! Callers describe a request with [`OutgoingRequest`]. The queue stamps it
//! with an id and enqueue time, producing a [`QueuedRequest`]. Queue order is
//! `(priority, enqueued_at)`, so critical requests go first and requests of
//! equal priority replay in the order they were made.

use bridge_traits::http::HttpMethod;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, SyncError};

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a queued request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Create a new random request ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a request ID from a string
    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SyncError::InvalidRequestId(e.to_string()))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Priority
// ============================================================================

/// Replay priority. Variants are declared most urgent first so the derived
/// ordering sorts critical requests to the front.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RequestPriority {
    Critical = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
}

impl RequestPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

impl FromStr for RequestPriority {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            _ => Err(SyncError::InvalidRequest(format!("Invalid priority: {}", s))),
        }
    }
}

impl std::fmt::Display for RequestPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Requests
// ============================================================================

/// A request the caller wants delivered once the network allows.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    /// JSON body, sent with `Content-Type: application/json`
    pub body: Option<Value>,
    pub priority: RequestPriority,
    /// Overrides the queue default when set
    pub max_retries: Option<u32>,
}

impl OutgoingRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            priority: RequestPriority::default(),
            max_retries: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Post, url).with_body(body)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_priority(mut self, priority: RequestPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// A request waiting in the offline queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequest {
    pub id: RequestId,
    pub url: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Unix milliseconds
    pub enqueued_at: i64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub priority: RequestPriority,
}

impl QueuedRequest {
    pub(crate) fn from_outgoing(
        request: OutgoingRequest,
        now: i64,
        default_max_retries: u32,
    ) -> Self {
        Self {
            id: RequestId::new(),
            url: request.url,
            method: request.method,
            headers: request.headers,
            body: request.body,
            enqueued_at: now,
            retry_count: 0,
            max_retries: request.max_retries.unwrap_or(default_max_retries),
            priority: request.priority,
        }
    }

    /// Queue position key.
    pub fn sort_key(&self) -> (RequestPriority, i64) {
        (self.priority, self.enqueued_at)
    }

    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    pub fn age_ms(&self, now: i64) -> i64 {
        now.saturating_sub(self.enqueued_at)
    }

    /// Whether the URL contains any of the given tags.
    pub fn matches_any(&self, tags: &[String]) -> bool {
        tags.iter().any(|tag| self.url.contains(tag.as_str()))
    }
}
