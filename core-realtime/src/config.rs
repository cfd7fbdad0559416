//! WebSocket connection settings.

use std::time::Duration;

use crate::error::{RealtimeError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct WebSocketConfig {
    /// Prefix for endpoint paths, e.g. `wss://api.example.com/ws`
    pub base_url: String,
    /// Time allowed between `open` and the transport's `Open` event
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub initial_reconnect_delay: Duration,
    pub backoff_factor: f64,
    pub max_reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    /// Query parameter carrying the bearer token
    pub token_query_param: String,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            initial_reconnect_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_reconnect_delay: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            token_query_param: "token".to_string(),
        }
    }
}

impl WebSocketConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, factor: f64, max: Duration) -> Self {
        self.initial_reconnect_delay = initial;
        self.backoff_factor = factor;
        self.max_reconnect_delay = max;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_token_query_param(mut self, param: impl Into<String>) -> Self {
        self.token_query_param = param.into();
        self
    }

    /// Delay before the reconnect that follows `attempts` earlier tries:
    /// `initial * factor^attempts`, capped at `max_reconnect_delay`.
    pub fn reconnect_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.min(i32::MAX as u32) as i32;
        let secs = self.initial_reconnect_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = secs.min(self.max_reconnect_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_reconnect_delay)
    }

    /// Full socket URL for an endpoint. Absolute `ws://`/`wss://` endpoints are used as given.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
            return endpoint.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() || self.heartbeat_interval.is_zero() {
            return Err(RealtimeError::InvalidConfig(
                "connect_timeout and heartbeat_interval must be non-zero".to_string(),
            ));
        }
        if !(self.backoff_factor >= 1.0) {
            return Err(RealtimeError::InvalidConfig(format!(
                "backoff_factor must be at least 1.0, got {}",
                self.backoff_factor
            )));
        }
        if self.max_reconnect_delay < self.initial_reconnect_delay {
            return Err(RealtimeError::InvalidConfig(
                "max_reconnect_delay must not be below initial_reconnect_delay".to_string(),
            ));
        }
        if self.token_query_param.is_empty() {
            return Err(RealtimeError::InvalidConfig(
                "token_query_param cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
