//! Sync configuration.

use std::time::Duration;

use crate::error::{Result, SyncError};

/// Offline queue settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Storage key holding the queue snapshot
    pub storage_key: String,
    /// Attempts per request when the request does not set its own
    pub default_max_retries: u32,
    /// Wait after the n-th failure; the last entry repeats
    pub retry_delays: Vec<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            storage_key: "offline_queue".to_string(),
            default_max_retries: 3,
            retry_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(15),
            ],
        }
    }
}

impl QueueConfig {
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    pub fn with_default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// Delay after a request has failed `retry_count` times.
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        let last = self.retry_delays.len().saturating_sub(1);
        let index = (retry_count.saturating_sub(1) as usize).min(last);
        self.retry_delays.get(index).copied().unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage_key.is_empty() {
            return Err(SyncError::InvalidConfig(
                "queue storage_key cannot be empty".to_string(),
            ));
        }
        if self.default_max_retries == 0 {
            return Err(SyncError::InvalidConfig(
                "default_max_retries must be at least 1".to_string(),
            ));
        }
        if self.retry_delays.is_empty() {
            return Err(SyncError::InvalidConfig(
                "retry_delays must have at least one entry".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reachability probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkMonitorConfig {
    /// Endpoint hit with a HEAD request; any response counts as reachable
    pub probe_url: String,
    pub probe_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for NetworkMonitorConfig {
    fn default() -> Self {
        Self {
            probe_url: "https://clients3.google.com/generate_204".to_string(),
            probe_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(30),
        }
    }
}

impl NetworkMonitorConfig {
    pub fn with_probe_url(mut self, url: impl Into<String>) -> Self {
        self.probe_url = url.into();
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.probe_url.is_empty() {
            return Err(SyncError::InvalidConfig(
                "probe_url cannot be empty".to_string(),
            ));
        }
        if self.probe_timeout.is_zero() || self.poll_interval.is_zero() {
            return Err(SyncError::InvalidConfig(
                "probe_timeout and poll_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Sync orchestration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncManagerConfig {
    /// Minimum gap between syncs for [`should_auto_sync`](crate::SyncManager::should_auto_sync)
    pub auto_sync_threshold: Duration,
    /// How long a `Completed` status lingers before returning to `Idle`
    pub completed_reset_delay: Duration,
    /// Sync automatically when connectivity comes back
    pub sync_on_reconnect: bool,
}

impl Default for SyncManagerConfig {
    fn default() -> Self {
        Self {
            auto_sync_threshold: Duration::from_secs(5 * 60),
            completed_reset_delay: Duration::from_secs(2),
            sync_on_reconnect: true,
        }
    }
}

impl SyncManagerConfig {
    pub fn with_auto_sync_threshold(mut self, threshold: Duration) -> Self {
        self.auto_sync_threshold = threshold;
        self
    }

    pub fn with_completed_reset_delay(mut self, delay: Duration) -> Self {
        self.completed_reset_delay = delay;
        self
    }

    pub fn with_sync_on_reconnect(mut self, enabled: bool) -> Self {
        self.sync_on_reconnect = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_table_caps_at_last_entry() {
        let config = QueueConfig::default();
        assert_eq!(config.retry_delay(1), Duration::from_secs(1));
        assert_eq!(config.retry_delay(2), Duration::from_secs(5));
        assert_eq!(config.retry_delay(3), Duration::from_secs(15));
        assert_eq!(config.retry_delay(10), Duration::from_secs(15));
    }

    #[test]
    fn test_validation() {
        assert!(QueueConfig::default().validate().is_ok());
        assert!(QueueConfig::default()
            .with_retry_delays(Vec::new())
            .validate()
            .is_err());
        assert!(NetworkMonitorConfig::default()
            .with_poll_interval(Duration::ZERO)
            .validate()
            .is_err());
    }
}
