use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync already in progress")]
    SyncInProgress,

    #[error("Offline queue is already being processed")]
    QueueBusy,

    #[error("Network unavailable")]
    NetworkUnavailable,

    #[error("Request {request_id} not found")]
    RequestNotFound { request_id: String },

    #[error("Invalid request ID: {0}")]
    InvalidRequestId(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request failed with HTTP {status}")]
    HttpStatus { status: u16, retryable: bool },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// Whether the same operation may succeed if tried again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::HttpStatus { retryable, .. } => *retryable,
            SyncError::Transport(_)
            | SyncError::NetworkUnavailable
            | SyncError::SyncInProgress
            | SyncError::QueueBusy => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        SyncError::Serialization(error.to_string())
    }
}

impl From<bridge_traits::BridgeError> for SyncError {
    fn from(error: bridge_traits::BridgeError) -> Self {
        SyncError::Storage(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(SyncError::HttpStatus {
            status: 503,
            retryable: true
        }
        .is_retryable());
        assert!(!SyncError::HttpStatus {
            status: 404,
            retryable: false
        }
        .is_retryable());
        assert!(SyncError::Transport("timed out".to_string()).is_retryable());
        assert!(!SyncError::Serialization("bad".to_string()).is_retryable());
    }
}
