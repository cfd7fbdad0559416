use thiserror::Error;

#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("Already connected to {endpoint}")]
    AlreadyConnected { endpoint: String },

    #[error("Not connected to {endpoint}")]
    NotConnected { endpoint: String },

    #[error("Connection to {endpoint} timed out after {timeout_ms}ms")]
    ConnectTimeout { endpoint: String, timeout_ms: u64 },

    #[error("Connection to {endpoint} was cancelled")]
    Cancelled { endpoint: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RealtimeError {
    /// Whether repeating the same call cannot succeed without the caller
    /// changing something first.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RealtimeError::AlreadyConnected { .. }
                | RealtimeError::Cancelled { .. }
                | RealtimeError::Serialization(_)
                | RealtimeError::InvalidConfig(_)
        )
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(error: serde_json::Error) -> Self {
        RealtimeError::Serialization(error.to_string())
    }
}

impl From<bridge_traits::BridgeError> for RealtimeError {
    fn from(error: bridge_traits::BridgeError) -> Self {
        RealtimeError::Transport(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RealtimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        assert!(RealtimeError::AlreadyConnected {
            endpoint: "/chat".to_string()
        }
        .is_terminal());
        assert!(!RealtimeError::ConnectTimeout {
            endpoint: "/chat".to_string(),
            timeout_ms: 10_000
        }
        .is_terminal());
        assert!(!RealtimeError::Transport("reset".to_string()).is_terminal());
    }
}
