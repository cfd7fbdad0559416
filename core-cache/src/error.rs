use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Entry {key} is {size} bytes, exceeding the {limit} byte limit")]
    EntryTooLarge { key: String, size: u64, limit: u64 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(error: serde_json::Error) -> Self {
        CacheError::Serialization(error.to_string())
    }
}

impl From<bridge_traits::BridgeError> for CacheError {
    fn from(error: bridge_traits::BridgeError) -> Self {
        CacheError::Storage(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
