//! Credential Provider Abstraction

use async_trait::async_trait;

use crate::error::Result;

/// Supplies the current access token.
///
/// The offline queue asks for a token when a request is executed, not when it
/// is enqueued, so a refresh that happened while offline is picked up on
/// replay. The realtime manager appends the token to the socket URL.
///
/// Returning `Ok(None)` means "no credentials"; the caller proceeds without
/// an `Authorization` header.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<Option<String>>;
}

/// Token provider returning a fixed value.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<Option<String>> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticTokenProvider::new("abc");
        assert_eq!(provider.access_token().await.unwrap().as_deref(), Some("abc"));
        assert!(StaticTokenProvider::anonymous()
            .access_token()
            .await
            .unwrap()
            .is_none());
    }
}
