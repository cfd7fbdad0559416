//! # Core Configuration Module
//!
//! Provides configuration management for the client core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds the host bridges and feature switches the core needs.
//! It enforces fail-fast validation to ensure all required bridges are provided
//! before any component is constructed.
//!
//! ## Required Dependencies
//!
//! - `KeyValueStore` - Durable storage for the persistent cache tier and the offline queue
//! - `HttpClient` - Queue replay and reachability probes (desktop default: reqwest)
//!
//! ## Optional Dependencies
//!
//! - `WebSocketTransport` - Required only when realtime is enabled
//! - `TokenProvider` - Bearer tokens for replayed requests and socket URLs
//! - `ConnectionTypeProvider` - Link type reporting for the network monitor
//! - `Clock` - Defaults to `SystemClock`
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use bridge_traits::InMemoryKeyValueStore;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .key_value_store(Arc::new(InMemoryKeyValueStore::new()))
//!     .http_client(Arc::new(MyHttpClient))
//!     .websocket_transport(Arc::new(MyTransport))
//!     .enable_realtime(true)
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! The builder validates all required dependencies and provides actionable error
//! messages when capabilities are missing:
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // No KeyValueStore was provided
//! let config = CoreConfig::builder()
//!     .build()
//!     .expect("Should fail - missing required bridges");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{
    Clock, ConnectionTypeProvider, HttpClient, KeyValueStore, SystemClock, TokenProvider,
    WebSocketTransport,
};
use std::sync::Arc;

/// Core configuration.
///
/// This struct holds all dependencies and settings required to initialize
/// the core library. Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Durable storage (required)
    pub key_value_store: Arc<dyn KeyValueStore>,

    /// HTTP executor (required, desktop default available)
    pub http_client: Arc<dyn HttpClient>,

    /// Raw WebSocket transport (required when realtime is enabled)
    pub websocket_transport: Option<Arc<dyn WebSocketTransport>>,

    /// Credential provider (optional)
    pub token_provider: Option<Arc<dyn TokenProvider>>,

    /// Link type detection (optional)
    pub connection_type_provider: Option<Arc<dyn ConnectionTypeProvider>>,

    /// Time source
    pub clock: Arc<dyn Clock>,

    /// Features flags
    pub features: FeatureFlags,

    /// Capacity of the event bus channel
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("key_value_store", &"KeyValueStore { ... }")
            .field("http_client", &"HttpClient { ... }")
            .field(
                "websocket_transport",
                &self
                    .websocket_transport
                    .as_ref()
                    .map(|_| "WebSocketTransport { ... }"),
            )
            .field(
                "token_provider",
                &self.token_provider.as_ref().map(|_| "TokenProvider { ... }"),
            )
            .field(
                "connection_type_provider",
                &self
                    .connection_type_provider
                    .as_ref()
                    .map(|_| "ConnectionTypeProvider { ... }"),
            )
            .field("features", &self.features)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

/// Feature flags control optional functionality.
///
/// Features may require corresponding bridge implementations to function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Enable the WebSocket manager (requires WebSocketTransport)
    pub enable_realtime: bool,

    /// Poll connectivity in the background
    pub enable_network_monitoring: bool,

    /// Replay the offline queue when connectivity returns
    pub enable_auto_sync: bool,

    /// Run the periodic cache cleanup task
    pub enable_cache_cleanup: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_realtime: false,
            enable_network_monitoring: true,
            enable_auto_sync: true,
            enable_cache_cleanup: true,
        }
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - The event buffer can hold at least one event
    /// - Feature flags are consistent with available bridges
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.features.enable_realtime && self.websocket_transport.is_none() {
            return Err(Error::CapabilityMissing {
                capability: "WebSocketTransport".to_string(),
                message: "Realtime enabled but no WebSocketTransport provided. \
                          Disable the feature or inject a WebSocketTransport implementation."
                    .to_string(),
            });
        }

        if self.features.enable_auto_sync && !self.features.enable_network_monitoring {
            return Err(Error::Config(
                "Auto sync requires network monitoring. \
                 Enable network monitoring or disable auto sync."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

fn key_value_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "KeyValueStore".to_string(),
        message: "KeyValueStore implementation is required for the persistent cache and offline queue. \
                 Desktop: use bridge_desktop::SqliteKeyValueStore. \
                 Mobile: inject platform-native storage (file store/DataStore). \
                 Tests: use bridge_traits::InMemoryKeyValueStore."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::try_new().map_err(|e| {
        Error::Internal(format!("Failed to initialize default HttpClient: {}", e))
    })?;
    let client: Arc<dyn HttpClient> = Arc::new(client);
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for queue replay and reachability probes. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default ReqwestHttpClient. \
                 Mobile: inject a platform-native HTTP client (URLSession/OkHttp)."
            .to_string(),
    })
}

/// Builder for constructing [`CoreConfig`] instances.
///
/// Use this builder to incrementally set configuration options and then
/// call [`build()`](CoreConfigBuilder::build) to create the final config.
#[derive(Default)]
pub struct CoreConfigBuilder {
    key_value_store: Option<Arc<dyn KeyValueStore>>,
    http_client: Option<Arc<dyn HttpClient>>,
    websocket_transport: Option<Arc<dyn WebSocketTransport>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    connection_type_provider: Option<Arc<dyn ConnectionTypeProvider>>,
    clock: Option<Arc<dyn Clock>>,
    features: FeatureFlags,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the durable key-value store (required).
    pub fn key_value_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.key_value_store = Some(store);
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the desktop default (reqwest-based) will be used when
    /// the `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the WebSocket transport (required when realtime is enabled).
    pub fn websocket_transport(mut self, transport: Arc<dyn WebSocketTransport>) -> Self {
        self.websocket_transport = Some(transport);
        self
    }

    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn connection_type_provider(mut self, provider: Arc<dyn ConnectionTypeProvider>) -> Self {
        self.connection_type_provider = Some(provider);
        self
    }

    /// Sets the time source. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Enables or disables the WebSocket manager.
    ///
    /// Requires a `WebSocketTransport` to be provided.
    ///
    /// Default: false
    pub fn enable_realtime(mut self, enabled: bool) -> Self {
        self.features.enable_realtime = enabled;
        self
    }

    /// Default: true
    pub fn enable_network_monitoring(mut self, enabled: bool) -> Self {
        self.features.enable_network_monitoring = enabled;
        self
    }

    /// Default: true
    pub fn enable_auto_sync(mut self, enabled: bool) -> Self {
        self.features.enable_auto_sync = enabled;
        self
    }

    /// Default: true
    pub fn enable_cache_cleanup(mut self, enabled: bool) -> Self {
        self.features.enable_cache_cleanup = enabled;
        self
    }

    /// Sets all feature flags at once.
    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Default: [`DEFAULT_EVENT_BUFFER_SIZE`](crate::events::DEFAULT_EVENT_BUFFER_SIZE)
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(CoreConfig)` on success, or an error if:
    /// - Required bridges are missing (KeyValueStore, HttpClient without desktop shims)
    /// - Feature flags are inconsistent with available bridges
    pub fn build(self) -> Result<CoreConfig> {
        let key_value_store = self
            .key_value_store
            .ok_or_else(key_value_store_missing_error)?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let config = CoreConfig {
            key_value_store,
            http_client,
            websocket_transport: self.websocket_transport,
            token_provider: self.token_provider,
            connection_type_provider: self.connection_type_provider,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            features: self.features,
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{
        HttpRequest, HttpResponse, InMemoryKeyValueStore, WebSocketEventStream, WebSocketSink,
    };

    struct NoopHttpClient;

    #[async_trait]
    impl HttpClient for NoopHttpClient {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Ok(HttpResponse::with_status(204))
        }
    }

    struct UnusedTransport;

    #[async_trait]
    impl WebSocketTransport for UnusedTransport {
        async fn open(
            &self,
            url: &str,
        ) -> BridgeResult<(Box<dyn WebSocketSink>, Box<dyn WebSocketEventStream>)> {
            Err(bridge_traits::BridgeError::NotAvailable(url.to_string()))
        }
    }

    fn base_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .key_value_store(Arc::new(InMemoryKeyValueStore::new()))
            .http_client(Arc::new(NoopHttpClient))
    }

    #[test]
    fn test_build_with_required_bridges() {
        let config = base_builder().build().unwrap();

        assert!(config.websocket_transport.is_none());
        assert_eq!(config.features, FeatureFlags::default());
        assert_eq!(
            config.event_buffer_size,
            crate::events::DEFAULT_EVENT_BUFFER_SIZE
        );
    }

    #[test]
    fn test_missing_key_value_store_fails_fast() {
        let result = CoreConfig::builder()
            .http_client(Arc::new(NoopHttpClient))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "KeyValueStore")
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_http_client_without_shims() {
        let result = CoreConfig::builder()
            .key_value_store(Arc::new(InMemoryKeyValueStore::new()))
            .build();

        assert!(matches!(
            result,
            Err(Error::CapabilityMissing { ref capability, .. }) if capability == "HttpClient"
        ));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_desktop_http_client_default() {
        let config = CoreConfig::builder()
            .key_value_store(Arc::new(InMemoryKeyValueStore::new()))
            .build();

        assert!(config.is_ok());
    }

    #[test]
    fn test_realtime_requires_transport() {
        let result = base_builder().enable_realtime(true).build();
        assert!(matches!(
            result,
            Err(Error::CapabilityMissing { ref capability, .. }) if capability == "WebSocketTransport"
        ));

        let config = base_builder()
            .enable_realtime(true)
            .websocket_transport(Arc::new(UnusedTransport))
            .build()
            .unwrap();
        assert!(config.features.enable_realtime);
    }

    #[test]
    fn test_auto_sync_requires_monitoring() {
        let result = base_builder()
            .enable_network_monitoring(false)
            .enable_auto_sync(true)
            .build();
        assert!(matches!(result, Err(Error::Config(_))));

        let config = base_builder()
            .enable_network_monitoring(false)
            .enable_auto_sync(false)
            .build()
            .unwrap();
        assert!(!config.features.enable_network_monitoring);
    }

    #[test]
    fn test_zero_event_buffer_rejected() {
        assert!(matches!(
            base_builder().event_buffer_size(0).build(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_debug_hides_bridges() {
        let config = base_builder().build().unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("KeyValueStore { ... }"));
        assert!(debug.contains("enable_auto_sync"));
    }
}
