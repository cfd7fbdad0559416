//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (key-value storage,
//! HTTP, WebSocket transport, credentials) into the client data layer and
//! owns the lifecycle of its background tasks. Desktop apps typically enable
//! the `desktop-shims` feature (which depends on `bridge-desktop`) and use
//! [`bootstrap_desktop`].
//!
//! ## Components
//!
//! | Accessor | Component |
//! |----------|-----------|
//! | [`ClientCore::cache`] | Two-tier [`CacheManager`] |
//! | [`ClientCore::offline_queue`] | Durable [`OfflineQueue`] |
//! | [`ClientCore::network_monitor`] | [`NetworkMonitor`] |
//! | [`ClientCore::sync_manager`] | [`SyncManager`] |
//! | [`ClientCore::realtime`] | [`WebSocketManager`], when `enable_realtime` is set |
//!
//! All components publish to one shared [`EventBus`].

pub mod error;

pub use error::{CoreError, Result};

pub use core_cache::{CacheConfig, CacheManager};
pub use core_realtime::{WebSocketConfig, WebSocketManager};
pub use core_runtime::config::{CoreConfig, FeatureFlags};
pub use core_runtime::events::{CoreEvent, EventBus};
pub use core_sync::{
    NetworkMonitor, NetworkMonitorConfig, OfflineQueue, QueueConfig, SyncManager,
    SyncManagerConfig,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, instrument};

/// Settings for each component. Defaults match the documented values.
#[derive(Debug, Clone, Default)]
pub struct ComponentConfigs {
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub network: NetworkMonitorConfig,
    pub sync: SyncManagerConfig,
    pub websocket: WebSocketConfig,
}

impl ComponentConfigs {
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_network(mut self, network: NetworkMonitorConfig) -> Self {
        self.network = network;
        self
    }

    pub fn with_sync(mut self, sync: SyncManagerConfig) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_websocket(mut self, websocket: WebSocketConfig) -> Self {
        self.websocket = websocket;
        self
    }
}

/// Primary façade exposed to host applications.
///
/// Every component is constructed once from the injected bridges. Nothing
/// runs in the background until [`start`](Self::start).
pub struct ClientCore {
    features: FeatureFlags,
    event_bus: EventBus,
    cache: Arc<CacheManager>,
    offline_queue: Arc<OfflineQueue>,
    network_monitor: Arc<NetworkMonitor>,
    sync_manager: Arc<SyncManager>,
    realtime: Option<Arc<WebSocketManager>>,
    started: AtomicBool,
}

impl ClientCore {
    pub fn new(config: CoreConfig, components: ComponentConfigs) -> Result<Self> {
        config.validate()?;
        let event_bus = EventBus::new(config.event_buffer_size);

        let cache = CacheManager::new(
            components.cache,
            Arc::clone(&config.key_value_store),
            Arc::clone(&config.clock),
        )?
        .with_event_bus(event_bus.clone());

        let mut offline_queue = OfflineQueue::new(
            components.queue,
            Arc::clone(&config.http_client),
            Arc::clone(&config.key_value_store),
            Arc::clone(&config.clock),
        )?
        .with_event_bus(event_bus.clone());
        if let Some(provider) = &config.token_provider {
            offline_queue = offline_queue.with_token_provider(Arc::clone(provider));
        }
        let offline_queue = Arc::new(offline_queue);

        let mut network_monitor =
            NetworkMonitor::new(components.network, Arc::clone(&config.http_client))?
                .with_event_bus(event_bus.clone());
        if let Some(provider) = &config.connection_type_provider {
            network_monitor = network_monitor.with_connection_type_provider(Arc::clone(provider));
        }
        let network_monitor = Arc::new(network_monitor);

        let sync_manager = SyncManager::new(
            components.sync,
            Arc::clone(&offline_queue),
            Arc::clone(&network_monitor),
            Arc::clone(&config.clock),
        )
        .with_event_bus(event_bus.clone());

        let realtime = match (&config.websocket_transport, config.features.enable_realtime) {
            (Some(transport), true) => {
                let mut manager = WebSocketManager::new(
                    components.websocket,
                    Arc::clone(transport),
                    Arc::clone(&config.clock),
                )?
                .with_event_bus(event_bus.clone());
                if let Some(provider) = &config.token_provider {
                    manager = manager.with_token_provider(Arc::clone(provider));
                }
                Some(Arc::new(manager))
            }
            _ => None,
        };

        info!(
            realtime = realtime.is_some(),
            network_monitoring = config.features.enable_network_monitoring,
            auto_sync = config.features.enable_auto_sync,
            "Client core initialized"
        );

        Ok(Self {
            features: config.features,
            event_bus,
            cache: Arc::new(cache),
            offline_queue,
            network_monitor,
            sync_manager: Arc::new(sync_manager),
            realtime,
            started: AtomicBool::new(false),
        })
    }

    /// Restore the offline queue and start the enabled background tasks.
    ///
    /// Calling it again while started is a no-op.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let restored = self.offline_queue.load().await;
        if self.features.enable_cache_cleanup {
            self.cache.start_cleanup_task();
        }
        if self.features.enable_auto_sync {
            self.sync_manager.start();
        }
        if self.features.enable_network_monitoring {
            self.network_monitor.start_monitoring();
        }

        info!(restored_requests = restored, "Client core started");
        Ok(())
    }

    /// Stop background tasks and close every socket.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }

        self.network_monitor.stop_monitoring().await;
        self.sync_manager.stop().await;
        self.cache.stop_cleanup_task().await;
        if let Some(realtime) = &self.realtime {
            realtime.disconnect_all().await;
        }
        info!("Client core shut down");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn offline_queue(&self) -> &Arc<OfflineQueue> {
        &self.offline_queue
    }

    pub fn network_monitor(&self) -> &Arc<NetworkMonitor> {
        &self.network_monitor
    }

    pub fn sync_manager(&self) -> &Arc<SyncManager> {
        &self.sync_manager
    }

    /// The WebSocket manager.
    ///
    /// # Errors
    ///
    /// [`CoreError::CapabilityMissing`] when realtime was not enabled.
    pub fn realtime(&self) -> Result<&Arc<WebSocketManager>> {
        self.realtime
            .as_ref()
            .ok_or_else(|| CoreError::CapabilityMissing {
                capability: "WebSocketTransport".to_string(),
                message: "Realtime is disabled. Enable it with `enable_realtime(true)` and \
                          provide a WebSocketTransport."
                    .to_string(),
            })
    }
}

/// Build a [`ClientCore`] backed by SQLite storage and the reqwest HTTP client.
///
/// ```no_run
/// # #[cfg(feature = "desktop-shims")]
/// # async fn example() -> core_service::Result<()> {
/// use core_service::{bootstrap_desktop, ComponentConfigs};
///
/// let core = bootstrap_desktop("client-core.db".into(), ComponentConfigs::default()).await?;
/// core.start().await?;
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(
    db_path: std::path::PathBuf,
    components: ComponentConfigs,
) -> Result<ClientCore> {
    use bridge_desktop::{DesktopConnectionTypeProvider, ReqwestHttpClient, SqliteKeyValueStore};

    let store = SqliteKeyValueStore::new(db_path)
        .await
        .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;
    let http_client =
        ReqwestHttpClient::try_new().map_err(|e| CoreError::InitializationFailed(e.to_string()))?;

    let config = CoreConfig::builder()
        .key_value_store(Arc::new(store))
        .http_client(Arc::new(http_client))
        .connection_type_provider(Arc::new(DesktopConnectionTypeProvider::new()))
        .build()?;

    ClientCore::new(config, components)
}
