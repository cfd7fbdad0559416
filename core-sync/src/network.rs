//! # Network Monitor
//!
//! Tracks connectivity with an HTTP reachability probe and tells subscribers
//! when it changes.
//!
//! A probe sends `HEAD probe_url` bounded by `probe_timeout`; any response
//! counts as reachable. The link type comes from an optional
//! [`ConnectionTypeProvider`] and is `Unknown` without one.
//!
//! Subscribers run synchronously, in registration order, only when the new
//! snapshot differs from the last one in any field. A panicking subscriber is
//! logged and the rest still run.

use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use bridge_traits::network::{ConnectionType, ConnectionTypeProvider, NetworkStatus};
use core_runtime::events::{CoreEvent, EventBus, NetworkEvent};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::NetworkMonitorConfig;
use crate::error::Result;

/// Callback invoked with the new status after a change.
pub type StatusListener = Arc<dyn Fn(&NetworkStatus) + Send + Sync>;

/// Handle returned by [`NetworkMonitor::on_status_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct MonitorTask {
    cancellation_token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct NetworkMonitor {
    http_client: Arc<dyn HttpClient>,
    connection_type_provider: Option<Arc<dyn ConnectionTypeProvider>>,
    event_bus: Option<EventBus>,
    config: NetworkMonitorConfig,
    status: Mutex<Option<NetworkStatus>>,
    listeners: Mutex<Vec<(SubscriptionId, StatusListener)>>,
    next_subscription: AtomicU64,
    monitor_task: Mutex<Option<MonitorTask>>,
}

impl NetworkMonitor {
    pub fn new(config: NetworkMonitorConfig, http_client: Arc<dyn HttpClient>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            http_client,
            connection_type_provider: None,
            event_bus: None,
            config,
            status: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            monitor_task: Mutex::new(None),
        })
    }

    pub fn with_connection_type_provider(
        mut self,
        provider: Arc<dyn ConnectionTypeProvider>,
    ) -> Self {
        self.connection_type_provider = Some(provider);
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    // ------------------------------------------------------------------
    // Probing
    // ------------------------------------------------------------------

    /// Probe connectivity now. Does not notify subscribers.
    #[instrument(skip(self))]
    pub async fn get_status(&self) -> NetworkStatus {
        let reachable = self.probe().await;
        let connection_type = self.detect_connection_type(reachable).await;

        let has_link = matches!(
            connection_type,
            ConnectionType::Wifi | ConnectionType::Cellular | ConnectionType::Ethernet
        );

        NetworkStatus {
            is_connected: reachable || has_link,
            is_internet_reachable: reachable,
            connection_type,
        }
    }

    async fn probe(&self) -> bool {
        let timeout = self.config.probe_timeout;
        let request =
            HttpRequest::new(HttpMethod::Head, self.config.probe_url.clone()).timeout(timeout);

        match tokio::time::timeout(timeout, self.http_client.execute(request)).await {
            Ok(Ok(response)) => {
                debug!(status = response.status, "Reachability probe answered");
                true
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Reachability probe failed");
                false
            }
            Err(_) => {
                debug!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Reachability probe timed out"
                );
                false
            }
        }
    }

    async fn detect_connection_type(&self, reachable: bool) -> ConnectionType {
        match &self.connection_type_provider {
            Some(provider) => provider.connection_type().await.unwrap_or_else(|e| {
                warn!(error = %e, "Connection type detection failed");
                ConnectionType::Unknown
            }),
            None if reachable => ConnectionType::Unknown,
            None => ConnectionType::None,
        }
    }

    /// Probe, record the result and notify subscribers if it changed.
    pub async fn check_now(&self) -> NetworkStatus {
        let status = self.get_status().await;
        self.report_status(status);
        status
    }

    /// Record a status observed elsewhere, such as a platform reachability callback.
    ///
    /// Returns whether it differed from the previous observation.
    pub fn report_status(&self, status: NetworkStatus) -> bool {
        let previous = match self.status.lock() {
            Ok(mut current) => current.replace(status),
            Err(_) => {
                warn!("Network status lock poisoned, dropping update");
                return false;
            }
        };

        if previous == Some(status) {
            return false;
        }

        info!(
            connected = status.is_connected,
            reachable = status.is_internet_reachable,
            connection_type = status.connection_type.as_str(),
            "Network status changed"
        );
        self.notify(&status);
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Network(NetworkEvent::StatusChanged { status }))
                .ok();
        }
        true
    }

    /// Last observed status, or [`NetworkStatus::unknown`] before the first observation.
    pub fn current_status(&self) -> NetworkStatus {
        self.last_observed().unwrap_or_default()
    }

    /// Last observed status, `None` before the first observation.
    pub fn last_observed(&self) -> Option<NetworkStatus> {
        self.status.lock().ok().and_then(|status| *status)
    }

    // ------------------------------------------------------------------
    // Subscribers
    // ------------------------------------------------------------------

    pub fn on_status_change<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&NetworkStatus) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, Arc::new(listener)));
        }
        id
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn off_status_change(&self, id: SubscriptionId) -> bool {
        let Ok(mut listeners) = self.listeners.lock() else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    fn notify(&self, status: &NetworkStatus) {
        // Snapshot so subscribers may (un)subscribe from inside a callback
        let listeners: Vec<StatusListener> = match self.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, l)| l.clone()).collect(),
            Err(_) => return,
        };

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(status))).is_err() {
                error!("Network status subscriber panicked");
            }
        }
    }

    // ------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------

    /// Probe now and then every `poll_interval` until stopped. No-op if already running.
    pub fn start_monitoring(self: &Arc<Self>) {
        let Ok(mut slot) = self.monitor_task.lock() else {
            return;
        };
        if slot.is_some() {
            return;
        }

        let cancellation_token = CancellationToken::new();
        let token = cancellation_token.clone();
        let monitor = Arc::downgrade(self);
        let period = self.config.poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(monitor) = monitor.upgrade() else {
                            break;
                        };
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = monitor.check_now() => {}
                        }
                    }
                }
            }
            debug!("Network monitoring stopped");
        });

        info!(poll_interval_secs = period.as_secs(), "Started network monitoring");
        *slot = Some(MonitorTask {
            cancellation_token,
            handle,
        });
    }

    /// Stop polling and wait for the loop to exit.
    pub async fn stop_monitoring(&self) {
        let task = self.monitor_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            task.cancellation_token.cancel();
            if let Err(e) = task.handle.await {
                warn!(error = %e, "Network monitor task ended abnormally");
            }
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor_task
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.monitor_task.lock() {
            if let Some(task) = slot.take() {
                task.cancellation_token.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::BridgeError;
    use bridge_traits::http::HttpResponse;
    use mockall::mock;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    mock! {
        Http {}

        #[async_trait]
        impl HttpClient for Http {
            async fn execute(&self, request: HttpRequest) -> bridge_traits::error::Result<HttpResponse>;
        }
    }

    mock! {
        LinkType {}

        #[async_trait]
        impl ConnectionTypeProvider for LinkType {
            async fn connection_type(&self) -> bridge_traits::error::Result<ConnectionType>;
        }
    }

    /// HTTP client whose reachability is flipped by the test.
    struct ToggleHttp {
        online: AtomicBool,
    }

    #[async_trait]
    impl HttpClient for ToggleHttp {
        async fn execute(&self, _request: HttpRequest) -> bridge_traits::error::Result<HttpResponse> {
            if self.online.load(Ordering::SeqCst) {
                Ok(HttpResponse::with_status(204))
            } else {
                Err(BridgeError::ConnectionClosed("unreachable".to_string()))
            }
        }
    }

    fn monitor(http: impl HttpClient + 'static) -> NetworkMonitor {
        NetworkMonitor::new(NetworkMonitorConfig::default(), Arc::new(http)).unwrap()
    }

    #[tokio::test]
    async fn test_probe_sends_head_with_timeout() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .withf(|request| {
                request.method == HttpMethod::Head
                    && request.timeout == Some(Duration::from_secs(5))
            })
            .times(1)
            .returning(|_| Ok(HttpResponse::with_status(204)));

        let status = monitor(http).get_status().await;
        assert!(status.is_online());
        assert_eq!(status.connection_type, ConnectionType::Unknown);
    }

    #[tokio::test]
    async fn test_probe_failure_reports_offline() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .returning(|_| Err(BridgeError::Timeout("probe".to_string())));

        assert_eq!(monitor(http).get_status().await, NetworkStatus::offline());
    }

    #[tokio::test]
    async fn test_link_without_internet() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .returning(|_| Err(BridgeError::ConnectionClosed("captive".to_string())));
        let mut link = MockLinkType::new();
        link.expect_connection_type()
            .returning(|| Ok(ConnectionType::Wifi));

        let monitor = monitor(http).with_connection_type_provider(Arc::new(link));
        let status = monitor.get_status().await;
        assert!(status.is_connected);
        assert!(!status.is_internet_reachable);
        assert!(!status.is_online());
    }

    #[tokio::test]
    async fn test_subscribers_notified_only_on_change() {
        let http = ToggleHttp {
            online: AtomicBool::new(true),
        };
        let monitor = monitor(http);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        monitor.on_status_change(move |status| sink.lock().unwrap().push(status.is_online()));

        monitor.check_now().await;
        monitor.check_now().await;
        monitor.report_status(NetworkStatus::offline());
        monitor.report_status(NetworkStatus::offline());

        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_panicking_subscriber_does_not_block_others() {
        let monitor = monitor(MockHttp::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = order.clone();
        monitor.on_status_change(move |_| first.lock().unwrap().push("first"));
        monitor.on_status_change(|_| panic!("subscriber bug"));
        let third = order.clone();
        monitor.on_status_change(move |_| third.lock().unwrap().push("third"));

        assert!(monitor.report_status(NetworkStatus::online(ConnectionType::Wifi)));
        assert_eq!(*order.lock().unwrap(), vec!["first", "third"]);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let monitor = monitor(MockHttp::new());
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let id = monitor.on_status_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        monitor.report_status(NetworkStatus::offline());
        assert!(monitor.off_status_change(id));
        assert!(!monitor.off_status_change(id));
        monitor.report_status(NetworkStatus::online(ConnectionType::Ethernet));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_detects_changes() {
        let http = Arc::new(ToggleHttp {
            online: AtomicBool::new(false),
        });
        let bus = EventBus::new(8);
        let mut events = bus.subscribe();
        let monitor = Arc::new(
            NetworkMonitor::new(NetworkMonitorConfig::default(), http.clone())
                .unwrap()
                .with_event_bus(bus),
        );

        monitor.start_monitoring();
        assert!(monitor.is_monitoring());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(monitor.current_status(), NetworkStatus::offline());

        http.online.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(monitor.current_status().is_online());

        monitor.stop_monitoring().await;
        assert!(!monitor.is_monitoring());

        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::Network(NetworkEvent::StatusChanged { status }) if !status.is_online()
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::Network(NetworkEvent::StatusChanged { status }) if status.is_online()
        ));
    }
}
