//! # Sync Manager
//!
//! Drains the [`OfflineQueue`] when the [`NetworkMonitor`] says the network is
//! usable, and keeps the status a UI shows for it.
//!
//! ## Status
//!
//! ```text
//! Idle ──sync()──► Syncing ──► Completed ──(completed_reset_delay)──► Idle
//!                          └─► Error
//! ```
//!
//! A sync that leaves nothing failed ends in `Completed`, anything else in
//! `Error`. `Error` stays until the next sync.
//!
//! ## Auto-sync
//!
//! After [`SyncManager::start`], every transition to online triggers a sync
//! when the queue is non-empty and no sync is running. Periodic or foreground
//! triggers should ask [`SyncManager::should_auto_sync`] first, which also
//! enforces a minimum gap since the last sync.

use bridge_traits::time::Clock;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::SyncManagerConfig;
use crate::error::{Result, SyncError};
use crate::network::{NetworkMonitor, SubscriptionId};
use crate::offline_queue::{DropReason, OfflineQueue, ProcessReport};
use crate::request::RequestId;

/// Sync lifecycle as shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Completed,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Completed => "completed",
            SyncStatus::Error => "error",
        }
    }
}

/// Why a single request did not sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequestError {
    pub request_id: RequestId,
    pub url: String,
    pub message: String,
    /// Always `false` for a dropped request; the queue will not replay it again
    pub retryable: bool,
    pub reason: DropReason,
}

/// Outcome of one sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    pub synced_count: usize,
    /// Dropped requests plus requests still queued afterwards
    pub failed_count: usize,
    pub errors: Vec<SyncRequestError>,
    pub duration_ms: u64,
    /// Set when the sync failed as a whole
    pub message: Option<String>,
}

impl SyncResult {
    fn aborted(message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            duration_ms,
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
struct SyncState {
    status: SyncStatus,
    last_sync_time: Option<i64>,
    last_result: Option<SyncResult>,
    /// Bumped on every status change so a stale reset timer cannot clobber a newer status
    generation: u64,
}

impl SyncState {
    fn set_status(&mut self, status: SyncStatus) -> u64 {
        self.status = status;
        self.generation += 1;
        self.generation
    }
}

/// Clears the syncing flag when a sync ends, including by cancellation.
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct AutoSyncTask {
    subscription: SubscriptionId,
    cancellation_token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct SyncManager {
    queue: Arc<OfflineQueue>,
    monitor: Arc<NetworkMonitor>,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
    config: SyncManagerConfig,
    syncing: AtomicBool,
    state: Arc<Mutex<SyncState>>,
    auto_sync: Mutex<Option<AutoSyncTask>>,
}

impl SyncManager {
    pub fn new(
        config: SyncManagerConfig,
        queue: Arc<OfflineQueue>,
        monitor: Arc<NetworkMonitor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            monitor,
            clock,
            event_bus: None,
            config,
            syncing: AtomicBool::new(false),
            state: Arc::new(Mutex::new(SyncState::default())),
            auto_sync: Mutex::new(None),
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn monitor(&self) -> &Arc<NetworkMonitor> {
        &self.monitor
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    /// Replay the whole offline queue.
    ///
    /// # Errors
    ///
    /// [`SyncError::SyncInProgress`] if another sync is running. Every other
    /// failure is reported through the returned [`SyncResult`].
    pub async fn sync(&self) -> Result<SyncResult> {
        self.run_sync(None).await
    }

    /// Replay only queued requests whose URL contains one of `types`.
    pub async fn sync_partial(&self, types: &[&str]) -> Result<SyncResult> {
        let tags = types.iter().map(|t| t.to_string()).collect();
        self.run_sync(Some(tags)).await
    }

    #[instrument(skip(self), fields(partial = scope.is_some()))]
    async fn run_sync(&self, scope: Option<Vec<String>>) -> Result<SyncResult> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SyncError::SyncInProgress);
        }
        let _guard = SyncingGuard(&self.syncing);

        self.update_state(|state| {
            state.set_status(SyncStatus::Syncing);
        });
        let started = Instant::now();

        if !self.monitor.check_now().await.is_online() {
            warn!("Sync skipped, network unavailable");
            let message = SyncError::NetworkUnavailable.to_string();
            let result = SyncResult::aborted(message.clone(), elapsed_ms(started));
            self.finish(result.clone());
            self.emit(SyncEvent::Failed { message });
            return Ok(result);
        }

        let queued = match &scope {
            Some(tags) => self.queue.count_matching(tags).await,
            None => self.queue.size().await,
        };
        info!(queued, "Sync started");
        self.emit(SyncEvent::Started {
            queued: queued as u64,
        });

        let processed = match &scope {
            Some(tags) => self.queue.process_where(|r| r.matches_any(tags)).await,
            None => self.queue.process_queue().await,
        };

        let report = match processed {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Sync could not process the queue");
                let message = e.to_string();
                let result = SyncResult::aborted(message.clone(), elapsed_ms(started));
                self.finish(result.clone());
                self.emit(SyncEvent::Failed { message });
                return Ok(result);
            }
        };

        let remaining = match &scope {
            Some(tags) => self.queue.count_matching(tags).await,
            None => self.queue.size().await,
        };
        let result = summarize(report, remaining, elapsed_ms(started));

        info!(
            synced = result.synced_count,
            failed = result.failed_count,
            duration_ms = result.duration_ms,
            "Sync finished"
        );
        self.finish(result.clone());
        self.emit(SyncEvent::Completed {
            synced: result.synced_count as u64,
            failed: result.failed_count as u64,
            duration_ms: result.duration_ms,
        });
        Ok(result)
    }

    /// Record the result and settle the status, scheduling the return to idle.
    fn finish(&self, result: SyncResult) {
        let status = if result.success {
            SyncStatus::Completed
        } else {
            SyncStatus::Error
        };
        let now = self.clock.unix_timestamp_millis();

        let Some(generation) = self.update_state(|state| {
            state.last_sync_time = Some(now);
            state.last_result = Some(result);
            state.set_status(status)
        }) else {
            return;
        };

        if status == SyncStatus::Completed {
            let state = Arc::clone(&self.state);
            let delay = self.config.completed_reset_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Ok(mut state) = state.lock() {
                    if state.generation == generation {
                        state.set_status(SyncStatus::Idle);
                    }
                }
            });
        }
    }

    fn update_state<R>(&self, f: impl FnOnce(&mut SyncState) -> R) -> Option<R> {
        match self.state.lock() {
            Ok(mut state) => Some(f(&mut state)),
            Err(_) => {
                warn!("Sync state lock poisoned");
                None
            }
        }
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Sync(event)).ok();
        }
    }

    /// Whether a periodic trigger should sync now.
    ///
    /// Requires a usable network, a non-empty queue, no sync running and at
    /// least `auto_sync_threshold` since the last sync.
    pub async fn should_auto_sync(&self) -> bool {
        if self.is_syncing() || !self.monitor.current_status().is_online() {
            return false;
        }
        if self.queue.is_empty().await {
            return false;
        }
        match self.last_sync_time() {
            None => true,
            Some(last) => {
                let threshold_ms = self.config.auto_sync_threshold.as_millis() as i64;
                self.clock.unix_timestamp_millis() - last > threshold_ms
            }
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn status(&self) -> SyncStatus {
        self.state
            .lock()
            .map(|state| state.status)
            .unwrap_or_default()
    }

    /// Unix milliseconds when the last sync finished.
    pub fn last_sync_time(&self) -> Option<i64> {
        self.state.lock().ok().and_then(|state| state.last_sync_time)
    }

    pub fn last_result(&self) -> Option<SyncResult> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.last_result.clone())
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Auto-sync
    // ------------------------------------------------------------------

    /// Sync whenever connectivity comes back. No-op if already started.
    pub fn start(self: &Arc<Self>) {
        let Ok(mut slot) = self.auto_sync.lock() else {
            return;
        };
        if slot.is_some() {
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = self.monitor.on_status_change(move |status| {
            tx.send(*status).ok();
        });

        let cancellation_token = CancellationToken::new();
        let token = cancellation_token.clone();
        let manager = Arc::downgrade(self);
        let mut was_online = self
            .monitor
            .last_observed()
            .map(|status| status.is_online())
            .unwrap_or(false);

        let handle = tokio::spawn(async move {
            loop {
                let status = tokio::select! {
                    _ = token.cancelled() => break,
                    status = rx.recv() => match status {
                        Some(status) => status,
                        None => break,
                    },
                };

                let online = status.is_online();
                let reconnected = online && !was_online;
                was_online = online;
                if !reconnected {
                    continue;
                }

                let Some(manager) = manager.upgrade() else {
                    break;
                };
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = manager.sync_after_reconnect() => {}
                }
            }
            debug!("Auto-sync stopped");
        });

        info!("Auto-sync on reconnect enabled");
        *slot = Some(AutoSyncTask {
            subscription,
            cancellation_token,
            handle,
        });
    }

    async fn sync_after_reconnect(&self) {
        if !self.config.sync_on_reconnect || self.is_syncing() || self.queue.is_empty().await {
            return;
        }

        info!("Network restored, syncing offline queue");
        match self.sync().await {
            Ok(result) if !result.success => {
                warn!(failed = result.failed_count, "Reconnect sync left failures")
            }
            Ok(_) => {}
            Err(SyncError::SyncInProgress) => debug!("Sync already running"),
            Err(e) => warn!(error = %e, "Reconnect sync failed"),
        }
    }

    /// Stop auto-sync and wait for a running reconnect sync to be cancelled.
    pub async fn stop(&self) {
        let task = self.auto_sync.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            self.monitor.off_status_change(task.subscription);
            task.cancellation_token.cancel();
            if let Err(e) = task.handle.await {
                warn!(error = %e, "Auto-sync task ended abnormally");
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.auto_sync
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }
}

impl Drop for SyncManager {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.auto_sync.lock() {
            if let Some(task) = slot.take() {
                self.monitor.off_status_change(task.subscription);
                task.cancellation_token.cancel();
            }
        }
    }
}

fn summarize(report: ProcessReport, remaining: usize, duration_ms: u64) -> SyncResult {
    let errors: Vec<SyncRequestError> = report
        .dropped
        .into_iter()
        .map(|dropped| SyncRequestError {
            request_id: dropped.request.id,
            url: dropped.request.url,
            message: dropped.message,
            retryable: false,
            reason: dropped.reason,
        })
        .collect();
    let failed_count = errors.len() + remaining;

    SyncResult {
        success: failed_count == 0,
        synced_count: report.succeeded.len(),
        failed_count,
        errors,
        duration_ms,
        message: None,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
