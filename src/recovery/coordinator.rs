//! Process-wide recovery state: connectivity, sync status, error history
//! and replay of the offline queue.
//!
//! Status transitions:
//! `synced -> error` when an error is handled, `error -> syncing` when
//! connectivity returns, `syncing -> synced` after a clean drain and
//! `syncing -> error` when any replay in the pass fails.

use super::classify::{classify, classify_error, ErrorClassification, ErrorKind};
use crate::api::InteractionApi;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::notify::{Listeners, Subscription};
use crate::queue::{NewOfflineAction, OfflineActionQueue};
use crate::store::{LiveInteractionState, LiveInteractionStore};
use crate::types::SyncStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Where an error happened, for the history and the logs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    pub operation: String,
    pub interaction_id: Option<String>,
    pub detail: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub fn with_interaction(mut self, interaction_id: impl Into<String>) -> Self {
        self.interaction_id = Some(interaction_id.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operation)?;
        if let Some(id) = &self.interaction_id {
            write!(f, " interaction={}", id)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub classification: ErrorClassification,
    pub error: String,
    pub context: ErrorContext,
    /// Connectivity when the error was handled.
    pub online: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryMetrics {
    pub errors_handled: u64,
    pub actions_queued: u64,
    pub actions_replayed: u64,
    pub actions_failed: u64,
    pub actions_dropped: u64,
    pub last_drain_ms: Option<u64>,
}

/// What subscribers receive on every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryState {
    pub is_online: bool,
    pub sync_status: SyncStatus,
    pub last_update: Option<DateTime<Utc>>,
    pub has_error: bool,
    pub has_conflict: bool,
    pub has_offline_actions: bool,
    pub queued_actions: usize,
    pub last_error: Option<String>,
    pub performance_metrics: RecoveryMetrics,
}

/// Callbacks for error kinds that need the user's attention.
pub trait RecoveryHooks: Send + Sync {
    fn on_authentication_required(&self, _record: &ErrorRecord) {}

    fn on_conflict(&self, _record: &ErrorRecord) {}
}

pub struct NoopHooks;

impl RecoveryHooks for NoopHooks {}

/// What became of a mutation that failed.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// Stored for replay; carries the queued action id.
    Queued(String),
    /// Surfaced to the caller.
    Reported(ErrorClassification),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    /// The pass did not run because the device is offline.
    pub skipped: bool,
    pub replayed: usize,
    pub failed: usize,
    pub dropped: usize,
    pub remaining: usize,
    /// Connectivity dropped before the pass finished.
    pub interrupted: bool,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        !self.skipped && !self.interrupted && self.failed == 0
    }
}

struct Inner {
    is_online: bool,
    sync_status: SyncStatus,
    last_update: Option<DateTime<Utc>>,
    last_error: Option<String>,
    /// A CONFLICT error from the server since the last clean sync.
    reported_conflict: bool,
    /// The mirrored store holds an unresolved overlay conflict.
    store_conflict: bool,
    metrics: RecoveryMetrics,
    history: VecDeque<ErrorRecord>,
}

pub struct RecoveryCoordinator {
    config: SyncConfig,
    queue: Arc<OfflineActionQueue>,
    api: Arc<dyn InteractionApi>,
    hooks: Arc<dyn RecoveryHooks>,
    inner: Mutex<Inner>,
    listeners: Listeners<RecoveryState>,
    drain_lock: tokio::sync::Mutex<()>,
}

impl RecoveryCoordinator {
    /// `online` is the connectivity signal's value at construction time.
    pub fn new(
        config: SyncConfig,
        queue: Arc<OfflineActionQueue>,
        api: Arc<dyn InteractionApi>,
        online: bool,
    ) -> Arc<Self> {
        Self::with_hooks(config, queue, api, Arc::new(NoopHooks), online)
    }

    pub fn with_hooks(
        config: SyncConfig,
        queue: Arc<OfflineActionQueue>,
        api: Arc<dyn InteractionApi>,
        hooks: Arc<dyn RecoveryHooks>,
        online: bool,
    ) -> Arc<Self> {
        tracing::info!(
            "[RECOVERY] coordinator started (online={}, queued={})",
            online,
            queue.len()
        );
        Arc::new(Self {
            inner: Mutex::new(Inner {
                is_online: online,
                sync_status: SyncStatus::Synced,
                last_update: None,
                last_error: None,
                reported_conflict: false,
                store_conflict: false,
                metrics: RecoveryMetrics::default(),
                history: VecDeque::with_capacity(config.error_history_cap.min(128)),
            }),
            config,
            queue,
            api,
            hooks,
            listeners: Listeners::new(),
            drain_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<OfflineActionQueue> {
        &self.queue
    }

    pub fn is_online(&self) -> bool {
        self.lock().is_online
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.lock().sync_status
    }

    pub fn state(&self) -> RecoveryState {
        let queued = self.queue.len();
        let inner = self.lock();
        RecoveryState {
            is_online: inner.is_online,
            sync_status: inner.sync_status,
            last_update: inner.last_update,
            has_error: inner.sync_status == SyncStatus::Error,
            has_conflict: inner.reported_conflict || inner.store_conflict,
            has_offline_actions: queued > 0,
            queued_actions: queued,
            last_error: inner.last_error.clone(),
            performance_metrics: inner.metrics.clone(),
        }
    }

    pub fn error_history(&self) -> Vec<ErrorRecord> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn add_listener(
        &self,
        f: impl Fn(&RecoveryState) + Send + Sync + 'static,
    ) -> Subscription {
        self.listeners.add(f)
    }

    fn notify(&self) {
        let state = self.state();
        self.listeners.notify(&state);
    }

    /// Keep `store`'s connectivity and sync status in step with ours, and
    /// follow the store's overlay conflict in `has_conflict`.
    ///
    /// The returned subscription covers both directions.
    pub fn mirror_into(self: &Arc<Self>, store: Arc<LiveInteractionStore>) -> Subscription {
        let weak = Arc::downgrade(self);
        let from_store = store.subscribe(move |state: &LiveInteractionState| {
            if let Some(coordinator) = weak.upgrade() {
                coordinator.set_store_conflict(state.conflict.has_conflict);
            }
        });
        self.set_store_conflict(store.conflict().has_conflict);

        let apply = move |state: &RecoveryState| {
            store.set_online(state.is_online);
            store.set_sync_status(state.sync_status, state.last_error.clone());
        };
        apply(&self.state());
        self.listeners.add(apply).and(from_store)
    }

    /// Record whether the store holds an overlay conflict. Settling it also
    /// settles any conflict the server reported.
    pub fn set_store_conflict(&self, has_conflict: bool) {
        let changed = {
            let mut inner = self.lock();
            if inner.store_conflict == has_conflict {
                false
            } else {
                inner.store_conflict = has_conflict;
                if !has_conflict {
                    inner.reported_conflict = false;
                }
                true
            }
        };
        if changed {
            tracing::info!(
                "[RECOVERY] store conflict {}",
                if has_conflict { "detected" } else { "resolved" }
            );
            self.notify();
        }
    }

    fn record_error(
        &self,
        classification: ErrorClassification,
        error: String,
        context: ErrorContext,
    ) -> ErrorRecord {
        let online = self.is_online();
        let record = ErrorRecord {
            classification,
            error,
            context,
            online,
            at: Utc::now(),
        };

        tracing::warn!(
            "[RECOVERY] {} error in {} (online={}): {}",
            record.classification.kind,
            record.context,
            online,
            record.error
        );

        {
            let mut inner = self.lock();
            inner.history.push_back(record.clone());
            while inner.history.len() > self.config.error_history_cap {
                inner.history.pop_front();
            }
            inner.metrics.errors_handled += 1;
            if record.classification.kind == ErrorKind::Conflict {
                inner.reported_conflict = true;
            }
        }

        match record.classification.kind {
            ErrorKind::Authentication => self.hooks.on_authentication_required(&record),
            ErrorKind::Conflict => self.hooks.on_conflict(&record),
            _ => {}
        }
        record
    }

    /// Classify and record `error`, move to `error` status, and notify.
    pub fn handle_error<E: fmt::Display + ?Sized>(
        &self,
        error: &E,
        context: ErrorContext,
    ) -> ErrorClassification {
        self.handle_classified(classify(error), error.to_string(), context)
    }

    /// [`handle_error`](Self::handle_error) for crate errors, classified by
    /// variant rather than message text.
    pub fn handle_sync_error(
        &self,
        error: &SyncError,
        context: ErrorContext,
    ) -> ErrorClassification {
        self.handle_classified(classify_error(error), error.to_string(), context)
    }

    fn handle_classified(
        &self,
        classification: ErrorClassification,
        error: String,
        context: ErrorContext,
    ) -> ErrorClassification {
        let record = self.record_error(classification, error, context);
        {
            let mut inner = self.lock();
            inner.sync_status = SyncStatus::Error;
            inner.last_error = Some(record.error.clone());
            inner.last_update = Some(record.at);
        }
        self.notify();
        record.classification
    }

    /// Record a failed mutation, then queue it if the device is offline or
    /// report it otherwise.
    pub fn report_failed_mutation(
        &self,
        error: &SyncError,
        context: ErrorContext,
        action: NewOfflineAction,
    ) -> Result<FailureOutcome> {
        let classification = self.handle_sync_error(error, context);
        if self.is_online() {
            return Ok(FailureOutcome::Reported(classification));
        }
        let id = self.queue_action(action)?;
        Ok(FailureOutcome::Queued(id))
    }

    pub fn queue_action(&self, action: NewOfflineAction) -> Result<String> {
        let id = self.queue.add_action(action)?;
        self.lock().metrics.actions_queued += 1;
        self.notify();
        Ok(id)
    }

    /// Forget a conflict the server reported. Store conflicts clear through
    /// resolution or overlay removal instead.
    pub fn clear_conflict(&self) {
        let changed = std::mem::replace(&mut self.lock().reported_conflict, false);
        if changed {
            self.notify();
        }
    }

    /// Record a connectivity transition. Returns true when a drain should
    /// follow: the device is online and there is queued work or an error to
    /// recover from.
    pub fn update_connectivity(&self, online: bool) -> bool {
        let (changed, in_error) = {
            let mut inner = self.lock();
            let changed = inner.is_online != online;
            inner.is_online = online;
            if changed {
                inner.last_update = Some(Utc::now());
            }
            (changed, inner.sync_status == SyncStatus::Error)
        };
        if changed {
            if online {
                tracing::info!("[RECOVERY] connectivity restored");
            } else {
                tracing::warn!("[RECOVERY] connectivity lost");
            }
            self.notify();
        }
        online && (in_error || !self.queue.is_empty())
    }

    /// Connectivity handler: records the transition and, when back online,
    /// drains the offline queue before returning.
    pub async fn set_online(&self, online: bool) -> Option<DrainReport> {
        if self.update_connectivity(online) {
            Some(self.process_offline_queue().await)
        } else {
            None
        }
    }

    /// Follow a connectivity signal until its sender is dropped.
    ///
    /// Drains run on their own task so an offline transition is seen while
    /// a drain is still in progress.
    pub fn attach_connectivity(
        self: &Arc<Self>,
        mut signal: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut online = *signal.borrow_and_update();
            loop {
                {
                    let Some(coordinator) = weak.upgrade() else {
                        break;
                    };
                    if coordinator.update_connectivity(online) {
                        tokio::spawn(async move {
                            coordinator.process_offline_queue().await;
                        });
                    }
                }
                if signal.changed().await.is_err() {
                    break;
                }
                online = *signal.borrow_and_update();
            }
            tracing::debug!("[RECOVERY] connectivity signal closed");
        })
    }

    fn skipped(&self) -> DrainReport {
        tracing::debug!("[RECOVERY] offline, queue drain skipped");
        DrainReport {
            skipped: true,
            remaining: self.queue.len(),
            ..Default::default()
        }
    }

    fn set_status(&self, status: SyncStatus, error: Option<String>) {
        {
            let mut inner = self.lock();
            if status == SyncStatus::Synced {
                inner.reported_conflict = false;
            }
            inner.sync_status = status;
            inner.last_error = error;
            inner.last_update = Some(Utc::now());
        }
        self.notify();
    }

    /// Replay queued actions in drain order, once each.
    ///
    /// A delivered action is removed. A failed one has its retry count
    /// bumped and is dropped once the count reaches the configured ceiling.
    /// Passes never overlap; a second caller waits for the first to finish.
    pub async fn process_offline_queue(&self) -> DrainReport {
        if !self.is_online() {
            return self.skipped();
        }
        let _drain = self.drain_lock.lock().await;
        if !self.is_online() {
            return self.skipped();
        }

        self.set_status(SyncStatus::Syncing, None);
        let started = tokio::time::Instant::now();
        let pending = self.queue.drain_order();
        tracing::info!("[RECOVERY] draining {} offline actions", pending.len());

        let mut report = DrainReport::default();
        let timeout = self.config.retry.timeout;
        for action in pending {
            if !self.is_online() {
                tracing::warn!("[RECOVERY] connectivity lost mid-drain, stopping");
                report.interrupted = true;
                break;
            }

            let delivered = match tokio::time::timeout(timeout, self.api.replay(&action)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(SyncError::Timeout {
                    after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            };

            if let Err(e) = delivered {
                report.failed += 1;
                self.record_error(
                    classify_error(&e),
                    e.to_string(),
                    ErrorContext::new("replay_offline_action")
                        .with_interaction(action.interaction_id.clone())
                        .with_detail(action.id.clone()),
                );
                match self.queue.record_failure(&action.id) {
                    Ok(Some(count)) if count >= self.config.offline_retry_ceiling => {
                        match self.queue.remove_action(&action.id) {
                            Ok(_) => {
                                report.dropped += 1;
                                tracing::warn!(
                                    "[QUEUE] dropped action {} after {} failed replays",
                                    action.id,
                                    count
                                );
                            }
                            Err(e) => {
                                tracing::error!("[QUEUE] failed to drop {}: {}", action.id, e)
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("[QUEUE] failed to record retry for {}: {}", action.id, e)
                    }
                }
                continue;
            }

            match self.queue.remove_action(&action.id) {
                Ok(_) => report.replayed += 1,
                Err(e) => {
                    // delivered, but still on disk: it will be replayed again
                    report.failed += 1;
                    tracing::error!("[QUEUE] failed to remove delivered {}: {}", action.id, e);
                }
            }
        }

        report.remaining = self.queue.len();
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        {
            let mut inner = self.lock();
            inner.metrics.actions_replayed += report.replayed as u64;
            inner.metrics.actions_failed += report.failed as u64;
            inner.metrics.actions_dropped += report.dropped as u64;
            inner.metrics.last_drain_ms = Some(elapsed_ms);
        }

        if report.is_clean() {
            self.set_status(SyncStatus::Synced, None);
        } else if report.interrupted {
            self.set_status(SyncStatus::Error, Some("connectivity lost during sync".into()));
        } else {
            self.set_status(
                SyncStatus::Error,
                Some(format!("{} offline actions failed to sync", report.failed)),
            );
        }

        tracing::info!(
            "[RECOVERY] drain finished: replayed={} failed={} dropped={} remaining={} in {}ms",
            report.replayed,
            report.failed,
            report.dropped,
            report.remaining,
            elapsed_ms
        );
        report
    }
}
