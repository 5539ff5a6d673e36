use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use skirmish::{
    FileStore, InteractionApi, InteractionMutator, InteractionSnapshot, InteractionStatus,
    LiveInteractionStore, OfflineActionQueue, OptimisticUpdates, PushUpdate, RecoveryCoordinator,
    Result, SyncConfig, SyncError,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tempfile::TempDir;

/// Mutation endpoint that fails with scripted errors, then succeeds.
#[derive(Default)]
pub struct FakeApi {
    failures: Mutex<VecDeque<SyncError>>,
    calls: AtomicUsize,
    delivered: Mutex<Vec<(String, Value)>>,
    offline_on_call: Mutex<Option<Weak<RecoveryCoordinator>>>,
}

#[allow(dead_code)]
impl FakeApi {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(error: SyncError, times: usize) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(std::iter::repeat(error).take(times).collect()),
            ..Default::default()
        })
    }

    /// Flip `coordinator` offline the next time the endpoint is called.
    pub fn go_offline_on_call(&self, coordinator: &Arc<RecoveryCoordinator>) {
        *self.offline_on_call.lock().unwrap() = Some(Arc::downgrade(coordinator));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<(String, Value)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl InteractionApi for FakeApi {
    async fn update_interaction(&self, interaction_id: &str, patch: &Value) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let trigger = self.offline_on_call.lock().unwrap().take();
        if let Some(coordinator) = trigger.and_then(|w| w.upgrade()) {
            coordinator.update_connectivity(false);
        }
        if let Some(e) = self.failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        self.delivered
            .lock()
            .unwrap()
            .push((interaction_id.to_string(), patch.clone()));
        Ok(())
    }
}

/// Defaults, except overlays outlive every test so rollbacks are observable.
pub fn test_config(data_dir: &Path) -> SyncConfig {
    SyncConfig {
        overlay_grace: Duration::from_secs(600),
        data_dir: data_dir.to_path_buf(),
        ..Default::default()
    }
}

pub fn open_queue(dir: &Path) -> Arc<OfflineActionQueue> {
    let storage = FileStore::open(dir).unwrap();
    Arc::new(OfflineActionQueue::load(Arc::new(storage)).unwrap())
}

pub struct Harness {
    _dir: Option<TempDir>,
    pub store: Arc<LiveInteractionStore>,
    pub coordinator: Arc<RecoveryCoordinator>,
    pub updates: Arc<OptimisticUpdates>,
    pub mutator: InteractionMutator,
}

#[allow(dead_code)]
impl Harness {
    pub fn new(api: Arc<FakeApi>, online: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let mut harness = Self::in_dir(dir.path(), api, online);
        harness._dir = Some(dir);
        harness
    }

    /// Harness over a caller-owned data directory.
    pub fn in_dir(dir: &Path, api: Arc<FakeApi>, online: bool) -> Self {
        let config = test_config(dir);
        let queue = open_queue(dir);
        let store = LiveInteractionStore::new();
        let coordinator = RecoveryCoordinator::new(config.clone(), queue, api.clone(), online);
        coordinator.mirror_into(store.clone()).detach();
        let updates = Arc::new(OptimisticUpdates::new(store.clone(), config.overlay_grace));
        let mutator = InteractionMutator::new(updates.clone(), coordinator.clone(), api);
        Harness {
            _dir: None,
            store,
            coordinator,
            updates,
            mutator,
        }
    }

    /// Make `id` current with a server snapshot in `status`.
    pub fn load_snapshot(&self, id: &str, status: InteractionStatus) {
        self.store.set_current_interaction(Some(id.to_string()), None);
        let mut snapshot = InteractionSnapshot::empty(id, Utc::now());
        snapshot.status = status;
        self.store
            .apply_push(id, PushUpdate::Snapshot(snapshot), None);
    }

    pub fn visible_status(&self) -> InteractionStatus {
        self.store.visible_snapshot().unwrap().status
    }
}
