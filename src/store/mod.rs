//! Live interaction state: server snapshot, optimistic overlays, conflict
//! tracking and a local mirror of connectivity.

pub mod merge;
pub mod push;
pub mod reducer;
pub mod state;

pub use push::{InteractionFeeds, Push, PushConsumer, PushSenders};
pub use reducer::{reduce, InitiativeOrder, PushUpdate, StoreAction};
pub use state::{
    ConflictResolution, ConflictState, LiveInteractionState, OptimisticOverlay, StoreMetrics,
};

use crate::notify::{Listeners, Subscription};
use crate::types::{CampaignId, InteractionId, InteractionSnapshot, SyncStatus};
use chrono::Utc;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub struct LiveInteractionStore {
    state: Mutex<LiveInteractionState>,
    listeners: Listeners<LiveInteractionState>,
}

impl LiveInteractionStore {
    pub fn new() -> Arc<Self> {
        Self::with_state(LiveInteractionState::default())
    }

    pub fn with_state(state: LiveInteractionState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            listeners: Listeners::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LiveInteractionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LiveInteractionState {
        self.lock().clone()
    }

    /// Apply one action. Returns whether the state changed; listeners are
    /// only notified when it did.
    pub fn dispatch(&self, action: StoreAction) -> bool {
        self.dispatch_batch(std::iter::once(action))
    }

    /// Fold `actions` into a single transition with at most one notification.
    pub fn dispatch_batch(&self, actions: impl IntoIterator<Item = StoreAction>) -> bool {
        let changed = {
            let mut guard = self.lock();
            let before = guard.clone();
            let after = actions.into_iter().fold(before.clone(), reduce);
            if after == before {
                None
            } else {
                *guard = after.clone();
                Some(after)
            }
        };
        match changed {
            Some(state) => {
                self.listeners.notify(&state);
                true
            }
            None => false,
        }
    }

    pub fn subscribe(
        &self,
        f: impl Fn(&LiveInteractionState) + Send + Sync + 'static,
    ) -> Subscription {
        self.listeners.add(f)
    }

    pub fn current_interaction_id(&self) -> Option<InteractionId> {
        self.lock().current_interaction_id.clone()
    }

    pub fn is_current(&self, interaction_id: &str) -> bool {
        self.lock().current_interaction_id.as_deref() == Some(interaction_id)
    }

    pub fn snapshot(&self) -> Option<InteractionSnapshot> {
        self.lock().snapshot.clone()
    }

    /// Current interaction with its overlay applied.
    pub fn visible_snapshot(&self) -> Option<InteractionSnapshot> {
        self.lock().visible_snapshot()
    }

    pub fn view(&self, key: &str) -> Option<Value> {
        self.lock().view(key)
    }

    pub fn conflict(&self) -> ConflictState {
        self.lock().conflict.clone()
    }

    pub fn metrics(&self) -> StoreMetrics {
        self.lock().metrics.clone()
    }

    pub fn set_current_interaction(
        &self,
        interaction_id: Option<InteractionId>,
        campaign_id: Option<CampaignId>,
    ) {
        self.dispatch(StoreAction::SetCurrentInteraction {
            interaction_id,
            campaign_id,
        });
    }

    /// Apply a server push stamped with the current time.
    pub fn apply_push(
        &self,
        interaction_id: impl Into<InteractionId>,
        update: PushUpdate,
        version: Option<u64>,
    ) -> bool {
        self.dispatch(StoreAction::Push {
            interaction_id: interaction_id.into(),
            update,
            version,
            received_at: Utc::now(),
        })
    }

    pub fn resolve_conflict(&self, resolution: ConflictResolution) {
        let key = self.lock().conflict.key.clone();
        if self.dispatch(StoreAction::ResolveConflict(resolution)) {
            tracing::info!("[STORE] conflict on {:?} resolved", key);
        }
    }

    pub fn set_online(&self, online: bool) {
        self.dispatch(StoreAction::SetOnline {
            online,
            at: Utc::now(),
        });
    }

    pub fn set_sync_status(&self, status: SyncStatus, error: Option<String>) {
        self.dispatch(StoreAction::SetSyncStatus {
            status,
            error,
            at: Utc::now(),
        });
    }

    /// Make `interaction_id` current and start consuming its push feeds.
    ///
    /// Dropping the returned consumer stops consumption; the previous
    /// interaction's consumer should be dropped by the caller.
    pub fn switch_interaction(
        self: &Arc<Self>,
        interaction_id: impl Into<InteractionId>,
        campaign_id: Option<CampaignId>,
        feeds: InteractionFeeds,
    ) -> PushConsumer {
        let interaction_id = interaction_id.into();
        tracing::info!("[STORE] switching to interaction {}", interaction_id);
        self.set_current_interaction(Some(interaction_id.clone()), campaign_id);
        PushConsumer::attach(Arc::clone(self), interaction_id, feeds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InteractionStatus;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn overlay(key: &str, patch: Value, revision: u64) -> StoreAction {
        StoreAction::ApplyOverlay {
            key: key.to_string(),
            patch,
            revision,
            applied_at: Utc::now(),
        }
    }

    #[test]
    fn test_dispatch_notifies_only_on_change() {
        let store = LiveInteractionStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let _sub = store.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        store.set_current_interaction(Some("I1".into()), None);
        store.set_current_interaction(Some("I1".into()), None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_batch_is_one_transition() {
        let store = LiveInteractionStore::new();
        store.set_current_interaction(Some("I1".into()), None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = store.subscribe(move |state| {
            s.lock().unwrap().push(state.overlays.len());
        });

        store.dispatch_batch(vec![
            overlay("a", json!({"x": 1}), 1),
            overlay("b", json!({"y": 2}), 2),
            StoreAction::ClearOverlay {
                key: "a".into(),
                revision: None,
            },
        ]);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(store.state().overlays.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_conflict_then_server_resolution() {
        let store = LiveInteractionStore::new();
        store.set_current_interaction(Some("I1".into()), None);
        let mut snap = InteractionSnapshot::empty("I1", Utc::now());
        snap.status = InteractionStatus::PendingInitiative;
        store.apply_push("I1", PushUpdate::Snapshot(snap), None);
        store.dispatch(overlay("I1", json!({"status": "INITIATIVE_ROLLED"}), 1));

        store.apply_push("I1", PushUpdate::Status(InteractionStatus::Paused), None);
        let conflict = store.conflict();
        assert!(conflict.has_conflict);
        assert_eq!(conflict.server_state.unwrap()["status"], "PAUSED");
        assert_eq!(
            conflict.client_state.unwrap(),
            json!({"status": "INITIATIVE_ROLLED"})
        );

        store.resolve_conflict(ConflictResolution::Server);
        assert!(!store.conflict().has_conflict);
        let server = store.state().server_view().unwrap();
        assert_eq!(store.view("I1").unwrap(), server);
        assert_eq!(
            store.visible_snapshot().unwrap().status,
            InteractionStatus::Paused
        );
    }

    #[test]
    fn test_unsubscribed_listener_is_silent() {
        let store = LiveInteractionStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let sub = store.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        store.set_online(false);
        sub.unsubscribe();
        store.set_online(true);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
