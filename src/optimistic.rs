//! Optimistic overlays applied ahead of server confirmation.
//!
//! This layer performs no network I/O. Callers apply a patch, run the real
//! mutation (normally through [`retry_with_backoff`]), and roll back on
//! failure. Every overlay is cleared after the grace period unless something
//! newer replaced it first.
//!
//! [`retry_with_backoff`]: crate::recovery::retry::retry_with_backoff

use crate::store::{LiveInteractionStore, StoreAction};
use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct OptimisticUpdates {
    store: Arc<LiveInteractionStore>,
    grace: Duration,
    next_revision: AtomicU64,
}

impl OptimisticUpdates {
    pub fn new(store: Arc<LiveInteractionStore>, grace: Duration) -> Self {
        Self {
            store,
            grace,
            next_revision: AtomicU64::new(1),
        }
    }

    pub fn store(&self) -> &Arc<LiveInteractionStore> {
        &self.store
    }

    /// Layer `patch` over `key` now. Returns the overlay's revision.
    ///
    /// The expiry timer needs a tokio runtime; without one the overlay stays
    /// until it is rolled back, completed or confirmed by a push.
    pub fn optimistic_update(&self, key: impl Into<String>, patch: Value) -> u64 {
        let key = key.into();
        let revision = self.next_revision.fetch_add(1, Ordering::Relaxed);
        self.store.dispatch(StoreAction::ApplyOverlay {
            key: key.clone(),
            patch,
            revision,
            applied_at: Utc::now(),
        });
        self.schedule_expiry(key, revision);
        revision
    }

    fn schedule_expiry(&self, key: String, revision: u64) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("[STORE] no runtime, overlay {} will not expire", key);
            return;
        };
        let store = Arc::downgrade(&self.store);
        let grace = self.grace;
        runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(store) = store.upgrade() else {
                return;
            };
            let expired = store.dispatch(StoreAction::ClearOverlay {
                key: key.clone(),
                revision: Some(revision),
            });
            if expired {
                tracing::debug!("[STORE] overlay {} rev {} expired", key, revision);
            }
        });
    }

    /// Restore whatever `key` showed before its latest overlay.
    pub fn rollback_update(&self, key: &str) -> bool {
        self.store.dispatch(StoreAction::RollbackOverlay {
            key: key.to_string(),
            revision: None,
        })
    }

    /// Roll back only if `revision` is still the active overlay for `key`.
    pub fn rollback_revision(&self, key: &str, revision: u64) -> bool {
        self.store.dispatch(StoreAction::RollbackOverlay {
            key: key.to_string(),
            revision: Some(revision),
        })
    }

    /// Drop the overlay once the mutation is known to have landed.
    pub fn complete_update(&self, key: &str, revision: u64) -> bool {
        self.store.dispatch(StoreAction::ClearOverlay {
            key: key.to_string(),
            revision: Some(revision),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PushUpdate;
    use crate::types::{InteractionSnapshot, InteractionStatus};
    use serde_json::json;

    fn store_with_snapshot(status: InteractionStatus) -> Arc<LiveInteractionStore> {
        let store = LiveInteractionStore::new();
        store.set_current_interaction(Some("I1".into()), None);
        let mut snap = InteractionSnapshot::empty("I1", Utc::now());
        snap.status = status;
        store.apply_push("I1", PushUpdate::Snapshot(snap), None);
        store
    }

    #[test]
    fn test_update_then_rollback_restores_server_view() {
        let store = store_with_snapshot(InteractionStatus::PendingInitiative);
        let before = store.view("I1");
        let updates = OptimisticUpdates::new(store.clone(), Duration::from_secs(5));

        updates.optimistic_update("I1", json!({"status": "INITIATIVE_ROLLED", "name": "Ambush"}));
        assert_eq!(
            store.visible_snapshot().unwrap().status,
            InteractionStatus::InitiativeRolled
        );

        assert!(updates.rollback_update("I1"));
        assert_eq!(store.view("I1"), before);
        assert!(!updates.rollback_update("I1"));
    }

    #[test]
    fn test_rollback_restores_previous_overlay() {
        let store = store_with_snapshot(InteractionStatus::InProgress);
        let updates = OptimisticUpdates::new(store.clone(), Duration::from_secs(5));

        let first = updates.optimistic_update("I1", json!({"status": "PAUSED"}));
        let second = updates.optimistic_update("I1", json!({"status": "COMPLETED"}));
        assert!(second > first);
        assert!(!updates.rollback_revision("I1", first));

        updates.rollback_update("I1");
        assert_eq!(
            store.visible_snapshot().unwrap().status,
            InteractionStatus::Paused
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlay_expires_after_grace() {
        let store = store_with_snapshot(InteractionStatus::PendingInitiative);
        let updates = OptimisticUpdates::new(store.clone(), Duration::from_secs(5));
        updates.optimistic_update("I1", json!({"status": "INITIATIVE_ROLLED"}));

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(store.state().overlay("I1").is_some());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.state().overlay("I1").is_none());
        assert_eq!(
            store.visible_snapshot().unwrap().status,
            InteractionStatus::PendingInitiative
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_older_timer_leaves_newer_overlay() {
        let store = store_with_snapshot(InteractionStatus::InProgress);
        let updates = OptimisticUpdates::new(store.clone(), Duration::from_secs(5));
        updates.optimistic_update("I1", json!({"status": "PAUSED"}));

        tokio::time::sleep(Duration::from_secs(3)).await;
        let newer = updates.optimistic_update("I1", json!({"status": "COMPLETED"}));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(store.state().overlay("I1").unwrap().revision, newer);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(store.state().overlay("I1").is_none());
    }

    #[test]
    fn test_complete_update_is_revision_conditional() {
        let store = store_with_snapshot(InteractionStatus::InProgress);
        let updates = OptimisticUpdates::new(store.clone(), Duration::from_secs(5));
        let first = updates.optimistic_update("I1", json!({"status": "PAUSED"}));
        let second = updates.optimistic_update("I1", json!({"status": "COMPLETED"}));

        assert!(!updates.complete_update("I1", first));
        assert!(updates.complete_update("I1", second));
        assert!(store.state().overlay("I1").is_none());
    }
}
