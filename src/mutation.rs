//! The full optimistic write path: overlay, retried mutation, rollback and
//! recovery reporting.

use crate::api::InteractionApi;
use crate::error::Result;
use crate::optimistic::OptimisticUpdates;
use crate::queue::{ActionPriority, NewOfflineAction};
use crate::recovery::coordinator::{ErrorContext, FailureOutcome, RecoveryCoordinator};
use crate::recovery::retry::{retry_with_backoff, RetryConfig};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The server accepted the patch.
    Confirmed,
    /// Stored for replay once connectivity returns.
    Queued { action_id: String },
}

pub struct InteractionMutator {
    updates: Arc<OptimisticUpdates>,
    coordinator: Arc<RecoveryCoordinator>,
    api: Arc<dyn InteractionApi>,
    retry: RetryConfig,
}

impl InteractionMutator {
    pub fn new(
        updates: Arc<OptimisticUpdates>,
        coordinator: Arc<RecoveryCoordinator>,
        api: Arc<dyn InteractionApi>,
    ) -> Self {
        let retry = coordinator.config().retry.clone();
        Self {
            updates,
            coordinator,
            api,
            retry,
        }
    }

    pub fn updates(&self) -> &Arc<OptimisticUpdates> {
        &self.updates
    }

    /// Apply `patch` to `interaction_id` optimistically and deliver it.
    ///
    /// Offline, the patch is queued right away and its overlay left to expire.
    /// Online, the mutation is retried with backoff; on final failure the
    /// overlay is rolled back and the error goes to the coordinator, which
    /// queues the action if connectivity dropped in the meantime. Errors that
    /// were not queued are returned.
    pub async fn update_interaction(
        &self,
        interaction_id: &str,
        patch: Value,
        priority: ActionPriority,
    ) -> Result<MutationOutcome> {
        let revision = self.updates.optimistic_update(interaction_id, patch.clone());

        if !self.coordinator.is_online() {
            let action_id = self.coordinator.queue_action(NewOfflineAction::update_interaction(
                interaction_id,
                patch,
                priority,
            ))?;
            return Ok(MutationOutcome::Queued { action_id });
        }

        let attempt = || {
            let api = Arc::clone(&self.api);
            let id = interaction_id.to_string();
            let patch = patch.clone();
            async move { api.update_interaction(&id, &patch).await }
        };
        let result = retry_with_backoff(attempt, &self.retry).await;

        let stale = !self.updates.store().is_current(interaction_id);
        if stale {
            tracing::debug!(
                "[STORE] {} is no longer current, leaving its overlays alone",
                interaction_id
            );
        }

        let error = match result {
            Ok(()) => return Ok(MutationOutcome::Confirmed),
            Err(e) => e,
        };

        if !stale {
            self.updates.rollback_revision(interaction_id, revision);
        }
        let outcome = self.coordinator.report_failed_mutation(
            &error,
            ErrorContext::new("update_interaction").with_interaction(interaction_id),
            NewOfflineAction::update_interaction(interaction_id, patch, priority),
        )?;
        match outcome {
            FailureOutcome::Queued(action_id) => Ok(MutationOutcome::Queued { action_id }),
            FailureOutcome::Reported(_) => Err(error),
        }
    }
}
