use crate::error::{Result, SyncError};
use crate::queue::{OfflineAction, UPDATE_INTERACTION};
use async_trait::async_trait;
use serde_json::Value;

/// The server mutation endpoint every optimistic write funnels through.
///
/// `update_interaction` must be idempotent: the same patch may be delivered
/// more than once by the retry executor and by offline replay.
#[async_trait]
pub trait InteractionApi: Send + Sync {
    async fn update_interaction(&self, interaction_id: &str, patch: &Value) -> Result<()>;

    /// Deliver a queued offline action.
    async fn replay(&self, action: &OfflineAction) -> Result<()> {
        match action.kind.as_str() {
            UPDATE_INTERACTION => {
                self.update_interaction(&action.interaction_id, &action.data)
                    .await
            }
            other => Err(SyncError::Validation(format!(
                "unsupported offline action type: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ActionPriority;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl InteractionApi for Recording {
        async fn update_interaction(&self, interaction_id: &str, patch: &Value) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((interaction_id.to_string(), patch.clone()));
            Ok(())
        }
    }

    fn queued(kind: &str) -> OfflineAction {
        OfflineAction {
            id: "a1".into(),
            kind: kind.into(),
            interaction_id: "I1".into(),
            data: json!({"status": "PAUSED"}),
            timestamp: Utc::now(),
            retry_count: 0,
            priority: ActionPriority::High,
        }
    }

    #[tokio::test]
    async fn test_replay_routes_update_interaction() {
        let api = Recording::default();
        api.replay(&queued(UPDATE_INTERACTION)).await.unwrap();
        let calls = api.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[("I1".to_string(), json!({"status": "PAUSED"}))]);
    }

    #[tokio::test]
    async fn test_replay_rejects_unknown_type() {
        let api = Recording::default();
        let err = api.replay(&queued("delete_everything")).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(api.calls.lock().unwrap().is_empty());
    }
}
