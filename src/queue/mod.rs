//! Durable, priority-ordered backlog of mutations that could not be delivered.
//!
//! The whole queue is serialized under a single storage key. Every mutating
//! call writes the full queue before returning; if the write fails the
//! in-memory change is reverted so callers never observe state that is not
//! on disk.

pub mod storage;

use crate::config::OFFLINE_QUEUE_KEY;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use storage::KeyValueStore;

/// Action type replayed through the "update interaction" mutation.
pub const UPDATE_INTERACTION: &str = "update_interaction";

/// Drain tier. Declaration order is drain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl ActionPriority {
    pub const ALL: [ActionPriority; 4] = [
        ActionPriority::Critical,
        ActionPriority::High,
        ActionPriority::Medium,
        ActionPriority::Low,
    ];
}

impl std::fmt::Display for ActionPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionPriority::Critical => write!(f, "critical"),
            ActionPriority::High => write!(f, "high"),
            ActionPriority::Medium => write!(f, "medium"),
            ActionPriority::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for ActionPriority {
    type Err = crate::error::SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(ActionPriority::Critical),
            "high" => Ok(ActionPriority::High),
            "medium" => Ok(ActionPriority::Medium),
            "low" => Ok(ActionPriority::Low),
            other => Err(crate::error::SyncError::Validation(format!(
                "invalid priority: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineAction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub interaction_id: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub priority: ActionPriority,
}

/// An action as submitted by a caller, before the queue stamps it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOfflineAction {
    pub kind: String,
    pub interaction_id: String,
    pub data: serde_json::Value,
    pub priority: ActionPriority,
}

impl NewOfflineAction {
    /// An "update interaction" mutation replayed through the same endpoint
    /// optimistic writes use.
    pub fn update_interaction(
        interaction_id: impl Into<String>,
        patch: serde_json::Value,
        priority: ActionPriority,
    ) -> Self {
        NewOfflineAction {
            kind: UPDATE_INTERACTION.to_string(),
            interaction_id: interaction_id.into(),
            data: patch,
            priority,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    /// Actions that have failed at least one replay.
    pub retrying: usize,
    pub oldest: Option<DateTime<Utc>>,
}

pub struct OfflineActionQueue {
    storage: Arc<dyn KeyValueStore>,
    key: String,
    actions: Mutex<Vec<OfflineAction>>,
}

impl OfflineActionQueue {
    /// Load the queue persisted under the default key.
    pub fn load(storage: Arc<dyn KeyValueStore>) -> Result<Self> {
        Self::load_with_key(storage, OFFLINE_QUEUE_KEY)
    }

    /// Load the queue persisted under `key`.
    ///
    /// Unreadable storage is an error. A stored value that does not parse is
    /// moved aside to `{key}.corrupt` and the queue starts empty.
    pub fn load_with_key(storage: Arc<dyn KeyValueStore>, key: &str) -> Result<Self> {
        let actions = match storage.get(key)? {
            None => Vec::new(),
            Some(raw) => match serde_json::from_str::<Vec<OfflineAction>>(&raw) {
                Ok(actions) => {
                    tracing::info!("[QUEUE] restored {} offline actions", actions.len());
                    actions
                }
                Err(e) => {
                    tracing::error!(
                        "[QUEUE] stored queue is unreadable ({}), starting empty",
                        e
                    );
                    storage.set(&format!("{}.corrupt", key), &raw)?;
                    storage.remove(key)?;
                    Vec::new()
                }
            },
        };

        Ok(OfflineActionQueue {
            storage,
            key: key.to_string(),
            actions: Mutex::new(actions),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<OfflineAction>> {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` and persist the result; revert if persisting fails.
    fn mutate<R>(&self, f: impl FnOnce(&mut Vec<OfflineAction>) -> R) -> Result<R> {
        let mut actions = self.lock();
        let before = actions.clone();
        let out = f(&mut actions);
        if *actions == before {
            return Ok(out);
        }
        let persisted: Result<()> = serde_json::to_string(&*actions)
            .map_err(Into::into)
            .and_then(|json| self.storage.set(&self.key, &json));
        if let Err(e) = persisted {
            tracing::error!("[QUEUE] persist failed, reverting: {}", e);
            *actions = before;
            return Err(e);
        }
        Ok(out)
    }

    /// Stamp and enqueue an action. Returns the generated id.
    pub fn add_action(&self, action: NewOfflineAction) -> Result<String> {
        let stamped = OfflineAction {
            id: uuid::Uuid::new_v4().to_string(),
            kind: action.kind,
            interaction_id: action.interaction_id,
            data: action.data,
            timestamp: Utc::now(),
            retry_count: 0,
            priority: action.priority,
        };
        let id = stamped.id.clone();
        let priority = stamped.priority;
        self.mutate(|actions| actions.push(stamped))?;
        tracing::info!("[QUEUE] queued action {} ({})", id, priority);
        Ok(id)
    }

    pub fn remove_action(&self, id: &str) -> Result<bool> {
        self.mutate(|actions| {
            let before = actions.len();
            actions.retain(|a| a.id != id);
            actions.len() != before
        })
    }

    /// Bump an action's retry count after a failed replay. Returns the new
    /// count, or `None` if the action is no longer queued.
    pub fn record_failure(&self, id: &str) -> Result<Option<u32>> {
        self.mutate(|actions| {
            actions.iter_mut().find(|a| a.id == id).map(|a| {
                a.retry_count += 1;
                a.retry_count
            })
        })
    }

    /// Snapshot of all actions in insertion order.
    pub fn actions(&self) -> Vec<OfflineAction> {
        self.lock().clone()
    }

    /// Snapshot in drain order: priority tier first, FIFO within a tier.
    pub fn drain_order(&self) -> Vec<OfflineAction> {
        let mut actions = self.actions();
        // stable sort keeps insertion order inside a tier
        actions.sort_by_key(|a| a.priority);
        actions
    }

    pub fn actions_by_priority(&self, priority: ActionPriority) -> Vec<OfflineAction> {
        self.lock()
            .iter()
            .filter(|a| a.priority == priority)
            .cloned()
            .collect()
    }

    pub fn clear(&self) -> Result<()> {
        self.mutate(|actions| actions.clear())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        let actions = self.lock();
        let count = |p: ActionPriority| actions.iter().filter(|a| a.priority == p).count();
        QueueStats {
            total: actions.len(),
            critical: count(ActionPriority::Critical),
            high: count(ActionPriority::High),
            medium: count(ActionPriority::Medium),
            low: count(ActionPriority::Low),
            retrying: actions.iter().filter(|a| a.retry_count > 0).count(),
            oldest: actions.iter().map(|a| a.timestamp).min(),
        }
    }
}
