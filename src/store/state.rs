use super::merge;
use crate::types::{CampaignId, InteractionId, InteractionSnapshot, SyncStatus};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

/// A pending local patch layered over the server snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimisticOverlay {
    pub key: String,
    pub patch: Value,
    pub applied_at: DateTime<Utc>,
    /// Issued by the façade; expiry and conditional clears match on it.
    pub revision: u64,
    /// The overlay this one replaced, restored on rollback.
    #[serde(skip)]
    pub replaced: Option<Box<OptimisticOverlay>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictState {
    pub has_conflict: bool,
    pub key: Option<String>,
    pub server_state: Option<Value>,
    pub client_state: Option<Value>,
    pub detected_at: Option<DateTime<Utc>>,
}

/// How the caller settled a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictResolution {
    /// Drop the local overlay, the server state stands.
    Server,
    /// Keep the local overlay; the caller re-sends its mutation.
    Client,
    /// Replace the overlay with a caller-merged patch.
    Merge(Value),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMetrics {
    pub server_updates_applied: u64,
    pub optimistic_updates: u64,
    pub rollbacks: u64,
    pub conflicts_detected: u64,
    /// Arrival time minus the server's `last_modified` on the latest full snapshot.
    pub last_push_latency_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveInteractionState {
    pub current_interaction_id: Option<InteractionId>,
    pub current_campaign_id: Option<CampaignId>,
    pub snapshot: Option<InteractionSnapshot>,
    pub overlays: IndexMap<String, OptimisticOverlay>,
    pub is_online: bool,
    pub sync_status: SyncStatus,
    pub last_update: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub conflict: ConflictState,
    pub metrics: StoreMetrics,
}

impl Default for LiveInteractionState {
    fn default() -> Self {
        LiveInteractionState {
            current_interaction_id: None,
            current_campaign_id: None,
            snapshot: None,
            overlays: IndexMap::new(),
            is_online: true,
            sync_status: SyncStatus::Synced,
            last_update: None,
            last_error: None,
            conflict: ConflictState::default(),
            metrics: StoreMetrics::default(),
        }
    }
}

impl LiveInteractionState {
    pub fn has_error(&self) -> bool {
        self.sync_status == SyncStatus::Error || self.last_error.is_some()
    }

    pub fn overlay(&self, key: &str) -> Option<&OptimisticOverlay> {
        self.overlays.get(key)
    }

    /// The server snapshot as JSON, without overlays.
    pub fn server_view(&self) -> Option<Value> {
        self.snapshot
            .as_ref()
            .and_then(|s| serde_json::to_value(s).ok())
    }

    /// What the UI renders for `key`.
    ///
    /// For the current interaction this is the snapshot with its overlay
    /// applied; for any other key it is the overlay patch on its own.
    pub fn view(&self, key: &str) -> Option<Value> {
        match &self.snapshot {
            Some(snapshot) if snapshot.id == key => {
                let server = serde_json::to_value(snapshot).ok()?;
                Some(match self.overlays.get(key) {
                    Some(overlay) => merge::merged(&server, &overlay.patch),
                    None => server,
                })
            }
            _ => self.overlays.get(key).map(|o| o.patch.clone()),
        }
    }

    /// The current interaction as rendered. An overlay that no longer fits
    /// the snapshot shape is ignored rather than rendered half-applied.
    pub fn visible_snapshot(&self) -> Option<InteractionSnapshot> {
        let snapshot = self.snapshot.as_ref()?;
        if !self.overlays.contains_key(&snapshot.id) {
            return Some(snapshot.clone());
        }
        let merged = self.view(&snapshot.id)?;
        Some(serde_json::from_value(merged).unwrap_or_else(|_| snapshot.clone()))
    }
}
