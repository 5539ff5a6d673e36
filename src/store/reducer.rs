//! The store's only state transition function.
//!
//! `reduce` is pure: every timestamp it records travels inside the action,
//! so folding the same actions over the same state always yields the same
//! result.

use super::merge;
use super::state::{ConflictResolution, ConflictState, LiveInteractionState, OptimisticOverlay};
use crate::types::{
    CampaignId, InitiativeEntry, InteractionId, InteractionSnapshot, InteractionStatus,
    Participants, PendingAction, SyncStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Initiative order plus whose turn it is; pushed together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiativeOrder {
    pub entries: Vec<InitiativeEntry>,
    #[serde(default)]
    pub current_turn: usize,
}

/// Full-object replacement delivered by one of the server feeds.
#[derive(Debug, Clone, PartialEq)]
pub enum PushUpdate {
    Snapshot(InteractionSnapshot),
    Status(InteractionStatus),
    Participants(Participants),
    Initiative(InitiativeOrder),
    PendingActions(Vec<PendingAction>),
}

impl PushUpdate {
    /// Snapshot fields (wire names) this update replaces; `None` means all.
    fn touched_fields(&self) -> Option<&'static [&'static str]> {
        const STATUS: &[&str] = &["status"];
        const PARTICIPANTS: &[&str] = &["participants"];
        const INITIATIVE: &[&str] = &["initiativeOrder", "currentTurn"];
        const PENDING: &[&str] = &["pendingActions"];
        match self {
            PushUpdate::Snapshot(_) => None,
            PushUpdate::Status(_) => Some(STATUS),
            PushUpdate::Participants(_) => Some(PARTICIPANTS),
            PushUpdate::Initiative(_) => Some(INITIATIVE),
            PushUpdate::PendingActions(_) => Some(PENDING),
        }
    }

    pub fn feed_name(&self) -> &'static str {
        match self {
            PushUpdate::Snapshot(_) => "snapshot",
            PushUpdate::Status(_) => "status",
            PushUpdate::Participants(_) => "participants",
            PushUpdate::Initiative(_) => "initiative",
            PushUpdate::PendingActions(_) => "pending_actions",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreAction {
    SetCurrentInteraction {
        interaction_id: Option<InteractionId>,
        campaign_id: Option<CampaignId>,
    },
    Push {
        interaction_id: InteractionId,
        update: PushUpdate,
        version: Option<u64>,
        received_at: DateTime<Utc>,
    },
    ApplyOverlay {
        key: String,
        patch: Value,
        revision: u64,
        applied_at: DateTime<Utc>,
    },
    /// Restore the replaced overlay, or clear the key. With a revision, only
    /// acts if the active overlay still carries it.
    RollbackOverlay {
        key: String,
        revision: Option<u64>,
    },
    /// Drop the overlay. With a revision, only if it still carries it.
    ClearOverlay {
        key: String,
        revision: Option<u64>,
    },
    ResolveConflict(ConflictResolution),
    SetOnline {
        online: bool,
        at: DateTime<Utc>,
    },
    SetSyncStatus {
        status: SyncStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    },
}

pub fn reduce(mut state: LiveInteractionState, action: StoreAction) -> LiveInteractionState {
    match action {
        StoreAction::SetCurrentInteraction {
            interaction_id,
            campaign_id,
        } => {
            if state.current_interaction_id != interaction_id {
                if let Some(previous) = state.current_interaction_id.take() {
                    state.overlays.shift_remove(&previous);
                }
                state.snapshot = None;
                state.conflict = ConflictState::default();
                state.last_error = None;
                state.current_interaction_id = interaction_id;
            }
            state.current_campaign_id = campaign_id;
        }

        StoreAction::Push {
            interaction_id,
            update,
            version,
            received_at,
        } => {
            if state.current_interaction_id.as_deref() != Some(interaction_id.as_str()) {
                return state;
            }
            apply_push(&mut state, interaction_id, update, version, received_at);
        }

        StoreAction::ApplyOverlay {
            key,
            patch,
            revision,
            applied_at,
        } => {
            let replaced = state.overlays.get(&key).map(|previous| {
                Box::new(OptimisticOverlay {
                    replaced: None,
                    ..previous.clone()
                })
            });
            state.overlays.insert(
                key.clone(),
                OptimisticOverlay {
                    key: key.clone(),
                    patch,
                    applied_at,
                    revision,
                    replaced,
                },
            );
            state.metrics.optimistic_updates += 1;
            recheck_conflict(&mut state, &key);
        }

        StoreAction::RollbackOverlay { key, revision } => {
            let matches = match (state.overlays.get(&key), revision) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(o), Some(r)) => o.revision == r,
            };
            if matches {
                let restored = state
                    .overlays
                    .get_mut(&key)
                    .and_then(|o| o.replaced.take());
                match restored {
                    Some(previous) => {
                        state.overlays.insert(key.clone(), *previous);
                    }
                    None => {
                        state.overlays.shift_remove(&key);
                    }
                }
                state.metrics.rollbacks += 1;
                recheck_conflict(&mut state, &key);
            }
        }

        StoreAction::ClearOverlay { key, revision } => {
            let matches = match (state.overlays.get(&key), revision) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(o), Some(r)) => o.revision == r,
            };
            if matches {
                state.overlays.shift_remove(&key);
                recheck_conflict(&mut state, &key);
            }
        }

        StoreAction::ResolveConflict(resolution) => {
            if !state.conflict.has_conflict {
                return state;
            }
            if let Some(key) = state.conflict.key.clone() {
                match resolution {
                    ConflictResolution::Server => {
                        state.overlays.shift_remove(&key);
                    }
                    ConflictResolution::Client => {}
                    ConflictResolution::Merge(patch) => {
                        if let Some(overlay) = state.overlays.get_mut(&key) {
                            overlay.patch = patch;
                        }
                    }
                }
            }
            state.conflict = ConflictState::default();
        }

        StoreAction::SetOnline { online, at } => {
            if state.is_online != online {
                state.is_online = online;
                state.last_update = Some(at);
            }
        }

        StoreAction::SetSyncStatus { status, error, at } => {
            if state.sync_status != status || state.last_error != error {
                state.sync_status = status;
                state.last_error = error;
                state.last_update = Some(at);
            }
        }
    }
    state
}

fn apply_push(
    state: &mut LiveInteractionState,
    interaction_id: InteractionId,
    update: PushUpdate,
    version: Option<u64>,
    received_at: DateTime<Utc>,
) {
    let current_version = state.snapshot.as_ref().and_then(|s| s.version);
    if let (Some(incoming), Some(current)) = (version, current_version) {
        if incoming < current {
            return;
        }
    }

    let touched = update.touched_fields();
    let mut next = state
        .snapshot
        .clone()
        .unwrap_or_else(|| InteractionSnapshot::empty(interaction_id.clone(), received_at));

    match update {
        PushUpdate::Snapshot(snapshot) => {
            state.metrics.last_push_latency_ms =
                Some((received_at - snapshot.last_modified).num_milliseconds());
            next = snapshot;
        }
        PushUpdate::Status(status) => next.status = status,
        PushUpdate::Participants(participants) => next.participants = participants,
        PushUpdate::Initiative(order) => {
            next.initiative_order = order.entries;
            next.current_turn = order.current_turn;
        }
        PushUpdate::PendingActions(actions) => next.pending_actions = actions,
    }
    if version.is_some() && version > next.version {
        next.version = version;
    }

    if state.snapshot.as_ref() != Some(&next) {
        state.metrics.server_updates_applied += 1;
    }
    state.last_update = Some(received_at);

    let server = serde_json::to_value(&next).unwrap_or(Value::Null);
    state.snapshot = Some(next);

    let Some(patch) = state.overlays.get(&interaction_id).map(|o| o.patch.clone()) else {
        return;
    };
    let relevant = match touched {
        Some(fields) => merge::restrict(&patch, fields),
        None => patch.clone(),
    };
    let conflicted_here = state.conflict.key.as_deref() == Some(interaction_id.as_str());

    if !merge::is_empty_patch(&relevant) && merge::disagrees(&server, &relevant) {
        let conflict = ConflictState {
            has_conflict: true,
            key: Some(interaction_id),
            server_state: Some(server),
            client_state: Some(patch),
            detected_at: Some(received_at),
        };
        let is_new = state.conflict.server_state != conflict.server_state
            || state.conflict.client_state != conflict.client_state
            || !state.conflict.has_conflict;
        if is_new {
            state.metrics.conflicts_detected += 1;
            state.conflict = conflict;
        }
    } else if !merge::disagrees(&server, &patch) {
        // the server now says what the overlay said
        state.overlays.shift_remove(&interaction_id);
        if conflicted_here {
            state.conflict = ConflictState::default();
        }
    } else if conflicted_here {
        // still disagreeing on fields this push left alone
        state.conflict.server_state = Some(server);
    }
}

/// Re-evaluate a conflict on `key` after its overlay changed. The conflict
/// survives only while an overlay for the key still disagrees with the
/// snapshot.
fn recheck_conflict(state: &mut LiveInteractionState, key: &str) {
    if state.conflict.key.as_deref() != Some(key) {
        return;
    }
    let server = state
        .snapshot
        .as_ref()
        .and_then(|s| serde_json::to_value(s).ok());
    match (state.overlays.get(key), server) {
        (Some(overlay), Some(server)) if merge::disagrees(&server, &overlay.patch) => {
            state.conflict.client_state = Some(overlay.patch.clone());
        }
        _ => state.conflict = ConflictState::default(),
    }
}
