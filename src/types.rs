use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Interaction identifier, also the overlay key of the interaction itself.
pub type InteractionId = String;
pub type CampaignId = String;
/// Character, NPC or monster identifier.
pub type EntityId = String;

/// Lifecycle of a live interaction (an encounter or combat session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InteractionStatus {
    #[default]
    Preparation,
    PendingInitiative,
    InitiativeRolled,
    InProgress,
    Paused,
    Completed,
    Cancelled,
}

impl InteractionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InteractionStatus::Completed | InteractionStatus::Cancelled
        )
    }
}

/// Sync state shared by the recovery coordinator and the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Synced,
    Syncing,
    Error,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Synced => write!(f, "synced"),
            SyncStatus::Syncing => write!(f, "syncing"),
            SyncStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    PlayerCharacter,
    Npc,
    Monster,
}

/// Participant id sets of an interaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participants {
    pub player_character_ids: Vec<EntityId>,
    pub npc_ids: Vec<EntityId>,
    pub monster_ids: Vec<EntityId>,
}

impl Participants {
    pub fn len(&self) -> usize {
        self.player_character_ids.len() + self.npc_ids.len() + self.monster_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.player_character_ids
            .iter()
            .chain(&self.npc_ids)
            .chain(&self.monster_ids)
            .any(|id| id == entity_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiativeEntry {
    pub entity_id: EntityId,
    pub entity_type: EntityType,
    pub initiative: i32,
    #[serde(default)]
    pub dexterity_modifier: i32,
}

/// Sort an initiative order: highest roll first, dexterity breaks ties, then
/// entity id so the order is total.
pub fn sort_initiative(entries: &mut [InitiativeEntry]) {
    entries.sort_by(|a, b| {
        b.initiative
            .cmp(&a.initiative)
            .then(b.dexterity_modifier.cmp(&a.dexterity_modifier))
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
}

/// An action a participant submitted that the DM has not resolved yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    pub id: String,
    pub entity_id: EntityId,
    pub action_type: String,
    #[serde(default)]
    pub description: String,
    pub submitted_at: DateTime<Utc>,
}

/// The server's view of one live interaction. Replaced wholesale on push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionSnapshot {
    pub id: InteractionId,
    #[serde(default)]
    pub campaign_id: Option<CampaignId>,
    #[serde(default)]
    pub name: String,
    pub status: InteractionStatus,
    #[serde(default)]
    pub participants: Participants,
    #[serde(default)]
    pub initiative_order: Vec<InitiativeEntry>,
    #[serde(default)]
    pub current_turn: usize,
    #[serde(default)]
    pub pending_actions: Vec<PendingAction>,
    pub last_modified: DateTime<Utc>,
    /// Monotonic server version, when the backend provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl InteractionSnapshot {
    /// Placeholder used when a slice push arrives before the full snapshot.
    pub fn empty(id: impl Into<InteractionId>, at: DateTime<Utc>) -> Self {
        InteractionSnapshot {
            id: id.into(),
            campaign_id: None,
            name: String::new(),
            status: InteractionStatus::default(),
            participants: Participants::default(),
            initiative_order: Vec::new(),
            current_turn: 0,
            pending_actions: Vec::new(),
            last_modified: at,
            version: None,
        }
    }

    pub fn current_turn_entity(&self) -> Option<&InitiativeEntry> {
        if self.status != InteractionStatus::InProgress {
            return None;
        }
        self.initiative_order.get(self.current_turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, initiative: i32, dex: i32) -> InitiativeEntry {
        InitiativeEntry {
            entity_id: id.to_string(),
            entity_type: EntityType::Monster,
            initiative,
            dexterity_modifier: dex,
        }
    }

    #[test]
    fn test_sort_initiative() {
        let mut order = vec![
            entry("goblin", 12, 2),
            entry("aria", 18, 3),
            entry("borin", 12, 4),
            entry("alpha", 12, 2),
        ];
        sort_initiative(&mut order);
        let ids: Vec<&str> = order.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["aria", "borin", "alpha", "goblin"]);
    }

    #[test]
    fn test_participants_contains() {
        let p = Participants {
            player_character_ids: vec!["pc1".into()],
            npc_ids: vec![],
            monster_ids: vec!["m1".into(), "m2".into()],
        };
        assert_eq!(p.len(), 3);
        assert!(p.contains("m2"));
        assert!(!p.contains("npc9"));
    }

    #[test]
    fn test_snapshot_wire_format() {
        let snap = InteractionSnapshot::empty("I1", Utc::now());
        let v = serde_json::to_value(&snap).unwrap();
        assert_eq!(v["status"], "PREPARATION");
        assert!(v.get("initiativeOrder").is_some());
        assert!(v.get("version").is_none());

        let back: InteractionSnapshot = serde_json::from_value(v).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn test_current_turn_entity_only_in_progress() {
        let mut snap = InteractionSnapshot::empty("I1", Utc::now());
        snap.initiative_order = vec![entry("a", 10, 0), entry("b", 5, 0)];
        snap.current_turn = 1;
        assert!(snap.current_turn_entity().is_none());
        snap.status = InteractionStatus::InProgress;
        assert_eq!(snap.current_turn_entity().unwrap().entity_id, "b");
        assert!(InteractionStatus::Cancelled.is_terminal());
    }
}
