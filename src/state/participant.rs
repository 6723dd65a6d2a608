//! Participant registry.
//!
//! Maps transport-assigned participant ids to the entity the authority spawned
//! for them, so the entity can be destroyed when the participant leaves.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::world::EntityId;

/// Participant id assigned by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub i64);

impl ParticipantId {
    /// Reserved id of the authority itself.
    pub const AUTHORITY: ParticipantId = ParticipantId(1);

    pub fn is_authority(&self) -> bool {
        *self == Self::AUTHORITY
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ParticipantId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A spawned participant.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantEntry {
    pub id: ParticipantId,

    /// Entity spawned for this participant (owned by the authority)
    pub entity: EntityId,

    /// Spawn point consumed, `None` when the fallback position was used
    pub spawn_index: Option<usize>,

    /// When the participant was registered
    pub joined_at: chrono::DateTime<chrono::Utc>,
}

impl ParticipantEntry {
    pub fn new(id: ParticipantId, entity: EntityId, spawn_index: Option<usize>) -> Self {
        Self {
            id,
            entity,
            spawn_index,
            joined_at: chrono::Utc::now(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "participant_id": self.id.0,
            "entity_id": self.entity.0,
            "spawn_index": self.spawn_index,
            "joined_at": self.joined_at.to_rfc3339(),
        })
    }
}

/// Registration rejected because the id is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("participant {0} is already registered")]
pub struct DuplicateParticipant(pub ParticipantId);

/// Participant registry - exact-id lookup of spawned participants.
#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    entries: HashMap<ParticipantId, ParticipantEntry>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a participant. An existing entry is never overwritten.
    pub fn register(
        &mut self,
        id: ParticipantId,
        entity: EntityId,
        spawn_index: Option<usize>,
    ) -> Result<(), DuplicateParticipant> {
        if self.entries.contains_key(&id) {
            tracing::warn!(participant = %id, "duplicate participant registration skipped");
            return Err(DuplicateParticipant(id));
        }

        self.entries
            .insert(id, ParticipantEntry::new(id, entity, spawn_index));
        Ok(())
    }

    /// Remove a participant, returning its entity if it was registered.
    pub fn unregister(&mut self, id: ParticipantId) -> Option<EntityId> {
        self.entries.remove(&id).map(|entry| entry.entity)
    }

    pub fn get(&self, id: ParticipantId) -> Option<&ParticipantEntry> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Remove every entry, returning them for cleanup.
    pub fn drain(&mut self) -> Vec<ParticipantEntry> {
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let participants: Vec<serde_json::Value> = self
            .ids()
            .into_iter()
            .filter_map(|id| self.entries.get(&id))
            .map(ParticipantEntry::to_json)
            .collect();
        serde_json::json!({ "participants": participants })
    }
}
