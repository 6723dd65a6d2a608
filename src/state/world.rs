//! World collaborators used by the authority when spawning participants.
//!
//! The scene provider hands over the spawn positions and a container for
//! participant entities; the entity factory builds one entity per participant.
//! Neither is constructed by this crate. `EntityStore` and `SequentialFactory`
//! are in-memory implementations for headless servers and tests.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::Serialize;

use super::participant::ParticipantId;
use super::spawn::{Position, SpawnPointPool};

/// Opaque handle of a world entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityId(pub u64);

/// An entity produced for a participant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpawnedEntity {
    pub id: EntityId,

    /// Node name, the participant id rendered as a string
    pub name: String,

    pub position: Position,

    /// Only this participant may drive the entity
    pub authority: ParticipantId,
}

/// Failures of the spawn pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpawnError {
    #[error("no world attached (spawn points or entity container missing)")]
    NoWorld,

    #[error("no entity factory attached")]
    NoFactory,

    #[error("participant {0} already spawned")]
    DuplicateParticipant(ParticipantId),

    #[error("entity factory failed: {0}")]
    Factory(String),

    #[error("entity container rejected entity: {0}")]
    Container(String),
}

/// Produces a world entity for a participant.
pub trait EntityFactory {
    fn create(
        &mut self,
        participant: ParticipantId,
        position: Position,
    ) -> Result<SpawnedEntity, SpawnError>;
}

/// Receives spawned entities and destroys them on departure.
pub trait EntityContainer {
    fn attach(&mut self, entity: SpawnedEntity) -> Result<(), SpawnError>;

    /// Remove an entity. Returns `None` if it was not attached.
    fn detach(&mut self, id: EntityId) -> Option<SpawnedEntity>;
}

/// Shared containers, for scenes that are also read by the presentation layer.
impl<C: EntityContainer> EntityContainer for Rc<RefCell<C>> {
    fn attach(&mut self, entity: SpawnedEntity) -> Result<(), SpawnError> {
        self.borrow_mut().attach(entity)
    }

    fn detach(&mut self, id: EntityId) -> Option<SpawnedEntity> {
        self.borrow_mut().detach(id)
    }
}

/// Game-world context supplied at setup time.
pub struct World {
    pub spawn_points: SpawnPointPool,
    pub container: Box<dyn EntityContainer>,
}

impl World {
    pub fn new(spawn_points: SpawnPointPool, container: Box<dyn EntityContainer>) -> Self {
        Self {
            spawn_points,
            container,
        }
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("spawn_points", &self.spawn_points.len())
            .finish_non_exhaustive()
    }
}

/// In-memory entity container.
#[derive(Debug, Default)]
pub struct EntityStore {
    entities: BTreeMap<EntityId, SpawnedEntity>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: EntityId) -> Option<&SpawnedEntity> {
        self.entities.get(&id)
    }

    /// Find the entity driven by a participant.
    pub fn find_by_authority(&self, participant: ParticipantId) -> Option<&SpawnedEntity> {
        self.entities.values().find(|e| e.authority == participant)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl EntityContainer for EntityStore {
    fn attach(&mut self, entity: SpawnedEntity) -> Result<(), SpawnError> {
        if self.entities.contains_key(&entity.id) {
            return Err(SpawnError::Container(format!(
                "entity {} already attached",
                entity.id.0
            )));
        }
        self.entities.insert(entity.id, entity);
        Ok(())
    }

    fn detach(&mut self, id: EntityId) -> Option<SpawnedEntity> {
        self.entities.remove(&id)
    }
}

/// Factory handing out sequential entity ids.
#[derive(Debug, Default)]
pub struct SequentialFactory {
    next_id: u64,
}

impl SequentialFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntityFactory for SequentialFactory {
    fn create(
        &mut self,
        participant: ParticipantId,
        position: Position,
    ) -> Result<SpawnedEntity, SpawnError> {
        self.next_id += 1;
        Ok(SpawnedEntity {
            id: EntityId(self.next_id),
            name: participant.to_string(),
            position,
            authority: participant,
        })
    }
}
