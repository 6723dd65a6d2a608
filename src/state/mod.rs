//! State management module for arena sessions.
//!
//! - `phase` - Lifecycle state machine (idle, hosting, connecting, connected)
//! - `connection` - The session controller, join deadline and deferred spawns
//! - `spawn` - Spawn point pool with full-cycle fairness
//! - `participant` - Participant id to spawned entity registry
//! - `events` - Lifecycle notifications for presentation layers
//! - `transport` - Seam to the networking substrate
//! - `world` - Scene and entity factory collaborators
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                      ConnectionController<T>                         │
//! │                                                                      │
//! │  Transport (T) ──▶ TransportEvent ──▶ handle_transport_event         │
//! │                                            │                         │
//! │        ┌───────────────────────────────────┼─────────────┐           │
//! │        ▼                                   ▼             │           │
//! │  ┌──────────────┐                  ┌────────────────┐    │           │
//! │  │ PhaseMachine │                  │ deferred queue │    │           │
//! │  │ + Pending    │                  │ Spawn/Despawn  │    │           │
//! │  └──────┬───────┘                  └───────┬────────┘    │           │
//! │         │ connected / failed               │ advance()   │           │
//! │         ▼                                  ▼             │           │
//! │  ┌──────────────┐   ┌────────────────┐  ┌─────────────────────────┐  │
//! │  │SessionEvents │   │ SpawnPointPool │  │  ParticipantRegistry    │  │
//! │  │ subscribers  │   │ (in World)     │  │  id → entity, index     │  │
//! │  └──────────────┘   └────────────────┘  └─────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only the authority (hosting side) touches the pool and the registry.

pub mod connection;
pub mod events;
pub mod participant;
pub mod phase;
pub mod spawn;
pub mod transport;
pub mod world;

// Re-export commonly used types
pub use connection::{
    ConnectionController, DeferredTask, PendingConnection, SessionError, CONNECTION_TIMEOUT,
    DEFAULT_ADDRESS, DEFAULT_PORT, MAX_PARTICIPANTS,
};
pub use events::{FailureReason, SessionEvent, SessionEvents, SubscriptionId};
pub use participant::{DuplicateParticipant, ParticipantEntry, ParticipantId, ParticipantRegistry};
pub use phase::{InvalidTransition, LifecycleEvent, PhaseMachine, SessionPhase, SessionRole};
pub use spawn::{NoSpawnPoints, Position, SpawnAllocation, SpawnPointPool};
pub use transport::{Transport, TransportError, TransportEvent};
pub use world::{
    EntityContainer, EntityFactory, EntityId, EntityStore, SequentialFactory, SpawnError,
    SpawnedEntity, World,
};
