//! Arena Session Library
//!
//! This crate coordinates session establishment for client/server arena games
//! and hands out spawn points to participants as they join.
//!
//! # Overview
//!
//! - **Lifecycle State Machine** - Host, join, connect, timeout, failure and
//!   disconnect with validated transitions and a client-side join deadline.
//!
//! - **Spawn Allocation** - Uniform, non-repeating selection among the level's
//!   spawn points, restarting once every point has been used.
//!
//! - **Participant Registry** - Which entity belongs to which participant, so it
//!   can be destroyed when the participant leaves.
//!
//! - **Session Events** - `ConnectedToAuthority` and `ConnectionFailed` for UI
//!   layers.
//!
//! # Design Principles
//!
//! 1. **No networking** - The transport is a trait supplied by the embedder; its
//!    notifications are fed back as `TransportEvent`s.
//!
//! 2. **Single-threaded** - Events and ticks arrive on one execution context.
//!    World mutations caused by network events are queued and run on the next
//!    `advance`.
//!
//! 3. **Nothing is fatal** - Commands return `Result`s; event-driven failures
//!    are logged and surfaced as events.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use arena_session::{
//!     ConnectionController, EntityStore, ParticipantId, Position, SequentialFactory,
//!     SessionPhase, Transport, TransportError, TransportEvent,
//! };
//!
//! #[derive(Default)]
//! struct Loopback {
//!     open: bool,
//! }
//!
//! impl Transport for Loopback {
//!     fn listen(&mut self, _port: u16, _max_peers: usize) -> Result<(), TransportError> {
//!         self.open = true;
//!         Ok(())
//!     }
//!     fn dial(&mut self, _address: &str, _port: u16) -> Result<(), TransportError> {
//!         self.open = true;
//!         Ok(())
//!     }
//!     fn close(&mut self) {
//!         self.open = false;
//!     }
//!     fn is_open(&self) -> bool {
//!         self.open
//!     }
//! }
//!
//! let mut host = ConnectionController::new(Loopback::default());
//! host.set_entity_factory(Box::new(SequentialFactory::new()));
//! host.setup_world(
//!     vec![Position::new(0.0, 0.0, 0.0), Position::new(5.0, 0.0, 0.0)],
//!     Box::new(EntityStore::new()),
//! );
//! host.create_host(7777).unwrap();
//!
//! // A peer connects; the spawn runs on the next tick
//! host.handle_transport_event(TransportEvent::PeerJoined(ParticipantId(2)));
//! host.advance(Duration::from_millis(16));
//!
//! assert_eq!(host.phase(), SessionPhase::Hosting);
//! assert!(host.registry().contains(ParticipantId::AUTHORITY));
//! assert!(host.registry().contains(ParticipantId(2)));
//! ```

pub mod config;
pub mod logging;
pub mod state;

pub use config::{ConfigError, LoggingSettings, SessionConfig};
pub use logging::{init_logging, LoggingError};

// Re-export everything from state module at crate root
pub use state::*;
