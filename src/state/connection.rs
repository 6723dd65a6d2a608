//! Connection lifecycle and authority-side participant spawning.
//!
//! `ConnectionController` owns the single session of a process: the transport
//! handle, the lifecycle phase, the pending join attempt and, when hosting, the
//! spawn pool and participant registry. Transport notifications never mutate
//! the world directly; spawns and despawns are queued and run on the next
//! `advance`.

use std::collections::VecDeque;
use std::time::Duration;

use crate::config::{ConfigError, SessionConfig};

use super::events::{FailureReason, SessionEvent, SessionEvents, SubscriptionId};
use super::participant::{DuplicateParticipant, ParticipantId, ParticipantRegistry};
use super::phase::{LifecycleEvent, PhaseMachine, SessionPhase, SessionRole};
use super::spawn::{Position, SpawnPointPool};
use super::transport::{Transport, TransportError, TransportEvent};
use super::world::{EntityContainer, EntityFactory, EntityId, SpawnError, SpawnedEntity, World};

/// Default port for hosting and joining.
pub const DEFAULT_PORT: u16 = 7777;

/// Default address to join.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1";

/// Maximum peers a listening endpoint accepts.
pub const MAX_PARTICIPANTS: usize = 32;

/// Deadline for an outbound connection attempt (5 seconds).
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound attempt waiting for the transport to answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConnection {
    pub address: String,
    pub port: u16,
    pub elapsed: Duration,
    pub deadline: Duration,
}

impl PendingConnection {
    pub fn new(address: String, port: u16, deadline: Duration) -> Self {
        Self {
            address,
            port,
            elapsed: Duration::ZERO,
            deadline,
        }
    }

    /// Accumulate elapsed time. Returns true once the deadline is reached.
    pub fn advance(&mut self, delta: Duration) -> bool {
        self.elapsed = self.elapsed.saturating_add(delta);
        self.is_expired()
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed >= self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_sub(self.elapsed)
    }
}

/// Errors returned by host and join commands.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: TransportError,
    },

    #[error("failed to dial {address}:{port}: {source}")]
    Dial {
        address: String,
        port: u16,
        #[source]
        source: TransportError,
    },

    #[error("session already active ({phase})")]
    AlreadyActive { phase: SessionPhase },
}

/// Work queued by transport events, run on the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredTask {
    Spawn(ParticipantId),
    Despawn(ParticipantId),
}

impl From<DuplicateParticipant> for SpawnError {
    fn from(err: DuplicateParticipant) -> Self {
        SpawnError::DuplicateParticipant(err.0)
    }
}

/// Root coordinator of the session.
pub struct ConnectionController<T: Transport> {
    transport: T,
    config: SessionConfig,
    phase: PhaseMachine,

    /// Only present while `Connecting`
    pending: Option<PendingConnection>,

    /// Authority we are connected to
    remote: Option<(String, u16)>,

    /// Port we listen on while hosting
    hosted_port: Option<u16>,

    last_failure: Option<FailureReason>,
    dedicated: bool,

    world: Option<World>,
    factory: Option<Box<dyn EntityFactory>>,
    registry: ParticipantRegistry,
    deferred: VecDeque<DeferredTask>,
    events: SessionEvents,
}

impl<T: Transport> ConnectionController<T> {
    pub fn new(transport: T) -> Self {
        Self::build(transport, SessionConfig::default())
    }

    /// Create a controller from a config, rejecting invalid settings.
    pub fn with_config(transport: T, config: SessionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(transport, config))
    }

    fn build(transport: T, config: SessionConfig) -> Self {
        let dedicated = config.dedicated;
        Self {
            transport,
            config,
            phase: PhaseMachine::new(),
            pending: None,
            remote: None,
            hosted_port: None,
            last_failure: None,
            dedicated,
            world: None,
            factory: None,
            registry: ParticipantRegistry::new(),
            deferred: VecDeque::new(),
            events: SessionEvents::new(),
        }
    }

    // Accessors

    pub fn phase(&self) -> SessionPhase {
        self.phase.phase()
    }

    pub fn role(&self) -> SessionRole {
        self.phase.role()
    }

    pub fn is_authority(&self) -> bool {
        self.role() == SessionRole::Authority
    }

    pub fn pending(&self) -> Option<&PendingConnection> {
        self.pending.as_ref()
    }

    pub fn remote(&self) -> Option<(&str, u16)> {
        self.remote.as_ref().map(|(a, p)| (a.as_str(), *p))
    }

    pub fn hosted_port(&self) -> Option<u16> {
        self.hosted_port
    }

    pub fn last_failure(&self) -> Option<FailureReason> {
        self.last_failure
    }

    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn world(&self) -> Option<&World> {
        self.world.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn is_dedicated(&self) -> bool {
        self.dedicated
    }

    // Setup

    /// Host without occupying a participant slot.
    pub fn set_dedicated(&mut self, dedicated: bool) {
        self.dedicated = dedicated;
    }

    pub fn set_entity_factory(&mut self, factory: Box<dyn EntityFactory>) {
        self.factory = Some(factory);
    }

    /// Attach the game world from its spawn positions and entity container.
    pub fn setup_world(&mut self, spawn_points: Vec<Position>, container: Box<dyn EntityContainer>) {
        self.attach_world(World::new(SpawnPointPool::new(spawn_points), container));
    }

    /// Attach a prepared world. Queues the authority's own spawn when hosting.
    ///
    /// Participants spawned in a previous world are removed from it and
    /// respawned in the new one.
    pub fn attach_world(&mut self, mut world: World) {
        let respawn = self.registry.ids();
        self.despawn_all();

        tracing::info!(spawn_points = world.spawn_points.len(), "world attached");
        world.spawn_points.reset();
        self.world = Some(world);

        if !self.is_authority() {
            return;
        }
        if !respawn.contains(&ParticipantId::AUTHORITY) {
            self.queue_self_spawn();
        }
        for id in respawn {
            self.deferred.push_back(DeferredTask::Spawn(id));
        }
    }

    // Events

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&SessionEvent) + 'static,
    {
        self.events.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    // Commands

    /// Start hosting on `port`.
    pub fn create_host(&mut self, port: u16) -> Result<(), SessionError> {
        let next = self.phase.apply(LifecycleEvent::Host).map_err(|err| {
            tracing::warn!(port, phase = %err.from, "host rejected, session already active");
            SessionError::AlreadyActive { phase: err.from }
        })?;

        tracing::info!(port, "creating host");
        let max_participants = self.config.max_participants.min(MAX_PARTICIPANTS);
        self.transport
            .listen(port, max_participants)
            .map_err(|source| {
                tracing::error!(port, error = %source, "failed to create host");
                SessionError::Bind { port, source }
            })?;

        self.phase = next;
        self.hosted_port = Some(port);
        self.last_failure = None;
        tracing::info!(port, max_participants, "host started");

        if self.world.is_some() {
            self.queue_self_spawn();
        }
        Ok(())
    }

    /// Host on the configured default port.
    pub fn host_default(&mut self) -> Result<(), SessionError> {
        self.create_host(self.config.default_port)
    }

    /// Start an outbound connection attempt.
    pub fn join_game(&mut self, address: &str, port: u16) -> Result<(), SessionError> {
        let next = self.phase.apply(LifecycleEvent::Join).map_err(|err| {
            tracing::warn!(address, port, phase = %err.from, "join rejected, session already active");
            SessionError::AlreadyActive { phase: err.from }
        })?;

        tracing::info!(address, port, "joining game");
        self.transport.dial(address, port).map_err(|source| {
            tracing::error!(address, port, error = %source, "failed to create client");
            SessionError::Dial {
                address: address.to_string(),
                port,
                source,
            }
        })?;

        self.phase = next;
        self.last_failure = None;
        self.pending = Some(PendingConnection::new(
            address.to_string(),
            port,
            self.config.connect_timeout(),
        ));
        Ok(())
    }

    /// Join the configured default address and port.
    pub fn join_default(&mut self) -> Result<(), SessionError> {
        let address = self.config.default_address.clone();
        self.join_game(&address, self.config.default_port)
    }

    /// Leave the session. A no-op while idle.
    pub fn disconnect(&mut self) {
        if !self.phase().is_active() {
            tracing::debug!(phase = %self.phase(), "disconnect ignored, no active session");
            return;
        }

        self.transport.close();
        self.pending = None;
        self.remote = None;
        self.hosted_port = None;
        self.deferred.clear();
        self.despawn_all();

        if let Err(err) = self.phase.apply_mut(LifecycleEvent::Disconnect) {
            tracing::error!(%err, "disconnect transition rejected");
        }
        tracing::info!("disconnected from game");
    }

    /// Disconnect and drop every event subscriber.
    pub fn shutdown(&mut self) {
        self.disconnect();
        self.events.clear();
    }

    // Tick

    /// Advance the join deadline by `delta` and run queued spawn work.
    pub fn advance(&mut self, delta: Duration) {
        let expired = match self.pending.as_mut() {
            Some(pending) => pending.advance(delta),
            None => false,
        };
        if expired {
            if let Some(pending) = &self.pending {
                tracing::error!(address = %pending.address, port = pending.port, "connection timed out");
            }
            self.fail_pending(LifecycleEvent::DeadlineExpired, FailureReason::Timeout);
        }

        self.run_deferred();
    }

    /// Run the spawn work queued before this call. Returns the tasks run.
    pub fn run_deferred(&mut self) -> usize {
        let tasks: Vec<DeferredTask> = self.deferred.drain(..).collect();
        for task in &tasks {
            match *task {
                DeferredTask::Spawn(id) => match self.spawn_participant(id) {
                    Ok(entity) => {
                        tracing::info!(participant = %id, entity = entity.0, "participant spawned")
                    }
                    Err(SpawnError::DuplicateParticipant(_)) => {
                        tracing::warn!(participant = %id, "participant already spawned, skipping")
                    }
                    Err(err) => {
                        tracing::error!(participant = %id, %err, "cannot spawn participant")
                    }
                },
                DeferredTask::Despawn(id) => {
                    self.despawn_participant(id);
                }
            }
        }
        tasks.len()
    }

    // Transport notifications

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_transport_connected(),
            TransportEvent::ConnectionFailed => self.on_transport_connection_failed(),
            TransportEvent::PeerJoined(id) => self.on_peer_joined(id),
            TransportEvent::PeerLeft(id) => self.on_peer_left(id),
        }
    }

    pub fn on_transport_connected(&mut self) {
        if let Err(err) = self.phase.apply_mut(LifecycleEvent::TransportConnected) {
            tracing::warn!(%err, "ignoring connected notification");
            return;
        }

        let (address, port) = self
            .pending
            .take()
            .map(|p| (p.address, p.port))
            .unwrap_or_default();
        tracing::info!(%address, port, "successfully connected to authority");

        self.remote = Some((address.clone(), port));
        self.events
            .emit(&SessionEvent::ConnectedToAuthority { address, port });
    }

    pub fn on_transport_connection_failed(&mut self) {
        tracing::warn!("failed to connect to authority");
        self.fail_pending(LifecycleEvent::TransportFailed, FailureReason::RemoteFailure);
    }

    /// Queue a spawn for a new peer. Authority only.
    pub fn on_peer_joined(&mut self, id: ParticipantId) {
        tracing::info!(participant = %id, "peer connected");
        if !self.is_authority() {
            tracing::debug!(participant = %id, "not the authority, spawn left to host");
            return;
        }
        self.deferred.push_back(DeferredTask::Spawn(id));
    }

    /// Queue cleanup for a departed peer. Authority only.
    pub fn on_peer_left(&mut self, id: ParticipantId) {
        tracing::info!(participant = %id, "peer disconnected");
        if !self.is_authority() {
            return;
        }
        self.deferred.push_back(DeferredTask::Despawn(id));
    }

    // Internals

    fn fail_pending(&mut self, event: LifecycleEvent, reason: FailureReason) {
        if let Err(err) = self.phase.apply_mut(event) {
            tracing::warn!(%err, "ignoring failure notification");
            return;
        }

        let (address, port) = self
            .pending
            .take()
            .map(|p| (p.address, p.port))
            .unwrap_or_default();
        self.transport.close();
        self.last_failure = Some(reason);

        if let Err(err) = self.phase.apply_mut(LifecycleEvent::Settle) {
            tracing::error!(%err, "failed to settle session");
        }

        self.events.emit(&SessionEvent::ConnectionFailed {
            reason,
            address,
            port,
        });
    }

    fn queue_self_spawn(&mut self) {
        if self.dedicated {
            tracing::debug!("dedicated authority, no host participant");
            return;
        }
        tracing::info!("spawning host participant");
        self.deferred
            .push_back(DeferredTask::Spawn(ParticipantId::AUTHORITY));
    }

    fn spawn_participant(&mut self, id: ParticipantId) -> Result<EntityId, SpawnError> {
        if self.registry.contains(id) {
            return Err(SpawnError::DuplicateParticipant(id));
        }
        let factory = self.factory.as_mut().ok_or(SpawnError::NoFactory)?;
        let world = self.world.as_mut().ok_or(SpawnError::NoWorld)?;

        let (spawn_index, position) = match world.spawn_points.allocate() {
            Ok(alloc) => (Some(alloc.index), alloc.position),
            Err(err) => {
                tracing::warn!(participant = %id, %err, "spawning at fallback position");
                (None, Position::ZERO)
            }
        };

        let entity = factory.create(id, position)?;
        let entity_id = entity.id;
        world.container.attach(entity)?;

        if let Err(dup) = self.registry.register(id, entity_id, spawn_index) {
            world.container.detach(entity_id);
            return Err(dup.into());
        }

        tracing::debug!(participant = %id, %position, index = ?spawn_index, "participant placed");
        Ok(entity_id)
    }

    fn despawn_participant(&mut self, id: ParticipantId) -> Option<SpawnedEntity> {
        let Some(entity_id) = self.registry.unregister(id) else {
            tracing::debug!(participant = %id, "departed before being spawned");
            return None;
        };

        let Some(world) = self.world.as_mut() else {
            tracing::warn!(participant = %id, "no world attached, entity not destroyed");
            return None;
        };

        let removed = world.container.detach(entity_id);
        if removed.is_none() {
            tracing::warn!(participant = %id, entity = entity_id.0, "entity already gone");
        }
        removed
    }

    fn despawn_all(&mut self) {
        let entries = self.registry.drain();
        if let Some(world) = self.world.as_mut() {
            for entry in &entries {
                world.container.detach(entry.entity);
            }
            world.spawn_points.reset();
        }
        if !entries.is_empty() {
            tracing::info!(count = entries.len(), "despawned participants");
        }
    }
}

impl<T: Transport> Drop for ConnectionController<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: Transport> std::fmt::Debug for ConnectionController<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionController")
            .field("phase", &self.phase())
            .field("pending", &self.pending)
            .field("participants", &self.registry.len())
            .field("deferred", &self.deferred.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::world::{EntityStore, SequentialFactory};
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Default)]
    struct RecordingTransport {
        open: bool,
        listens: Vec<(u16, usize)>,
        dials: Vec<(String, u16)>,
        closes: usize,
        fail_listen: Option<TransportError>,
        fail_dial: Option<TransportError>,
    }

    impl Transport for RecordingTransport {
        fn listen(&mut self, port: u16, max_peers: usize) -> Result<(), TransportError> {
            if let Some(err) = self.fail_listen.clone() {
                return Err(err);
            }
            self.listens.push((port, max_peers));
            self.open = true;
            Ok(())
        }

        fn dial(&mut self, address: &str, port: u16) -> Result<(), TransportError> {
            if let Some(err) = self.fail_dial.clone() {
                return Err(err);
            }
            self.dials.push((address.to_string(), port));
            self.open = true;
            Ok(())
        }

        fn close(&mut self) {
            if self.open {
                self.closes += 1;
            }
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    type Controller = ConnectionController<RecordingTransport>;

    fn make_controller() -> Controller {
        ConnectionController::new(RecordingTransport::default())
    }

    fn capture(controller: &mut Controller) -> Rc<RefCell<Vec<SessionEvent>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        controller.subscribe(move |e| sink.borrow_mut().push(e.clone()));
        seen
    }

    fn attach_world(controller: &mut Controller, points: usize) -> Rc<RefCell<EntityStore>> {
        let store = Rc::new(RefCell::new(EntityStore::new()));
        let positions = (0..points)
            .map(|i| Position::new(i as f32 * 10.0, 0.0, 0.0))
            .collect();
        let pool = SpawnPointPool::with_rng(positions, StdRng::seed_from_u64(42));
        controller.set_entity_factory(Box::new(SequentialFactory::new()));
        controller.attach_world(World::new(pool, Box::new(Rc::clone(&store))));
        store
    }

    fn hosting_with_world(points: usize) -> (Controller, Rc<RefCell<EntityStore>>) {
        let mut controller = make_controller();
        controller.set_dedicated(true);
        let store = attach_world(&mut controller, points);
        controller.create_host(DEFAULT_PORT).unwrap();
        (controller, store)
    }

    struct FlakyFactory {
        failures_left: usize,
        inner: SequentialFactory,
    }

    impl EntityFactory for FlakyFactory {
        fn create(
            &mut self,
            participant: ParticipantId,
            position: Position,
        ) -> Result<SpawnedEntity, SpawnError> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(SpawnError::Factory("scene not loaded".to_string()));
            }
            self.inner.create(participant, position)
        }
    }

    #[derive(Default)]
    struct RejectingContainer {
        rejections_left: usize,
        inner: EntityStore,
    }

    impl EntityContainer for RejectingContainer {
        fn attach(&mut self, entity: SpawnedEntity) -> Result<(), SpawnError> {
            if self.rejections_left > 0 {
                self.rejections_left -= 1;
                return Err(SpawnError::Container("players node locked".to_string()));
            }
            self.inner.attach(entity)
        }

        fn detach(&mut self, id: EntityId) -> Option<SpawnedEntity> {
            self.inner.detach(id)
        }
    }

    #[test]
    fn test_create_host() {
        let mut controller = make_controller();
        controller.create_host(7777).unwrap();

        assert_eq!(controller.phase(), SessionPhase::Hosting);
        assert!(controller.is_authority());
        assert_eq!(controller.hosted_port(), Some(7777));
        assert_eq!(controller.transport().listens, vec![(7777, MAX_PARTICIPANTS)]);
    }

    #[test]
    fn test_create_host_bind_error() {
        let mut controller = ConnectionController::new(RecordingTransport {
            fail_listen: Some(TransportError::AddressInUse(7777)),
            ..Default::default()
        });

        let result = controller.create_host(7777);
        assert_eq!(
            result,
            Err(SessionError::Bind {
                port: 7777,
                source: TransportError::AddressInUse(7777),
            })
        );
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert_eq!(controller.role(), SessionRole::Unattached);
    }

    #[test]
    fn test_create_host_twice_rejected() {
        let mut controller = make_controller();
        controller.create_host(7777).unwrap();

        let result = controller.create_host(7777);
        assert_eq!(
            result,
            Err(SessionError::AlreadyActive {
                phase: SessionPhase::Hosting
            })
        );
        assert_eq!(controller.transport().listens.len(), 1);
        assert_eq!(controller.phase(), SessionPhase::Hosting);
    }

    #[test]
    fn test_host_spawns_itself_when_world_attached() {
        let mut controller = make_controller();
        let store = attach_world(&mut controller, 4);
        controller.create_host(7777).unwrap();

        // Deferred until the next tick
        assert!(controller.registry().is_empty());
        assert_eq!(controller.deferred_len(), 1);

        controller.advance(Duration::ZERO);
        assert!(controller.registry().contains(ParticipantId::AUTHORITY));
        assert!(store
            .borrow()
            .find_by_authority(ParticipantId::AUTHORITY)
            .is_some());
    }

    #[test]
    fn test_world_attached_after_hosting_spawns_host() {
        let mut controller = make_controller();
        controller.create_host(7777).unwrap();
        assert_eq!(controller.deferred_len(), 0);

        let store = attach_world(&mut controller, 2);
        controller.advance(Duration::ZERO);
        assert_eq!(store.borrow().len(), 1);
        assert_eq!(controller.registry().ids(), vec![ParticipantId::AUTHORITY]);
    }

    #[test]
    fn test_dedicated_host_does_not_spawn_itself() {
        let (mut controller, store) = hosting_with_world(3);
        controller.advance(Duration::ZERO);
        assert!(store.borrow().is_empty());
        assert!(controller.registry().is_empty());
    }

    #[test]
    fn test_join_times_out() {
        let mut controller = make_controller();
        let events = capture(&mut controller);
        controller.join_game("10.0.0.5", 7777).unwrap();
        assert_eq!(controller.phase(), SessionPhase::Connecting);

        controller.advance(Duration::from_millis(4900));
        assert_eq!(controller.phase(), SessionPhase::Connecting);
        assert!(events.borrow().is_empty());

        controller.advance(Duration::from_millis(100));
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert!(controller.pending().is_none());
        assert!(!controller.transport().is_open());
        assert_eq!(controller.last_failure(), Some(FailureReason::Timeout));

        controller.advance(Duration::from_secs(10));
        assert_eq!(
            *events.borrow(),
            vec![SessionEvent::ConnectionFailed {
                reason: FailureReason::Timeout,
                address: "10.0.0.5".to_string(),
                port: 7777,
            }]
        );
    }

    #[test]
    fn test_join_connects() {
        let mut controller = make_controller();
        let events = capture(&mut controller);
        controller.join_game("127.0.0.1", 7777).unwrap();

        controller.handle_transport_event(TransportEvent::Connected);
        assert_eq!(controller.phase(), SessionPhase::Connected);
        assert_eq!(controller.role(), SessionRole::Participant);
        assert_eq!(controller.remote(), Some(("127.0.0.1", 7777)));

        // Timer was cleared
        controller.advance(Duration::from_secs(30));
        assert_eq!(controller.phase(), SessionPhase::Connected);
        assert_eq!(
            *events.borrow(),
            vec![SessionEvent::ConnectedToAuthority {
                address: "127.0.0.1".to_string(),
                port: 7777,
            }]
        );
    }

    #[test]
    fn test_join_remote_failure() {
        let mut controller = make_controller();
        let events = capture(&mut controller);
        controller.join_default().unwrap();

        controller.handle_transport_event(TransportEvent::ConnectionFailed);
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert_eq!(controller.transport().closes, 1);
        assert_eq!(controller.last_failure(), Some(FailureReason::RemoteFailure));

        let events = events.borrow();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            SessionEvent::ConnectionFailed {
                reason: FailureReason::RemoteFailure,
                ..
            }
        ));
    }

    #[test]
    fn test_second_join_rejected() {
        let mut controller = make_controller();
        controller.join_game("10.0.0.1", 7000).unwrap();
        controller.advance(Duration::from_secs(2));

        let result = controller.join_game("10.0.0.2", 7001);
        assert!(matches!(result, Err(SessionError::AlreadyActive { .. })));
        assert_eq!(controller.transport().dials.len(), 1);

        let pending = controller.pending().unwrap();
        assert_eq!(pending.address, "10.0.0.1");
        assert_eq!(pending.elapsed, Duration::from_secs(2));
        assert_eq!(pending.remaining(), Duration::from_secs(3));
    }

    #[test]
    fn test_join_dial_error() {
        let mut controller = ConnectionController::new(RecordingTransport {
            fail_dial: Some(TransportError::InvalidAddress("nowhere".to_string())),
            ..Default::default()
        });

        let result = controller.join_game("nowhere", 7777);
        assert!(matches!(result, Err(SessionError::Dial { .. })));
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert!(controller.pending().is_none());
    }

    #[test]
    fn test_disconnect_while_idle_is_noop() {
        let mut controller = make_controller();
        controller.disconnect();
        controller.disconnect();
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert_eq!(controller.transport().closes, 0);
    }

    #[test]
    fn test_disconnect_cancels_pending() {
        let mut controller = make_controller();
        let events = capture(&mut controller);
        controller.join_game("10.0.0.9", 7777).unwrap();

        controller.disconnect();
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert!(controller.pending().is_none());
        assert_eq!(controller.transport().closes, 1);

        controller.advance(Duration::from_secs(10));
        assert!(events.borrow().is_empty());

        // Can join again afterwards
        controller.join_game("10.0.0.9", 7777).unwrap();
        assert_eq!(controller.phase(), SessionPhase::Connecting);
    }

    #[test]
    fn test_transport_events_ignored_while_idle() {
        let mut controller = make_controller();
        let events = capture(&mut controller);

        controller.handle_transport_event(TransportEvent::Connected);
        controller.handle_transport_event(TransportEvent::ConnectionFailed);
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_peer_join_is_deferred() {
        let (mut controller, store) = hosting_with_world(3);

        controller.handle_transport_event(TransportEvent::PeerJoined(ParticipantId(2)));
        assert!(controller.registry().is_empty());
        assert!(store.borrow().is_empty());

        controller.advance(Duration::from_millis(16));
        let entry = controller.registry().get(ParticipantId(2)).unwrap();
        let entity = store.borrow().get(entry.entity).cloned().unwrap();
        assert_eq!(entity.authority, ParticipantId(2));
        assert_eq!(entity.name, "2");
    }

    #[test]
    fn test_four_joins_on_three_points() {
        let (mut controller, store) = hosting_with_world(3);

        for id in 2..5 {
            controller.on_peer_joined(ParticipantId(id));
        }
        controller.advance(Duration::ZERO);

        let mut indices: Vec<usize> = (2..5)
            .filter_map(|id| controller.registry().get(ParticipantId(id)))
            .filter_map(|e| e.spawn_index)
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);

        controller.on_peer_joined(ParticipantId(5));
        controller.advance(Duration::ZERO);

        let pool = &controller.world().unwrap().spawn_points;
        assert_eq!(pool.used_count(), 1);
        assert!(controller.registry().get(ParticipantId(5)).unwrap().spawn_index.is_some());
        assert_eq!(store.borrow().len(), 4);
    }

    #[test]
    fn test_duplicate_join_spawns_once() {
        let (mut controller, store) = hosting_with_world(3);

        controller.on_peer_joined(ParticipantId(2));
        controller.on_peer_joined(ParticipantId(2));
        controller.advance(Duration::ZERO);

        assert_eq!(controller.registry().len(), 1);
        assert_eq!(store.borrow().len(), 1);
    }

    #[test]
    fn test_peer_left_destroys_entity() {
        let (mut controller, store) = hosting_with_world(3);
        controller.on_peer_joined(ParticipantId(2));
        controller.on_peer_joined(ParticipantId(3));
        controller.advance(Duration::ZERO);

        controller.handle_transport_event(TransportEvent::PeerLeft(ParticipantId(2)));
        assert_eq!(store.borrow().len(), 2);

        controller.advance(Duration::ZERO);
        assert_eq!(store.borrow().len(), 1);
        assert!(!controller.registry().contains(ParticipantId(2)));
        assert!(controller.registry().contains(ParticipantId(3)));

        // Spawn index stays used until the cycle resets
        assert_eq!(controller.world().unwrap().spawn_points.used_count(), 2);
    }

    #[test]
    fn test_unknown_peer_left_tolerated() {
        let (mut controller, store) = hosting_with_world(2);
        controller.on_peer_left(ParticipantId(77));
        assert_eq!(controller.run_deferred(), 1);
        assert!(store.borrow().is_empty());
    }

    #[test]
    fn test_join_and_leave_in_same_tick() {
        let (mut controller, store) = hosting_with_world(2);
        controller.on_peer_joined(ParticipantId(6));
        controller.on_peer_left(ParticipantId(6));
        controller.advance(Duration::ZERO);

        assert!(controller.registry().is_empty());
        assert!(store.borrow().is_empty());
    }

    #[test]
    fn test_peer_events_ignored_when_not_authority() {
        let mut controller = make_controller();
        let store = attach_world(&mut controller, 2);
        controller.join_default().unwrap();
        controller.on_transport_connected();

        controller.on_peer_joined(ParticipantId(3));
        assert_eq!(controller.deferred_len(), 0);
        controller.advance(Duration::ZERO);
        assert!(store.borrow().is_empty());
    }

    #[test]
    fn test_missing_factory_abandons_spawn() {
        let mut controller = make_controller();
        controller.set_dedicated(true);
        let store = Rc::new(RefCell::new(EntityStore::new()));
        controller.setup_world(vec![Position::ZERO], Box::new(Rc::clone(&store)));
        controller.create_host(7777).unwrap();

        controller.on_peer_joined(ParticipantId(2));
        controller.advance(Duration::ZERO);
        assert!(controller.registry().is_empty());
        assert!(store.borrow().is_empty());
        assert_eq!(controller.phase(), SessionPhase::Hosting);
    }

    #[test]
    fn test_missing_world_abandons_spawn() {
        let mut controller = make_controller();
        controller.set_entity_factory(Box::new(SequentialFactory::new()));
        controller.create_host(7777).unwrap();

        controller.on_peer_joined(ParticipantId(2));
        controller.advance(Duration::ZERO);
        assert!(controller.registry().is_empty());
    }

    #[test]
    fn test_no_spawn_points_uses_fallback() {
        let (mut controller, store) = hosting_with_world(0);
        controller.on_peer_joined(ParticipantId(2));
        controller.advance(Duration::ZERO);

        let entry = controller.registry().get(ParticipantId(2)).unwrap();
        assert_eq!(entry.spawn_index, None);
        assert_eq!(
            store.borrow().get(entry.entity).unwrap().position,
            Position::ZERO
        );
    }

    #[test]
    fn test_disconnect_as_host_despawns_everyone() {
        let (mut controller, store) = hosting_with_world(3);
        controller.on_peer_joined(ParticipantId(2));
        controller.on_peer_joined(ParticipantId(3));
        controller.advance(Duration::ZERO);
        controller.on_peer_joined(ParticipantId(4));

        controller.disconnect();
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert!(controller.registry().is_empty());
        assert_eq!(controller.deferred_len(), 0);
        assert!(store.borrow().is_empty());
        assert_eq!(controller.world().unwrap().spawn_points.used_count(), 0);
        assert!(!controller.transport().is_open());
    }

    #[test]
    fn test_shutdown_drops_subscribers() {
        let mut controller = make_controller();
        let events = capture(&mut controller);
        controller.join_default().unwrap();

        controller.shutdown();
        assert_eq!(controller.subscriber_count(), 0);
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_config_applies() {
        let config = SessionConfig {
            default_port: 9100,
            max_participants: 8,
            connect_timeout_secs: 1.0,
            dedicated: true,
            ..Default::default()
        };
        let mut controller =
            ConnectionController::with_config(RecordingTransport::default(), config).unwrap();
        assert!(controller.is_dedicated());

        controller.host_default().unwrap();
        assert_eq!(controller.transport().listens, vec![(9100, 8)]);
        controller.disconnect();

        controller.join_default().unwrap();
        controller.advance(Duration::from_secs(1));
        assert_eq!(controller.last_failure(), Some(FailureReason::Timeout));
    }

    #[test]
    fn test_with_config_rejects_invalid_timeout() {
        let config = SessionConfig {
            connect_timeout_secs: -1.0,
            ..Default::default()
        };
        let result = ConnectionController::with_config(RecordingTransport::default(), config);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_with_config_rejects_participant_cap_above_limit() {
        let config = SessionConfig {
            max_participants: 500,
            ..Default::default()
        };
        let result = ConnectionController::with_config(RecordingTransport::default(), config);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_oversized_timeout_config_cannot_reach_join() {
        assert!(SessionConfig::from_json_str(r#"{"connect_timeout_secs": 1e30}"#).is_err());

        // A config mutated after validation still joins with the default deadline
        let config = SessionConfig {
            connect_timeout_secs: 1e30,
            ..Default::default()
        };
        let mut controller = ConnectionController::build(RecordingTransport::default(), config);
        controller.join_default().unwrap();
        assert_eq!(controller.pending().unwrap().deadline, CONNECTION_TIMEOUT);
    }

    #[test]
    fn test_listen_never_exceeds_participant_cap() {
        let config = SessionConfig {
            max_participants: 500,
            ..Default::default()
        };
        let mut controller = ConnectionController::build(RecordingTransport::default(), config);
        controller.create_host(7777).unwrap();
        assert_eq!(controller.transport().listens, vec![(7777, MAX_PARTICIPANTS)]);
    }

    #[test]
    fn test_factory_failure_abandons_spawn() {
        let (mut controller, store) = hosting_with_world(3);
        controller.set_entity_factory(Box::new(FlakyFactory {
            failures_left: 1,
            inner: SequentialFactory::new(),
        }));

        controller.on_peer_joined(ParticipantId(2));
        controller.advance(Duration::ZERO);
        assert!(controller.registry().is_empty());
        assert!(store.borrow().is_empty());
        assert_eq!(controller.phase(), SessionPhase::Hosting);

        controller.on_peer_joined(ParticipantId(2));
        controller.advance(Duration::ZERO);
        assert!(controller.registry().contains(ParticipantId(2)));
        assert_eq!(store.borrow().len(), 1);
    }

    #[test]
    fn test_container_rejection_abandons_spawn() {
        let mut controller = make_controller();
        controller.set_dedicated(true);
        controller.set_entity_factory(Box::new(SequentialFactory::new()));
        let container = Rc::new(RefCell::new(RejectingContainer {
            rejections_left: 1,
            ..Default::default()
        }));
        let pool = SpawnPointPool::with_rng(vec![Position::ZERO; 3], StdRng::seed_from_u64(5));
        controller.attach_world(World::new(pool, Box::new(Rc::clone(&container))));
        controller.create_host(7777).unwrap();

        controller.on_peer_joined(ParticipantId(3));
        controller.advance(Duration::ZERO);
        assert!(controller.registry().is_empty());
        assert!(container.borrow().inner.is_empty());
        assert_eq!(controller.phase(), SessionPhase::Hosting);

        controller.on_peer_joined(ParticipantId(4));
        controller.advance(Duration::ZERO);
        assert!(controller.registry().contains(ParticipantId(4)));
        assert_eq!(container.borrow().inner.len(), 1);
    }

    #[test]
    fn test_replacing_world_moves_participants() {
        let (mut controller, first) = hosting_with_world(3);
        controller.on_peer_joined(ParticipantId(2));
        controller.advance(Duration::ZERO);
        assert_eq!(first.borrow().len(), 1);

        let second = attach_world(&mut controller, 3);
        assert!(first.borrow().is_empty());

        controller.advance(Duration::ZERO);
        assert_eq!(second.borrow().len(), 1);
        assert!(second
            .borrow()
            .find_by_authority(ParticipantId(2))
            .is_some());

        controller.on_peer_left(ParticipantId(2));
        controller.advance(Duration::ZERO);
        assert!(first.borrow().is_empty());
        assert!(second.borrow().is_empty());
        assert!(controller.registry().is_empty());
    }

    #[test]
    fn test_replacing_world_respawns_host_once() {
        let mut controller = make_controller();
        attach_world(&mut controller, 2);
        controller.create_host(7777).unwrap();
        controller.advance(Duration::ZERO);

        let second = attach_world(&mut controller, 2);
        assert_eq!(controller.deferred_len(), 1);
        controller.advance(Duration::ZERO);
        assert_eq!(second.borrow().len(), 1);
        assert_eq!(controller.registry().ids(), vec![ParticipantId::AUTHORITY]);
    }
}
