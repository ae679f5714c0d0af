//! The world event loop.
//!
//! One task owns the [`World`], the [`NetworkObjectRegistry`], every
//! [`Session`] and the [`MediaPlane`]. Everything that can change them
//! arrives as a [`ServerEvent`]: peer traffic from the transport adapter,
//! timer ticks, and the results of lookups the loop spawned itself. Handlers
//! run to completion one at a time, so no state is shared or locked.
//!
//! Anything that has to wait (authorization lookups, instance patches) is
//! spawned and posts its result back as another event. By the time such a
//! result is handled the session may be gone, so every late result is checked
//! against the live session table before it is applied.

mod handlers;
mod media;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info};

use realm_ecs::{QueryDescriptor, QueryId, World};
use realm_math::Transform3D;
use realm_net::messages::{Action, ClientMessage, Response, SpawnParameters};
use realm_net::{NetworkId, PeerId, UserId, world_state};

use crate::components::{Avatar, Networked};
use crate::config::ServerConfig;
use crate::media::{MediaError, MediaPlane};
use crate::registry::{Authority, NetworkObjectRegistry, RegistryError};
use crate::services::{
    AvatarDetail, InstanceRecord, LookupError, NewInstance, UserRecord, WorldServices,
};
use crate::session::{Session, SessionState};
use crate::sweeper;
use crate::tick::build_world_state;
use crate::transport::{OutboundSink, ServerTransport};

// ── Events ──────────────────────────────────────────────────────────────────

/// Where the acknowledgement of a request goes.
#[derive(Debug)]
pub struct Responder(oneshot::Sender<Response>);

impl Responder {
    #[must_use]
    pub fn new() -> (Self, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    pub fn send(self, response: Response) {
        if self.0.send(response).is_err() {
            debug!("requester went away before the acknowledgement");
        }
    }
}

/// Answer `reply` if the sender asked for one.
pub(crate) fn respond(reply: Option<Responder>, response: Response) {
    if let Some(reply) = reply {
        reply.send(response);
    }
}

#[derive(Debug)]
pub enum ServerEvent {
    Connected {
        peer: PeerId,
    },
    Message {
        peer: PeerId,
        message: ClientMessage,
        reply: Option<Responder>,
    },
    /// A world-state buffer pushed by a peer.
    Data {
        peer: PeerId,
        bytes: Vec<u8>,
    },
    Disconnected {
        peer: PeerId,
    },
    Kick {
        peer: PeerId,
    },
    /// A spawned identity lookup finished.
    AuthorizationResolved {
        peer: PeerId,
        attempt: u64,
        result: Result<(UserRecord, AvatarDetail), LookupError>,
        reply: Option<Responder>,
    },
    Tick,
    Sweep,
    Shutdown,
}

/// Cloneable entry point into the event loop.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

/// Create the event channel the server loop consumes.
#[must_use]
pub fn event_channel() -> (ServerHandle, mpsc::UnboundedReceiver<ServerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ServerHandle { tx }, rx)
}

impl ServerHandle {
    /// Queue an event. Returns `false` once the loop has stopped.
    pub fn post(&self, event: ServerEvent) -> bool {
        if self.tx.send(event).is_err() {
            debug!("event loop stopped, event dropped");
            return false;
        }
        true
    }

    pub fn connect(&self, peer: PeerId) {
        self.post(ServerEvent::Connected { peer });
    }

    pub fn disconnect(&self, peer: PeerId) {
        self.post(ServerEvent::Disconnected { peer });
    }

    pub fn data(&self, peer: PeerId, bytes: Vec<u8>) {
        self.post(ServerEvent::Data { peer, bytes });
    }

    pub fn kick(&self, peer: PeerId) {
        self.post(ServerEvent::Kick { peer });
    }

    /// Send a request and get its acknowledgement. The receiver errors for
    /// messages that are never acknowledged.
    pub fn send(&self, peer: PeerId, message: ClientMessage) -> oneshot::Receiver<Response> {
        let (reply, rx) = Responder::new();
        self.post(ServerEvent::Message {
            peer,
            message,
            reply: Some(reply),
        });
        rx
    }

    /// Send a message without waiting for an acknowledgement.
    pub fn notify(&self, peer: PeerId, message: ClientMessage) {
        self.post(ServerEvent::Message {
            peer,
            message,
            reply: None,
        });
    }

    pub fn tick(&self) {
        self.post(ServerEvent::Tick);
    }

    pub fn sweep(&self) {
        self.post(ServerEvent::Sweep);
    }

    pub fn shutdown(&self) {
        self.post(ServerEvent::Shutdown);
    }

    #[must_use]
    pub fn sender(&self) -> mpsc::UnboundedSender<ServerEvent> {
        self.tx.clone()
    }
}

// ── Server ──────────────────────────────────────────────────────────────────

pub struct GameServer {
    config: ServerConfig,
    services: Arc<dyn WorldServices>,
    events: ServerHandle,
    world: World,
    registry: NetworkObjectRegistry,
    sessions: HashMap<PeerId, Session>,
    transport: ServerTransport,
    media: MediaPlane,
    /// Set once startup has registered this server with the instance store.
    instance: Option<InstanceRecord>,
    tick: u32,
    /// Actions flushed to peers on the next tick.
    pending_actions: Vec<Action>,
    avatar_query: QueryId,
}

impl GameServer {
    /// `events` must be the handle of the channel later passed to
    /// [`GameServer::run`]; spawned lookups post their results through it.
    #[must_use]
    pub fn new(config: ServerConfig, services: Arc<dyn WorldServices>, events: ServerHandle) -> Self {
        let mut world = World::new();
        let avatar_query = world.define_query(
            QueryDescriptor::new()
                .with::<Avatar>()
                .with::<Transform3D>(),
        );
        let media = MediaPlane::new(config.media.clone());
        Self {
            config,
            services,
            events,
            world,
            registry: NetworkObjectRegistry::new(),
            sessions: HashMap::new(),
            transport: ServerTransport::new(),
            media,
            instance: None,
            tick: 0,
            pending_actions: Vec::new(),
            avatar_query,
        }
    }

    pub fn attach_transport(&mut self, sink: OutboundSink) {
        self.transport.attach(sink);
    }

    /// # Errors
    ///
    /// Returns [`MediaError::InvalidConfig`] if the media settings are unusable.
    pub fn start_media(&mut self) -> Result<(), MediaError> {
        self.media.start()
    }

    /// Create the outgoing data producer and route snapshots through it.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::NotStarted`] before [`GameServer::start_media`].
    pub fn init_outgoing_data_path(&mut self) -> Result<(), MediaError> {
        let path = self.media.init_outgoing_data_path()?;
        self.transport.attach_outgoing_data(path.producer);
        Ok(())
    }

    /// End stale instance records left at this server's address, resolve
    /// the configured location and create the instance record that user
    /// counts are reported to.
    ///
    /// # Errors
    ///
    /// Returns the failing lookup; an unknown location names its slug.
    pub async fn preload_location(&mut self) -> anyhow::Result<InstanceRecord> {
        let address = self.config.media.announced_ip.clone();
        let ended = self.services.end_stale_instances(&address).await?;
        if ended > 0 {
            info!(ended, %address, "ended stale instance records");
        }

        let location = match &self.config.location {
            Some(slug) => Some(
                self.services
                    .find_location(slug)
                    .await
                    .with_context(|| format!("resolving location {slug}"))?,
            ),
            None => None,
        };
        let instance = self
            .services
            .create_instance(NewInstance {
                id: self.config.instance_id.clone(),
                location_id: location.as_ref().map(|l| l.id.clone()),
                scene_id: location.as_ref().map(|l| l.scene_id.clone()),
                address,
            })
            .await?;
        info!(
            instance = %instance.id,
            location = ?location.as_ref().map(|l| l.slug.as_str()),
            "instance record created"
        );
        self.instance = Some(instance.clone());
        Ok(instance)
    }

    /// Handle events until [`ServerEvent::Shutdown`], then close every
    /// remaining session.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ServerEvent>) {
        info!(instance = %self.config.instance_id, "event loop running");
        while let Some(event) = events.recv().await {
            if matches!(event, ServerEvent::Shutdown) {
                break;
            }
            self.handle(event);
        }
        let peers: Vec<PeerId> = self.sessions.keys().cloned().collect();
        for peer in peers {
            self.teardown(&peer, SessionState::Disconnected);
        }
        self.flush_actions();
        info!(tick = self.tick, "event loop stopped");
    }

    pub fn handle(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected { peer } => self.on_connected(peer),
            ServerEvent::Message {
                peer,
                message,
                reply,
            } => self.on_message(&peer, message, reply),
            ServerEvent::Data { peer, bytes } => self.on_data(&peer, &bytes),
            ServerEvent::Disconnected { peer } => self.on_disconnected(&peer),
            ServerEvent::Kick { peer } => self.on_kick(&peer),
            ServerEvent::AuthorizationResolved {
                peer,
                attempt,
                result,
                reply,
            } => self.on_authorization_resolved(&peer, attempt, result, reply),
            ServerEvent::Tick => self.on_tick(),
            ServerEvent::Sweep => self.on_sweep(Instant::now()),
            ServerEvent::Shutdown => {}
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    #[must_use]
    pub fn registry(&self) -> &NetworkObjectRegistry {
        &self.registry
    }

    #[must_use]
    pub fn session(&self, peer: &PeerId) -> Option<&Session> {
        self.sessions.get(peer)
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn media(&self) -> &MediaPlane {
        &self.media
    }

    /// This server's instance record, once startup created it.
    #[must_use]
    pub fn instance(&self) -> Option<&InstanceRecord> {
        self.instance.as_ref()
    }

    #[must_use]
    pub fn tick(&self) -> u32 {
        self.tick
    }

    #[must_use]
    pub fn pending_actions(&self) -> &[Action] {
        &self.pending_actions
    }

    // ── Network objects ─────────────────────────────────────────────────────

    /// Create a networked entity at `parameters` and queue its spawn action.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the new binding conflicts; the entity is
    /// released again in that case.
    pub fn spawn_object(
        &mut self,
        owner: UserId,
        authority: Authority,
        prefab: &str,
        parameters: SpawnParameters,
    ) -> Result<NetworkId, RegistryError> {
        let network_id = self.registry.allocate_network_id();
        let entity = self.world.spawn();
        self.world.add_component(
            entity,
            Transform3D::from_position_rotation(parameters.position, parameters.rotation),
        );
        self.world.add_component(
            entity,
            Networked {
                network_id,
                owner: owner.clone(),
            },
        );
        match self.registry.spawn(owner, network_id, entity, authority) {
            Ok(object) => {
                object.prefab = prefab.to_string();
                object.parameters = parameters;
                let action = object.spawn_action();
                self.pending_actions.push(action);
                Ok(network_id)
            }
            Err(error) => {
                self.world.despawn(entity);
                Err(error)
            }
        }
    }

    /// Spawn an object the server simulates itself.
    ///
    /// # Errors
    ///
    /// See [`GameServer::spawn_object`].
    pub fn spawn_server_object(
        &mut self,
        prefab: &str,
        parameters: SpawnParameters,
    ) -> Result<NetworkId, RegistryError> {
        self.spawn_object(UserId::server(), Authority::Local, prefab, parameters)
    }

    /// Announce, unregister and release an object. Unknown ids are a no-op.
    pub fn destroy_object(&mut self, network_id: NetworkId) -> bool {
        let Some(entity) = self.registry.get(network_id).map(|object| object.entity) else {
            debug!(%network_id, "destroy: unknown network object");
            return false;
        };
        self.pending_actions.push(Action::DestroyObject { network_id });
        self.registry.despawn(network_id);
        if self.world.is_alive(entity) {
            self.world.despawn(entity);
        }
        true
    }

    // ── Timers ──────────────────────────────────────────────────────────────

    fn flush_actions(&mut self) {
        let actions = std::mem::take(&mut self.pending_actions);
        self.transport.send_actions(actions);
    }

    /// Advance the simulation one step: flush queued actions, broadcast the
    /// world state, then close the component removal cycle.
    pub fn on_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
        self.flush_actions();

        let snapshot = build_world_state(&self.world, &self.registry, self.tick);
        self.transport.send_data(world_state::encode(&snapshot));

        for entity in self.world.query_enter(self.avatar_query) {
            if let Some(avatar) = self.world.get_component::<Avatar>(entity) {
                info!(tick = self.tick, user = %avatar.user, %entity, "avatar entered world");
            }
        }
        for entity in self.world.query_exit(self.avatar_query) {
            let user = self
                .world
                .get_component_or_removed::<Avatar>(entity)
                .map(|avatar| avatar.user.to_string());
            let last_position = self
                .world
                .get_component_or_removed::<Transform3D>(entity)
                .map(|transform| transform.position);
            info!(tick = self.tick, ?user, %entity, ?last_position, "avatar left world");
        }
        self.world.advance_cycle();
    }

    /// Evict sessions whose heartbeat expired, then drop network objects
    /// whose owner is no longer in the world or whose entity is gone.
    pub fn on_sweep(&mut self, now: Instant) {
        for peer in sweeper::expired_sessions(&self.sessions, self.config.heartbeat_timeout(), now) {
            info!(%peer, "heartbeat expired");
            self.teardown(&peer, SessionState::Disconnected);
        }

        let live_users: HashSet<UserId> = self
            .sessions
            .values()
            .filter(|session| session.in_world())
            .filter_map(|session| session.user_id().cloned())
            .collect();
        let removed = sweeper::validate_network_objects(
            &mut self.world,
            &mut self.registry,
            &live_users,
            &mut self.pending_actions,
        );
        if !removed.is_empty() {
            info!(count = removed.len(), "swept orphaned network objects");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::services::InMemoryDirectory;
    use crate::transport::Outbound;

    fn server() -> (GameServer, mpsc::UnboundedReceiver<Outbound>) {
        let (handle, _events) = event_channel();
        let mut server = GameServer::new(
            ServerConfig::default(),
            Arc::new(InMemoryDirectory::new()),
            handle,
        );
        let (sink, outbound) = mpsc::unbounded_channel();
        server.attach_transport(sink);
        (server, outbound)
    }

    #[test]
    fn test_handle_reports_stopped_loop() {
        let (handle, events) = event_channel();
        assert!(handle.post(ServerEvent::Tick));
        drop(events);
        assert!(!handle.post(ServerEvent::Tick));
    }

    #[test]
    fn test_tick_without_data_path_only_flushes_actions() {
        let (mut server, mut outbound) = server();
        server.on_tick();
        assert!(outbound.try_recv().is_err());

        let network_id = server
            .spawn_server_object("lamp", SpawnParameters::default())
            .unwrap();
        assert_eq!(server.pending_actions().len(), 1);
        server.on_tick();
        assert!(matches!(
            outbound.try_recv(),
            Ok(Outbound::Broadcast(realm_net::ServerMessage::ActionData(actions)))
                if actions.len() == 1
        ));
        assert!(server.pending_actions().is_empty());
        assert_eq!(server.tick(), 2);
        assert!(server.registry().get(network_id).is_some());
    }

    #[test]
    fn test_destroy_object_notifies_before_release() {
        let (mut server, _outbound) = server();
        let network_id = server
            .spawn_server_object("lamp", SpawnParameters::default())
            .unwrap();
        let entity = server.registry().get(network_id).unwrap().entity;

        assert!(server.destroy_object(network_id));
        assert!(!server.destroy_object(network_id));
        assert!(!server.world().is_alive(entity));
        assert_eq!(
            server.pending_actions().last(),
            Some(&Action::DestroyObject { network_id })
        );
        // The tombstone still carries the id until the cycle closes.
        assert_eq!(
            server
                .world()
                .get_component_or_removed::<Networked>(entity)
                .map(|networked| networked.network_id),
            Some(network_id)
        );
        server.on_tick();
        assert!(server.world().get_component_or_removed::<Networked>(entity).is_none());
    }
}
