//! Session lifecycle handlers.

use std::sync::Arc;

use glam::{Quat, Vec3};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use realm_net::messages::{
    Ack, Action, AuthorizationRequest, ChannelKey, ClientMessage, ConnectToWorldResponse,
    JoinWorldResponse, Response, SpawnParameters,
};
use realm_net::{NetworkId, PeerId, UserId, world_state};

use super::{GameServer, Responder, ServerEvent, respond};
use crate::components::Avatar;
use crate::registry::{Authority, NetworkObject};
use crate::services::{AvatarDetail, InstancePatch, LookupError, UserRecord, WorldServices};
use crate::session::{Session, SessionState};
use crate::tick::apply_world_state;

const AVATAR_PREFAB: &str = "avatar";

fn rejected(message: impl Into<String>) -> Response {
    Response::Rejected {
        message: message.into(),
    }
}

fn join_failed(message: impl Into<String>) -> Response {
    Response::JoinWorld(JoinWorldResponse {
        success: false,
        message: Some(message.into()),
        network_id: None,
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        tick: 0,
        cached_actions: Vec::new(),
    })
}

/// Resolve a user and the avatar it will appear as.
async fn lookup_identity(
    services: Arc<dyn WorldServices>,
    user_id: UserId,
) -> Result<(UserRecord, AvatarDetail), LookupError> {
    let user = services.find_user(&user_id).await?;
    let resources = services
        .find_avatar_resources(&user.avatar_id, &user.id)
        .await?;
    let detail = AvatarDetail::from_resources(&user.avatar_id, &resources);
    Ok((user, detail))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl GameServer {
    pub(super) fn on_connected(&mut self, peer: PeerId) {
        if self.sessions.contains_key(&peer) {
            debug!(%peer, "peer already connected");
            return;
        }
        info!(%peer, "peer connected");
        self.sessions
            .insert(peer.clone(), Session::new(peer, Instant::now()));
    }

    pub(super) fn on_message(
        &mut self,
        peer: &PeerId,
        message: ClientMessage,
        reply: Option<Responder>,
    ) {
        let kind = message.message_type();
        let Some(session) = self.sessions.get_mut(peer) else {
            debug!(%peer, %kind, "message from unknown peer");
            respond(reply, rejected("peer is not connected"));
            return;
        };
        if !session.state.accepts(kind) {
            debug!(%peer, %kind, state = %session.state, "message not accepted in this state");
            respond(
                reply,
                rejected(format!("{kind} is not accepted while {}", session.state)),
            );
            return;
        }

        match message {
            ClientMessage::Authorization(request) => self.on_authorization(peer, request, reply),
            ClientMessage::ConnectToWorld => self.on_connect_to_world(peer, reply),
            ClientMessage::JoinWorld => self.on_join_world(peer, reply),
            ClientMessage::LeaveWorld => self.on_leave_world(peer, reply),
            ClientMessage::ActionData(actions) => self.on_actions(peer, actions),
            ClientMessage::ReliableMessage(payload) => self.transport.send_reliable_data(payload),
            ClientMessage::UpdateNetworkState(patch) => {
                self.transport.send_network_state_update(patch);
            }
            ClientMessage::Heartbeat => session.heartbeat(Instant::now()),
            ClientMessage::Media(request) => {
                let response = self.on_media(peer, request);
                respond(reply, Response::Media(response));
            }
        }
    }

    // ── Authorization ───────────────────────────────────────────────────────

    fn on_authorization(
        &mut self,
        peer: &PeerId,
        request: AuthorizationRequest,
        reply: Option<Responder>,
    ) {
        let Some(session) = self.sessions.get_mut(peer) else {
            return;
        };
        let user_id = non_empty(request.user_id);
        let token = non_empty(request.access_token);

        if session.state.is_authorized() {
            let response = if user_id.as_deref() == session.user_id().map(UserId::as_str) {
                Ack::ok()
            } else {
                Ack::failed("session is already authorized as another user")
            };
            respond(reply, Response::Authorization(response));
            return;
        }

        let (Some(user_id), Some(_token)) = (user_id, token) else {
            warn!(%peer, "authorization without user id or access token");
            respond(
                reply,
                Response::Authorization(Ack::failed("user id and access token are required")),
            );
            return;
        };

        session.state = SessionState::Authorizing;
        session.auth_attempt += 1;
        let attempt = session.auth_attempt;
        debug!(%peer, user = %user_id, attempt, "authorizing");

        let services = Arc::clone(&self.services);
        let events = self.events.clone();
        let peer = peer.clone();
        tokio::spawn(async move {
            let result = lookup_identity(services, UserId::from(user_id)).await;
            events.post(ServerEvent::AuthorizationResolved {
                peer,
                attempt,
                result,
                reply,
            });
        });
    }

    pub(super) fn on_authorization_resolved(
        &mut self,
        peer: &PeerId,
        attempt: u64,
        result: Result<(UserRecord, AvatarDetail), LookupError>,
        reply: Option<Responder>,
    ) {
        let Some(session) = self.sessions.get_mut(peer) else {
            debug!(%peer, attempt, "authorization finished after the session closed, discarded");
            return;
        };
        if session.auth_attempt != attempt || session.state != SessionState::Authorizing {
            debug!(%peer, attempt, current = session.auth_attempt, state = %session.state, "stale authorization result, discarded");
            respond(
                reply,
                Response::Authorization(Ack::failed("superseded by a newer authorization")),
            );
            return;
        }

        match result {
            Ok((user, avatar)) => {
                info!(%peer, user = %user.id, avatar = %avatar.avatar_id, "authorized");
                session.user = Some(user);
                session.avatar = Some(avatar);
                session.state = SessionState::Authorized;
                respond(reply, Response::Authorization(Ack::ok()));
            }
            Err(error) => {
                warn!(%peer, %error, "authorization failed");
                session.state = SessionState::Connected;
                respond(reply, Response::Authorization(Ack::failed(error.to_string())));
            }
        }
    }

    // ── World entry ─────────────────────────────────────────────────────────

    fn on_connect_to_world(&mut self, peer: &PeerId, reply: Option<Responder>) {
        let Some(session) = self.sessions.get_mut(peer) else {
            return;
        };
        if !session.state.is_authorized() {
            respond(
                reply,
                Response::ConnectToWorld(ConnectToWorldResponse {
                    success: false,
                    message: Some(format!("not authorized ({})", session.state)),
                    router_rtp_capabilities: Value::Null,
                }),
            );
            return;
        }
        if session.state == SessionState::Authorized {
            session.state = SessionState::Joining;
        }
        let router_rtp_capabilities = self
            .media
            .router_capabilities(&ChannelKey::Instance)
            .unwrap_or_else(|error| {
                debug!(%peer, %error, "no instance router yet");
                Value::Null
            });
        debug!(%peer, "connected to world");
        respond(
            reply,
            Response::ConnectToWorld(ConnectToWorldResponse {
                success: true,
                message: None,
                router_rtp_capabilities,
            }),
        );
    }

    fn on_join_world(&mut self, peer: &PeerId, reply: Option<Responder>) {
        let Some(session) = self.sessions.get(peer) else {
            return;
        };
        match session.state {
            SessionState::Joining => {}
            SessionState::InWorld => {
                // Repeated join: hand back the avatar that already exists.
                let response = self.join_response(session.avatar_network_id);
                respond(reply, response);
                return;
            }
            state => {
                respond(reply, join_failed(format!("ConnectToWorld first ({state})")));
                return;
            }
        }
        let (Some(user), Some(detail)) = (session.user.clone(), session.avatar.clone()) else {
            respond(reply, join_failed("session has no user"));
            return;
        };

        // The same user joining again from a new connection replaces the old one.
        let stale: Vec<PeerId> = self
            .sessions
            .values()
            .filter(|other| &other.peer != peer && other.in_world())
            .filter(|other| other.user_id() == Some(&user.id))
            .map(|other| other.peer.clone())
            .collect();
        for other in stale {
            info!(peer = %other, user = %user.id, "replacing stale session of rejoining user");
            self.on_kick(&other);
        }

        let parameters = SpawnParameters {
            position: self.config.spawn_position,
            rotation: Quat::IDENTITY,
        };
        let network_id =
            match self.spawn_object(user.id.clone(), Authority::Remote, AVATAR_PREFAB, parameters) {
                Ok(network_id) => network_id,
                Err(error) => {
                    warn!(%peer, %error, "avatar spawn failed");
                    respond(reply, join_failed(error.to_string()));
                    return;
                }
            };
        if let Some(entity) = self.registry.get(network_id).map(|object| object.entity) {
            self.world.add_component(
                entity,
                Avatar {
                    user: user.id.clone(),
                    name: user.name.clone(),
                    detail,
                },
            );
        }

        if let Some(session) = self.sessions.get_mut(peer) {
            session.state = SessionState::InWorld;
            session.avatar_network_id = Some(network_id);
        }
        info!(%peer, user = %user.id, %network_id, "joined world");
        self.report_instance_users();
        let response = self.join_response(Some(network_id));
        respond(reply, response);
    }

    fn join_response(&self, avatar: Option<NetworkId>) -> Response {
        let Some(network_id) = avatar else {
            return join_failed("session has no avatar");
        };
        let parameters = self
            .registry
            .get(network_id)
            .map(|object| object.parameters)
            .unwrap_or_default();
        let cached_actions = self
            .registry
            .iter()
            .filter(|object| object.network_id != network_id)
            .map(NetworkObject::spawn_action)
            .collect();
        Response::JoinWorld(JoinWorldResponse {
            success: true,
            message: None,
            network_id: Some(network_id),
            position: parameters.position,
            rotation: parameters.rotation,
            tick: self.tick,
            cached_actions,
        })
    }

    fn on_leave_world(&mut self, peer: &PeerId, reply: Option<Responder>) {
        self.teardown(peer, SessionState::Leaving);
        respond(reply, Response::LeaveWorld(Ack::ok()));
    }

    // ── In-world traffic ────────────────────────────────────────────────────

    fn on_actions(&mut self, peer: &PeerId, actions: Vec<Action>) {
        let Some(session) = self.sessions.get(peer) else {
            return;
        };
        let Some(user) = session.user_id().cloned() else {
            return;
        };
        let avatar = session.avatar_network_id;

        for action in actions {
            match action {
                Action::Custom { name, payload, .. } => {
                    self.pending_actions.push(Action::Custom {
                        from: Some(user.clone()),
                        name,
                        payload,
                    });
                }
                Action::SpawnObject {
                    prefab, parameters, ..
                } => {
                    if let Err(error) =
                        self.spawn_object(user.clone(), Authority::Remote, &prefab, parameters)
                    {
                        warn!(%peer, %error, "peer spawn rejected");
                    }
                }
                Action::DestroyObject { network_id } => {
                    let owned = self.registry.resolve(&user, network_id).is_some();
                    if !owned || Some(network_id) == avatar {
                        warn!(%peer, %network_id, "peer may not destroy this object");
                        continue;
                    }
                    self.destroy_object(network_id);
                }
            }
        }
    }

    pub(super) fn on_data(&mut self, peer: &PeerId, bytes: &[u8]) {
        let Some(session) = self.sessions.get_mut(peer) else {
            debug!(%peer, "data from unknown peer");
            return;
        };
        if !session.in_world() {
            debug!(%peer, state = %session.state, "data before joining, dropped");
            return;
        }
        let Ok(snapshot) = world_state::decode(bytes) else {
            return;
        };
        if !session.inbound_ticks.accept(snapshot.tick) {
            debug!(%peer, tick = snapshot.tick, last = ?session.inbound_ticks.last(), "stale world state, dropped");
            return;
        }
        let Some(user) = session.user_id().cloned() else {
            return;
        };
        apply_world_state(&mut self.world, &self.registry, &user, &snapshot);
    }

    // ── Teardown ────────────────────────────────────────────────────────────

    pub(super) fn on_disconnected(&mut self, peer: &PeerId) {
        self.teardown(peer, SessionState::Disconnected);
    }

    pub(super) fn on_kick(&mut self, peer: &PeerId) {
        if !self.sessions.contains_key(peer) {
            debug!(%peer, "kick: unknown peer");
            return;
        }
        self.transport.kick(peer);
        self.teardown(peer, SessionState::Leaving);
    }

    /// Close a session: release its network objects and media, then forget
    /// it. Returns `false` if the session was already gone.
    pub(super) fn teardown(&mut self, peer: &PeerId, state: SessionState) -> bool {
        let Some(mut session) = self.sessions.remove(peer) else {
            debug!(%peer, "session already closed");
            return false;
        };
        let was_in_world = session.in_world();
        session.state = state;

        let mut objects = 0;
        if was_in_world && let Some(user) = session.user_id() {
            for network_id in self.registry.owned_by(user) {
                if self.destroy_object(network_id) {
                    objects += 1;
                }
            }
        }
        let media = self.media.release_peer(peer);
        info!(%peer, %state, user = ?session.user_id().map(UserId::as_str), objects, transports = media.transports, "session closed");

        if was_in_world {
            self.report_instance_users();
        }
        true
    }

    /// Push the current in-world user count to the instance store.
    fn report_instance_users(&self) {
        let Some(instance) = &self.instance else {
            debug!("no instance record yet, user count not reported");
            return;
        };
        let current_users = self.sessions.values().filter(|s| s.in_world()).count();
        let instance_id = instance.id.clone();
        let update = self
            .services
            .patch_instance(&instance_id, InstancePatch { current_users });
        tokio::spawn(async move {
            if let Err(error) = update.await {
                warn!(instance = %instance_id, %error, "instance update failed");
            }
        });
    }
}
