//! Drives a [`GameServer`] directly, without NATS.

#![allow(dead_code)]

use std::sync::Arc;

use glam::Vec3;
use tokio::sync::mpsc;

use realm_gameserver::services::{AvatarResource, ResourceKind, UserRecord};
use realm_gameserver::{
    GameServer, InMemoryDirectory, Outbound, Responder, ServerConfig, ServerEvent, event_channel,
};
use realm_net::messages::{
    Ack, Action, AuthorizationRequest, ClientMessage, JoinWorldResponse, Response, ServerMessage,
};
use realm_net::{NetworkId, PeerId, UserId, WorldStateSnapshot, world_state};

pub const SPAWN: Vec3 = Vec3::new(1.0, 0.0, 2.0);

pub fn directory() -> InMemoryDirectory {
    let directory = InMemoryDirectory::new();
    for (id, name) in [("u1", "Ada"), ("u2", "Grace")] {
        directory.insert_user(UserRecord {
            id: UserId::from(id),
            name: name.to_string(),
            avatar_id: "robot".to_string(),
            instance_id: None,
        });
    }
    directory.insert_avatar_resource(AvatarResource {
        name: "robot".to_string(),
        url: "https://cdn/robot.glb".to_string(),
        kind: ResourceKind::Avatar,
        user_id: None,
    });
    directory
}

pub const INSTANCE: &str = "instance-1";

pub fn config() -> ServerConfig {
    ServerConfig {
        instance_id: INSTANCE.to_string(),
        spawn_position: SPAWN,
        ..ServerConfig::default()
    }
}

pub struct Harness {
    pub server: GameServer,
    pub directory: InMemoryDirectory,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_directory(directory())
    }

    pub fn with_directory(directory: InMemoryDirectory) -> Self {
        Self::with_config(directory, config())
    }

    pub fn with_config(directory: InMemoryDirectory, config: ServerConfig) -> Self {
        let (handle, events) = event_channel();
        let mut server = GameServer::new(config, Arc::new(directory.clone()), handle);
        let (sink, outbound) = mpsc::unbounded_channel();
        server.attach_transport(sink);
        server.start_media().unwrap();
        server.init_outgoing_data_path().unwrap();
        Self {
            server,
            directory,
            events,
            outbound,
        }
    }

    pub fn connect(&mut self, peer: &str) -> PeerId {
        let peer = PeerId::from(peer);
        self.server.handle(ServerEvent::Connected { peer: peer.clone() });
        peer
    }

    /// Send a request and run the loop until it is acknowledged.
    pub async fn request(&mut self, peer: &PeerId, message: ClientMessage) -> Response {
        let (reply, mut ack) = Responder::new();
        self.server.handle(ServerEvent::Message {
            peer: peer.clone(),
            message,
            reply: Some(reply),
        });
        loop {
            tokio::select! {
                response = &mut ack => return response.expect("request was dropped"),
                Some(event) = self.events.recv() => self.server.handle(event),
            }
        }
    }

    pub fn notify(&mut self, peer: &PeerId, message: ClientMessage) {
        self.server.handle(ServerEvent::Message {
            peer: peer.clone(),
            message,
            reply: None,
        });
    }

    /// Handle the next event spawned work posted back.
    pub async fn pump_one(&mut self) {
        let event = self.events.recv().await.expect("event channel closed");
        self.server.handle(event);
    }

    pub async fn authorize(&mut self, peer: &PeerId, user: &str) -> Ack {
        let response = self
            .request(
                peer,
                ClientMessage::Authorization(AuthorizationRequest {
                    user_id: Some(user.to_string()),
                    access_token: Some("t1".to_string()),
                }),
            )
            .await;
        match response {
            Response::Authorization(ack) => ack,
            other => panic!("unexpected response {other:?}"),
        }
    }

    pub async fn join(&mut self, peer: &PeerId) -> JoinWorldResponse {
        match self.request(peer, ClientMessage::ConnectToWorld).await {
            Response::ConnectToWorld(response) => assert!(response.success, "{response:?}"),
            other => panic!("unexpected response {other:?}"),
        }
        match self.request(peer, ClientMessage::JoinWorld).await {
            Response::JoinWorld(response) => response,
            other => panic!("unexpected response {other:?}"),
        }
    }

    /// Connect, authorize and join; returns the avatar's network id.
    pub async fn enter(&mut self, peer: &str, user: &str) -> (PeerId, NetworkId) {
        let peer = self.connect(peer);
        assert!(self.authorize(&peer, user).await.success);
        let joined = self.join(&peer).await;
        assert!(joined.success, "{joined:?}");
        (peer, joined.network_id.expect("avatar network id"))
    }

    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut sent = Vec::new();
        while let Ok(outbound) = self.outbound.try_recv() {
            sent.push(outbound);
        }
        sent
    }

    /// Run one tick and return what it broadcast.
    pub fn tick(&mut self) -> (Vec<Action>, Option<WorldStateSnapshot>) {
        self.server.on_tick();
        let mut actions = Vec::new();
        let mut snapshot = None;
        for outbound in self.drain() {
            match outbound {
                Outbound::Broadcast(ServerMessage::ActionData(batch)) => actions.extend(batch),
                Outbound::Data(bytes) => snapshot = Some(world_state::decode(&bytes).unwrap()),
                _ => {}
            }
        }
        (actions, snapshot)
    }
}

pub fn destroyed(actions: &[Action], network_id: NetworkId) -> usize {
    actions
        .iter()
        .filter(|action| matches!(action, Action::DestroyObject { network_id: id } if *id == network_id))
        .count()
}
