mod common;

use std::time::Duration;

use glam::{Quat, Vec3};
use tokio::time::Instant;

use common::{Harness, INSTANCE, SPAWN, config, destroyed, directory};
use realm_gameserver::{Authority, Outbound, Responder, ServerEvent, SessionState};
use realm_net::messages::{
    Action, AuthorizationRequest, ClientMessage, MediaRequest, MediaResponse, Response,
    ServerMessage, SpawnParameters,
};
use realm_net::{NetworkId, PeerId, PoseRecord, UserId, WorldStateSnapshot, world_state};

#[tokio::test]
async fn test_authorize_join_and_receive_snapshot() {
    let mut harness = Harness::new();
    let peer = harness.connect("p1");

    let ack = harness.authorize(&peer, "u1").await;
    assert!(ack.success);
    assert_eq!(
        harness.server.session(&peer).unwrap().state,
        SessionState::Authorized
    );

    let joined = harness.join(&peer).await;
    assert!(joined.success);
    let network_id = joined.network_id.unwrap();
    assert_eq!(joined.position, SPAWN);
    assert_eq!(
        harness.server.session(&peer).unwrap().state,
        SessionState::InWorld
    );

    let (actions, snapshot) = harness.tick();
    assert!(actions.iter().any(|action| matches!(
        action,
        Action::SpawnObject { network_id: id, prefab, .. } if *id == network_id && prefab == "avatar"
    )));

    // What a second peer would decode from the data broadcast.
    let snapshot = snapshot.expect("snapshot broadcast");
    let pose = snapshot
        .pose
        .iter()
        .find(|pose| pose.network_id == network_id)
        .expect("avatar pose");
    assert_eq!(pose.position, SPAWN);
    assert_eq!(pose.rotation, Quat::IDENTITY);
    assert_eq!(snapshot.tick, 1);
}

#[tokio::test]
async fn test_authorization_without_user_id_fails() {
    let mut harness = Harness::new();
    let peer = harness.connect("p1");

    let response = harness
        .request(
            &peer,
            ClientMessage::Authorization(AuthorizationRequest {
                user_id: None,
                access_token: Some("t1".to_string()),
            }),
        )
        .await;
    let Response::Authorization(ack) = response else {
        panic!("unexpected response {response:?}");
    };
    assert!(!ack.success);
    assert!(!ack.message.unwrap_or_default().is_empty());
    assert_eq!(
        harness.server.session(&peer).unwrap().state,
        SessionState::Connected
    );

    let Response::JoinWorld(joined) = harness.request(&peer, ClientMessage::JoinWorld).await else {
        panic!("expected a join response");
    };
    assert!(!joined.success);
    assert!(harness.server.registry().is_empty());

    let response = harness
        .request(&peer, ClientMessage::Media(MediaRequest::RequestNearbyUsers))
        .await;
    assert!(matches!(response, Response::Rejected { .. }));
}

#[tokio::test]
async fn test_unknown_user_can_retry() {
    let mut harness = Harness::new();
    let peer = harness.connect("p1");

    let ack = harness.authorize(&peer, "u9").await;
    assert!(!ack.success);
    assert_eq!(
        harness.server.session(&peer).unwrap().state,
        SessionState::Connected
    );

    assert!(harness.authorize(&peer, "u1").await.success);
}

#[tokio::test(start_paused = true)]
async fn test_late_authorization_after_disconnect_is_discarded() {
    let mut harness =
        Harness::with_directory(common::directory().with_delay(Duration::from_millis(50)));
    let peer = harness.connect("p1");

    let (reply, ack) = Responder::new();
    harness.server.handle(ServerEvent::Message {
        peer: peer.clone(),
        message: ClientMessage::Authorization(AuthorizationRequest {
            user_id: Some("u1".to_string()),
            access_token: Some("t1".to_string()),
        }),
        reply: Some(reply),
    });
    harness.server.handle(ServerEvent::Disconnected { peer: peer.clone() });
    assert!(harness.server.session(&peer).is_none());

    harness.pump_one().await;
    assert!(harness.server.session(&peer).is_none());
    assert!(ack.await.is_err());
    assert!(harness.server.registry().is_empty());
}

#[tokio::test]
async fn test_double_join_keeps_one_avatar() {
    let mut harness = Harness::new();
    let (peer, network_id) = harness.enter("p1", "u1").await;

    let Response::JoinWorld(again) = harness.request(&peer, ClientMessage::JoinWorld).await else {
        panic!("expected a join response");
    };
    assert!(again.success);
    assert_eq!(again.network_id, Some(network_id));
    assert_eq!(harness.server.registry().len(), 1);
}

#[tokio::test]
async fn test_late_joiner_receives_existing_objects() {
    let mut harness = Harness::new();
    let (_, first) = harness.enter("p1", "u1").await;
    let (_, second) = harness.enter("p2", "u2").await;
    assert_ne!(first, second);
    harness.tick();

    // u2 signs in again from a new connection.
    let peer = harness.connect("p3");
    assert!(harness.authorize(&peer, "u2").await.success);
    let joined = harness.join(&peer).await;
    assert!(joined.success);
    assert!(joined.cached_actions.iter().any(|action| matches!(
        action,
        Action::SpawnObject { network_id, .. } if *network_id == first
    )));

    // The stale connection is replaced and its avatar destroyed.
    assert!(harness.server.session(&PeerId::from("p2")).is_none());
    assert!(harness.server.session(&peer).is_some());
    let (actions, _) = harness.tick();
    assert_eq!(destroyed(&actions, second), 1);
    assert_eq!(harness.server.registry().len(), 2);
}

#[tokio::test]
async fn test_disconnect_releases_avatar_once() {
    let mut harness = Harness::new();
    let (peer, network_id) = harness.enter("p1", "u1").await;
    harness.tick();

    harness.server.handle(ServerEvent::Disconnected { peer: peer.clone() });
    harness.server.handle(ServerEvent::Disconnected { peer: peer.clone() });
    let (actions, snapshot) = harness.tick();

    assert_eq!(destroyed(&actions, network_id), 1);
    assert!(harness.server.registry().is_empty());
    assert!(snapshot.unwrap().pose.is_empty());
    assert_eq!(harness.server.session_count(), 0);
}

#[tokio::test]
async fn test_liveness_sweep_removes_orphans() {
    let mut harness = Harness::new();
    let network_id = harness
        .server
        .spawn_object(
            UserId::from("ghost"),
            Authority::Remote,
            "crate",
            SpawnParameters::default(),
        )
        .unwrap();
    let prop = harness
        .server
        .spawn_server_object("lamp", SpawnParameters::default())
        .unwrap();
    harness.tick();

    harness.server.on_sweep(Instant::now());
    let (actions, _) = harness.tick();
    assert_eq!(destroyed(&actions, network_id), 1);
    assert_eq!(
        harness
            .server
            .registry()
            .resolve(&UserId::from("ghost"), network_id),
        None
    );
    assert!(harness.server.registry().get(prop).is_some());

    harness.server.on_sweep(Instant::now());
    let (actions, _) = harness.tick();
    assert_eq!(destroyed(&actions, network_id), 0);
}

#[tokio::test]
async fn test_destroying_unknown_object_is_a_noop() {
    let mut harness = Harness::new();
    assert!(!harness.server.destroy_object(NetworkId(999)));
    let (actions, _) = harness.tick();
    assert!(actions.is_empty());
}

#[tokio::test]
async fn test_peer_pose_drives_its_avatar_only() {
    let mut harness = Harness::new();
    let (p1, avatar) = harness.enter("p1", "u1").await;
    let (_, other) = harness.enter("p2", "u2").await;
    harness.tick();

    let moved = Vec3::new(3.0, 0.0, -1.0);
    let pose = |network_id| PoseRecord {
        network_id,
        position: moved,
        rotation: Quat::IDENTITY,
        linear_velocity: Vec3::X,
        angular_velocity: Vec3::ZERO,
    };
    let mut snapshot = WorldStateSnapshot::new(5);
    snapshot.pose = vec![pose(avatar), pose(other)];
    harness.server.handle(ServerEvent::Data {
        peer: p1.clone(),
        bytes: world_state::encode(&snapshot),
    });

    // An older tick arriving late is dropped.
    let mut stale = WorldStateSnapshot::new(4);
    stale.pose = vec![PoseRecord {
        position: Vec3::splat(9.0),
        ..pose(avatar)
    }];
    harness.server.handle(ServerEvent::Data {
        peer: p1.clone(),
        bytes: world_state::encode(&stale),
    });
    // So is garbage.
    harness.server.handle(ServerEvent::Data {
        peer: p1,
        bytes: vec![1, 2, 3],
    });

    let (_, broadcast) = harness.tick();
    let broadcast = broadcast.unwrap();
    let find = |id| broadcast.pose.iter().find(|p| p.network_id == id).unwrap();
    assert_eq!(find(avatar).position, moved);
    assert_eq!(find(avatar).linear_velocity, Vec3::X);
    assert_eq!(find(other).position, SPAWN);
}

#[tokio::test]
async fn test_peer_actions_are_stamped_and_checked() {
    let mut harness = Harness::new();
    let (p1, avatar) = harness.enter("p1", "u1").await;
    let (p2, _) = harness.enter("p2", "u2").await;
    harness.tick();

    harness.notify(
        &p1,
        ClientMessage::ActionData(vec![
            Action::Custom {
                from: Some(UserId::from("u2")),
                name: "wave".to_string(),
                payload: serde_json::json!({ "hand": "left" }),
            },
            Action::SpawnObject {
                owner: UserId::from("u2"),
                network_id: NetworkId(500),
                prefab: "ball".to_string(),
                parameters: SpawnParameters::default(),
            },
            Action::DestroyObject { network_id: avatar },
        ]),
    );
    let (actions, _) = harness.tick();

    assert!(actions.iter().any(|action| matches!(
        action,
        Action::Custom { from: Some(from), name, .. } if from.as_str() == "u1" && name == "wave"
    )));
    let ball = actions
        .iter()
        .find_map(|action| match action {
            Action::SpawnObject {
                owner,
                network_id,
                prefab,
                ..
            } if prefab == "ball" => Some((owner.clone(), *network_id)),
            _ => None,
        })
        .expect("ball spawned");
    assert_eq!(ball.0, UserId::from("u1"));
    assert_ne!(ball.1, NetworkId(500));
    assert_eq!(destroyed(&actions, avatar), 0);

    // Another user may not destroy it.
    harness.notify(
        &p2,
        ClientMessage::ActionData(vec![Action::DestroyObject { network_id: ball.1 }]),
    );
    let (actions, _) = harness.tick();
    assert_eq!(destroyed(&actions, ball.1), 0);

    harness.notify(
        &p1,
        ClientMessage::ActionData(vec![Action::DestroyObject { network_id: ball.1 }]),
    );
    let (actions, _) = harness.tick();
    assert_eq!(destroyed(&actions, ball.1), 1);
}

#[tokio::test]
async fn test_kick_broadcasts_and_tears_down() {
    let mut harness = Harness::new();
    let (peer, network_id) = harness.enter("p1", "u1").await;
    harness.tick();

    harness.server.handle(ServerEvent::Kick { peer: peer.clone() });
    let sent = harness.drain();
    assert!(sent.contains(&Outbound::Broadcast(ServerMessage::Kick(peer.clone()))));
    assert!(harness.server.session(&peer).is_none());
    let (actions, _) = harness.tick();
    assert_eq!(destroyed(&actions, network_id), 1);
}

#[tokio::test]
async fn test_leave_world_acknowledges() {
    let mut harness = Harness::new();
    let (peer, _) = harness.enter("p1", "u1").await;
    let response = harness.request(&peer, ClientMessage::LeaveWorld).await;
    assert!(matches!(response, Response::LeaveWorld(ack) if ack.success));
    assert!(harness.server.registry().is_empty());

    let response = harness.request(&peer, ClientMessage::Heartbeat).await;
    assert!(matches!(response, Response::Rejected { .. }));
}

#[tokio::test]
async fn test_reliable_and_state_messages_are_relayed() {
    let mut harness = Harness::new();
    let (peer, _) = harness.enter("p1", "u1").await;
    harness.drain();

    harness.notify(&peer, ClientMessage::ReliableMessage(serde_json::json!({ "chat": "hi" })));
    harness.notify(&peer, ClientMessage::UpdateNetworkState(serde_json::json!({ "door": "open" })));
    let sent = harness.drain();
    assert_eq!(
        sent,
        vec![
            Outbound::Broadcast(ServerMessage::ReliableMessage(serde_json::json!({ "chat": "hi" }))),
            Outbound::Broadcast(ServerMessage::UpdateNetworkState(serde_json::json!({ "door": "open" }))),
        ]
    );
}

#[tokio::test]
async fn test_media_failure_stays_with_the_requester() {
    let mut harness = Harness::new();
    let (p1, _) = harness.enter("p1", "u1").await;
    let (p2, _) = harness.enter("p2", "u2").await;

    let response = harness
        .request(
            &p1,
            ClientMessage::Media(MediaRequest::TransportConnect {
                transport_id: "missing".to_string(),
                dtls_parameters: serde_json::json!({}),
            }),
        )
        .await;
    assert!(matches!(response, Response::Media(MediaResponse::Error { .. })));
    assert_eq!(
        harness.server.session(&p1).unwrap().state,
        SessionState::InWorld
    );

    let response = harness
        .request(&p2, ClientMessage::Media(MediaRequest::RequestNearbyUsers))
        .await;
    assert_eq!(
        response,
        Response::Media(MediaResponse::NearbyUsers {
            user_ids: vec![UserId::from("u1")]
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_keeps_session_and_silence_evicts() {
    let mut harness = Harness::with_config(
        directory(),
        realm_gameserver::ServerConfig {
            heartbeat_timeout_secs: Some(30),
            ..config()
        },
    );
    let (steady, steady_avatar) = harness.enter("p1", "u1").await;
    let (silent, silent_avatar) = harness.enter("p2", "u2").await;
    harness.tick();

    tokio::time::advance(Duration::from_secs(20)).await;
    harness.notify(&steady, ClientMessage::Heartbeat);
    let session = harness.server.session(&steady).unwrap();
    assert_eq!(session.last_heartbeat, Instant::now());
    assert_eq!(session.state, SessionState::InWorld);
    assert!(harness.server.pending_actions().is_empty());
    assert!(harness.drain().is_empty());

    tokio::time::advance(Duration::from_secs(15)).await;
    harness.server.on_sweep(Instant::now());
    assert!(harness.server.session(&silent).is_none());
    assert_eq!(
        harness.server.session(&steady).unwrap().state,
        SessionState::InWorld
    );

    let (actions, snapshot) = harness.tick();
    assert_eq!(destroyed(&actions, silent_avatar), 1);
    assert_eq!(destroyed(&actions, steady_avatar), 0);
    assert!(harness.server.registry().get(silent_avatar).is_none());
    let snapshot = snapshot.unwrap();
    assert_eq!(snapshot.pose.len(), 1);
    assert_eq!(snapshot.pose[0].network_id, steady_avatar);

    harness.server.on_sweep(Instant::now());
    let (actions, _) = harness.tick();
    assert_eq!(destroyed(&actions, silent_avatar), 0);
}

#[tokio::test(start_paused = true)]
async fn test_silent_session_survives_without_timeout() {
    let mut harness = Harness::new();
    let (peer, network_id) = harness.enter("p1", "u1").await;
    harness.tick();

    tokio::time::advance(Duration::from_secs(3600)).await;
    harness.server.on_sweep(Instant::now());

    assert_eq!(
        harness.server.session(&peer).unwrap().state,
        SessionState::InWorld
    );
    let (actions, _) = harness.tick();
    assert_eq!(destroyed(&actions, network_id), 0);
    assert!(harness.server.registry().get(network_id).is_some());
}

#[tokio::test]
async fn test_instance_record_tracks_users_in_world() {
    let mut harness = Harness::new();
    let instance = harness.server.preload_location().await.unwrap();
    assert_eq!(instance.id, INSTANCE);
    assert_eq!(harness.directory.instance(INSTANCE).unwrap().current_users, 0);

    let (first, _) = harness.enter("p1", "u1").await;
    harness.enter("p2", "u2").await;
    assert_eq!(harness.directory.instance(INSTANCE).unwrap().current_users, 2);

    harness.server.handle(ServerEvent::Disconnected { peer: first });
    let record = harness.directory.instance(INSTANCE).unwrap();
    assert_eq!(record.current_users, 1);
    assert!(!record.ended);
}
