//! Heartbeat and liveness sweep.
//!
//! Every sweep interval the server reconciles the networked-object registry
//! against the users currently in the world and the entities still alive.
//! Orphans are announced with a `DestroyObject` action, dropped from the
//! registry, then released from the world.
//!
//! The sweep never disconnects anyone on its own. Heartbeat-based eviction
//! only happens when a timeout is configured; [`expired_sessions`] reports
//! the candidates and the server runs its normal disconnect path for them.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

use realm_ecs::World;
use realm_net::messages::Action;
use realm_net::{PeerId, UserId};

use crate::registry::{NetworkObject, NetworkObjectRegistry};
use crate::session::Session;

/// Remove orphaned network objects. A `DestroyObject` for each is appended
/// to `notifications` before the object leaves the registry.
pub fn validate_network_objects(
    world: &mut World,
    registry: &mut NetworkObjectRegistry,
    live_users: &HashSet<UserId>,
    notifications: &mut Vec<Action>,
) -> Vec<NetworkObject> {
    let removed = registry.validate_all(
        world,
        |owner| live_users.contains(owner),
        |object| {
            notifications.push(Action::DestroyObject {
                network_id: object.network_id,
            });
        },
    );
    for object in &removed {
        if world.is_alive(object.entity) {
            world.despawn(object.entity);
        }
    }
    removed
}

/// Sessions whose last heartbeat is older than `timeout`, oldest first.
#[must_use]
pub fn expired_sessions(
    sessions: &HashMap<PeerId, Session>,
    timeout: Option<Duration>,
    now: Instant,
) -> Vec<PeerId> {
    let Some(timeout) = timeout else {
        return Vec::new();
    };
    let mut expired: Vec<(&Session, Instant)> = sessions
        .values()
        .filter(|session| !session.state.is_terminal())
        .filter(|session| now.saturating_duration_since(session.last_heartbeat) > timeout)
        .map(|session| (session, session.last_heartbeat))
        .collect();
    expired.sort_by_key(|(session, last)| (*last, session.peer.clone()));
    expired
        .into_iter()
        .map(|(session, _)| session.peer.clone())
        .collect()
}
