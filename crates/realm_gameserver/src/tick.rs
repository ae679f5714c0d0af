//! World-state building, peer state application and the fixed-interval
//! timers that drive the event loop.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use realm_ecs::World;
use realm_math::{IkTarget, IkTargets, Transform3D, Velocity3D};
use realm_net::world_state::{IkPoseRecord, PoseRecord, WorldStateSnapshot};
use realm_net::UserId;

use crate::registry::{Authority, NetworkObjectRegistry};

/// Snapshot every networked entity that has a [`Transform3D`], in network id
/// order. Objects with [`IkTargets`] also get an IK record.
#[must_use]
pub fn build_world_state(
    world: &World,
    registry: &NetworkObjectRegistry,
    tick: u32,
) -> WorldStateSnapshot {
    let mut snapshot = WorldStateSnapshot::new(tick);
    for object in registry.iter() {
        let Some(transform) = world.get_component::<Transform3D>(object.entity) else {
            continue;
        };
        let velocity = world
            .get_component::<Velocity3D>(object.entity)
            .copied()
            .unwrap_or_default();
        snapshot.pose.push(PoseRecord {
            network_id: object.network_id,
            position: transform.position,
            rotation: transform.rotation,
            linear_velocity: velocity.linear,
            angular_velocity: velocity.angular,
        });

        if let Some(ik) = world.get_component::<IkTargets>(object.entity) {
            snapshot.ik_pose.push(IkPoseRecord {
                network_id: object.network_id,
                head_position: ik.head.position,
                head_rotation: ik.head.rotation,
                left_position: ik.left_hand.position,
                left_rotation: ik.left_hand.rotation,
                right_position: ik.right_hand.position,
                right_rotation: ik.right_hand.rotation,
            });
        }
    }
    snapshot
}

/// Apply a peer's snapshot to the objects it drives. Records for objects
/// the sender does not own, or that the server simulates, are skipped.
/// Returns how many records were applied.
pub fn apply_world_state(
    world: &mut World,
    registry: &NetworkObjectRegistry,
    sender: &UserId,
    snapshot: &WorldStateSnapshot,
) -> usize {
    let mut applied = 0;
    let driven_by_sender = |network_id| {
        registry
            .get(network_id)
            .filter(|object| &object.owner == sender && object.authority == Authority::Remote)
            .map(|object| object.entity)
    };

    for pose in &snapshot.pose {
        let Some(entity) = driven_by_sender(pose.network_id) else {
            debug!(network_id = %pose.network_id, %sender, "ignoring pose for object not driven by sender");
            continue;
        };
        match world.get_component_mut::<Transform3D>(entity) {
            Some(transform) => transform.set_pose(pose.position, pose.rotation),
            None => {
                world.add_component(
                    entity,
                    Transform3D::from_position_rotation(pose.position, pose.rotation),
                );
            }
        }
        world.add_component(
            entity,
            Velocity3D::new(pose.linear_velocity, pose.angular_velocity),
        );
        applied += 1;
    }

    for ik in &snapshot.ik_pose {
        let Some(entity) = driven_by_sender(ik.network_id) else {
            continue;
        };
        world.add_component(
            entity,
            IkTargets {
                head: IkTarget::new(ik.head_position, ik.head_rotation),
                left_hand: IkTarget::new(ik.left_position, ik.left_rotation),
                right_hand: IkTarget::new(ik.right_position, ik.right_rotation),
            },
        );
        applied += 1;
    }
    applied
}

/// Send `make_event()` into `events` every `period` until the receiver is
/// gone.
pub fn spawn_interval<E, F>(
    name: &'static str,
    period: Duration,
    events: mpsc::UnboundedSender<E>,
    make_event: F,
) -> JoinHandle<()>
where
    E: Send + 'static,
    F: Fn() -> E + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(timer = name, period_ms = period.as_millis() as u64, "timer started");
        loop {
            interval.tick().await;
            if events.send(make_event()).is_err() {
                debug!(timer = name, "event loop gone, timer stopped");
                break;
            }
        }
    })
}
