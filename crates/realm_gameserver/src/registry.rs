//! Networked-object registry.
//!
//! Maps the wire identity of a replicated object (owner + network id) to the
//! local entity backing it. Network ids come from a single server-side
//! counter, so an id alone is unique world-wide; the owner is checked on
//! resolution so a peer cannot address another user's object by guessing ids.
//!
//! Removal always goes registry first, entity second: callers despawn here,
//! then release the entity from the [`World`].

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use realm_ecs::{Entity, World};
use realm_net::messages::{Action, SpawnParameters};
use realm_net::{NetworkId, UserId};

/// Which side is the source of truth for an object's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// The server simulates the object.
    Local,
    /// The owning peer drives the object and the server relays it.
    Remote,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkObject {
    pub owner: UserId,
    pub network_id: NetworkId,
    pub entity: Entity,
    pub authority: Authority,
    pub prefab: String,
    pub parameters: SpawnParameters,
}

impl NetworkObject {
    /// The action that announces this object to peers.
    #[must_use]
    pub fn spawn_action(&self) -> Action {
        Action::SpawnObject {
            owner: self.owner.clone(),
            network_id: self.network_id,
            prefab: self.prefab.clone(),
            parameters: self.parameters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("network object {owner}/{network_id} already maps to entity {existing}, refusing {requested}")]
    Conflict {
        owner: UserId,
        network_id: NetworkId,
        existing: Entity,
        requested: Entity,
    },

    #[error("entity {entity} is already networked as {network_id}")]
    EntityAlreadyNetworked {
        entity: Entity,
        network_id: NetworkId,
    },
}

#[derive(Debug)]
pub struct NetworkObjectRegistry {
    objects: BTreeMap<NetworkId, NetworkObject>,
    by_entity: HashMap<Entity, NetworkId>,
    next_id: u32,
}

impl NetworkObjectRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            by_entity: HashMap::new(),
            next_id: 1,
        }
    }

    /// Hand out an id no live object uses.
    pub fn allocate_network_id(&mut self) -> NetworkId {
        loop {
            let candidate = NetworkId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1).max(1);
            if !self.objects.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Bind `(owner, network_id)` to `entity`.
    ///
    /// Spawning the same binding again is accepted and leaves it unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Conflict`] if the id is bound to a different
    /// entity or owner, and [`RegistryError::EntityAlreadyNetworked`] if the
    /// entity already has another id. The existing binding is kept.
    pub fn spawn(
        &mut self,
        owner: UserId,
        network_id: NetworkId,
        entity: Entity,
        authority: Authority,
    ) -> Result<&mut NetworkObject, RegistryError> {
        if let Some(existing) = self.objects.get(&network_id) {
            if existing.entity != entity || existing.owner != owner {
                return Err(RegistryError::Conflict {
                    owner,
                    network_id,
                    existing: existing.entity,
                    requested: entity,
                });
            }
        } else if let Some(&other) = self.by_entity.get(&entity) {
            return Err(RegistryError::EntityAlreadyNetworked {
                entity,
                network_id: other,
            });
        }

        self.by_entity.insert(entity, network_id);
        let object = self
            .objects
            .entry(network_id)
            .or_insert_with(|| NetworkObject {
                owner,
                network_id,
                entity,
                authority,
                prefab: String::new(),
                parameters: SpawnParameters::default(),
            });
        debug!(network_id = %object.network_id, owner = %object.owner, entity = %entity, "network object registered");
        Ok(object)
    }

    /// Forget an object. Unknown ids are a no-op.
    pub fn despawn(&mut self, network_id: NetworkId) -> Option<NetworkObject> {
        let object = self.objects.remove(&network_id)?;
        self.by_entity.remove(&object.entity);
        debug!(%network_id, owner = %object.owner, "network object removed");
        Some(object)
    }

    #[must_use]
    pub fn resolve(&self, owner: &UserId, network_id: NetworkId) -> Option<Entity> {
        self.objects
            .get(&network_id)
            .filter(|object| &object.owner == owner)
            .map(|object| object.entity)
    }

    #[must_use]
    pub fn get(&self, network_id: NetworkId) -> Option<&NetworkObject> {
        self.objects.get(&network_id)
    }

    #[must_use]
    pub fn network_id_of(&self, entity: Entity) -> Option<NetworkId> {
        self.by_entity.get(&entity).copied()
    }

    /// Visit every object owned by `owner`, in id order.
    pub fn for_each_owned_by(&self, owner: &UserId, mut f: impl FnMut(&NetworkObject)) {
        self.objects
            .values()
            .filter(|object| &object.owner == owner)
            .for_each(&mut f);
    }

    #[must_use]
    pub fn owned_by(&self, owner: &UserId) -> Vec<NetworkId> {
        let mut ids = Vec::new();
        self.for_each_owned_by(owner, |object| ids.push(object.network_id));
        ids
    }

    /// Objects in id order.
    pub fn iter(&self) -> impl Iterator<Item = &NetworkObject> {
        self.objects.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Remove every object whose owner is gone or whose entity no longer
    /// exists. `notify` sees each object before it leaves the registry.
    /// Returns the removed objects; their entities are the caller's to free.
    pub fn validate_all(
        &mut self,
        world: &World,
        is_live_owner: impl Fn(&UserId) -> bool,
        mut notify: impl FnMut(&NetworkObject),
    ) -> Vec<NetworkObject> {
        let stale: Vec<NetworkId> = self
            .objects
            .values()
            .filter(|object| {
                let owner_gone = !object.owner.is_server() && !is_live_owner(&object.owner);
                owner_gone || !world.is_alive(object.entity)
            })
            .map(|object| object.network_id)
            .collect();

        let mut removed = Vec::with_capacity(stale.len());
        for network_id in stale {
            if let Some(object) = self.objects.get(&network_id) {
                warn!(
                    %network_id,
                    owner = %object.owner,
                    entity_alive = world.is_alive(object.entity),
                    "removing orphaned network object"
                );
                notify(object);
            }
            removed.extend(self.despawn(network_id));
        }
        removed
    }
}

impl Default for NetworkObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::from(id)
    }

    #[test]
    fn test_duplicate_spawn_is_rejected_and_existing_kept() {
        let mut world = World::new();
        let a = world.spawn();
        let b = world.spawn();
        let mut registry = NetworkObjectRegistry::new();

        registry
            .spawn(user("5"), NetworkId(1), a, Authority::Remote)
            .unwrap();
        let err = registry
            .spawn(user("5"), NetworkId(1), b, Authority::Remote)
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict { existing, .. } if existing == a));
        assert_eq!(registry.resolve(&user("5"), NetworkId(1)), Some(a));
        assert_eq!(registry.network_id_of(b), None);
    }

    #[test]
    fn test_respawning_same_binding_is_accepted() {
        let mut world = World::new();
        let a = world.spawn();
        let mut registry = NetworkObjectRegistry::new();
        registry
            .spawn(user("5"), NetworkId(1), a, Authority::Local)
            .unwrap()
            .prefab = "crate".into();
        let again = registry
            .spawn(user("5"), NetworkId(1), a, Authority::Local)
            .unwrap();
        assert_eq!(again.prefab, "crate");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_entity_maps_to_one_object() {
        let mut world = World::new();
        let a = world.spawn();
        let mut registry = NetworkObjectRegistry::new();
        registry
            .spawn(user("5"), NetworkId(1), a, Authority::Remote)
            .unwrap();
        let err = registry
            .spawn(user("5"), NetworkId(2), a, Authority::Remote)
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::EntityAlreadyNetworked {
                entity: a,
                network_id: NetworkId(1)
            }
        );
        assert!(registry.get(NetworkId(2)).is_none());
    }

    #[test]
    fn test_despawn_unknown_is_noop() {
        let mut registry = NetworkObjectRegistry::new();
        assert!(registry.despawn(NetworkId(999)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_resolve_checks_owner() {
        let mut world = World::new();
        let a = world.spawn();
        let mut registry = NetworkObjectRegistry::new();
        registry
            .spawn(user("u1"), NetworkId(4), a, Authority::Remote)
            .unwrap();
        assert_eq!(registry.resolve(&user("u2"), NetworkId(4)), None);
        assert_eq!(registry.resolve(&user("u1"), NetworkId(4)), Some(a));
    }

    #[test]
    fn test_allocate_skips_live_ids() {
        let mut world = World::new();
        let mut registry = NetworkObjectRegistry::new();
        let first = registry.allocate_network_id();
        let entity = world.spawn();
        registry
            .spawn(user("u1"), first, entity, Authority::Remote)
            .unwrap();
        let second = registry.allocate_network_id();
        assert_ne!(first, second);

        registry.next_id = first.0;
        assert_ne!(registry.allocate_network_id(), first);
    }

    #[test]
    fn test_owned_by() {
        let mut world = World::new();
        let mut registry = NetworkObjectRegistry::new();
        for (id, owner) in [(1, "u1"), (2, "u2"), (3, "u1")] {
            let entity = world.spawn();
            registry
                .spawn(user(owner), NetworkId(id), entity, Authority::Remote)
                .unwrap();
        }
        assert_eq!(registry.owned_by(&user("u1")), vec![NetworkId(1), NetworkId(3)]);
    }

    #[test]
    fn test_validate_all_removes_orphans_and_notifies_once() {
        let mut world = World::new();
        let mut registry = NetworkObjectRegistry::new();
        let live = world.spawn();
        let gone_owner = world.spawn();
        let freed = world.spawn();
        let server_owned = world.spawn();
        registry
            .spawn(user("live"), NetworkId(1), live, Authority::Remote)
            .unwrap();
        registry
            .spawn(user("gone"), NetworkId(2), gone_owner, Authority::Remote)
            .unwrap();
        registry
            .spawn(user("live"), NetworkId(3), freed, Authority::Remote)
            .unwrap();
        registry
            .spawn(UserId::server(), NetworkId(4), server_owned, Authority::Local)
            .unwrap();
        world.despawn(freed);

        let mut notified = Vec::new();
        let removed = registry.validate_all(
            &world,
            |owner| owner.as_str() == "live",
            |object| notified.push(object.network_id),
        );

        assert_eq!(notified, vec![NetworkId(2), NetworkId(3)]);
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.resolve(&user("gone"), NetworkId(2)), None);
        assert_eq!(registry.len(), 2);

        let again = registry.validate_all(&world, |_| true, |_| panic!("notified twice"));
        assert!(again.is_empty());
    }
}
