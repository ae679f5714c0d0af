//! The entity-component store.
//!
//! [`World`] owns entity allocation, one sparse set per component type, the
//! defined queries and the per-cycle tombstones of removed components.
//!
//! ## Removal cycle
//!
//! Removing a component takes it out of the live index immediately, so
//! [`World::has_component`] reports `false` at once and queries see the entity
//! exit. The value is parked in a tombstone set that
//! [`World::get_component_or_removed`] can still read until
//! [`World::advance_cycle`] runs, which gives exit handlers one cycle to look
//! at the final state.
//!
//! Operations naming an entity that was never spawned (or was already
//! despawned) log a warning and leave the store untouched. Teardown paths race
//! with late messages, so this must not be fatal.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use crate::component::{Component, ComponentTypeId};
use crate::entity::{Entity, EntityAllocator};
use crate::query::{QueryDescriptor, QueryId, QueryState};
use crate::storage::{ErasedStorage, SparseSet};

type Tombstones = HashMap<ComponentTypeId, Box<dyn Any + Send + Sync>>;

/// The process-wide component database.
pub struct World {
    allocator: EntityAllocator,
    alive: BTreeSet<Entity>,
    storages: HashMap<ComponentTypeId, Box<dyn ErasedStorage>>,
    removed: HashMap<Entity, Tombstones>,
    queries: Vec<QueryState>,
    cycle: u64,
}

impl World {
    #[must_use]
    pub fn new() -> Self {
        Self {
            allocator: EntityAllocator::new(),
            alive: BTreeSet::new(),
            storages: HashMap::new(),
            removed: HashMap::new(),
            queries: Vec::new(),
            cycle: 0,
        }
    }

    /// Allocate a new entity with no components.
    pub fn spawn(&mut self) -> Entity {
        let entity = self.allocator.allocate();
        self.alive.insert(entity);
        entity
    }

    /// Remove every component from `entity` and release it.
    ///
    /// Its components stay readable through
    /// [`World::get_component_or_removed`] until the cycle ends.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if !self.alive.contains(&entity) {
            warn!(%entity, "despawn: entity does not exist");
            return false;
        }
        self.remove_all_components(entity);
        self.alive.remove(&entity);
        true
    }

    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.alive.contains(&entity)
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.alive.len()
    }

    /// Number of completed removal cycles.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    fn storage<T: Component>(&self) -> Option<&SparseSet<T>> {
        self.storages
            .get(&T::component_type_id())
            .and_then(|storage| storage.as_any().downcast_ref::<SparseSet<T>>())
    }

    fn storage_mut<T: Component>(&mut self) -> Option<&mut SparseSet<T>> {
        self.storages
            .get_mut(&T::component_type_id())
            .and_then(|storage| storage.as_any_mut().downcast_mut::<SparseSet<T>>())
    }

    fn storage_or_insert<T: Component>(&mut self) -> Option<&mut SparseSet<T>> {
        let storage = self
            .storages
            .entry(T::component_type_id())
            .or_insert_with(|| Box::new(SparseSet::<T>::new()));
        let typed = storage.as_any_mut().downcast_mut::<SparseSet<T>>();
        if typed.is_none() {
            warn!(
                component = T::type_name(),
                "component name collides with another registered type"
            );
        }
        typed
    }

    fn refresh_queries(&mut self, entity: Entity, changed: ComponentTypeId) {
        let storages = &self.storages;
        let has = |ty: ComponentTypeId| {
            storages
                .get(&ty)
                .is_some_and(|storage| storage.contains(entity))
        };
        for query in self
            .queries
            .iter_mut()
            .filter(|query| query.descriptor.involves(changed))
        {
            let now_matches = query.descriptor.matches(&has);
            query.refresh(entity, now_matches);
        }
    }

    /// Attach `value` to `entity`, overwriting any previous value of the same
    /// type. Returns a mutable reference to the stored value.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Option<&mut T> {
        if !self.alive.contains(&entity) {
            warn!(
                %entity,
                component = T::type_name(),
                "add_component: entity does not exist"
            );
            return None;
        }
        let type_id = T::component_type_id();
        self.storage_or_insert::<T>()?.insert(entity, value);
        if let Some(tombstones) = self.removed.get_mut(&entity) {
            tombstones.remove(&type_id);
        }
        self.refresh_queries(entity, type_id);
        self.storage_mut::<T>()?.get_mut(entity)
    }

    /// Read the live value of `T` on `entity`.
    #[must_use]
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        if !self.alive.contains(&entity) {
            warn!(
                %entity,
                component = T::type_name(),
                "get_component: entity does not exist"
            );
            return None;
        }
        self.storage::<T>()?.get(entity)
    }

    /// Read `T` on `entity`, falling back to a value removed during the
    /// current cycle.
    #[must_use]
    pub fn get_component_or_removed<T: Component>(&self, entity: Entity) -> Option<&T> {
        if let Some(value) = self.storage::<T>().and_then(|storage| storage.get(entity)) {
            return Some(value);
        }
        self.removed
            .get(&entity)?
            .get(&T::component_type_id())?
            .downcast_ref::<T>()
    }

    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        if !self.alive.contains(&entity) {
            warn!(
                %entity,
                component = T::type_name(),
                "get_component_mut: entity does not exist"
            );
            return None;
        }
        self.storage_mut::<T>()?.get_mut(entity)
    }

    #[must_use]
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        if !self.alive.contains(&entity) {
            warn!(
                %entity,
                component = T::type_name(),
                "has_component: entity does not exist"
            );
            return false;
        }
        self.storage::<T>()
            .is_some_and(|storage| storage.contains(entity))
    }

    /// Detach `T` from `entity` and return the previous value.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Option<T> {
        if !self.alive.contains(&entity) {
            warn!(
                %entity,
                component = T::type_name(),
                "remove_component: entity does not exist"
            );
            return None;
        }
        let type_id = T::component_type_id();
        let value = self.storage_mut::<T>()?.remove(entity)?;
        self.removed
            .entry(entity)
            .or_default()
            .insert(type_id, Box::new(value.clone()));
        self.refresh_queries(entity, type_id);
        Some(value)
    }

    /// Detach every component from `entity`. Returns how many were removed.
    pub fn remove_all_components(&mut self, entity: Entity) -> usize {
        if !self.alive.contains(&entity) {
            warn!(%entity, "remove_all_components: entity does not exist");
            return 0;
        }
        let present: Vec<ComponentTypeId> = self
            .storages
            .iter()
            .filter(|(_, storage)| storage.contains(entity))
            .map(|(&type_id, _)| type_id)
            .collect();

        let mut count = 0;
        for type_id in present {
            let Some(value) = self
                .storages
                .get_mut(&type_id)
                .and_then(|storage| storage.remove_erased(entity))
            else {
                continue;
            };
            self.removed.entry(entity).or_default().insert(type_id, value);
            self.refresh_queries(entity, type_id);
            count += 1;
        }
        count
    }

    /// Iterate every live `(entity, value)` pair of component type `T`.
    pub fn iter<T: Component>(&self) -> impl Iterator<Item = (Entity, &T)> + '_ {
        self.storage::<T>()
            .into_iter()
            .flat_map(|storage| storage.iter())
    }

    /// Register a cached query. Entities that already match are reported by
    /// the first [`World::query_enter`].
    pub fn define_query(&mut self, descriptor: QueryDescriptor) -> QueryId {
        let mut state = QueryState::new(descriptor);
        let storages = &self.storages;
        for &entity in &self.alive {
            let has = |ty: ComponentTypeId| {
                storages
                    .get(&ty)
                    .is_some_and(|storage| storage.contains(entity))
            };
            let matches = state.descriptor.matches(has);
            state.refresh(entity, matches);
        }
        self.queries.push(state);
        QueryId(self.queries.len() - 1)
    }

    /// Entities currently matching the query, in ascending order.
    #[must_use]
    pub fn query(&self, id: QueryId) -> Vec<Entity> {
        match self.queries.get(id.0) {
            Some(state) => state.matching.iter().copied().collect(),
            None => {
                warn!(query = id.0, "query: unknown query");
                Vec::new()
            }
        }
    }

    /// Entities that began matching since the previous call.
    pub fn query_enter(&mut self, id: QueryId) -> Vec<Entity> {
        match self.queries.get_mut(id.0) {
            Some(state) => state.drain_entered(),
            None => {
                warn!(query = id.0, "query_enter: unknown query");
                Vec::new()
            }
        }
    }

    /// Entities that stopped matching since the previous call.
    pub fn query_exit(&mut self, id: QueryId) -> Vec<Entity> {
        match self.queries.get_mut(id.0) {
            Some(state) => state.drain_exited(),
            None => {
                warn!(query = id.0, "query_exit: unknown query");
                Vec::new()
            }
        }
    }

    /// Close the current cycle, physically dropping every tombstoned
    /// component.
    pub fn advance_cycle(&mut self) {
        self.removed.clear();
        self.cycle += 1;
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.alive.len())
            .field("component_types", &self.storages.len())
            .field("tombstoned_entities", &self.removed.len())
            .field("queries", &self.queries.len())
            .field("cycle", &self.cycle)
            .finish()
    }
}
