//! Query descriptors and cached query state.
//!
//! A [`QueryDescriptor`] names the component types an entity must hold to
//! match. Once defined on a [`World`](crate::World) the query keeps its
//! matching set up to date as components come and go, and records which
//! entities started or stopped matching since the last poll.

use std::collections::BTreeSet;

use crate::component::{Component, ComponentTypeId};
use crate::entity::Entity;

/// Describes the component types an entity must hold to match a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryDescriptor {
    /// Every type here must be present for an entity to match.
    pub required: Vec<ComponentTypeId>,
}

impl QueryDescriptor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require component type `T`.
    #[must_use]
    pub fn with<T: Component>(self) -> Self {
        self.with_id(T::component_type_id())
    }

    /// Require a component type by id.
    #[must_use]
    pub fn with_id(mut self, type_id: ComponentTypeId) -> Self {
        if !self.required.contains(&type_id) {
            self.required.push(type_id);
        }
        self
    }

    /// Returns `true` if `type_id` takes part in this query's predicate.
    #[must_use]
    pub fn involves(&self, type_id: ComponentTypeId) -> bool {
        self.required.contains(&type_id)
    }

    /// Evaluate the predicate given a presence test for each component type.
    #[must_use]
    pub fn matches(&self, has: impl Fn(ComponentTypeId) -> bool) -> bool {
        !self.required.is_empty() && self.required.iter().all(|&ty| has(ty))
    }
}

/// Handle returned by [`World::define_query`](crate::World::define_query).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(pub(crate) usize);

/// Membership bookkeeping for one defined query.
///
/// `entered` and `exited` are independent queues drained by their own poll,
/// so an entity that enters and leaves between polls shows up in both.
#[derive(Debug, Clone)]
pub(crate) struct QueryState {
    pub(crate) descriptor: QueryDescriptor,
    pub(crate) matching: BTreeSet<Entity>,
    entered: Vec<Entity>,
    exited: Vec<Entity>,
}

impl QueryState {
    pub(crate) fn new(descriptor: QueryDescriptor) -> Self {
        Self {
            descriptor,
            matching: BTreeSet::new(),
            entered: Vec::new(),
            exited: Vec::new(),
        }
    }

    /// Record the current predicate result for `entity`, queueing an enter or
    /// exit event when membership flips.
    pub(crate) fn refresh(&mut self, entity: Entity, now_matches: bool) {
        let was_matching = self.matching.contains(&entity);
        match (was_matching, now_matches) {
            (false, true) => {
                self.matching.insert(entity);
                if !self.entered.contains(&entity) {
                    self.entered.push(entity);
                }
            }
            (true, false) => {
                self.matching.remove(&entity);
                if !self.exited.contains(&entity) {
                    self.exited.push(entity);
                }
            }
            _ => {}
        }
    }

    pub(crate) fn drain_entered(&mut self) -> Vec<Entity> {
        std::mem::take(&mut self.entered)
    }

    pub(crate) fn drain_exited(&mut self) -> Vec<Entity> {
        std::mem::take(&mut self.exited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_descriptor_matches_nothing() {
        let q = QueryDescriptor::new();
        assert!(!q.matches(|_| true));
    }

    #[test]
    fn test_descriptor_requires_all() {
        let a = ComponentTypeId(1);
        let b = ComponentTypeId(2);
        let q = QueryDescriptor::new().with_id(a).with_id(b).with_id(a);
        assert_eq!(q.required.len(), 2);
        assert!(q.matches(|_| true));
        assert!(!q.matches(|ty| ty == a));
    }

    #[test]
    fn test_refresh_queues_transitions_once() {
        let mut state = QueryState::new(QueryDescriptor::new().with_id(ComponentTypeId(1)));
        let e = Entity(3);

        state.refresh(e, true);
        state.refresh(e, true);
        assert_eq!(state.drain_entered(), vec![e]);
        assert!(state.drain_entered().is_empty());

        state.refresh(e, false);
        state.refresh(e, false);
        assert_eq!(state.drain_exited(), vec![e]);
        assert!(state.drain_exited().is_empty());
    }
}
