//! Sparse-set component storage.
//!
//! Each component type lives in its own [`SparseSet`]: a paged sparse index
//! keyed by entity id pointing into densely packed entity and value vectors.
//! Lookups are O(1) and iteration touches only populated slots.
//!
//! Entity ids are never recycled, so a flat sparse array would grow with the
//! highest id ever allocated. Pages are dropped once their last entity goes,
//! keeping the index proportional to the live population.

use std::any::Any;
use std::collections::HashMap;

use crate::entity::Entity;

const PAGE_BITS: usize = 8;
const PAGE_LEN: usize = 1 << PAGE_BITS;
const PAGE_MASK: usize = PAGE_LEN - 1;

/// `PAGE_LEN` consecutive sparse slots and how many of them are occupied.
#[derive(Debug, Clone)]
struct Page {
    slots: Box<[Option<u32>; PAGE_LEN]>,
    occupied: usize,
}

impl Page {
    fn new() -> Self {
        Self {
            slots: Box::new([None; PAGE_LEN]),
            occupied: 0,
        }
    }
}

/// Densely packed storage for one component type, addressed sparsely by
/// entity id.
#[derive(Debug, Clone)]
pub struct SparseSet<T> {
    pages: HashMap<usize, Page>,
    dense: Vec<Entity>,
    values: Vec<T>,
}

impl<T> SparseSet<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            dense: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Sparse pages currently allocated.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.dense.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    fn slot(&self, entity: Entity) -> Option<usize> {
        let index = entity.index();
        self.pages
            .get(&(index >> PAGE_BITS))
            .and_then(|page| page.slots[index & PAGE_MASK])
            .map(|slot| slot as usize)
    }

    /// Point an already indexed entity at a new dense slot.
    fn repoint(&mut self, entity: Entity, slot: usize) {
        let index = entity.index();
        if let Some(page) = self.pages.get_mut(&(index >> PAGE_BITS)) {
            page.slots[index & PAGE_MASK] = Some(slot as u32);
        }
    }

    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.slot(entity).is_some()
    }

    #[must_use]
    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.slot(entity).map(|slot| &self.values[slot])
    }

    #[must_use]
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        self.slot(entity).map(|slot| &mut self.values[slot])
    }

    /// Insert or overwrite the value for `entity`, returning the previous one.
    pub fn insert(&mut self, entity: Entity, value: T) -> Option<T> {
        if let Some(slot) = self.slot(entity) {
            return Some(std::mem::replace(&mut self.values[slot], value));
        }
        let index = entity.index();
        let page = self
            .pages
            .entry(index >> PAGE_BITS)
            .or_insert_with(Page::new);
        page.slots[index & PAGE_MASK] = Some(self.dense.len() as u32);
        page.occupied += 1;
        self.dense.push(entity);
        self.values.push(value);
        None
    }

    /// Remove the value for `entity`. The last element is swapped into the
    /// vacated slot.
    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let slot = self.slot(entity)?;
        let index = entity.index();
        let page_index = index >> PAGE_BITS;
        if let Some(page) = self.pages.get_mut(&page_index) {
            page.slots[index & PAGE_MASK] = None;
            page.occupied -= 1;
            if page.occupied == 0 {
                self.pages.remove(&page_index);
            }
        }
        self.dense.swap_remove(slot);
        let value = self.values.swap_remove(slot);
        if let Some(&moved) = self.dense.get(slot) {
            self.repoint(moved, slot);
        }
        Some(value)
    }

    /// Entities that currently hold a value, in storage order.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.dense
    }

    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.dense.iter().copied().zip(self.values.iter())
    }
}

impl<T> Default for SparseSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased view over a [`SparseSet`], used by the world to operate on
/// every storage an entity appears in without knowing the concrete types.
pub(crate) trait ErasedStorage: Send + Sync {
    fn contains(&self, entity: Entity) -> bool;

    fn remove_erased(&mut self, entity: Entity) -> Option<Box<dyn Any + Send + Sync>>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Send + Sync + 'static> ErasedStorage for SparseSet<T> {
    fn contains(&self, entity: Entity) -> bool {
        SparseSet::contains(self, entity)
    }

    fn remove_erased(&mut self, entity: Entity) -> Option<Box<dyn Any + Send + Sync>> {
        self.remove(entity)
            .map(|value| Box::new(value) as Box<dyn Any + Send + Sync>)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
