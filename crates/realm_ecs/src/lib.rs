//! # realm_ecs
//!
//! The entity-component store used by the realm gameserver.
//!
//! This crate provides:
//!
//! - [`Component`] trait and [`ComponentTypeId`]: what a component is and how
//!   its type is identified.
//! - [`Entity`]: lightweight `u32` entity identifiers.
//! - [`SparseSet`]: per-type sparse-array storage.
//! - [`QueryDescriptor`] / [`QueryId`]: cached queries with enter/exit polling.
//! - [`World`]: the store tying them together, including the one-cycle
//!   tombstones for removed components.

pub mod component;
pub mod entity;
pub mod query;
pub mod storage;
pub mod world;

pub use component::{Component, ComponentTypeId};
pub use entity::{Entity, EntityAllocator};
pub use query::{QueryDescriptor, QueryId};
pub use storage::SparseSet;
pub use world::World;
