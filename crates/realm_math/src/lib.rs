//! # realm_math
//!
//! Spatial components replicated by the realm gameserver. Re-exports [`glam`]
//! for linear algebra and defines the components that feed world-state
//! snapshots, all implementing [`Component`](realm_ecs::Component).

pub mod ik;
pub mod transform;
pub mod velocity;

pub use glam::{Quat, Vec3};

pub use ik::{IkTarget, IkTargets};
pub use transform::Transform3D;
pub use velocity::Velocity3D;
