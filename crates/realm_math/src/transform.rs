//! 3D transform component.
//!
//! [`Transform3D`] is the pose of a networked object: the position and
//! rotation written into every world-state snapshot. Scale is local-only and
//! never leaves the process.

use glam::{Quat, Vec3};
use realm_ecs::Component;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Transform3D {
    /// World-space position.
    pub position: Vec3,
    /// Rotation as a unit quaternion.
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform3D {
    /// The identity transform: origin, no rotation, unit scale.
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    #[must_use]
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    #[must_use]
    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            ..Self::IDENTITY
        }
    }

    /// Overwrite position and rotation from a replicated pose, keeping the
    /// local scale.
    pub fn set_pose(&mut self, position: Vec3, rotation: Quat) {
        self.position = position;
        self.rotation = rotation;
    }

    /// Straight-line distance between two transforms' positions.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f32 {
        self.position.distance(other.position)
    }
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Component for Transform3D {
    fn type_name() -> &'static str {
        "Transform3D"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let t = Transform3D::IDENTITY;
        assert_eq!(t.position, Vec3::ZERO);
        assert_eq!(t.rotation, Quat::IDENTITY);
        assert_eq!(t.scale, Vec3::ONE);
    }

    #[test]
    fn test_set_pose_keeps_scale() {
        let mut t = Transform3D {
            scale: Vec3::splat(2.0),
            ..Transform3D::IDENTITY
        };
        t.set_pose(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_y(1.0));
        assert_eq!(t.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(t.scale, Vec3::splat(2.0));
    }

    #[test]
    fn test_distance() {
        let a = Transform3D::from_position(Vec3::ZERO);
        let b = Transform3D::from_position(Vec3::new(3.0, 4.0, 0.0));
        assert!((a.distance(&b) - 5.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let t = Transform3D::from_position(Vec3::new(1.0, 2.0, 3.0));
        let bytes = rmp_serde::to_vec(&t).unwrap();
        let restored: Transform3D = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(t, restored);
    }
}
