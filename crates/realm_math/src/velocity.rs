//! Linear and angular velocity of a networked object.

use glam::Vec3;
use realm_ecs::Component;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Velocity3D {
    /// Units per second.
    pub linear: Vec3,
    /// Radians per second around each axis.
    pub angular: Vec3,
}

impl Velocity3D {
    pub const ZERO: Self = Self {
        linear: Vec3::ZERO,
        angular: Vec3::ZERO,
    };

    #[must_use]
    pub fn new(linear: Vec3, angular: Vec3) -> Self {
        Self { linear, angular }
    }

    #[must_use]
    pub fn is_at_rest(&self) -> bool {
        self.linear == Vec3::ZERO && self.angular == Vec3::ZERO
    }
}

impl Component for Velocity3D {
    fn type_name() -> &'static str {
        "Velocity3D"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_at_rest() {
        assert!(Velocity3D::default().is_at_rest());
        assert!(!Velocity3D::new(Vec3::X, Vec3::ZERO).is_at_rest());
    }
}
