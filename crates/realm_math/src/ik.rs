//! Inverse-kinematics targets for XR avatars.
//!
//! Remote peers drive an avatar's rig from three tracked targets. The solve
//! itself happens client-side; the server only relays the targets.

use glam::{Quat, Vec3};
use realm_ecs::Component;
use serde::{Deserialize, Serialize};

/// One tracked target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct IkTarget {
    pub position: Vec3,
    pub rotation: Quat,
}

impl IkTarget {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    #[must_use]
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }
}

impl Default for IkTarget {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Head and hand targets of an XR avatar.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct IkTargets {
    pub head: IkTarget,
    pub left_hand: IkTarget,
    pub right_hand: IkTarget,
}

impl Component for IkTargets {
    fn type_name() -> &'static str {
        "IkTargets"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_targets_are_identity() {
        let targets = IkTargets::default();
        assert_eq!(targets.head, IkTarget::IDENTITY);
        assert_eq!(targets.left_hand.rotation, Quat::IDENTITY);
    }
}
