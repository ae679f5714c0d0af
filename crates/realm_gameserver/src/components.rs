//! Gameserver-side components.

use realm_ecs::Component;
use realm_net::{NetworkId, UserId};

use crate::services::AvatarDetail;

/// Marks an entity as replicated. Mirrors its registry entry so query exit
/// handlers can still read the id from the tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Networked {
    pub network_id: NetworkId,
    pub owner: UserId,
}

impl Component for Networked {
    fn type_name() -> &'static str {
        "Networked"
    }
}

/// The avatar of a user in the world.
#[derive(Debug, Clone, PartialEq)]
pub struct Avatar {
    pub user: UserId,
    pub name: String,
    pub detail: AvatarDetail,
}

impl Component for Avatar {
    fn type_name() -> &'static str {
        "Avatar"
    }
}
