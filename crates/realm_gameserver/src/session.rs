//! Per-connection session state.
//!
//! ```text
//! Connected → Authorizing → Authorized → Joining → InWorld → Leaving | Disconnected
//!     ↑____________|  (lookup failed, retryable)
//! ```

use tokio::time::Instant;

use realm_net::messages::MessageType;
use realm_net::{NetworkId, PeerId, TickGate, UserId};

use crate::services::{AvatarDetail, UserRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Connected,
    Authorizing,
    Authorized,
    Joining,
    InWorld,
    /// Left explicitly or was kicked.
    Leaving,
    /// Transport dropped or heartbeat expired.
    Disconnected,
}

impl SessionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Leaving | Self::Disconnected)
    }

    #[must_use]
    pub fn is_authorized(self) -> bool {
        matches!(self, Self::Authorized | Self::Joining | Self::InWorld)
    }

    /// Whether a message of `kind` is handled in this state. Authorization,
    /// world entry and leaving check their own preconditions.
    #[must_use]
    pub fn accepts(self, kind: MessageType) -> bool {
        match kind {
            MessageType::Authorization
            | MessageType::ConnectToWorld
            | MessageType::JoinWorld
            | MessageType::LeaveWorld => !self.is_terminal(),
            MessageType::Heartbeat => self.is_authorized(),
            MessageType::Kick => false,
            _ => self == Self::InWorld,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug)]
pub struct Session {
    pub peer: PeerId,
    pub state: SessionState,
    /// Bumped on every authorization attempt; lookups that finish for an
    /// older attempt are discarded.
    pub auth_attempt: u64,
    pub user: Option<UserRecord>,
    pub avatar: Option<AvatarDetail>,
    pub avatar_network_id: Option<NetworkId>,
    pub connected_at: Instant,
    pub last_heartbeat: Instant,
    /// Ticks of world-state buffers this peer has pushed.
    pub inbound_ticks: TickGate,
}

impl Session {
    #[must_use]
    pub fn new(peer: PeerId, now: Instant) -> Self {
        Self {
            peer,
            state: SessionState::Connected,
            auth_attempt: 0,
            user: None,
            avatar: None,
            avatar_network_id: None,
            connected_at: now,
            last_heartbeat: now,
            inbound_ticks: TickGate::new(),
        }
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        self.user.as_ref().map(|user| &user.id)
    }

    #[must_use]
    pub fn in_world(&self) -> bool {
        self.state == SessionState::InWorld
    }

    pub fn heartbeat(&mut self, now: Instant) {
        self.last_heartbeat = now;
    }
}
