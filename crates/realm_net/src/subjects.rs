//! NATS subject hierarchy.
//!
//! All realm subjects are prefixed with `realm.` to namespace within a
//! shared NATS cluster.
//!
//! ```text
//! realm.peer.<peer>.connect       peer announces itself
//! realm.peer.<peer>.message       control messages (msg-type header, reply subject for acks)
//! realm.peer.<peer>.data          peer world-state buffers
//! realm.peer.<peer>.disconnect    transport-level disconnect
//! realm.peer.<peer>.out           server → one peer
//! realm.world.actions             ActionData broadcast
//! realm.world.reliable            ReliableMessage broadcast
//! realm.world.state               UpdateNetworkState broadcast
//! realm.world.kick                Kick broadcast
//! realm.world.data                outgoing data producer (world-state buffers)
//! ```

/// Root prefix for all realm NATS subjects.
pub const PREFIX: &str = "realm";

// ── Broadcast subjects ──────────────────────────────────────────────────────

/// Per-tick actions. Server → all peers.
pub const WORLD_ACTIONS: &str = "realm.world.actions";

/// Reliable relay. Server → all peers.
pub const WORLD_RELIABLE: &str = "realm.world.reliable";

/// Network-state patches. Server → all peers.
pub const WORLD_STATE: &str = "realm.world.state";

/// Kick notices. Server → all peers.
pub const WORLD_KICK: &str = "realm.world.kick";

/// Binary world-state snapshots. Server → all peers.
pub const WORLD_DATA: &str = "realm.world.data";

/// Wildcard the server subscribes to for everything peers send.
pub const PEER_WILDCARD: &str = "realm.peer.*.*";

// ── Per-peer subjects ───────────────────────────────────────────────────────

/// What a peer-originated subject carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerChannel {
    Connect,
    Message,
    Data,
    Disconnect,
}

impl PeerChannel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Message => "message",
            Self::Data => "data",
            Self::Disconnect => "disconnect",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "connect" => Some(Self::Connect),
            "message" => Some(Self::Message),
            "data" => Some(Self::Data),
            "disconnect" => Some(Self::Disconnect),
            _ => None,
        }
    }
}

/// Build a peer → server subject.
///
/// `realm.peer.<peer>.<channel>`
#[must_use]
pub fn peer_subject(peer: &str, channel: PeerChannel) -> String {
    format!("realm.peer.{peer}.{}", channel.as_str())
}

/// Build the subject for pushes to a single peer.
///
/// `realm.peer.<peer>.out`
#[must_use]
pub fn peer_out(peer: &str) -> String {
    format!("realm.peer.{peer}.out")
}

/// Split a peer → server subject into the peer id and channel.
#[must_use]
pub fn parse_peer_subject(subject: &str) -> Option<(&str, PeerChannel)> {
    let rest = subject.strip_prefix("realm.peer.")?;
    let (peer, channel) = rest.rsplit_once('.')?;
    if peer.is_empty() || peer.contains('.') {
        return None;
    }
    Some((peer, PeerChannel::parse(channel)?))
}
