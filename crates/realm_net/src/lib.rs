//! # realm_net
//!
//! Wire protocol for the realm gameserver.
//!
//! - [`world_state`]: fixed-layout binary codec for per-tick snapshots.
//! - [`sequence`]: wrapping tick comparison.
//! - [`messages`]: control messages, actions and acknowledgements.
//! - [`codec`]: MessagePack helpers for control messages.
//! - [`subjects`]: NATS subject hierarchy.
//! - [`connection`]: NATS connection management.
//! - [`ids`]: identifiers shared by peers and server.
//! - [`error`]: network-layer error types.

pub mod codec;
pub mod connection;
pub mod error;
pub mod ids;
pub mod messages;
pub mod sequence;
pub mod subjects;
pub mod world_state;

pub use connection::NatsConnection;
pub use error::{DecodeError, NetError};
pub use ids::{NetworkId, PeerId, UserId};
pub use messages::{Action, ClientMessage, MediaRequest, MediaResponse, MessageType, Response, ServerMessage};
pub use sequence::{TickGate, tick_newer};
pub use world_state::{IkPoseRecord, PoseRecord, WorldStateSnapshot};
