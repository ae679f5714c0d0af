//! Message types exchanged between peers and the gameserver.
//!
//! Every control message is a MessagePack payload whose kind travels in the
//! `msg-type` NATS header, never in the payload. [`ClientMessage`] covers
//! peer → server traffic, [`ServerMessage`] server → peer pushes, and
//! [`Response`] the acknowledgements sent back on a request's reply subject.
//! World-state snapshots are not messages; they ride the data subjects as raw
//! [`world_state`](crate::world_state) buffers.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec;
use crate::error::NetError;
use crate::ids::{NetworkId, PeerId, UserId};

// ── Message kinds ───────────────────────────────────────────────────────────

/// The value of the `msg-type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Authorization,
    ConnectToWorld,
    JoinWorld,
    LeaveWorld,
    ActionData,
    ReliableMessage,
    UpdateNetworkState,
    Heartbeat,
    Kick,
    WebRtcTransportCreate,
    WebRtcTransportConnect,
    WebRtcTransportClose,
    WebRtcProduceData,
    WebRtcSendTrack,
    WebRtcReceiveTrack,
    WebRtcCloseProducer,
    WebRtcCloseConsumer,
    WebRtcPauseProducer,
    WebRtcPauseConsumer,
    WebRtcResumeProducer,
    WebRtcResumeConsumer,
    WebRtcConsumerSetLayers,
    WebRtcRequestNearbyUsers,
    WebRtcRequestCurrentProducers,
    InitializeRouter,
}

impl MessageType {
    pub const ALL: [Self; 25] = [
        Self::Authorization,
        Self::ConnectToWorld,
        Self::JoinWorld,
        Self::LeaveWorld,
        Self::ActionData,
        Self::ReliableMessage,
        Self::UpdateNetworkState,
        Self::Heartbeat,
        Self::Kick,
        Self::WebRtcTransportCreate,
        Self::WebRtcTransportConnect,
        Self::WebRtcTransportClose,
        Self::WebRtcProduceData,
        Self::WebRtcSendTrack,
        Self::WebRtcReceiveTrack,
        Self::WebRtcCloseProducer,
        Self::WebRtcCloseConsumer,
        Self::WebRtcPauseProducer,
        Self::WebRtcPauseConsumer,
        Self::WebRtcResumeProducer,
        Self::WebRtcResumeConsumer,
        Self::WebRtcConsumerSetLayers,
        Self::WebRtcRequestNearbyUsers,
        Self::WebRtcRequestCurrentProducers,
        Self::InitializeRouter,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authorization => "Authorization",
            Self::ConnectToWorld => "ConnectToWorld",
            Self::JoinWorld => "JoinWorld",
            Self::LeaveWorld => "LeaveWorld",
            Self::ActionData => "ActionData",
            Self::ReliableMessage => "ReliableMessage",
            Self::UpdateNetworkState => "UpdateNetworkState",
            Self::Heartbeat => "Heartbeat",
            Self::Kick => "Kick",
            Self::WebRtcTransportCreate => "WebRTCTransportCreate",
            Self::WebRtcTransportConnect => "WebRTCTransportConnect",
            Self::WebRtcTransportClose => "WebRTCTransportClose",
            Self::WebRtcProduceData => "WebRTCProduceData",
            Self::WebRtcSendTrack => "WebRTCSendTrack",
            Self::WebRtcReceiveTrack => "WebRTCReceiveTrack",
            Self::WebRtcCloseProducer => "WebRTCCloseProducer",
            Self::WebRtcCloseConsumer => "WebRTCCloseConsumer",
            Self::WebRtcPauseProducer => "WebRTCPauseProducer",
            Self::WebRtcPauseConsumer => "WebRTCPauseConsumer",
            Self::WebRtcResumeProducer => "WebRTCResumeProducer",
            Self::WebRtcResumeConsumer => "WebRTCResumeConsumer",
            Self::WebRtcConsumerSetLayers => "WebRTCConsumerSetLayers",
            Self::WebRtcRequestNearbyUsers => "WebRTCRequestNearbyUsers",
            Self::WebRtcRequestCurrentProducers => "WebRTCRequestCurrentProducers",
            Self::InitializeRouter => "InitializeRouter",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Actions ─────────────────────────────────────────────────────────────────

/// Where and how a networked object appears when spawned.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnParameters {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for SpawnParameters {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

/// A discrete per-tick event carried by `ActionData`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all_fields = "camelCase")]
pub enum Action {
    /// A networked object came into existence.
    SpawnObject {
        owner: UserId,
        network_id: NetworkId,
        prefab: String,
        parameters: SpawnParameters,
    },
    /// A networked object is gone. This is the despawn notification.
    DestroyObject { network_id: NetworkId },
    /// Application-defined event, relayed as-is. The server overwrites
    /// `from` with the sender's identity.
    Custom {
        #[serde(default)]
        from: Option<UserId>,
        name: String,
        payload: Value,
    },
}

// ── Requests ────────────────────────────────────────────────────────────────

/// Credentials presented by a peer. Missing fields are an immediate failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

/// Which media plane a transport or router belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelKey {
    /// The world instance itself (spatial voice, data channels).
    #[default]
    Instance,
    /// A named side channel (party or group call).
    Named(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportDirection {
    Send,
    Recv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Audio,
    Video,
}

/// The media and data-channel negotiation set. Every request is acknowledged
/// with a [`MediaResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all_fields = "camelCase")]
pub enum MediaRequest {
    TransportCreate {
        direction: TransportDirection,
        #[serde(default)]
        channel: ChannelKey,
        #[serde(default)]
        sctp_capabilities: Value,
    },
    TransportConnect {
        transport_id: String,
        dtls_parameters: Value,
    },
    TransportClose {
        transport_id: String,
    },
    ProduceData {
        transport_id: String,
        label: String,
        #[serde(default)]
        protocol: String,
        #[serde(default)]
        sctp_stream_parameters: Value,
    },
    SendTrack {
        transport_id: String,
        kind: MediaKind,
        media_tag: String,
        rtp_parameters: Value,
        #[serde(default)]
        paused: bool,
    },
    ReceiveTrack {
        media_peer: PeerId,
        media_tag: String,
        rtp_capabilities: Value,
        #[serde(default)]
        channel: ChannelKey,
    },
    CloseProducer {
        producer_id: String,
    },
    CloseConsumer {
        consumer_id: String,
    },
    PauseProducer {
        producer_id: String,
        #[serde(default)]
        global_mute: bool,
    },
    ResumeProducer {
        producer_id: String,
        #[serde(default)]
        global_mute: bool,
    },
    PauseConsumer {
        consumer_id: String,
    },
    ResumeConsumer {
        consumer_id: String,
    },
    ConsumerSetLayers {
        consumer_id: String,
        spatial_layer: u8,
    },
    RequestNearbyUsers,
    RequestCurrentProducers {
        #[serde(default)]
        user_ids: Vec<UserId>,
        #[serde(default)]
        channel: ChannelKey,
    },
    InitializeRouter {
        #[serde(default)]
        channel: ChannelKey,
    },
}

impl MediaRequest {
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::TransportCreate { .. } => MessageType::WebRtcTransportCreate,
            Self::TransportConnect { .. } => MessageType::WebRtcTransportConnect,
            Self::TransportClose { .. } => MessageType::WebRtcTransportClose,
            Self::ProduceData { .. } => MessageType::WebRtcProduceData,
            Self::SendTrack { .. } => MessageType::WebRtcSendTrack,
            Self::ReceiveTrack { .. } => MessageType::WebRtcReceiveTrack,
            Self::CloseProducer { .. } => MessageType::WebRtcCloseProducer,
            Self::CloseConsumer { .. } => MessageType::WebRtcCloseConsumer,
            Self::PauseProducer { .. } => MessageType::WebRtcPauseProducer,
            Self::ResumeProducer { .. } => MessageType::WebRtcResumeProducer,
            Self::PauseConsumer { .. } => MessageType::WebRtcPauseConsumer,
            Self::ResumeConsumer { .. } => MessageType::WebRtcResumeConsumer,
            Self::ConsumerSetLayers { .. } => MessageType::WebRtcConsumerSetLayers,
            Self::RequestNearbyUsers => MessageType::WebRtcRequestNearbyUsers,
            Self::RequestCurrentProducers { .. } => MessageType::WebRtcRequestCurrentProducers,
            Self::InitializeRouter { .. } => MessageType::InitializeRouter,
        }
    }
}

/// Peer → server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Authorization(AuthorizationRequest),
    ConnectToWorld,
    JoinWorld,
    LeaveWorld,
    ActionData(Vec<Action>),
    ReliableMessage(Value),
    UpdateNetworkState(Value),
    Heartbeat,
    Media(MediaRequest),
}

impl ClientMessage {
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Authorization(_) => MessageType::Authorization,
            Self::ConnectToWorld => MessageType::ConnectToWorld,
            Self::JoinWorld => MessageType::JoinWorld,
            Self::LeaveWorld => MessageType::LeaveWorld,
            Self::ActionData(_) => MessageType::ActionData,
            Self::ReliableMessage(_) => MessageType::ReliableMessage,
            Self::UpdateNetworkState(_) => MessageType::UpdateNetworkState,
            Self::Heartbeat => MessageType::Heartbeat,
            Self::Media(request) => request.message_type(),
        }
    }

    /// Whether the sender expects an acknowledgement on its reply subject.
    #[must_use]
    pub fn expects_reply(&self) -> bool {
        !matches!(
            self,
            Self::ActionData(_)
                | Self::ReliableMessage(_)
                | Self::UpdateNetworkState(_)
                | Self::Heartbeat
        )
    }

    /// Decode a message from its header kind and payload. Payload-less kinds
    /// ignore the payload.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::UnknownMessageType`] for server-only kinds and
    /// [`NetError::Decode`] if the payload does not match the kind.
    pub fn from_parts(kind: MessageType, payload: &[u8]) -> Result<Self, NetError> {
        Ok(match kind {
            MessageType::Authorization => Self::Authorization(codec::decode(payload)?),
            MessageType::ConnectToWorld => Self::ConnectToWorld,
            MessageType::JoinWorld => Self::JoinWorld,
            MessageType::LeaveWorld => Self::LeaveWorld,
            MessageType::ActionData => Self::ActionData(codec::decode(payload)?),
            MessageType::ReliableMessage => Self::ReliableMessage(codec::decode(payload)?),
            MessageType::UpdateNetworkState => Self::UpdateNetworkState(codec::decode(payload)?),
            MessageType::Heartbeat => Self::Heartbeat,
            MessageType::Kick => return Err(NetError::UnknownMessageType(kind.to_string())),
            MessageType::WebRtcRequestNearbyUsers => Self::Media(MediaRequest::RequestNearbyUsers),
            _ => {
                let request: MediaRequest = codec::decode(payload)?;
                if request.message_type() != kind {
                    return Err(NetError::UnknownMessageType(format!(
                        "{kind} header carrying {}",
                        request.message_type()
                    )));
                }
                Self::Media(request)
            }
        })
    }

    /// Split into the header kind and encoded payload.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Encode`] if the payload cannot be serialised.
    pub fn to_parts(&self) -> Result<(MessageType, Vec<u8>), NetError> {
        let payload = match self {
            Self::Authorization(request) => codec::encode(request)?,
            Self::ActionData(actions) => codec::encode(actions)?,
            Self::ReliableMessage(value) | Self::UpdateNetworkState(value) => codec::encode(value)?,
            Self::Media(MediaRequest::RequestNearbyUsers) => Vec::new(),
            Self::Media(request) => codec::encode(request)?,
            Self::ConnectToWorld | Self::JoinWorld | Self::LeaveWorld | Self::Heartbeat => {
                Vec::new()
            }
        };
        Ok((self.message_type(), payload))
    }
}

/// Server → peer pushes.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    ActionData(Vec<Action>),
    ReliableMessage(Value),
    UpdateNetworkState(Value),
    /// The named peer has been forced out.
    Kick(PeerId),
}

impl ServerMessage {
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::ActionData(_) => MessageType::ActionData,
            Self::ReliableMessage(_) => MessageType::ReliableMessage,
            Self::UpdateNetworkState(_) => MessageType::UpdateNetworkState,
            Self::Kick(_) => MessageType::Kick,
        }
    }

    /// # Errors
    ///
    /// Returns [`NetError::UnknownMessageType`] for peer-only kinds and
    /// [`NetError::Decode`] if the payload does not match the kind.
    pub fn from_parts(kind: MessageType, payload: &[u8]) -> Result<Self, NetError> {
        Ok(match kind {
            MessageType::ActionData => Self::ActionData(codec::decode(payload)?),
            MessageType::ReliableMessage => Self::ReliableMessage(codec::decode(payload)?),
            MessageType::UpdateNetworkState => Self::UpdateNetworkState(codec::decode(payload)?),
            MessageType::Kick => Self::Kick(codec::decode(payload)?),
            other => return Err(NetError::UnknownMessageType(other.to_string())),
        })
    }

    /// # Errors
    ///
    /// Returns [`NetError::Encode`] if the payload cannot be serialised.
    pub fn to_parts(&self) -> Result<(MessageType, Vec<u8>), NetError> {
        let payload = match self {
            Self::ActionData(actions) => codec::encode(actions)?,
            Self::ReliableMessage(value) | Self::UpdateNetworkState(value) => codec::encode(value)?,
            Self::Kick(peer) => codec::encode(peer)?,
        };
        Ok((self.message_type(), payload))
    }
}

// ── Responses ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl Ack {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectToWorldResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    /// Capabilities of the instance router, for the peer's device load.
    #[serde(default)]
    pub router_rtp_capabilities: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinWorldResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    /// The peer's avatar.
    pub network_id: Option<NetworkId>,
    pub position: Vec3,
    pub rotation: Quat,
    /// The server tick at join time.
    pub tick: u32,
    /// Spawn actions of every object already in the world.
    pub cached_actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: String,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
    pub sctp_parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerParams {
    pub id: String,
    pub producer_id: String,
    pub media_peer: PeerId,
    pub media_tag: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    pub producer_paused: bool,
    pub channel: ChannelKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerInfo {
    pub id: String,
    pub peer: PeerId,
    pub user: Option<UserId>,
    pub media_tag: String,
    pub channel: ChannelKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all_fields = "camelCase")]
pub enum MediaResponse {
    Ok,
    TransportCreated(TransportParams),
    Produced { id: String },
    DataProduced { id: String },
    Consumer(ConsumerParams),
    NearbyUsers { user_ids: Vec<UserId> },
    CurrentProducers { producers: Vec<ProducerInfo> },
    RouterInitialized { router_id: String, rtp_capabilities: Value },
    Error { message: String },
}

/// An acknowledgement sent on a request's reply subject.
///
/// The variant only routes the acknowledgement inside the server. On the
/// wire a response is its bare payload, so an authorization reply reads
/// `{ success, message }`; a rejection is sent as a failed [`Ack`].
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Authorization(Ack),
    ConnectToWorld(ConnectToWorldResponse),
    JoinWorld(JoinWorldResponse),
    LeaveWorld(Ack),
    Media(MediaResponse),
    /// The request was not valid in the session's current state.
    Rejected { message: String },
}

impl Serialize for Response {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Authorization(ack) | Self::LeaveWorld(ack) => ack.serialize(serializer),
            Self::ConnectToWorld(response) => response.serialize(serializer),
            Self::JoinWorld(response) => response.serialize(serializer),
            Self::Media(response) => response.serialize(serializer),
            Self::Rejected { message } => Ack::failed(message.as_str()).serialize(serializer),
        }
    }
}

// ── NATS header keys ────────────────────────────────────────────────────────

/// NATS header keys used for routing metadata.
pub mod headers {
    /// The [`MessageType`](super::MessageType) of the payload.
    pub const MSG_TYPE: &str = "msg-type";
}
