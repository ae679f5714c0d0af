//! NATS adapter.
//!
//! Peers publish on `realm.peer.<peer>.<channel>`; the inbound task turns
//! those into [`ServerEvent`](crate::server::ServerEvent)s and answers
//! requests on their reply subject once the event loop acknowledges them.
//! The outbound task drains the server's [`Outbound`] sink onto the
//! broadcast and per-peer subjects.

use async_nats::HeaderMap;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use realm_net::connection::message_type;
use realm_net::messages::{ClientMessage, Response, ServerMessage};
use realm_net::subjects::{
    self, PeerChannel, WORLD_ACTIONS, WORLD_DATA, WORLD_KICK, WORLD_RELIABLE, WORLD_STATE,
};
use realm_net::{NatsConnection, NetError, PeerId};

use crate::server::ServerHandle;
use crate::transport::Outbound;

// ── Inbound ─────────────────────────────────────────────────────────────────

/// One peer-originated NATS message, decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Connect(PeerId),
    Message { peer: PeerId, message: ClientMessage },
    Data { peer: PeerId, bytes: Vec<u8> },
    Disconnect(PeerId),
}

/// Decode a message received on the peer wildcard. Subjects that are not
/// peer → server traffic (such as per-peer pushes) yield `None`.
///
/// # Errors
///
/// Returns [`NetError`] if a control message has no usable `msg-type`
/// header or its payload does not match the kind.
pub fn parse_inbound(
    subject: &str,
    headers: Option<&HeaderMap>,
    payload: &[u8],
) -> Result<Option<Inbound>, NetError> {
    let Some((peer, channel)) = subjects::parse_peer_subject(subject) else {
        return Ok(None);
    };
    let peer = PeerId::from(peer);
    Ok(Some(match channel {
        PeerChannel::Connect => Inbound::Connect(peer),
        PeerChannel::Disconnect => Inbound::Disconnect(peer),
        PeerChannel::Data => Inbound::Data {
            peer,
            bytes: payload.to_vec(),
        },
        PeerChannel::Message => {
            let kind = message_type(headers)?;
            Inbound::Message {
                peer,
                message: ClientMessage::from_parts(kind, payload)?,
            }
        }
    }))
}

/// Forward everything peers publish into the event loop.
pub fn spawn_inbound(
    conn: NatsConnection,
    mut subscriber: async_nats::Subscriber,
    events: ServerHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(subject = subjects::PEER_WILDCARD, "listening for peers");
        while let Some(msg) = subscriber.next().await {
            let inbound = match parse_inbound(msg.subject.as_str(), msg.headers.as_ref(), &msg.payload) {
                Ok(Some(inbound)) => inbound,
                Ok(None) => continue,
                Err(error) => {
                    warn!(subject = %msg.subject, %error, "malformed peer message");
                    if let Some(reply) = &msg.reply {
                        let rejected = Response::Rejected {
                            message: error.to_string(),
                        };
                        if let Err(error) = conn.respond(reply.as_str(), &rejected).await {
                            warn!(%error, "failed to send rejection");
                        }
                    }
                    continue;
                }
            };

            match inbound {
                Inbound::Connect(peer) => events.connect(peer),
                Inbound::Disconnect(peer) => events.disconnect(peer),
                Inbound::Data { peer, bytes } => events.data(peer, bytes),
                Inbound::Message { peer, message } => match msg.reply.clone() {
                    Some(reply) if message.expects_reply() => {
                        let ack = events.send(peer, message);
                        let conn = conn.clone();
                        tokio::spawn(async move {
                            let Ok(response) = ack.await else {
                                debug!(reply = %reply, "request closed without acknowledgement");
                                return;
                            };
                            if let Err(error) = conn.respond(reply.as_str(), &response).await {
                                warn!(%error, "failed to send acknowledgement");
                            }
                        });
                    }
                    _ => events.notify(peer, message),
                },
            }
        }
        info!("peer subscription closed");
    })
}

// ── Outbound ────────────────────────────────────────────────────────────────

/// The broadcast subject a server push goes out on.
#[must_use]
pub fn broadcast_subject(message: &ServerMessage) -> &'static str {
    match message {
        ServerMessage::ActionData(_) => WORLD_ACTIONS,
        ServerMessage::ReliableMessage(_) => WORLD_RELIABLE,
        ServerMessage::UpdateNetworkState(_) => WORLD_STATE,
        ServerMessage::Kick(_) => WORLD_KICK,
    }
}

async fn publish(conn: &NatsConnection, outbound: Outbound) -> Result<(), NetError> {
    match outbound {
        Outbound::Broadcast(message) => {
            let subject = broadcast_subject(&message);
            let (kind, payload) = message.to_parts()?;
            conn.publish_typed(subject, kind, payload).await
        }
        Outbound::ToPeer { peer, message } => {
            let (kind, payload) = message.to_parts()?;
            conn.publish_typed(&subjects::peer_out(peer.as_str()), kind, payload)
                .await
        }
        Outbound::Data(bytes) => conn.publish_bytes(WORLD_DATA, bytes).await,
    }
}

/// Publish everything the server sends until the sink is dropped.
pub fn spawn_outbound(
    conn: NatsConnection,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(next) = outbound.recv().await {
            if let Err(error) = publish(&conn, next).await {
                warn!(%error, "publish failed");
            }
        }
        debug!("outbound sink closed");
    })
}
