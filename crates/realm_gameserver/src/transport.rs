//! Outbound side of the server transport.
//!
//! The event loop never touches the network directly. It pushes [`Outbound`]
//! records into a sink drained by the NATS adapter (or by a test). Before the
//! sink is attached every send is a silent no-op, as are data sends before
//! the outgoing data producer exists.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use realm_net::messages::{Action, ServerMessage};
use realm_net::PeerId;

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// To every connected peer.
    Broadcast(ServerMessage),
    ToPeer { peer: PeerId, message: ServerMessage },
    /// Through the outgoing data producer to every router.
    Data(Vec<u8>),
}

pub type OutboundSink = mpsc::UnboundedSender<Outbound>;

#[derive(Debug, Default)]
pub struct ServerTransport {
    sink: Option<OutboundSink>,
    outgoing_data_producer: Option<String>,
}

impl ServerTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, sink: OutboundSink) {
        self.sink = Some(sink);
    }

    pub fn attach_outgoing_data(&mut self, producer_id: String) {
        info!(producer = %producer_id, "outgoing data path ready");
        self.outgoing_data_producer = Some(producer_id);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.sink.is_some()
    }

    fn push(&self, outbound: Outbound) {
        let Some(sink) = &self.sink else {
            debug!("transport not initialised, dropping outbound message");
            return;
        };
        if sink.send(outbound).is_err() {
            warn!("outbound channel closed");
        }
    }

    /// Broadcast a batch of actions. Empty batches are not sent.
    pub fn send_actions(&self, actions: Vec<Action>) {
        if actions.is_empty() {
            return;
        }
        self.push(Outbound::Broadcast(ServerMessage::ActionData(actions)));
    }

    pub fn send_reliable_data(&self, message: Value) {
        self.push(Outbound::Broadcast(ServerMessage::ReliableMessage(message)));
    }

    pub fn send_network_state_update(&self, message: Value) {
        self.push(Outbound::Broadcast(ServerMessage::UpdateNetworkState(
            message,
        )));
    }

    pub fn send_to(&self, peer: PeerId, message: ServerMessage) {
        self.push(Outbound::ToPeer { peer, message });
    }

    /// Tell everyone `peer` is being removed.
    pub fn kick(&self, peer: &PeerId) {
        info!(%peer, "kicking peer");
        self.push(Outbound::Broadcast(ServerMessage::Kick(peer.clone())));
    }

    /// Send raw bytes through the outgoing data producer.
    pub fn send_data(&self, data: Vec<u8>) {
        if self.outgoing_data_producer.is_none() {
            return;
        }
        self.push(Outbound::Data(data));
    }
}
