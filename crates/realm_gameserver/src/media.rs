//! Media and data-channel plane.
//!
//! Tracks the worker / router / transport / producer / consumer graph for
//! voice, video and data channels. RTP and SCTP are not carried here: the
//! plane owns negotiation bookkeeping and hands out the opaque parameters
//! peers need, keyed by uuid identifiers.
//!
//! Instance routers are created at start-up. One direct transport on the
//! first of them carries the server's outgoing data producer, which is piped
//! to every other instance router so a single send reaches all regions.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use realm_net::messages::{
    ChannelKey, ConsumerParams, MediaKind, ProducerInfo, TransportDirection, TransportParams,
};
use realm_net::PeerId;

use crate::config::MediaConfig;

/// Label and peer tag of the server's outgoing data producer.
pub const OUTGOING_PRODUCER_LABEL: &str = "outgoingProducer";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MediaError {
    #[error("media plane is not started")]
    NotStarted,

    #[error("invalid media configuration: {0}")]
    InvalidConfig(String),

    #[error("no router initialised for channel {0:?}")]
    RouterNotInitialized(ChannelKey),

    #[error("unknown transport {0}")]
    UnknownTransport(String),

    #[error("unknown producer {0}")]
    UnknownProducer(String),

    #[error("unknown consumer {0}")]
    UnknownConsumer(String),

    #[error("{kind} {id} belongs to another peer")]
    NotOwner { kind: &'static str, id: String },

    #[error("transport {transport} is not a {expected:?} transport")]
    WrongDirection {
        transport: String,
        expected: TransportDirection,
    },

    #[error("transport {0} is already connected")]
    AlreadyConnected(String),

    #[error("peer {peer} has no producer tagged {media_tag}")]
    NoMatchingProducer { peer: PeerId, media_tag: String },

    #[error("no receive transport on the router for channel {0:?}")]
    NoRecvTransport(ChannelKey),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("cannot consume: {0}")]
    CannotConsume(String),

    #[error("consumer {0} is not a video consumer")]
    NotVideo(String),
}

#[derive(Debug, Clone)]
pub struct Worker {
    pub id: String,
    pub routers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Router {
    pub id: String,
    pub worker: String,
    pub channel: ChannelKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebRtc(TransportDirection),
    /// Server-local transport with no ICE/DTLS.
    Direct,
}

#[derive(Debug, Clone)]
pub struct Transport {
    pub id: String,
    /// `None` for server-owned transports.
    pub peer: Option<PeerId>,
    pub router: String,
    pub kind: TransportKind,
    pub connected: bool,
}

#[derive(Debug, Clone)]
pub struct Producer {
    pub id: String,
    pub peer: PeerId,
    pub transport: String,
    pub kind: MediaKind,
    pub media_tag: String,
    pub rtp_parameters: Value,
    pub paused: bool,
    pub global_mute: bool,
}

#[derive(Debug, Clone)]
pub struct DataProducer {
    pub id: String,
    pub peer: Option<PeerId>,
    pub transport: String,
    pub label: String,
    pub protocol: String,
    pub ordered: bool,
    /// Routers this producer has been piped to.
    pub piped_to: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Consumer {
    pub id: String,
    pub peer: PeerId,
    pub producer: String,
    pub transport: String,
    pub kind: MediaKind,
    pub paused: bool,
    pub spatial_layer: Option<u8>,
}

/// The server's broadcast data path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingDataPath {
    pub transport: String,
    pub producer: String,
    pub piped_to: Vec<String>,
}

/// What releasing a peer tore down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaRelease {
    pub transports: usize,
    pub producers: usize,
    pub data_producers: usize,
    pub consumers: usize,
}

impl MediaRelease {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug)]
pub struct MediaPlane {
    config: MediaConfig,
    workers: Vec<Worker>,
    next_worker: usize,
    routers: BTreeMap<String, Router>,
    instance_routers: Vec<String>,
    channel_routers: HashMap<ChannelKey, String>,
    transports: HashMap<String, Transport>,
    producers: HashMap<String, Producer>,
    data_producers: HashMap<String, DataProducer>,
    consumers: HashMap<String, Consumer>,
    outgoing: Option<OutgoingDataPath>,
    next_port: u16,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn rtp_capabilities() -> Value {
    json!({
        "codecs": [
            { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
            { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 },
            { "kind": "video", "mimeType": "video/H264", "clockRate": 90000,
              "parameters": { "packetization-mode": 1, "profile-level-id": "4d0032" } }
        ],
        "headerExtensions": []
    })
}

impl MediaPlane {
    #[must_use]
    pub fn new(config: MediaConfig) -> Self {
        let next_port = config.rtc_min_port;
        Self {
            config,
            workers: Vec::new(),
            next_worker: 0,
            routers: BTreeMap::new(),
            instance_routers: Vec::new(),
            channel_routers: HashMap::new(),
            transports: HashMap::new(),
            producers: HashMap::new(),
            data_producers: HashMap::new(),
            consumers: HashMap::new(),
            outgoing: None,
            next_port,
        }
    }

    /// Create the worker pool and the instance routers.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::InvalidConfig`] for an empty pool or no
    /// instance routers.
    pub fn start(&mut self) -> Result<(), MediaError> {
        if self.config.workers == 0 || self.config.instance_routers == 0 {
            return Err(MediaError::InvalidConfig(format!(
                "need at least one worker and one instance router, got {} and {}",
                self.config.workers, self.config.instance_routers
            )));
        }
        if self.config.rtc_min_port > self.config.rtc_max_port {
            return Err(MediaError::InvalidConfig(format!(
                "port range {}..{} is empty",
                self.config.rtc_min_port, self.config.rtc_max_port
            )));
        }
        if !self.workers.is_empty() {
            return Ok(());
        }
        for _ in 0..self.config.workers {
            self.workers.push(Worker {
                id: new_id(),
                routers: Vec::new(),
            });
        }
        for _ in 0..self.config.instance_routers {
            let router = self.create_router(ChannelKey::Instance);
            self.instance_routers.push(router);
        }
        info!(
            workers = self.workers.len(),
            routers = self.instance_routers.len(),
            "media plane started"
        );
        Ok(())
    }

    fn create_router(&mut self, channel: ChannelKey) -> String {
        let index = self.next_worker % self.workers.len().max(1);
        self.next_worker += 1;
        let id = new_id();
        let worker = match self.workers.get_mut(index) {
            Some(worker) => {
                worker.routers.push(id.clone());
                worker.id.clone()
            }
            None => String::new(),
        };
        debug!(router = %id, %worker, ?channel, "router created");
        self.routers.insert(
            id.clone(),
            Router {
                id: id.clone(),
                worker,
                channel,
            },
        );
        id
    }

    /// Set up the server-to-all data path. Calling it again returns the
    /// existing path.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::NotStarted`] if there are no instance routers.
    pub fn init_outgoing_data_path(&mut self) -> Result<OutgoingDataPath, MediaError> {
        if let Some(path) = &self.outgoing {
            return Ok(path.clone());
        }
        let origin = self
            .instance_routers
            .first()
            .cloned()
            .ok_or(MediaError::NotStarted)?;

        let transport = new_id();
        self.transports.insert(
            transport.clone(),
            Transport {
                id: transport.clone(),
                peer: None,
                router: origin.clone(),
                kind: TransportKind::Direct,
                connected: true,
            },
        );

        let producer = new_id();
        let piped_to: Vec<String> = self
            .instance_routers
            .iter()
            .filter(|router| **router != origin)
            .cloned()
            .collect();
        self.data_producers.insert(
            producer.clone(),
            DataProducer {
                id: producer.clone(),
                peer: None,
                transport: transport.clone(),
                label: OUTGOING_PRODUCER_LABEL.to_string(),
                protocol: "raw".to_string(),
                ordered: false,
                piped_to: piped_to.clone(),
            },
        );

        let path = OutgoingDataPath {
            transport,
            producer,
            piped_to,
        };
        info!(producer = %path.producer, piped = path.piped_to.len(), "outgoing data producer created");
        self.outgoing = Some(path.clone());
        Ok(path)
    }

    #[must_use]
    pub fn outgoing(&self) -> Option<&OutgoingDataPath> {
        self.outgoing.as_ref()
    }

    fn router_for(&self, channel: &ChannelKey) -> Result<&Router, MediaError> {
        let id = match channel {
            ChannelKey::Instance => self.instance_routers.first(),
            ChannelKey::Named(_) => self.channel_routers.get(channel),
        };
        id.and_then(|id| self.routers.get(id))
            .ok_or_else(|| MediaError::RouterNotInitialized(channel.clone()))
    }

    /// Capabilities peers load their device with.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::RouterNotInitialized`] if the channel has no router.
    pub fn router_capabilities(&self, channel: &ChannelKey) -> Result<Value, MediaError> {
        self.router_for(channel).map(|_| rtp_capabilities())
    }

    /// Make sure `channel` has a router. Named channels get one on first use.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::NotStarted`] before [`MediaPlane::start`].
    pub fn initialize_router(&mut self, channel: &ChannelKey) -> Result<(String, Value), MediaError> {
        if self.workers.is_empty() {
            return Err(MediaError::NotStarted);
        }
        if let ChannelKey::Named(_) = channel {
            if !self.channel_routers.contains_key(channel) {
                let router = self.create_router(channel.clone());
                self.channel_routers.insert(channel.clone(), router);
            }
        }
        let router = self.router_for(channel)?;
        Ok((router.id.clone(), rtp_capabilities()))
    }

    fn allocate_port(&mut self) -> u16 {
        let port = self.next_port;
        self.next_port = if port >= self.config.rtc_max_port {
            self.config.rtc_min_port
        } else {
            port + 1
        };
        port
    }

    /// # Errors
    ///
    /// Returns [`MediaError::RouterNotInitialized`] if the channel has no router.
    pub fn create_transport(
        &mut self,
        peer: &PeerId,
        direction: TransportDirection,
        channel: &ChannelKey,
        sctp_capabilities: &Value,
    ) -> Result<TransportParams, MediaError> {
        let router = self.router_for(channel)?.id.clone();
        let id = new_id();
        let port = self.allocate_port();
        self.transports.insert(
            id.clone(),
            Transport {
                id: id.clone(),
                peer: Some(peer.clone()),
                router,
                kind: TransportKind::WebRtc(direction),
                connected: false,
            },
        );
        debug!(%peer, transport = %id, ?direction, "transport created");

        let sctp_parameters = if sctp_capabilities.is_null() {
            Value::Null
        } else {
            json!({ "port": 5000, "OS": 1024, "MIS": 1024, "maxMessageSize": 262_144 })
        };
        Ok(TransportParams {
            id,
            ice_parameters: json!({
                "usernameFragment": Uuid::new_v4().simple().to_string(),
                "password": Uuid::new_v4().simple().to_string(),
                "iceLite": true
            }),
            ice_candidates: json!([{
                "foundation": "udpcandidate",
                "ip": self.config.announced_ip,
                "port": port,
                "priority": 1_076_302_079u32,
                "protocol": "udp",
                "type": "host"
            }]),
            dtls_parameters: json!({
                "role": "auto",
                "fingerprints": [{ "algorithm": "sha-256", "value": Uuid::new_v4().to_string() }]
            }),
            sctp_parameters,
        })
    }

    fn owned_transport(&self, peer: &PeerId, id: &str) -> Result<&Transport, MediaError> {
        let transport = self
            .transports
            .get(id)
            .ok_or_else(|| MediaError::UnknownTransport(id.to_string()))?;
        if transport.peer.as_ref() != Some(peer) {
            return Err(MediaError::NotOwner {
                kind: "transport",
                id: id.to_string(),
            });
        }
        Ok(transport)
    }

    /// # Errors
    ///
    /// Fails for unknown, foreign or already connected transports.
    pub fn connect_transport(
        &mut self,
        peer: &PeerId,
        transport_id: &str,
        dtls_parameters: &Value,
    ) -> Result<(), MediaError> {
        if self.owned_transport(peer, transport_id)?.connected {
            return Err(MediaError::AlreadyConnected(transport_id.to_string()));
        }
        if !dtls_parameters.is_object() {
            return Err(MediaError::InvalidParameters(
                "dtls parameters must be an object".to_string(),
            ));
        }
        if let Some(transport) = self.transports.get_mut(transport_id) {
            transport.connected = true;
        }
        Ok(())
    }

    /// Close a transport and everything produced or consumed on it.
    ///
    /// # Errors
    ///
    /// Fails for unknown or foreign transports.
    pub fn close_transport(&mut self, peer: &PeerId, transport_id: &str) -> Result<MediaRelease, MediaError> {
        self.owned_transport(peer, transport_id)?;
        Ok(self.remove_transport(transport_id))
    }

    fn remove_transport(&mut self, transport_id: &str) -> MediaRelease {
        let mut release = MediaRelease::default();
        if self.transports.remove(transport_id).is_none() {
            return release;
        }
        release.transports = 1;

        let producers: Vec<String> = self
            .producers
            .values()
            .filter(|p| p.transport == transport_id)
            .map(|p| p.id.clone())
            .collect();
        for id in producers {
            release.consumers += self.remove_producer(&id);
            release.producers += 1;
        }

        let before = self.data_producers.len();
        self.data_producers.retain(|_, dp| dp.transport != transport_id);
        release.data_producers = before - self.data_producers.len();

        let before = self.consumers.len();
        self.consumers.retain(|_, c| c.transport != transport_id);
        release.consumers += before - self.consumers.len();
        release
    }

    /// Removes the producer and its consumers; returns the consumer count.
    fn remove_producer(&mut self, producer_id: &str) -> usize {
        self.producers.remove(producer_id);
        let before = self.consumers.len();
        self.consumers.retain(|_, c| c.producer != producer_id);
        before - self.consumers.len()
    }

    fn send_transport(&self, peer: &PeerId, transport_id: &str) -> Result<&Transport, MediaError> {
        let transport = self.owned_transport(peer, transport_id)?;
        if transport.kind != TransportKind::WebRtc(TransportDirection::Send) {
            return Err(MediaError::WrongDirection {
                transport: transport_id.to_string(),
                expected: TransportDirection::Send,
            });
        }
        Ok(transport)
    }

    /// Start a media producer (send a track).
    ///
    /// # Errors
    ///
    /// Fails unless `transport_id` is one of the peer's send transports.
    pub fn produce(
        &mut self,
        peer: &PeerId,
        transport_id: &str,
        kind: MediaKind,
        media_tag: &str,
        rtp_parameters: Value,
        paused: bool,
    ) -> Result<String, MediaError> {
        self.send_transport(peer, transport_id)?;
        let id = new_id();
        self.producers.insert(
            id.clone(),
            Producer {
                id: id.clone(),
                peer: peer.clone(),
                transport: transport_id.to_string(),
                kind,
                media_tag: media_tag.to_string(),
                rtp_parameters,
                paused,
                global_mute: false,
            },
        );
        debug!(%peer, producer = %id, media_tag, ?kind, "producer created");
        Ok(id)
    }

    /// # Errors
    ///
    /// Fails unless `transport_id` is one of the peer's send transports.
    pub fn produce_data(
        &mut self,
        peer: &PeerId,
        transport_id: &str,
        label: &str,
        protocol: &str,
    ) -> Result<String, MediaError> {
        self.send_transport(peer, transport_id)?;
        let id = new_id();
        self.data_producers.insert(
            id.clone(),
            DataProducer {
                id: id.clone(),
                peer: Some(peer.clone()),
                transport: transport_id.to_string(),
                label: label.to_string(),
                protocol: protocol.to_string(),
                ordered: false,
                piped_to: Vec::new(),
            },
        );
        debug!(%peer, data_producer = %id, label, "data producer created");
        Ok(id)
    }

    /// Create a consumer of `media_peer`'s producer tagged `media_tag` on
    /// the peer's receive transport for `channel`. Consumers start paused.
    ///
    /// # Errors
    ///
    /// Fails when there is no such producer, no receive transport, or the
    /// capabilities are unusable.
    pub fn consume(
        &mut self,
        peer: &PeerId,
        media_peer: &PeerId,
        media_tag: &str,
        rtp_capabilities: &Value,
        channel: &ChannelKey,
    ) -> Result<ConsumerParams, MediaError> {
        let router = self.router_for(channel)?.id.clone();
        if !rtp_capabilities.is_object() {
            return Err(MediaError::CannotConsume(
                "rtp capabilities must be an object".to_string(),
            ));
        }
        let producer = self
            .producers
            .values()
            .find(|p| {
                &p.peer == media_peer
                    && p.media_tag == media_tag
                    && self
                        .transports
                        .get(&p.transport)
                        .is_some_and(|t| t.router == router)
            })
            .cloned()
            .ok_or_else(|| MediaError::NoMatchingProducer {
                peer: media_peer.clone(),
                media_tag: media_tag.to_string(),
            })?;
        let transport = self
            .transports
            .values()
            .find(|t| {
                t.peer.as_ref() == Some(peer)
                    && t.router == router
                    && t.kind == TransportKind::WebRtc(TransportDirection::Recv)
            })
            .map(|t| t.id.clone())
            .ok_or_else(|| MediaError::NoRecvTransport(channel.clone()))?;

        let id = new_id();
        self.consumers.insert(
            id.clone(),
            Consumer {
                id: id.clone(),
                peer: peer.clone(),
                producer: producer.id.clone(),
                transport,
                kind: producer.kind,
                paused: true,
                spatial_layer: None,
            },
        );
        debug!(%peer, consumer = %id, producer = %producer.id, "consumer created");
        Ok(ConsumerParams {
            id,
            producer_id: producer.id,
            media_peer: media_peer.clone(),
            media_tag: media_tag.to_string(),
            kind: producer.kind,
            rtp_parameters: producer.rtp_parameters,
            producer_paused: producer.paused,
            channel: channel.clone(),
        })
    }

    fn owned_producer(&mut self, peer: &PeerId, id: &str) -> Result<&mut Producer, MediaError> {
        let producer = self
            .producers
            .get_mut(id)
            .ok_or_else(|| MediaError::UnknownProducer(id.to_string()))?;
        if &producer.peer != peer {
            return Err(MediaError::NotOwner {
                kind: "producer",
                id: id.to_string(),
            });
        }
        Ok(producer)
    }

    fn owned_consumer(&mut self, peer: &PeerId, id: &str) -> Result<&mut Consumer, MediaError> {
        let consumer = self
            .consumers
            .get_mut(id)
            .ok_or_else(|| MediaError::UnknownConsumer(id.to_string()))?;
        if &consumer.peer != peer {
            return Err(MediaError::NotOwner {
                kind: "consumer",
                id: id.to_string(),
            });
        }
        Ok(consumer)
    }

    /// Pause or resume a producer. A global mute also pauses or resumes
    /// every consumer of it.
    ///
    /// # Errors
    ///
    /// Fails for unknown or foreign producers.
    pub fn set_producer_paused(
        &mut self,
        peer: &PeerId,
        producer_id: &str,
        paused: bool,
        global_mute: bool,
    ) -> Result<(), MediaError> {
        let producer = self.owned_producer(peer, producer_id)?;
        producer.paused = paused;
        producer.global_mute = paused && global_mute;
        if global_mute {
            for consumer in self
                .consumers
                .values_mut()
                .filter(|c| c.producer == producer_id)
            {
                consumer.paused = paused;
            }
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Fails for unknown or foreign producers.
    pub fn close_producer(&mut self, peer: &PeerId, producer_id: &str) -> Result<usize, MediaError> {
        self.owned_producer(peer, producer_id)?;
        Ok(self.remove_producer(producer_id))
    }

    /// # Errors
    ///
    /// Fails for unknown or foreign consumers.
    pub fn set_consumer_paused(&mut self, peer: &PeerId, consumer_id: &str, paused: bool) -> Result<(), MediaError> {
        self.owned_consumer(peer, consumer_id)?.paused = paused;
        Ok(())
    }

    /// # Errors
    ///
    /// Fails for unknown or foreign consumers.
    pub fn close_consumer(&mut self, peer: &PeerId, consumer_id: &str) -> Result<(), MediaError> {
        self.owned_consumer(peer, consumer_id)?;
        self.consumers.remove(consumer_id);
        Ok(())
    }

    /// # Errors
    ///
    /// Fails for unknown, foreign or audio consumers.
    pub fn set_consumer_layers(&mut self, peer: &PeerId, consumer_id: &str, spatial_layer: u8) -> Result<(), MediaError> {
        let consumer = self.owned_consumer(peer, consumer_id)?;
        if consumer.kind != MediaKind::Video {
            return Err(MediaError::NotVideo(consumer_id.to_string()));
        }
        consumer.spatial_layer = Some(spatial_layer);
        Ok(())
    }

    /// Producers on `channel`'s router, optionally only those of `peers`.
    /// `user` is left for the caller to fill in.
    #[must_use]
    pub fn producers_on(&self, channel: &ChannelKey, peers: Option<&[PeerId]>) -> Vec<ProducerInfo> {
        let Ok(router) = self.router_for(channel) else {
            return Vec::new();
        };
        let mut producers: Vec<ProducerInfo> = self
            .producers
            .values()
            .filter(|p| peers.is_none_or(|peers| peers.contains(&p.peer)))
            .filter(|p| {
                self.transports
                    .get(&p.transport)
                    .is_some_and(|t| t.router == router.id)
            })
            .map(|p| ProducerInfo {
                id: p.id.clone(),
                peer: p.peer.clone(),
                user: None,
                media_tag: p.media_tag.clone(),
                channel: channel.clone(),
            })
            .collect();
        producers.sort_by(|a, b| a.id.cmp(&b.id));
        producers
    }

    /// Tear down every transport a peer owns, and with them its producers
    /// and consumers. Safe to call repeatedly.
    pub fn release_peer(&mut self, peer: &PeerId) -> MediaRelease {
        let owned: Vec<String> = self
            .transports
            .values()
            .filter(|t| t.peer.as_ref() == Some(peer))
            .map(|t| t.id.clone())
            .collect();
        let mut release = MediaRelease::default();
        for id in owned {
            let part = self.remove_transport(&id);
            release.transports += part.transports;
            release.producers += part.producers;
            release.data_producers += part.data_producers;
            release.consumers += part.consumers;
        }
        if !release.is_empty() {
            debug!(%peer, ?release, "media released");
        }
        release
    }

    #[must_use]
    pub fn router_count(&self) -> usize {
        self.routers.len()
    }

    #[must_use]
    pub fn transport_count(&self) -> usize {
        self.transports.len()
    }

    #[must_use]
    pub fn producer(&self, id: &str) -> Option<&Producer> {
        self.producers.get(id)
    }

    #[must_use]
    pub fn consumer(&self, id: &str) -> Option<&Consumer> {
        self.consumers.get(id)
    }

    #[must_use]
    pub fn data_producer(&self, id: &str) -> Option<&DataProducer> {
        self.data_producers.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(routers: usize) -> MediaPlane {
        let mut plane = MediaPlane::new(MediaConfig {
            workers: 2,
            instance_routers: routers,
            ..MediaConfig::default()
        });
        plane.start().unwrap();
        plane
    }

    fn peer(id: &str) -> PeerId {
        PeerId::from(id)
    }

    fn send_and_recv(plane: &mut MediaPlane, who: &PeerId) -> (String, String) {
        let send = plane
            .create_transport(who, TransportDirection::Send, &ChannelKey::Instance, &Value::Null)
            .unwrap()
            .id;
        let recv = plane
            .create_transport(who, TransportDirection::Recv, &ChannelKey::Instance, &Value::Null)
            .unwrap()
            .id;
        (send, recv)
    }

    #[test]
    fn test_start_rejects_empty_pool() {
        let mut plane = MediaPlane::new(MediaConfig {
            workers: 0,
            ..MediaConfig::default()
        });
        assert!(matches!(plane.start(), Err(MediaError::InvalidConfig(_))));
    }

    #[test]
    fn test_outgoing_path_is_piped_to_other_routers() {
        let mut plane = started(3);
        let path = plane.init_outgoing_data_path().unwrap();
        assert_eq!(path.piped_to.len(), 2);
        let producer = plane.data_producer(&path.producer).unwrap();
        assert_eq!(producer.label, OUTGOING_PRODUCER_LABEL);
        assert_eq!(producer.protocol, "raw");
        assert!(!producer.ordered);
        assert_eq!(plane.init_outgoing_data_path().unwrap(), path);
    }

    #[test]
    fn test_outgoing_path_needs_routers() {
        let mut plane = MediaPlane::new(MediaConfig::default());
        assert_eq!(plane.init_outgoing_data_path(), Err(MediaError::NotStarted));
    }

    #[test]
    fn test_produce_and_consume() {
        let mut plane = started(1);
        let (alice, bob) = (peer("alice"), peer("bob"));
        let (alice_send, _) = send_and_recv(&mut plane, &alice);
        let (_, bob_recv) = send_and_recv(&mut plane, &bob);
        plane
            .connect_transport(&alice, &alice_send, &json!({ "role": "client" }))
            .unwrap();

        let producer = plane
            .produce(&alice, &alice_send, MediaKind::Audio, "cam-audio", json!({}), false)
            .unwrap();
        let consumer = plane
            .consume(&bob, &alice, "cam-audio", &json!({}), &ChannelKey::Instance)
            .unwrap();
        assert_eq!(consumer.producer_id, producer);
        assert_eq!(plane.consumer(&consumer.id).unwrap().transport, bob_recv);
        assert!(plane.consumer(&consumer.id).unwrap().paused);

        plane.set_consumer_paused(&bob, &consumer.id, false).unwrap();
        assert!(!plane.consumer(&consumer.id).unwrap().paused);
        assert!(matches!(
            plane.set_consumer_layers(&bob, &consumer.id, 2),
            Err(MediaError::NotVideo(_))
        ));
    }

    #[test]
    fn test_produce_requires_own_send_transport() {
        let mut plane = started(1);
        let (alice, bob) = (peer("alice"), peer("bob"));
        let (alice_send, alice_recv) = send_and_recv(&mut plane, &alice);
        assert!(matches!(
            plane.produce(&bob, &alice_send, MediaKind::Video, "cam", json!({}), false),
            Err(MediaError::NotOwner { .. })
        ));
        assert!(matches!(
            plane.produce(&alice, &alice_recv, MediaKind::Video, "cam", json!({}), false),
            Err(MediaError::WrongDirection { .. })
        ));
    }

    #[test]
    fn test_connect_twice_fails() {
        let mut plane = started(1);
        let alice = peer("alice");
        let (send, _) = send_and_recv(&mut plane, &alice);
        plane.connect_transport(&alice, &send, &json!({})).unwrap();
        assert_eq!(
            plane.connect_transport(&alice, &send, &json!({})),
            Err(MediaError::AlreadyConnected(send))
        );
    }

    #[test]
    fn test_global_mute_pauses_consumers() {
        let mut plane = started(1);
        let (alice, bob) = (peer("alice"), peer("bob"));
        let (alice_send, _) = send_and_recv(&mut plane, &alice);
        send_and_recv(&mut plane, &bob);
        let producer = plane
            .produce(&alice, &alice_send, MediaKind::Audio, "mic", json!({}), false)
            .unwrap();
        let consumer = plane
            .consume(&bob, &alice, "mic", &json!({}), &ChannelKey::Instance)
            .unwrap();
        plane.set_consumer_paused(&bob, &consumer.id, false).unwrap();

        plane.set_producer_paused(&alice, &producer, true, true).unwrap();
        assert!(plane.consumer(&consumer.id).unwrap().paused);
        assert!(plane.producer(&producer).unwrap().global_mute);
        plane.set_producer_paused(&alice, &producer, false, true).unwrap();
        assert!(!plane.consumer(&consumer.id).unwrap().paused);
    }

    #[test]
    fn test_named_channel_needs_initialisation() {
        let mut plane = started(1);
        let alice = peer("alice");
        let party = ChannelKey::Named("party-1".into());
        assert!(matches!(
            plane.create_transport(&alice, TransportDirection::Send, &party, &Value::Null),
            Err(MediaError::RouterNotInitialized(_))
        ));
        let (router, _) = plane.initialize_router(&party).unwrap();
        assert_eq!(plane.initialize_router(&party).unwrap().0, router);
        assert_eq!(plane.router_count(), 2);
        assert!(
            plane
                .create_transport(&alice, TransportDirection::Send, &party, &Value::Null)
                .is_ok()
        );
    }

    #[test]
    fn test_release_peer_tears_down_everything_once() {
        let mut plane = started(1);
        let (alice, bob) = (peer("alice"), peer("bob"));
        let (alice_send, _) = send_and_recv(&mut plane, &alice);
        send_and_recv(&mut plane, &bob);
        plane
            .produce(&alice, &alice_send, MediaKind::Audio, "mic", json!({}), false)
            .unwrap();
        plane.produce_data(&alice, &alice_send, "state", "raw").unwrap();
        let consumer = plane
            .consume(&bob, &alice, "mic", &json!({}), &ChannelKey::Instance)
            .unwrap();

        let release = plane.release_peer(&alice);
        assert_eq!(release.transports, 2);
        assert_eq!(release.producers, 1);
        assert_eq!(release.data_producers, 1);
        assert_eq!(release.consumers, 1);
        assert!(plane.consumer(&consumer.id).is_none());
        assert!(plane.release_peer(&alice).is_empty());
        assert_eq!(plane.transport_count(), 2);
    }

    #[test]
    fn test_producers_on_filters_by_peer() {
        let mut plane = started(1);
        let (alice, bob) = (peer("alice"), peer("bob"));
        let (alice_send, _) = send_and_recv(&mut plane, &alice);
        let (bob_send, _) = send_and_recv(&mut plane, &bob);
        plane
            .produce(&alice, &alice_send, MediaKind::Audio, "mic", json!({}), false)
            .unwrap();
        plane
            .produce(&bob, &bob_send, MediaKind::Video, "cam", json!({}), false)
            .unwrap();
        assert_eq!(plane.producers_on(&ChannelKey::Instance, None).len(), 2);
        let only_bob = plane.producers_on(&ChannelKey::Instance, Some(std::slice::from_ref(&bob)));
        assert_eq!(only_bob.len(), 1);
        assert_eq!(only_bob[0].peer, bob);
    }
}
