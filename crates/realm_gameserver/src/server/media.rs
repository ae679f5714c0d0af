//! Media and data-channel negotiation requests.
//!
//! Every request is answered; failures become [`MediaResponse::Error`] for
//! the requesting peer and never touch other sessions.

use glam::Vec3;
use tracing::warn;

use realm_math::Transform3D;
use realm_net::messages::{ChannelKey, MediaRequest, MediaResponse, ProducerInfo};
use realm_net::{PeerId, UserId};

use super::GameServer;
use crate::media::MediaError;

impl GameServer {
    pub(super) fn on_media(&mut self, peer: &PeerId, request: MediaRequest) -> MediaResponse {
        let kind = request.message_type();
        match self.negotiate(peer, request) {
            Ok(response) => response,
            Err(error) => {
                warn!(%peer, %kind, %error, "media request failed");
                MediaResponse::Error {
                    message: error.to_string(),
                }
            }
        }
    }

    fn negotiate(&mut self, peer: &PeerId, request: MediaRequest) -> Result<MediaResponse, MediaError> {
        let media = &mut self.media;
        Ok(match request {
            MediaRequest::TransportCreate {
                direction,
                channel,
                sctp_capabilities,
            } => MediaResponse::TransportCreated(media.create_transport(
                peer,
                direction,
                &channel,
                &sctp_capabilities,
            )?),
            MediaRequest::TransportConnect {
                transport_id,
                dtls_parameters,
            } => {
                media.connect_transport(peer, &transport_id, &dtls_parameters)?;
                MediaResponse::Ok
            }
            MediaRequest::TransportClose { transport_id } => {
                media.close_transport(peer, &transport_id)?;
                MediaResponse::Ok
            }
            MediaRequest::ProduceData {
                transport_id,
                label,
                protocol,
                ..
            } => MediaResponse::DataProduced {
                id: media.produce_data(peer, &transport_id, &label, &protocol)?,
            },
            MediaRequest::SendTrack {
                transport_id,
                kind,
                media_tag,
                rtp_parameters,
                paused,
            } => MediaResponse::Produced {
                id: media.produce(peer, &transport_id, kind, &media_tag, rtp_parameters, paused)?,
            },
            MediaRequest::ReceiveTrack {
                media_peer,
                media_tag,
                rtp_capabilities,
                channel,
            } => MediaResponse::Consumer(media.consume(
                peer,
                &media_peer,
                &media_tag,
                &rtp_capabilities,
                &channel,
            )?),
            MediaRequest::CloseProducer { producer_id } => {
                media.close_producer(peer, &producer_id)?;
                MediaResponse::Ok
            }
            MediaRequest::CloseConsumer { consumer_id } => {
                media.close_consumer(peer, &consumer_id)?;
                MediaResponse::Ok
            }
            MediaRequest::PauseProducer {
                producer_id,
                global_mute,
            } => {
                media.set_producer_paused(peer, &producer_id, true, global_mute)?;
                MediaResponse::Ok
            }
            MediaRequest::ResumeProducer {
                producer_id,
                global_mute,
            } => {
                media.set_producer_paused(peer, &producer_id, false, global_mute)?;
                MediaResponse::Ok
            }
            MediaRequest::PauseConsumer { consumer_id } => {
                media.set_consumer_paused(peer, &consumer_id, true)?;
                MediaResponse::Ok
            }
            MediaRequest::ResumeConsumer { consumer_id } => {
                media.set_consumer_paused(peer, &consumer_id, false)?;
                MediaResponse::Ok
            }
            MediaRequest::ConsumerSetLayers {
                consumer_id,
                spatial_layer,
            } => {
                media.set_consumer_layers(peer, &consumer_id, spatial_layer)?;
                MediaResponse::Ok
            }
            MediaRequest::InitializeRouter { channel } => {
                let (router_id, rtp_capabilities) = media.initialize_router(&channel)?;
                MediaResponse::RouterInitialized {
                    router_id,
                    rtp_capabilities,
                }
            }
            MediaRequest::RequestNearbyUsers => MediaResponse::NearbyUsers {
                user_ids: self.nearby_users(peer),
            },
            MediaRequest::RequestCurrentProducers { user_ids, channel } => {
                MediaResponse::CurrentProducers {
                    producers: self.current_producers(&user_ids, &channel),
                }
            }
        })
    }

    fn avatar_position(&self, peer: &PeerId) -> Option<Vec3> {
        let network_id = self.sessions.get(peer)?.avatar_network_id?;
        let entity = self.registry.get(network_id)?.entity;
        self.world
            .get_component::<Transform3D>(entity)
            .map(|transform| transform.position)
    }

    /// Users whose avatar is within the configured radius of the peer's.
    fn nearby_users(&self, peer: &PeerId) -> Vec<UserId> {
        let Some(origin) = self.avatar_position(peer) else {
            return Vec::new();
        };
        let radius = self.config.nearby_radius;
        let mut users: Vec<UserId> = self
            .sessions
            .values()
            .filter(|other| &other.peer != peer && other.in_world())
            .filter(|other| {
                self.avatar_position(&other.peer)
                    .is_some_and(|position| position.distance(origin) <= radius)
            })
            .filter_map(|other| other.user_id().cloned())
            .collect();
        users.sort();
        users.dedup();
        users
    }

    /// Producers on `channel`, limited to `user_ids` unless it is empty,
    /// tagged with the user each producing peer is signed in as.
    fn current_producers(
        &self,
        user_ids: &[UserId],
        channel: &ChannelKey,
    ) -> Vec<ProducerInfo> {
        let peers: Option<Vec<PeerId>> = (!user_ids.is_empty()).then(|| {
            self.sessions
                .values()
                .filter(|session| session.user_id().is_some_and(|user| user_ids.contains(user)))
                .map(|session| session.peer.clone())
                .collect()
        });
        let mut producers = self.media.producers_on(channel, peers.as_deref());
        for producer in &mut producers {
            producer.user = self
                .sessions
                .get(&producer.peer)
                .and_then(|session| session.user_id().cloned());
        }
        producers
    }
}
