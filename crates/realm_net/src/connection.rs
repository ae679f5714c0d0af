//! NATS connection management.
//!
//! Provides a thin wrapper around `async-nats` with the realm's header and
//! reply conventions.

use async_nats::HeaderMap;
use tracing::info;

use crate::error::NetError;
use crate::messages::{MessageType, headers};

/// Default NATS server URL.
pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

/// The environment variable used to override the NATS URL.
pub const NATS_URL_ENV: &str = "NATS_URL";

/// A wrapper around an `async-nats` client.
#[derive(Debug, Clone)]
pub struct NatsConnection {
    client: async_nats::Client,
}

impl NatsConnection {
    /// Connect using the URL from `NATS_URL`, falling back to
    /// [`DEFAULT_NATS_URL`].
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Connect`] if the connection cannot be established.
    pub async fn connect() -> Result<Self, NetError> {
        let url = std::env::var(NATS_URL_ENV).unwrap_or_else(|_| DEFAULT_NATS_URL.to_string());
        Self::connect_to(&url).await
    }

    /// # Errors
    ///
    /// Returns [`NetError::Connect`] if the connection cannot be established.
    pub async fn connect_to(url: &str) -> Result<Self, NetError> {
        info!(url, "connecting to NATS");
        let client = async_nats::connect(url).await?;
        info!("NATS connection established");
        Ok(Self { client })
    }

    #[must_use]
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Publish an already-encoded payload tagged with its message type.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Publish`] if publishing fails.
    pub async fn publish_typed(
        &self,
        subject: &str,
        kind: MessageType,
        payload: Vec<u8>,
    ) -> Result<(), NetError> {
        let mut headers = HeaderMap::new();
        headers.insert(headers::MSG_TYPE, kind.as_str());
        self.client
            .publish_with_headers(subject.to_string(), headers, payload.into())
            .await?;
        Ok(())
    }

    /// Publish raw bytes (world-state buffers).
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Publish`] if publishing fails.
    pub async fn publish_bytes(&self, subject: &str, payload: Vec<u8>) -> Result<(), NetError> {
        self.client
            .publish(subject.to_string(), payload.into())
            .await?;
        Ok(())
    }

    /// Answer a request on its reply subject with a MessagePack payload.
    ///
    /// # Errors
    ///
    /// Returns [`NetError`] if encoding or publishing fails.
    pub async fn respond<T: serde::Serialize>(
        &self,
        reply: &str,
        response: &T,
    ) -> Result<(), NetError> {
        let payload = crate::codec::encode(response)?;
        self.client
            .publish(reply.to_string(), payload.into())
            .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`NetError::Subscribe`] if the subscription fails.
    pub async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber, NetError> {
        let sub = self.client.subscribe(subject.to_string()).await?;
        Ok(sub)
    }
}

/// Read the [`MessageType`] from a message's headers.
///
/// # Errors
///
/// Returns [`NetError::MissingHeader`] if there is no `msg-type` header and
/// [`NetError::UnknownMessageType`] if its value is not a known kind.
pub fn message_type(headers: Option<&HeaderMap>) -> Result<MessageType, NetError> {
    let value = headers
        .and_then(|h| h.get(headers::MSG_TYPE))
        .map(|v| v.as_str().to_string())
        .ok_or_else(|| NetError::MissingHeader(headers::MSG_TYPE.to_string()))?;
    MessageType::parse(&value).ok_or(NetError::UnknownMessageType(value))
}
