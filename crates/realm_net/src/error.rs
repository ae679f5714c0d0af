//! Network-layer error types.

/// Errors that can occur during network operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to encode a message to MessagePack.
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Failed to decode a message from MessagePack.
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("NATS subscribe error: {0}")]
    Subscribe(#[from] async_nats::SubscribeError),

    #[error("NATS publish error: {0}")]
    Publish(#[from] async_nats::PublishError),

    #[error("NATS connection error: {0}")]
    Connect(#[from] async_nats::ConnectError),

    /// A required NATS header was missing.
    #[error("missing NATS header: {0}")]
    MissingHeader(String),

    /// The `msg-type` header named a message this side does not accept.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
}

/// Reasons a world-state buffer was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The buffer ended before a fixed-width field.
    #[error("buffer truncated reading {field} at offset {offset}: need {needed} bytes, {remaining} left")]
    Truncated {
        field: &'static str,
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    /// A list length prefix claims more records than the buffer holds.
    #[error("{list} count {count} needs {needed} bytes, {remaining} left")]
    BadListLength {
        list: &'static str,
        count: u32,
        needed: u64,
        remaining: usize,
    },

    /// Bytes left over after the last list.
    #[error("{0} trailing bytes after world state")]
    TrailingBytes(usize),
}
