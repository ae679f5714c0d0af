//! MessagePack codec for control messages.
//!
//! Control messages (authorization, join, media negotiation, actions) are
//! encoded as MessagePack maps so field names survive schema drift between
//! peer and server builds. World-state snapshots use the fixed binary layout
//! in [`world_state`](crate::world_state) instead.

use serde::{Deserialize, Serialize};

use crate::error::NetError;

/// Encode a value to MessagePack bytes.
///
/// # Errors
///
/// Returns [`NetError::Encode`] if serialisation fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, NetError> {
    rmp_serde::to_vec_named(value).map_err(NetError::Encode)
}

/// Decode a value from MessagePack bytes.
///
/// # Errors
///
/// Returns [`NetError::Decode`] if deserialisation fails.
pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, NetError> {
    rmp_serde::from_slice(bytes).map_err(NetError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Record {
        user_id: String,
        #[serde(default)]
        attempt: u32,
    }

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct RecordV1 {
        user_id: String,
    }

    #[test]
    fn test_named_fields_tolerate_missing_defaults() {
        let bytes = encode(&RecordV1 {
            user_id: "u1".into(),
        })
        .unwrap();
        let record: Record = decode(&bytes).unwrap();
        assert_eq!(record.user_id, "u1");
        assert_eq!(record.attempt, 0);
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let result: Result<Record, _> = decode(&[0xFF, 0xFF]);
        assert!(matches!(result, Err(NetError::Decode(_))));
    }
}
