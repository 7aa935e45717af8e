//! On-wire framing: an envelope carrying a verb, request/response
//! correlation metadata, and a msgpack-encoded payload.
//!
//! This plays the role `Msg`/`IOQueues` play in `submerge-net` (each message
//! becomes one `[u8]` buffer, framing is the transport's concern) combined
//! with the length-delimited read loop style of
//! `turn-server/src/server/tcp.rs`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::msg::Verb;

/// Per-call metadata threaded alongside a request/response. `correlation`
/// and `response` are how the RPC layer above the raw channel (spec.md
/// section 4.2 only specifies `send(verb, payload, metadata)`) matches a
/// reply to its request without the channel itself knowing anything about
/// request/response semantics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub deadline_ms: Option<u64>,
    pub correlation: Option<u64>,
    pub response: bool,
}

/// The header + payload pair that crosses the wire for every message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub verb: Verb,
    pub metadata: Metadata,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Encode a typed request/response payload for embedding in an [`Envelope`].
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec(value).map_err(Error::from)
}

/// Decode a typed request/response payload out of an [`Envelope`].
pub fn decode_payload<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{Key, Mtr, Priority, Pvid, ReadRequest, Timestamp};

    #[test]
    fn envelope_round_trips() {
        let req = ReadRequest {
            pvid: Pvid(1),
            collection: "orders".into(),
            mtr: Mtr { txn_id: 7, timestamp: Timestamp(42), priority: Priority::Medium },
            key: Key::from("k"),
        };
        let env = Envelope {
            verb: Verb::K23siRead,
            metadata: Metadata { correlation: Some(1), ..Default::default() },
            payload: encode_payload(&req).unwrap(),
        };
        let bytes = env.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        let decoded_req: ReadRequest = decode_payload(&decoded.payload).unwrap();
        assert_eq!(decoded_req.collection, "orders");
        assert_eq!(decoded_req.mtr.txn_id, 7);
        assert_eq!(decoded.metadata.correlation, Some(1));
    }
}
