//! Codec boundary between raw transport frames and [`Packet`]s.
//!
//! The engine never sees bytes; a [`PacketCodec`] turns each inbound frame
//! into a packet and each outbound packet into a frame. The codec's
//! [`name`](PacketCodec::name) is advertised to the peer in OPEN.

use serde::Deserialize;
use serde_json::Value;

use crate::packet::{Packet, PacketType, Payload, UnknownPacketType};

/// Errors produced at the codec boundary.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame is not a well-formed packet.
    #[error("malformed packet: {0}")]
    Malformed(String),
    /// The type code is outside the known table.
    #[error(transparent)]
    UnknownType(#[from] UnknownPacketType),
    /// The packet could not be serialized.
    #[error("failed to encode packet: {0}")]
    Encode(String),
}

/// An encoded outbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Encoded {
    /// Send as a text frame.
    Text(String),
    /// Send as a binary frame.
    Binary(Vec<u8>),
}

/// Pluggable packet encoding.
pub trait PacketCodec: Send + Sync {
    /// Identity advertised in OPEN's `encoder` field.
    fn name(&self) -> &'static str;

    /// Encode a packet into a transport frame.
    fn encode(&self, packet: &Packet) -> Result<Encoded, CodecError>;

    /// Decode a transport frame into a packet.
    fn decode(&self, frame: &[u8]) -> Result<Packet, CodecError>;
}

/// `{"t": <code>, "d": {..}}` JSON text frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

#[derive(Deserialize)]
struct RawPacket {
    t: u64,
    #[serde(default)]
    d: Value,
}

impl PacketCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, packet: &Packet) -> Result<Encoded, CodecError> {
        serde_json::to_string(packet)
            .map(Encoded::Text)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, frame: &[u8]) -> Result<Packet, CodecError> {
        let raw: RawPacket =
            serde_json::from_slice(frame).map_err(|e| CodecError::Malformed(e.to_string()))?;
        let kind = PacketType::try_from(raw.t)?;
        let data = match raw.d {
            Value::Null => Payload::new(),
            Value::Object(map) => map,
            other => {
                return Err(CodecError::Malformed(format!(
                    "packet data must be an object, got {other}"
                )));
            }
        };
        Ok(Packet::new(kind, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn decode(s: &str) -> Result<Packet, CodecError> {
        JsonCodec.decode(s.as_bytes())
    }

    #[test]
    fn name_is_json() {
        assert_eq!(JsonCodec.name(), "json");
    }

    #[test]
    fn decodes_join() {
        let packet = decode(r#"{"t":1,"d":{"topic":"chat"}}"#).unwrap();
        assert_eq!(packet.kind(), PacketType::Join);
        assert_eq!(packet.topic(), Some("chat"));
    }

    #[test]
    fn missing_or_null_data_is_empty_object() {
        let ping = decode(r#"{"t":8}"#).unwrap();
        assert_eq!(ping.kind(), PacketType::Ping);
        assert!(ping.data().is_empty());

        let event = decode(r#"{"t":7,"d":null}"#).unwrap();
        assert!(event.data().is_empty());
    }

    #[test]
    fn unknown_type_code() {
        assert_matches!(
            decode(r#"{"t":42,"d":{}}"#),
            Err(CodecError::UnknownType(UnknownPacketType(42)))
        );
    }

    #[test]
    fn non_object_data_is_malformed() {
        assert_matches!(decode(r#"{"t":1,"d":"chat"}"#), Err(CodecError::Malformed(_)));
    }

    #[test]
    fn garbage_is_malformed() {
        assert_matches!(decode("not json"), Err(CodecError::Malformed(_)));
        assert_matches!(decode(""), Err(CodecError::Malformed(_)));
        assert_matches!(decode(r#"{"d":{}}"#), Err(CodecError::Malformed(_)));
        assert_matches!(decode(r#"{"t":-1}"#), Err(CodecError::Malformed(_)));
    }

    #[test]
    fn encodes_text_frame() {
        let encoded = JsonCodec.encode(&Packet::pong()).unwrap();
        assert_eq!(encoded, Encoded::Text(r#"{"t":9,"d":{}}"#.into()));
    }

    #[test]
    fn decode_accepts_encoded_event() {
        let mut fields = Payload::new();
        let _ = fields.insert("n".into(), Value::from(7));
        let original = Packet::event("room:1", fields);
        let Encoded::Text(text) = JsonCodec.encode(&original).unwrap() else {
            panic!("json codec emits text");
        };
        let decoded = JsonCodec.decode(text.as_bytes()).unwrap();
        assert_eq!(decoded.topic(), Some("room:1"));
        assert_eq!(decoded.data()["n"], 7);
    }
}
