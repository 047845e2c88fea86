//! The typed envelope exchanged over the transport.
//!
//! On the wire every packet is `{ "t": <type code>, "d": { .. } }`. The
//! payload is kept as a JSON object so EVENT packets can carry arbitrary
//! application fields next to `topic`.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::ids::ConnId;

/// Structured packet payload (`d`).
pub type Payload = Map<String, Value>;

/// Packet type code that does not map to a known [`PacketType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown packet type code {0}")]
pub struct UnknownPacketType(pub u64);

/// Packet type, serialized as its integer code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Server greeting carrying the liveness contract.
    Open = 0,
    /// Client asks to subscribe to a topic.
    Join = 1,
    /// Client asks to unsubscribe from a topic.
    Leave = 2,
    /// JOIN accepted.
    JoinAck = 3,
    /// JOIN refused.
    JoinError = 4,
    /// LEAVE accepted.
    LeaveAck = 5,
    /// LEAVE refused.
    LeaveError = 6,
    /// Topic traffic.
    Event = 7,
    /// Client keepalive.
    Ping = 8,
    /// Server keepalive reply.
    Pong = 9,
}

impl PacketType {
    /// Wire code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether only the server may send this type.
    ///
    /// A client sending one of these is a protocol violation.
    pub fn is_server_only(self) -> bool {
        matches!(
            self,
            Self::Open
                | Self::JoinAck
                | Self::JoinError
                | Self::LeaveAck
                | Self::LeaveError
                | Self::Pong
        )
    }

    /// Lowercase name used in logs and metric labels.
    pub fn name(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Join => "join",
            Self::Leave => "leave",
            Self::JoinAck => "join_ack",
            Self::JoinError => "join_error",
            Self::LeaveAck => "leave_ack",
            Self::LeaveError => "leave_error",
            Self::Event => "event",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

impl TryFrom<u64> for PacketType {
    type Error = UnknownPacketType;

    fn try_from(code: u64) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Self::Open,
            1 => Self::Join,
            2 => Self::Leave,
            3 => Self::JoinAck,
            4 => Self::JoinError,
            5 => Self::LeaveAck,
            6 => Self::LeaveError,
            7 => Self::Event,
            8 => Self::Ping,
            9 => Self::Pong,
            other => return Err(UnknownPacketType(other)),
        })
    }
}

impl Serialize for PacketType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Liveness contract and codec identity announced in OPEN.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenPayload {
    /// Server check period in milliseconds.
    pub server_interval_ms: u64,
    /// Consecutive missed checks before the server closes the connection.
    pub server_attempts: u32,
    /// How often the client should PING, strictly below `server_interval_ms`.
    pub client_interval_ms: u64,
    /// The connection's identity.
    pub conn_id: ConnId,
    /// Name of the codec in use.
    pub encoder: String,
}

impl OpenPayload {
    fn into_payload(self) -> Payload {
        let mut data = Payload::new();
        let _ = data.insert("serverInterval".into(), self.server_interval_ms.into());
        let _ = data.insert("serverAttempts".into(), self.server_attempts.into());
        let _ = data.insert("clientInterval".into(), self.client_interval_ms.into());
        let _ = data.insert("connId".into(), Value::String(self.conn_id.into()));
        let _ = data.insert("encoder".into(), Value::String(self.encoder));
        data
    }
}

/// A decoded packet. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Packet {
    #[serde(rename = "t")]
    kind: PacketType,
    #[serde(rename = "d")]
    data: Payload,
}

impl Packet {
    /// Build a packet from a type and payload.
    pub fn new(kind: PacketType, data: Payload) -> Self {
        Self { kind, data }
    }

    /// Packet type.
    pub fn kind(&self) -> PacketType {
        self.kind
    }

    /// Payload object.
    pub fn data(&self) -> &Payload {
        &self.data
    }

    /// The `topic` field, if present as a non-empty string.
    pub fn topic(&self) -> Option<&str> {
        self.data
            .get("topic")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
    }

    /// OPEN with the connection's liveness contract.
    pub fn open(payload: OpenPayload) -> Self {
        Self::new(PacketType::Open, payload.into_payload())
    }

    /// JOIN for `topic`.
    pub fn join(topic: &str) -> Self {
        Self::new(PacketType::Join, topic_payload(topic))
    }

    /// LEAVE for `topic`.
    pub fn leave(topic: &str) -> Self {
        Self::new(PacketType::Leave, topic_payload(topic))
    }

    /// JOIN_ACK echoing `topic`.
    pub fn join_ack(topic: &str) -> Self {
        Self::new(PacketType::JoinAck, topic_payload(topic))
    }

    /// JOIN_ERROR carrying `topic` and a human-readable `message`.
    pub fn join_error(topic: &str, message: &str) -> Self {
        Self::new(PacketType::JoinError, error_payload(topic, message))
    }

    /// LEAVE_ACK echoing `topic`.
    pub fn leave_ack(topic: &str) -> Self {
        Self::new(PacketType::LeaveAck, topic_payload(topic))
    }

    /// LEAVE_ERROR carrying `topic` and a human-readable `message`.
    pub fn leave_error(topic: &str, message: &str) -> Self {
        Self::new(PacketType::LeaveError, error_payload(topic, message))
    }

    /// EVENT on `topic`. Any `topic` key in `fields` is overwritten.
    pub fn event(topic: &str, mut fields: Payload) -> Self {
        let _ = fields.insert("topic".into(), Value::String(topic.to_owned()));
        Self::new(PacketType::Event, fields)
    }

    /// PING.
    pub fn ping() -> Self {
        Self::new(PacketType::Ping, Payload::new())
    }

    /// PONG.
    pub fn pong() -> Self {
        Self::new(PacketType::Pong, Payload::new())
    }
}

fn topic_payload(topic: &str) -> Payload {
    let mut data = Payload::new();
    let _ = data.insert("topic".into(), Value::String(topic.to_owned()));
    data
}

fn error_payload(topic: &str, message: &str) -> Payload {
    let mut data = topic_payload(topic);
    let _ = data.insert("message".into(), Value::String(message.to_owned()));
    data
}
