//! # tether-core
//!
//! Foundation types shared by every tether crate.
//!
//! - **Packets**: [`Packet`] envelope and [`PacketType`] wire codes
//! - **Codecs**: [`PacketCodec`] boundary with the default [`JsonCodec`]
//! - **Branded IDs**: [`ConnId`], [`WorkerId`] as newtypes for type safety
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod codec;
pub mod ids;
pub mod logging;
pub mod packet;

pub use codec::{CodecError, Encoded, JsonCodec, PacketCodec};
pub use ids::{ConnId, WorkerId};
pub use packet::{OpenPayload, Packet, PacketType, Payload, UnknownPacketType};
