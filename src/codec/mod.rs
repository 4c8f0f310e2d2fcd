//! The `codec` module turns MQTT 3.1, 3.1.1 and 5.0 control packets into
//! bytes and back.
//!
//! - `packet`: the [`Packet`] sum type and its per-type structs
//! - `properties`: MQTT 5.0 property lists
//! - `decode` / `encode`: the wire layouts
//! - `reader` / `wire`: fragmentation-tolerant read and write primitives

pub mod decode;
pub mod encode;
pub mod packet;
pub mod properties;
pub mod reader;
pub mod wire;

pub use decode::{Decoder, decode, decode_slice, frame_len};
pub use encode::{encode, encode_to_bytes, encoded_len};
pub use packet::{
    Ack, Auth, ConnAck, Connect, Disconnect, LastWill, Packet, PacketType, ProtocolLevel, Publish,
    QoS, SUBACK_FAILURE, SubAck, Subscribe, SubscriptionOptions, UnsubAck, Unsubscribe, connack_code,
    reason_code,
};
pub use properties::{Properties, Property};
pub use reader::Segment;
pub use wire::{MAX_REMAINING_LENGTH, length_byte_count};

#[cfg(test)]
mod tests;
