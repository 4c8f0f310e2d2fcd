//! The `error` module defines the error types used across `popmqtt`.
//!
//! Codec errors never escape as panics: decoding reports `Ok(None)` when it
//! needs more bytes and a [`DecodeError`] when the input can never become a
//! valid packet. Session-level failures are collected in [`SessionError`],
//! and CONNECT validation failures carry the exact negative CONNACK to send.

use bytes::Bytes;
use thiserror::Error;

use crate::codec::PacketType;

/// Reasons a byte sequence cannot be decoded into a packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("remaining length does not terminate within 4 bytes")]
    MalformedRemainingLength,

    #[error("packet of {size} bytes exceeds the maximum of {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("invalid packet type {0}")]
    InvalidPacketType(u8),

    #[error("invalid fixed header flags {flags:#06b} for {packet_type:?}")]
    InvalidFlags { packet_type: PacketType, flags: u8 },

    #[error("invalid QoS {0}")]
    InvalidQoS(u8),

    #[error("packet identifier must be non-zero")]
    ZeroPacketId,

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("packet body ended before all fields were read")]
    Truncated,

    #[error("{0} unexpected bytes after the last field")]
    TrailingBytes(usize),

    #[error("invalid property identifier {0:#04x}")]
    InvalidPropertyId(u32),

    #[error("invalid connect flags {0:#010b}")]
    InvalidConnectFlags(u8),

    #[error("invalid connack flags {0:#010b}")]
    InvalidConnAckFlags(u8),

    #[error("invalid subscription options {0:#010b}")]
    InvalidSubscriptionOptions(u8),

    #[error("topic name contains wildcard characters")]
    WildcardInTopicName,

    #[error("{0:?} must carry at least one topic filter")]
    EmptyFilterList(PacketType),
}

/// Reasons a packet cannot be encoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("field of {0} bytes does not fit a 16-bit length prefix")]
    FieldTooLong(usize),

    #[error("remaining length {0} exceeds 268435455")]
    PacketTooLarge(usize),

    #[error("PUBLISH at QoS > 0 needs a packet identifier")]
    MissingPacketId,
}

/// Why a CONNECT was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    UnsupportedProtocolVersion,
    InvalidClientId,
    InvalidCredentials,
}

/// A refused CONNECT together with the encoded CONNACK to send before
/// closing the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("connect rejected: {kind:?}")]
pub struct ConnectRejection {
    pub kind: ConnectErrorKind,
    pub connack: Bytes,
}

/// Faults that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed packet: {0}")]
    MalformedPacket(#[from] DecodeError),

    #[error("unsupported protocol version")]
    UnsupportedProtocolVersion,

    #[error("invalid client identifier")]
    InvalidClientId,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("first packet was not CONNECT")]
    MissingConnectPacket,

    #[error("no CONNECT received within the connect timeout")]
    ConnectTimeout,

    #[error("no packet received within 1.5x the keep-alive interval")]
    KeepAliveTimeout,

    #[error("outgoing queue is full")]
    QueueOverflow,

    #[error("topic name is not valid for PUBLISH")]
    TopicNameInvalid,

    #[error("client exceeded the receive maximum for QoS 2 messages")]
    ReceiveMaximumExceeded,

    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    #[error("encode failure: {0}")]
    Encode(#[from] EncodeError),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConnectErrorKind> for SessionError {
    fn from(kind: ConnectErrorKind) -> Self {
        match kind {
            ConnectErrorKind::UnsupportedProtocolVersion => SessionError::UnsupportedProtocolVersion,
            ConnectErrorKind::InvalidClientId => SessionError::InvalidClientId,
            ConnectErrorKind::InvalidCredentials => SessionError::InvalidCredentials,
        }
    }
}
