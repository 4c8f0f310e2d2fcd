//! MQTT 5.0 property lists.
//!
//! A property list is a variable byte integer length followed by
//! `(identifier, value)` pairs. The list keeps wire order so a decoded
//! packet re-encodes to the same bytes; user properties may repeat.

use bytes::{BufMut, Bytes};

use crate::codec::reader::{Segment, SegmentReader};
use crate::codec::wire::{binary_len, length_byte_count, put_binary, put_varint};
use crate::utils::error::{DecodeError, EncodeError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    PayloadFormatIndicator(u8),
    MessageExpiryInterval(u32),
    ContentType(String),
    ResponseTopic(String),
    CorrelationData(Bytes),
    SubscriptionIdentifier(u32),
    SessionExpiryInterval(u32),
    AssignedClientIdentifier(String),
    ServerKeepAlive(u16),
    AuthenticationMethod(String),
    AuthenticationData(Bytes),
    RequestProblemInformation(u8),
    WillDelayInterval(u32),
    RequestResponseInformation(u8),
    ResponseInformation(String),
    ServerReference(String),
    ReasonString(String),
    ReceiveMaximum(u16),
    TopicAliasMaximum(u16),
    TopicAlias(u16),
    MaximumQoS(u8),
    RetainAvailable(u8),
    UserProperty(String, String),
    MaximumPacketSize(u32),
    WildcardSubscriptionAvailable(u8),
    SubscriptionIdentifierAvailable(u8),
    SharedSubscriptionAvailable(u8),
}

impl Property {
    pub fn id(&self) -> u8 {
        match self {
            Property::PayloadFormatIndicator(_) => 0x01,
            Property::MessageExpiryInterval(_) => 0x02,
            Property::ContentType(_) => 0x03,
            Property::ResponseTopic(_) => 0x08,
            Property::CorrelationData(_) => 0x09,
            Property::SubscriptionIdentifier(_) => 0x0B,
            Property::SessionExpiryInterval(_) => 0x11,
            Property::AssignedClientIdentifier(_) => 0x12,
            Property::ServerKeepAlive(_) => 0x13,
            Property::AuthenticationMethod(_) => 0x15,
            Property::AuthenticationData(_) => 0x16,
            Property::RequestProblemInformation(_) => 0x17,
            Property::WillDelayInterval(_) => 0x18,
            Property::RequestResponseInformation(_) => 0x19,
            Property::ResponseInformation(_) => 0x1A,
            Property::ServerReference(_) => 0x1C,
            Property::ReasonString(_) => 0x1F,
            Property::ReceiveMaximum(_) => 0x21,
            Property::TopicAliasMaximum(_) => 0x22,
            Property::TopicAlias(_) => 0x23,
            Property::MaximumQoS(_) => 0x24,
            Property::RetainAvailable(_) => 0x25,
            Property::UserProperty(_, _) => 0x26,
            Property::MaximumPacketSize(_) => 0x27,
            Property::WildcardSubscriptionAvailable(_) => 0x28,
            Property::SubscriptionIdentifierAvailable(_) => 0x29,
            Property::SharedSubscriptionAvailable(_) => 0x2A,
        }
    }

    fn value_len(&self) -> usize {
        match self {
            Property::PayloadFormatIndicator(_)
            | Property::RequestProblemInformation(_)
            | Property::RequestResponseInformation(_)
            | Property::MaximumQoS(_)
            | Property::RetainAvailable(_)
            | Property::WildcardSubscriptionAvailable(_)
            | Property::SubscriptionIdentifierAvailable(_)
            | Property::SharedSubscriptionAvailable(_) => 1,
            Property::ServerKeepAlive(_)
            | Property::ReceiveMaximum(_)
            | Property::TopicAliasMaximum(_)
            | Property::TopicAlias(_) => 2,
            Property::MessageExpiryInterval(_)
            | Property::SessionExpiryInterval(_)
            | Property::WillDelayInterval(_)
            | Property::MaximumPacketSize(_) => 4,
            Property::SubscriptionIdentifier(v) => length_byte_count(*v as usize),
            Property::ContentType(s)
            | Property::ResponseTopic(s)
            | Property::AssignedClientIdentifier(s)
            | Property::AuthenticationMethod(s)
            | Property::ResponseInformation(s)
            | Property::ServerReference(s)
            | Property::ReasonString(s) => binary_len(s.as_bytes()),
            Property::CorrelationData(b) | Property::AuthenticationData(b) => binary_len(b),
            Property::UserProperty(k, v) => binary_len(k.as_bytes()) + binary_len(v.as_bytes()),
        }
    }

    fn encoded_len(&self) -> usize {
        1 + self.value_len()
    }

    fn encode<B: BufMut>(&self, out: &mut B) -> Result<(), EncodeError> {
        put_varint(out, self.id() as usize)?;
        match self {
            Property::PayloadFormatIndicator(v)
            | Property::RequestProblemInformation(v)
            | Property::RequestResponseInformation(v)
            | Property::MaximumQoS(v)
            | Property::RetainAvailable(v)
            | Property::WildcardSubscriptionAvailable(v)
            | Property::SubscriptionIdentifierAvailable(v)
            | Property::SharedSubscriptionAvailable(v) => out.put_u8(*v),
            Property::ServerKeepAlive(v)
            | Property::ReceiveMaximum(v)
            | Property::TopicAliasMaximum(v)
            | Property::TopicAlias(v) => out.put_u16(*v),
            Property::MessageExpiryInterval(v)
            | Property::SessionExpiryInterval(v)
            | Property::WillDelayInterval(v)
            | Property::MaximumPacketSize(v) => out.put_u32(*v),
            Property::SubscriptionIdentifier(v) => {
                put_varint(out, *v as usize)?;
            }
            Property::ContentType(s)
            | Property::ResponseTopic(s)
            | Property::AssignedClientIdentifier(s)
            | Property::AuthenticationMethod(s)
            | Property::ResponseInformation(s)
            | Property::ServerReference(s)
            | Property::ReasonString(s) => put_binary(out, s.as_bytes())?,
            Property::CorrelationData(b) | Property::AuthenticationData(b) => put_binary(out, b)?,
            Property::UserProperty(k, v) => {
                put_binary(out, k.as_bytes())?;
                put_binary(out, v.as_bytes())?;
            }
        }
        Ok(())
    }

    fn decode<S: Segment>(id: u32, reader: &mut SegmentReader<'_, S>) -> Result<Self, DecodeError> {
        Ok(match id {
            0x01 => Property::PayloadFormatIndicator(reader.read_u8()?),
            0x02 => Property::MessageExpiryInterval(reader.read_u32()?),
            0x03 => Property::ContentType(reader.read_string()?),
            0x08 => Property::ResponseTopic(reader.read_string()?),
            0x09 => Property::CorrelationData(reader.read_binary()?),
            0x0B => Property::SubscriptionIdentifier(reader.read_varint()?),
            0x11 => Property::SessionExpiryInterval(reader.read_u32()?),
            0x12 => Property::AssignedClientIdentifier(reader.read_string()?),
            0x13 => Property::ServerKeepAlive(reader.read_u16()?),
            0x15 => Property::AuthenticationMethod(reader.read_string()?),
            0x16 => Property::AuthenticationData(reader.read_binary()?),
            0x17 => Property::RequestProblemInformation(reader.read_u8()?),
            0x18 => Property::WillDelayInterval(reader.read_u32()?),
            0x19 => Property::RequestResponseInformation(reader.read_u8()?),
            0x1A => Property::ResponseInformation(reader.read_string()?),
            0x1C => Property::ServerReference(reader.read_string()?),
            0x1F => Property::ReasonString(reader.read_string()?),
            0x21 => Property::ReceiveMaximum(reader.read_u16()?),
            0x22 => Property::TopicAliasMaximum(reader.read_u16()?),
            0x23 => Property::TopicAlias(reader.read_u16()?),
            0x24 => Property::MaximumQoS(reader.read_u8()?),
            0x25 => Property::RetainAvailable(reader.read_u8()?),
            0x26 => Property::UserProperty(reader.read_string()?, reader.read_string()?),
            0x27 => Property::MaximumPacketSize(reader.read_u32()?),
            0x28 => Property::WildcardSubscriptionAvailable(reader.read_u8()?),
            0x29 => Property::SubscriptionIdentifierAvailable(reader.read_u8()?),
            0x2A => Property::SharedSubscriptionAvailable(reader.read_u8()?),
            other => return Err(DecodeError::InvalidPropertyId(other)),
        })
    }
}

/// Ordered MQTT 5.0 property list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Properties(Vec<Property>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, property: Property) -> Self {
        self.0.push(property);
        self
    }

    pub fn push(&mut self, property: Property) {
        self.0.push(property);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.0.iter()
    }

    pub fn session_expiry_interval(&self) -> Option<u32> {
        self.iter().find_map(|p| match p {
            Property::SessionExpiryInterval(v) => Some(*v),
            _ => None,
        })
    }

    pub fn receive_maximum(&self) -> Option<u16> {
        self.iter().find_map(|p| match p {
            Property::ReceiveMaximum(v) => Some(*v),
            _ => None,
        })
    }

    pub fn maximum_packet_size(&self) -> Option<u32> {
        self.iter().find_map(|p| match p {
            Property::MaximumPacketSize(v) => Some(*v),
            _ => None,
        })
    }

    pub fn assigned_client_identifier(&self) -> Option<&str> {
        self.iter().find_map(|p| match p {
            Property::AssignedClientIdentifier(v) => Some(v.as_str()),
            _ => None,
        })
    }

    pub fn reason_string(&self) -> Option<&str> {
        self.iter().find_map(|p| match p {
            Property::ReasonString(v) => Some(v.as_str()),
            _ => None,
        })
    }

    pub fn user_properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter_map(|p| match p {
            Property::UserProperty(k, v) => Some((k.as_str(), v.as_str())),
            _ => None,
        })
    }

    /// Length of the property bytes, without the leading length varint.
    pub(crate) fn body_len(&self) -> usize {
        self.0.iter().map(Property::encoded_len).sum()
    }

    /// Length including the leading length varint.
    pub(crate) fn encoded_len(&self) -> usize {
        let body = self.body_len();
        length_byte_count(body) + body
    }

    pub(crate) fn encode<B: BufMut>(&self, out: &mut B) -> Result<(), EncodeError> {
        put_varint(out, self.body_len())?;
        for property in &self.0 {
            property.encode(out)?;
        }
        Ok(())
    }

    pub(crate) fn decode<S: Segment>(reader: &mut SegmentReader<'_, S>) -> Result<Self, DecodeError> {
        let len = reader.read_varint()? as usize;
        if len > reader.remaining() {
            return Err(DecodeError::Truncated);
        }
        let mut list = reader.window(len);
        reader.skip(len)?;

        let mut properties = Vec::new();
        while list.remaining() > 0 {
            let id = list.read_varint()?;
            properties.push(Property::decode(id, &mut list)?);
        }
        Ok(Self(properties))
    }
}

impl FromIterator<Property> for Properties {
    fn from_iter<T: IntoIterator<Item = Property>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
