//! Packet decoding.
//!
//! [`decode`] is tri-state: `Ok(Some((packet, consumed)))` when a whole
//! packet is available, `Ok(None)` when more bytes are needed, and `Err` when
//! the input can never form a valid packet. Input may be one contiguous
//! buffer or any number of segments; both give identical results.

use bytes::Bytes;

use crate::codec::packet::{
    Ack, Auth, ConnAck, Connect, Disconnect, LastWill, Packet, PacketType, ProtocolLevel, Publish,
    QoS, SubAck, Subscribe, SubscriptionOptions, UnsubAck, Unsubscribe,
};
use crate::codec::properties::Properties;
use crate::codec::reader::{Segment, SegmentReader};
use crate::utils::error::DecodeError;

/// Stateful wrapper that remembers the negotiated protocol level and the
/// packet size limit for one connection.
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    level: ProtocolLevel,
    max_packet_size: usize,
}

impl Decoder {
    pub fn new(level: ProtocolLevel, max_packet_size: usize) -> Self {
        Self {
            level,
            max_packet_size,
        }
    }

    pub fn level(&self) -> ProtocolLevel {
        self.level
    }

    pub fn set_level(&mut self, level: ProtocolLevel) {
        self.level = level;
    }

    pub fn decode<S: Segment>(&self, segments: &[S]) -> Result<Option<(Packet, usize)>, DecodeError> {
        decode(segments, self.level, self.max_packet_size)
    }

    pub fn frame_len(&self, buf: &[u8]) -> Result<Option<usize>, DecodeError> {
        frame_len(buf, self.max_packet_size)
    }
}

/// Decodes one packet from the front of a contiguous buffer.
pub fn decode_slice(
    buf: &[u8],
    level: ProtocolLevel,
    max_packet_size: usize,
) -> Result<Option<(Packet, usize)>, DecodeError> {
    decode(&[buf], level, max_packet_size)
}

/// Decodes one packet from the front of a segmented byte sequence.
///
/// `level` selects the MQTT 5.0 layouts for every packet except CONNECT,
/// which announces its own level.
pub fn decode<S: Segment>(
    segments: &[S],
    level: ProtocolLevel,
    max_packet_size: usize,
) -> Result<Option<(Packet, usize)>, DecodeError> {
    let mut reader = SegmentReader::new(segments);

    let Some((first, remaining_len, header_len)) = fixed_header(&mut reader)? else {
        return Ok(None);
    };
    let total = checked_total(header_len, remaining_len, max_packet_size)?;

    let packet_type = PacketType::try_from(first >> 4)?;
    let flags = first & 0x0F;
    if let Some(expected) = packet_type.fixed_flags() {
        if flags != expected {
            return Err(DecodeError::InvalidFlags { packet_type, flags });
        }
    }

    if reader.remaining() < remaining_len {
        return Ok(None);
    }

    let mut body = reader.window(remaining_len);
    let v5 = level.is_v5();
    let packet = match packet_type {
        PacketType::Connect => Packet::Connect(Box::new(connect(&mut body)?)),
        PacketType::ConnAck => Packet::ConnAck(connack(&mut body, v5)?),
        PacketType::Publish => Packet::Publish(publish(flags, &mut body, v5)?),
        PacketType::PubAck => Packet::PubAck(ack(&mut body, v5)?),
        PacketType::PubRec => Packet::PubRec(ack(&mut body, v5)?),
        PacketType::PubRel => Packet::PubRel(ack(&mut body, v5)?),
        PacketType::PubComp => Packet::PubComp(ack(&mut body, v5)?),
        PacketType::Subscribe => Packet::Subscribe(subscribe(&mut body, level)?),
        PacketType::SubAck => Packet::SubAck(suback(&mut body, v5)?),
        PacketType::Unsubscribe => Packet::Unsubscribe(unsubscribe(&mut body, v5)?),
        PacketType::UnsubAck => Packet::UnsubAck(unsuback(&mut body, v5)?),
        PacketType::PingReq => Packet::PingReq,
        PacketType::PingResp => Packet::PingResp,
        PacketType::Disconnect => {
            let (reason_code, properties) = reason_and_properties(&mut body, v5)?;
            Packet::Disconnect(Disconnect {
                reason_code,
                properties,
            })
        }
        PacketType::Auth => {
            if !v5 {
                return Err(DecodeError::InvalidPacketType(first >> 4));
            }
            let (reason_code, properties) = reason_and_properties(&mut body, v5)?;
            Packet::Auth(Auth {
                reason_code,
                properties,
            })
        }
    };

    if body.remaining() > 0 {
        return Err(DecodeError::TrailingBytes(body.remaining()));
    }

    Ok(Some((packet, total)))
}

/// Total size of the packet at the front of `buf`, known as soon as its
/// fixed header is complete. `None` means the header is still partial.
///
/// Lets a reader size its buffer and skip full decode attempts until the
/// whole packet has arrived.
pub fn frame_len(buf: &[u8], max_packet_size: usize) -> Result<Option<usize>, DecodeError> {
    let segments = [buf];
    let mut reader = SegmentReader::new(&segments);
    let Some((_, remaining_len, header_len)) = fixed_header(&mut reader)? else {
        return Ok(None);
    };
    checked_total(header_len, remaining_len, max_packet_size).map(Some)
}

fn checked_total(header_len: usize, remaining_len: usize, max_packet_size: usize) -> Result<usize, DecodeError> {
    let total = header_len + remaining_len;
    if total > max_packet_size {
        return Err(DecodeError::PacketTooLarge {
            size: total,
            max: max_packet_size,
        });
    }
    Ok(total)
}

/// Reads the type byte and the remaining length.
///
/// Returns `(first byte, remaining length, header length)` or `None` if the
/// header itself is still incomplete.
fn fixed_header<S: Segment>(
    reader: &mut SegmentReader<'_, S>,
) -> Result<Option<(u8, usize, usize)>, DecodeError> {
    let Ok(first) = reader.read_u8() else {
        return Ok(None);
    };
    if first >> 4 == 0 {
        return Err(DecodeError::InvalidPacketType(0));
    }

    let mut value = 0usize;
    let mut multiplier = 1usize;
    for digits in 1..=4 {
        let Ok(byte) = reader.read_u8() else {
            return Ok(None);
        };
        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((first, value, 1 + digits)));
        }
        multiplier *= 128;
    }
    Err(DecodeError::MalformedRemainingLength)
}

fn packet_id<S: Segment>(body: &mut SegmentReader<'_, S>) -> Result<u16, DecodeError> {
    match body.read_u16()? {
        0 => Err(DecodeError::ZeroPacketId),
        id => Ok(id),
    }
}

fn topic_name<S: Segment>(body: &mut SegmentReader<'_, S>) -> Result<Bytes, DecodeError> {
    let topic = body.read_utf8()?;
    if topic.iter().any(|b| *b == b'+' || *b == b'#') {
        return Err(DecodeError::WildcardInTopicName);
    }
    Ok(topic)
}

fn read_properties<S: Segment>(body: &mut SegmentReader<'_, S>, v5: bool) -> Result<Properties, DecodeError> {
    if v5 {
        Properties::decode(body)
    } else {
        Ok(Properties::default())
    }
}

fn connect<S: Segment>(body: &mut SegmentReader<'_, S>) -> Result<Connect, DecodeError> {
    let protocol_name = body.read_utf8()?;
    let protocol_level = body.read_u8()?;
    let flags = body.read_u8()?;
    let keep_alive = body.read_u16()?;
    let v5 = protocol_level == ProtocolLevel::V5.wire_level();

    let will_flag = flags & 0x04 != 0;
    let will_qos = (flags >> 3) & 0x03;
    let will_retain = flags & 0x20 != 0;
    let has_password = flags & 0x40 != 0;
    let has_username = flags & 0x80 != 0;

    if flags & 0x01 != 0 || (!will_flag && (will_qos != 0 || will_retain)) {
        return Err(DecodeError::InvalidConnectFlags(flags));
    }
    if !v5 && has_password && !has_username {
        return Err(DecodeError::InvalidConnectFlags(flags));
    }

    let properties = read_properties(body, v5)?;
    let client_id = body.read_utf8()?;

    let will = if will_flag {
        let properties = read_properties(body, v5)?;
        let topic = topic_name(body)?;
        let payload = body.read_binary()?;
        Some(LastWill {
            topic,
            payload,
            qos: QoS::try_from(will_qos)?,
            retain: will_retain,
            properties,
        })
    } else {
        None
    };

    let username = if has_username {
        Some(body.read_utf8()?)
    } else {
        None
    };
    let password = if has_password {
        Some(body.read_binary()?)
    } else {
        None
    };

    Ok(Connect {
        protocol_name,
        protocol_level,
        clean_session: flags & 0x02 != 0,
        keep_alive,
        properties,
        client_id,
        will,
        username,
        password,
    })
}

fn connack<S: Segment>(body: &mut SegmentReader<'_, S>, v5: bool) -> Result<ConnAck, DecodeError> {
    let flags = body.read_u8()?;
    if flags & 0xFE != 0 {
        return Err(DecodeError::InvalidConnAckFlags(flags));
    }
    let code = body.read_u8()?;
    Ok(ConnAck {
        session_present: flags & 0x01 != 0,
        code,
        properties: read_properties(body, v5)?,
    })
}

fn publish<S: Segment>(flags: u8, body: &mut SegmentReader<'_, S>, v5: bool) -> Result<Publish, DecodeError> {
    let dup = flags & 0x08 != 0;
    let qos = QoS::try_from((flags >> 1) & 0x03)?;
    if qos == QoS::AtMostOnce && dup {
        return Err(DecodeError::InvalidFlags {
            packet_type: PacketType::Publish,
            flags,
        });
    }

    let topic = topic_name(body)?;
    let packet_id = if qos == QoS::AtMostOnce {
        None
    } else {
        Some(packet_id(body)?)
    };
    let properties = read_properties(body, v5)?;
    let payload = body.read_bytes(body.remaining())?;

    Ok(Publish {
        dup,
        qos,
        retain: flags & 0x01 != 0,
        topic,
        packet_id,
        properties,
        payload,
    })
}

fn ack<S: Segment>(body: &mut SegmentReader<'_, S>, v5: bool) -> Result<Ack, DecodeError> {
    let packet_id = packet_id(body)?;
    let (reason_code, properties) = reason_and_properties(body, v5)?;
    Ok(Ack {
        packet_id,
        reason_code,
        properties,
    })
}

/// Optional trailing reason code and properties of MQTT 5.0 acks,
/// DISCONNECT and AUTH. Both may be left off when they hold defaults.
fn reason_and_properties<S: Segment>(
    body: &mut SegmentReader<'_, S>,
    v5: bool,
) -> Result<(u8, Properties), DecodeError> {
    if !v5 || body.remaining() == 0 {
        return Ok((0, Properties::default()));
    }
    let reason = body.read_u8()?;
    if body.remaining() == 0 {
        return Ok((reason, Properties::default()));
    }
    Ok((reason, Properties::decode(body)?))
}

fn subscribe<S: Segment>(body: &mut SegmentReader<'_, S>, level: ProtocolLevel) -> Result<Subscribe, DecodeError> {
    let packet_id = packet_id(body)?;
    let properties = read_properties(body, level.is_v5())?;

    let mut filters = Vec::new();
    while body.remaining() > 0 {
        let filter = body.read_utf8()?;
        let options = SubscriptionOptions::from_byte(body.read_u8()?, level)?;
        filters.push((filter, options));
    }
    if filters.is_empty() {
        return Err(DecodeError::EmptyFilterList(PacketType::Subscribe));
    }

    Ok(Subscribe {
        packet_id,
        properties,
        filters,
    })
}

fn suback<S: Segment>(body: &mut SegmentReader<'_, S>, v5: bool) -> Result<SubAck, DecodeError> {
    let packet_id = packet_id(body)?;
    let properties = read_properties(body, v5)?;
    let return_codes = body.read_bytes(body.remaining())?.to_vec();
    Ok(SubAck {
        packet_id,
        properties,
        return_codes,
    })
}

fn unsubscribe<S: Segment>(body: &mut SegmentReader<'_, S>, v5: bool) -> Result<Unsubscribe, DecodeError> {
    let packet_id = packet_id(body)?;
    let properties = read_properties(body, v5)?;

    let mut filters = Vec::new();
    while body.remaining() > 0 {
        filters.push(body.read_utf8()?);
    }
    if filters.is_empty() {
        return Err(DecodeError::EmptyFilterList(PacketType::Unsubscribe));
    }

    Ok(Unsubscribe {
        packet_id,
        properties,
        filters,
    })
}

fn unsuback<S: Segment>(body: &mut SegmentReader<'_, S>, v5: bool) -> Result<UnsubAck, DecodeError> {
    let packet_id = packet_id(body)?;
    if !v5 {
        return Ok(UnsubAck {
            packet_id,
            properties: Properties::default(),
            reason_codes: Vec::new(),
        });
    }
    let properties = Properties::decode(body)?;
    let reason_codes = body.read_bytes(body.remaining())?.to_vec();
    Ok(UnsubAck {
        packet_id,
        properties,
        reason_codes,
    })
}
