//! Packet encoding.
//!
//! The remaining length is a prefix of the bytes it measures, so every
//! packet's body size is computed first and the body written second.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::packet::{
    Ack, ConnAck, Connect, Packet, ProtocolLevel, Publish, QoS, SubAck, Subscribe,
    UnsubAck, Unsubscribe,
};
use crate::codec::properties::Properties;
use crate::codec::wire::{MAX_REMAINING_LENGTH, binary_len, length_byte_count, put_binary, put_varint};
use crate::utils::error::EncodeError;

/// Writes `packet` to `out` and returns the number of bytes written.
///
/// `level` selects the MQTT 5.0 layouts; CONNECT follows its own
/// `protocol_level` instead.
pub fn encode<B: BufMut>(packet: &Packet, level: ProtocolLevel, out: &mut B) -> Result<usize, EncodeError> {
    let remaining = body_len(packet, level);
    if remaining > MAX_REMAINING_LENGTH {
        return Err(EncodeError::PacketTooLarge(remaining));
    }
    if let Packet::Publish(publish) = packet {
        if publish.qos != QoS::AtMostOnce && publish.packet_id.is_none() {
            return Err(EncodeError::MissingPacketId);
        }
    }

    out.put_u8(first_byte(packet));
    let header = 1 + put_varint(out, remaining)?;
    write_body(packet, level, out)?;
    Ok(header + remaining)
}

/// Encodes into a freshly allocated, exactly sized buffer.
pub fn encode_to_bytes(packet: &Packet, level: ProtocolLevel) -> Result<Bytes, EncodeError> {
    let mut buf = BytesMut::with_capacity(encoded_len(packet, level));
    encode(packet, level, &mut buf)?;
    Ok(buf.freeze())
}

/// Size of the whole packet on the wire.
pub fn encoded_len(packet: &Packet, level: ProtocolLevel) -> usize {
    let remaining = body_len(packet, level);
    1 + length_byte_count(remaining) + remaining
}

fn first_byte(packet: &Packet) -> u8 {
    let packet_type = packet.packet_type();
    let flags = match packet {
        Packet::Publish(p) => {
            let mut flags = (p.qos as u8) << 1;
            if p.dup {
                flags |= 0x08;
            }
            if p.retain {
                flags |= 0x01;
            }
            flags
        }
        _ => packet_type.fixed_flags().unwrap_or(0),
    };
    ((packet_type as u8) << 4) | flags
}

fn v5_properties_len(properties: &Properties, v5: bool) -> usize {
    if v5 { properties.encoded_len() } else { 0 }
}

fn is_v5_connect(connect: &Connect) -> bool {
    connect.protocol_level == ProtocolLevel::V5.wire_level()
}

/// Trailing reason code and properties, both omitted when they are defaults.
fn reason_tail_len(reason_code: u8, properties: &Properties, v5: bool) -> usize {
    match (v5, reason_code, properties.is_empty()) {
        (false, _, _) | (true, 0, true) => 0,
        (true, _, true) => 1,
        (true, _, false) => 1 + properties.encoded_len(),
    }
}

fn body_len(packet: &Packet, level: ProtocolLevel) -> usize {
    let v5 = level.is_v5();
    match packet {
        Packet::Connect(connect) => connect_len(connect),
        Packet::ConnAck(connack) => 2 + v5_properties_len(&connack.properties, v5),
        Packet::Publish(publish) => publish_len(publish, v5),
        Packet::PubAck(ack) | Packet::PubRec(ack) | Packet::PubRel(ack) | Packet::PubComp(ack) => {
            2 + reason_tail_len(ack.reason_code, &ack.properties, v5)
        }
        Packet::Subscribe(subscribe) => {
            2 + v5_properties_len(&subscribe.properties, v5)
                + subscribe
                    .filters
                    .iter()
                    .map(|(filter, _)| binary_len(filter) + 1)
                    .sum::<usize>()
        }
        Packet::SubAck(suback) => {
            2 + v5_properties_len(&suback.properties, v5) + suback.return_codes.len()
        }
        Packet::Unsubscribe(unsubscribe) => {
            2 + v5_properties_len(&unsubscribe.properties, v5)
                + unsubscribe.filters.iter().map(|f| binary_len(f)).sum::<usize>()
        }
        Packet::UnsubAck(unsuback) => {
            if v5 {
                2 + unsuback.properties.encoded_len() + unsuback.reason_codes.len()
            } else {
                2
            }
        }
        Packet::PingReq | Packet::PingResp => 0,
        Packet::Disconnect(disconnect) => {
            reason_tail_len(disconnect.reason_code, &disconnect.properties, v5)
        }
        Packet::Auth(auth) => reason_tail_len(auth.reason_code, &auth.properties, true),
    }
}

fn connect_len(connect: &Connect) -> usize {
    let v5 = is_v5_connect(connect);
    let mut len = binary_len(&connect.protocol_name) + 1 + 1 + 2;
    len += v5_properties_len(&connect.properties, v5);
    len += binary_len(&connect.client_id);
    if let Some(will) = &connect.will {
        len += v5_properties_len(&will.properties, v5);
        len += binary_len(&will.topic) + binary_len(&will.payload);
    }
    if let Some(username) = &connect.username {
        len += binary_len(username);
    }
    if let Some(password) = &connect.password {
        len += binary_len(password);
    }
    len
}

fn publish_len(publish: &Publish, v5: bool) -> usize {
    let id_len = if publish.qos == QoS::AtMostOnce { 0 } else { 2 };
    binary_len(&publish.topic)
        + id_len
        + v5_properties_len(&publish.properties, v5)
        + publish.payload.len()
}

fn write_body<B: BufMut>(packet: &Packet, level: ProtocolLevel, out: &mut B) -> Result<(), EncodeError> {
    let v5 = level.is_v5();
    match packet {
        Packet::Connect(connect) => write_connect(connect, out),
        Packet::ConnAck(connack) => write_connack(connack, v5, out),
        Packet::Publish(publish) => write_publish(publish, v5, out),
        Packet::PubAck(ack) | Packet::PubRec(ack) | Packet::PubRel(ack) | Packet::PubComp(ack) => {
            write_ack(ack, v5, out)
        }
        Packet::Subscribe(subscribe) => write_subscribe(subscribe, level, out),
        Packet::SubAck(suback) => write_suback(suback, v5, out),
        Packet::Unsubscribe(unsubscribe) => write_unsubscribe(unsubscribe, v5, out),
        Packet::UnsubAck(unsuback) => write_unsuback(unsuback, v5, out),
        Packet::PingReq | Packet::PingResp => Ok(()),
        Packet::Disconnect(disconnect) => {
            write_reason_tail(disconnect.reason_code, &disconnect.properties, v5, out)
        }
        Packet::Auth(auth) => write_reason_tail(auth.reason_code, &auth.properties, true, out),
    }
}

fn write_properties<B: BufMut>(properties: &Properties, v5: bool, out: &mut B) -> Result<(), EncodeError> {
    if v5 {
        properties.encode(out)?;
    }
    Ok(())
}

fn write_reason_tail<B: BufMut>(
    reason_code: u8,
    properties: &Properties,
    v5: bool,
    out: &mut B,
) -> Result<(), EncodeError> {
    if !v5 || (reason_code == 0 && properties.is_empty()) {
        return Ok(());
    }
    out.put_u8(reason_code);
    if !properties.is_empty() {
        properties.encode(out)?;
    }
    Ok(())
}

fn write_connect<B: BufMut>(connect: &Connect, out: &mut B) -> Result<(), EncodeError> {
    let v5 = is_v5_connect(connect);

    let mut flags = 0u8;
    if connect.clean_session {
        flags |= 0x02;
    }
    if let Some(will) = &connect.will {
        flags |= 0x04 | ((will.qos as u8) << 3);
        if will.retain {
            flags |= 0x20;
        }
    }
    if connect.password.is_some() {
        flags |= 0x40;
    }
    if connect.username.is_some() {
        flags |= 0x80;
    }

    put_binary(out, &connect.protocol_name)?;
    out.put_u8(connect.protocol_level);
    out.put_u8(flags);
    out.put_u16(connect.keep_alive);
    write_properties(&connect.properties, v5, out)?;
    put_binary(out, &connect.client_id)?;
    if let Some(will) = &connect.will {
        write_properties(&will.properties, v5, out)?;
        put_binary(out, &will.topic)?;
        put_binary(out, &will.payload)?;
    }
    if let Some(username) = &connect.username {
        put_binary(out, username)?;
    }
    if let Some(password) = &connect.password {
        put_binary(out, password)?;
    }
    Ok(())
}

fn write_connack<B: BufMut>(connack: &ConnAck, v5: bool, out: &mut B) -> Result<(), EncodeError> {
    out.put_u8(u8::from(connack.session_present));
    out.put_u8(connack.code);
    write_properties(&connack.properties, v5, out)
}

fn write_publish<B: BufMut>(publish: &Publish, v5: bool, out: &mut B) -> Result<(), EncodeError> {
    put_binary(out, &publish.topic)?;
    if publish.qos != QoS::AtMostOnce {
        out.put_u16(publish.packet_id.ok_or(EncodeError::MissingPacketId)?);
    }
    write_properties(&publish.properties, v5, out)?;
    out.put_slice(&publish.payload);
    Ok(())
}

fn write_ack<B: BufMut>(ack: &Ack, v5: bool, out: &mut B) -> Result<(), EncodeError> {
    out.put_u16(ack.packet_id);
    write_reason_tail(ack.reason_code, &ack.properties, v5, out)
}

fn write_subscribe<B: BufMut>(subscribe: &Subscribe, level: ProtocolLevel, out: &mut B) -> Result<(), EncodeError> {
    out.put_u16(subscribe.packet_id);
    write_properties(&subscribe.properties, level.is_v5(), out)?;
    for (filter, options) in &subscribe.filters {
        put_binary(out, filter)?;
        out.put_u8(options.to_byte(level));
    }
    Ok(())
}

fn write_suback<B: BufMut>(suback: &SubAck, v5: bool, out: &mut B) -> Result<(), EncodeError> {
    out.put_u16(suback.packet_id);
    write_properties(&suback.properties, v5, out)?;
    out.put_slice(&suback.return_codes);
    Ok(())
}

fn write_unsubscribe<B: BufMut>(unsubscribe: &Unsubscribe, v5: bool, out: &mut B) -> Result<(), EncodeError> {
    out.put_u16(unsubscribe.packet_id);
    write_properties(&unsubscribe.properties, v5, out)?;
    for filter in &unsubscribe.filters {
        put_binary(out, filter)?;
    }
    Ok(())
}

fn write_unsuback<B: BufMut>(unsuback: &UnsubAck, v5: bool, out: &mut B) -> Result<(), EncodeError> {
    out.put_u16(unsuback.packet_id);
    if v5 {
        unsuback.properties.encode(out)?;
        out.put_slice(&unsuback.reason_codes);
    }
    Ok(())
}

