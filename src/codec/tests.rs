use bytes::Bytes;

use super::*;
use crate::utils::error::{DecodeError, EncodeError};

const MAX: usize = 1 << 20;

fn bytes_of(packet: &Packet, level: ProtocolLevel) -> Vec<u8> {
    encode_to_bytes(packet, level).unwrap().to_vec()
}

fn round_trip(packet: Packet, level: ProtocolLevel) {
    let encoded = bytes_of(&packet, level);
    assert_eq!(encoded.len(), encoded_len(&packet, level));
    let (decoded, consumed) = decode_slice(&encoded, level, MAX).unwrap().unwrap();
    assert_eq!(decoded, packet);
    assert_eq!(consumed, encoded.len());
}

fn v3_connect() -> Packet {
    let mut connect = Connect::new(ProtocolLevel::V3_1_1, "sensor-1");
    connect.clean_session = false;
    connect.keep_alive = 30;
    connect.will = Some(LastWill {
        topic: Bytes::from_static(b"status/sensor-1"),
        payload: Bytes::from_static(b"offline"),
        qos: QoS::AtLeastOnce,
        retain: true,
        properties: Properties::default(),
    });
    connect.username = Some(Bytes::from_static(b"user"));
    connect.password = Some(Bytes::from_static(&[0, 159, 146, 150]));
    Packet::Connect(Box::new(connect))
}

fn v5_connect() -> Packet {
    let mut connect = Connect::new(ProtocolLevel::V5, "dev");
    connect.keep_alive = 10;
    connect.properties = Properties::new()
        .with(Property::SessionExpiryInterval(120))
        .with(Property::ReceiveMaximum(20))
        .with(Property::UserProperty("site".into(), "lab".into()));
    connect.will = Some(LastWill {
        topic: Bytes::from_static(b"dev/will"),
        payload: Bytes::from_static(b"bye"),
        qos: QoS::ExactlyOnce,
        retain: false,
        properties: Properties::new()
            .with(Property::WillDelayInterval(5))
            .with(Property::CorrelationData(Bytes::from_static(b"\x01\x02"))),
    });
    Packet::Connect(Box::new(connect))
}

fn sample_publish() -> Packet {
    let mut publish = Publish::new("sensors/room1/temp", "21.5", QoS::ExactlyOnce);
    publish.packet_id = Some(7);
    publish.dup = true;
    publish.retain = true;
    Packet::Publish(publish)
}

fn samples(level: ProtocolLevel) -> Vec<Packet> {
    vec![
        if level.is_v5() { v5_connect() } else { v3_connect() },
        sample_publish(),
        Packet::Subscribe(Subscribe {
            packet_id: 3,
            properties: Properties::default(),
            filters: vec![
                (Bytes::from_static(b"a/+/c"), SubscriptionOptions::qos(QoS::AtLeastOnce)),
                (Bytes::from_static(b"#"), SubscriptionOptions::qos(QoS::AtMostOnce)),
            ],
        }),
        Packet::PubRel(Ack::new(9)),
        Packet::PingReq,
    ]
}

#[test]
fn test_length_byte_count_boundaries() {
    assert_eq!(length_byte_count(0), 1);
    assert_eq!(length_byte_count(127), 1);
    assert_eq!(length_byte_count(128), 2);
    assert_eq!(length_byte_count(16_383), 2);
    assert_eq!(length_byte_count(16_384), 3);
    assert_eq!(length_byte_count(2_097_151), 3);
    assert_eq!(length_byte_count(2_097_152), 4);
    assert_eq!(length_byte_count(268_435_455), 4);
}

#[test]
fn test_remaining_length_is_low_order_digit_first() {
    // 2 (topic len) + 1 (topic) + 125 payload = 128
    let publish = Packet::Publish(Publish::new("a", vec![0u8; 125], QoS::AtMostOnce));
    let encoded = bytes_of(&publish, ProtocolLevel::V3_1_1);
    assert_eq!(&encoded[..3], &[0x30, 0x80, 0x01]);
    assert_eq!(encoded.len(), 3 + 128);
}

#[test]
fn test_publish_wire_layout() {
    let mut publish = Publish::new("a/b", "hi", QoS::AtLeastOnce);
    publish.packet_id = Some(10);
    let encoded = bytes_of(&Packet::Publish(publish), ProtocolLevel::V3_1_1);
    assert_eq!(
        encoded,
        vec![0x32, 0x09, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x0A, b'h', b'i']
    );
}

#[test]
fn test_connect_wire_layout() {
    let mut connect = Connect::new(ProtocolLevel::V3_1_1, "c1");
    connect.keep_alive = 60;
    let encoded = bytes_of(&Packet::Connect(Box::new(connect)), ProtocolLevel::V3_1_1);
    assert_eq!(
        encoded,
        vec![
            0x10, 14, 0, 4, b'M', b'Q', b'T', b'T', 4, 0x02, 0, 60, 0, 2, b'c', b'1'
        ]
    );
}

#[test]
fn test_mqtt_3_1_connect_round_trips() {
    let mut connect = Connect::new(ProtocolLevel::V3_1, "legacy");
    connect.username = Some(Bytes::from_static(b"u"));
    let packet = Packet::Connect(Box::new(connect));
    let encoded = bytes_of(&packet, ProtocolLevel::V3_1);
    assert_eq!(&encoded[2..10], &[0, 6, b'M', b'Q', b'I', b's', b'd', b'p']);
    round_trip(packet, ProtocolLevel::V3_1);
}

#[test]
fn test_v3_packets_round_trip() {
    let level = ProtocolLevel::V3_1_1;
    round_trip(v3_connect(), level);
    round_trip(
        Packet::ConnAck(ConnAck {
            session_present: true,
            code: connack_code::ACCEPTED,
            properties: Properties::default(),
        }),
        level,
    );
    round_trip(Packet::Publish(Publish::new("t", "", QoS::AtMostOnce)), level);
    round_trip(sample_publish(), level);
    round_trip(Packet::PubAck(Ack::new(1)), level);
    round_trip(Packet::PubRec(Ack::new(2)), level);
    round_trip(Packet::PubRel(Ack::new(3)), level);
    round_trip(Packet::PubComp(Ack::new(u16::MAX)), level);
    round_trip(
        Packet::SubAck(SubAck {
            packet_id: 4,
            properties: Properties::default(),
            return_codes: vec![0, 1, 2, SUBACK_FAILURE],
        }),
        level,
    );
    round_trip(
        Packet::Unsubscribe(Unsubscribe {
            packet_id: 5,
            properties: Properties::default(),
            filters: vec![Bytes::from_static(b"a/#"), Bytes::from_static(b"b")],
        }),
        level,
    );
    round_trip(
        Packet::UnsubAck(UnsubAck {
            packet_id: 5,
            properties: Properties::default(),
            reason_codes: Vec::new(),
        }),
        level,
    );
    round_trip(Packet::PingReq, level);
    round_trip(Packet::PingResp, level);
    round_trip(Packet::Disconnect(Disconnect::default()), level);
    for packet in samples(level) {
        round_trip(packet, level);
    }
}

#[test]
fn test_v5_packets_round_trip() {
    let level = ProtocolLevel::V5;
    round_trip(v5_connect(), level);
    round_trip(
        Packet::ConnAck(ConnAck {
            session_present: false,
            code: reason_code::SUCCESS,
            properties: Properties::new()
                .with(Property::AssignedClientIdentifier("auto-1".into()))
                .with(Property::ReceiveMaximum(64))
                .with(Property::MaximumPacketSize(1024)),
        }),
        level,
    );

    let mut publish = Publish::new("a/b", "payload", QoS::AtLeastOnce);
    publish.packet_id = Some(11);
    publish.properties = Properties::new()
        .with(Property::MessageExpiryInterval(60))
        .with(Property::ContentType("text/plain".into()))
        .with(Property::SubscriptionIdentifier(300));
    round_trip(Packet::Publish(publish), level);

    round_trip(Packet::PubAck(Ack::new(1)), level);
    round_trip(
        Packet::PubRec(Ack::with_reason(2, reason_code::NO_MATCHING_SUBSCRIBERS)),
        level,
    );
    round_trip(
        Packet::PubComp(Ack {
            packet_id: 3,
            reason_code: reason_code::PACKET_IDENTIFIER_NOT_FOUND,
            properties: Properties::new().with(Property::ReasonString("unknown id".into())),
        }),
        level,
    );
    round_trip(
        Packet::Subscribe(Subscribe {
            packet_id: 8,
            properties: Properties::new().with(Property::SubscriptionIdentifier(1)),
            filters: vec![(
                Bytes::from_static(b"x/+"),
                SubscriptionOptions {
                    qos: QoS::ExactlyOnce,
                    no_local: true,
                    retain_as_published: true,
                    retain_handling: 2,
                },
            )],
        }),
        level,
    );
    round_trip(
        Packet::SubAck(SubAck {
            packet_id: 8,
            properties: Properties::new().with(Property::ReasonString("partial".into())),
            return_codes: vec![reason_code::GRANTED_QOS_2, reason_code::TOPIC_FILTER_INVALID],
        }),
        level,
    );
    round_trip(
        Packet::UnsubAck(UnsubAck {
            packet_id: 9,
            properties: Properties::default(),
            reason_codes: vec![reason_code::SUCCESS, reason_code::NO_SUBSCRIPTION_EXISTED],
        }),
        level,
    );
    round_trip(Packet::Disconnect(Disconnect::default()), level);
    round_trip(
        Packet::Disconnect(Disconnect::with_reason(reason_code::SESSION_TAKEN_OVER)),
        level,
    );
    round_trip(
        Packet::Disconnect(Disconnect {
            reason_code: reason_code::NORMAL_DISCONNECTION,
            properties: Properties::new()
                .with(Property::SessionExpiryInterval(0))
                .with(Property::ReasonString("done".into()))
                .with(Property::ServerReference("other:1883".into()))
                .with(Property::UserProperty("a".into(), "1".into()))
                .with(Property::UserProperty("a".into(), "2".into())),
        }),
        level,
    );
    round_trip(
        Packet::Auth(Auth {
            reason_code: 0x18,
            properties: Properties::new()
                .with(Property::AuthenticationMethod("SCRAM".into()))
                .with(Property::AuthenticationData(Bytes::from_static(b"nonce"))),
        }),
        level,
    );
    for packet in samples(level) {
        round_trip(packet, level);
    }
}

#[test]
fn test_v5_disconnect_omits_defaults() {
    let level = ProtocolLevel::V5;
    assert_eq!(
        bytes_of(&Packet::Disconnect(Disconnect::default()), level),
        vec![0xE0, 0x00]
    );
    assert_eq!(
        bytes_of(
            &Packet::Disconnect(Disconnect::with_reason(reason_code::SESSION_TAKEN_OVER)),
            level
        ),
        vec![0xE0, 0x01, 0x8E]
    );
    assert_eq!(bytes_of(&Packet::PubAck(Ack::new(5)), level), vec![0x40, 0x02, 0x00, 0x05]);
}

#[test]
fn test_v5_user_properties_are_all_kept() {
    let properties = Properties::new()
        .with(Property::UserProperty("k".into(), "1".into()))
        .with(Property::ReasonString("r".into()))
        .with(Property::UserProperty("k".into(), "2".into()));
    let pairs: Vec<_> = properties.user_properties().collect();
    assert_eq!(pairs, vec![("k", "1"), ("k", "2")]);
    assert_eq!(properties.reason_string(), Some("r"));
}

#[test]
fn test_fragmentation_invariance_two_segments() {
    for level in [ProtocolLevel::V3_1_1, ProtocolLevel::V5] {
        for packet in samples(level) {
            let encoded = bytes_of(&packet, level);
            let whole = decode_slice(&encoded, level, MAX).unwrap();
            for split in 1..encoded.len() {
                let (a, b) = encoded.split_at(split);
                let parts: [&[u8]; 2] = [a, b];
                assert_eq!(decode(&parts, level, MAX).unwrap(), whole, "split at {split}");
            }
        }
    }
}

#[test]
fn test_fragmentation_invariance_three_segments() {
    let level = ProtocolLevel::V5;
    let encoded = bytes_of(&v5_connect(), level);
    let whole = decode_slice(&encoded, level, MAX).unwrap();
    for i in 1..encoded.len() {
        for j in i..encoded.len() {
            let parts: [&[u8]; 3] = [&encoded[..i], &encoded[i..j], &encoded[j..]];
            assert_eq!(decode(&parts, level, MAX).unwrap(), whole, "split at {i}/{j}");
        }
    }
}

#[test]
fn test_decodes_from_shared_segments() {
    let level = ProtocolLevel::V3_1_1;
    let encoded = Bytes::from(bytes_of(&sample_publish(), level));
    let segments = vec![encoded.slice(..5), encoded.slice(5..)];
    let (packet, consumed) = decode(&segments, level, MAX).unwrap().unwrap();
    assert_eq!(packet, sample_publish());
    assert_eq!(consumed, encoded.len());
}

/// A segment type that is neither `Clone` nor `Copy`.
struct Chunk(Vec<u8>);

impl AsRef<[u8]> for Chunk {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Segment for Chunk {}

#[test]
fn test_decodes_from_owned_non_clone_segments() {
    let level = ProtocolLevel::V5;
    let encoded = bytes_of(&v5_connect(), level);
    let segments = vec![
        Chunk(encoded[..3].to_vec()),
        Chunk(encoded[3..10].to_vec()),
        Chunk(encoded[10..].to_vec()),
    ];
    let (packet, consumed) = decode(&segments, level, MAX).unwrap().unwrap();
    assert_eq!(packet, v5_connect());
    assert_eq!(consumed, encoded.len());
}

#[test]
fn test_frame_len_reads_only_the_fixed_header() {
    let level = ProtocolLevel::V3_1_1;
    let encoded = bytes_of(&sample_publish(), level);
    assert_eq!(frame_len(&encoded[..1], MAX), Ok(None));
    assert_eq!(frame_len(&encoded[..2], MAX), Ok(Some(encoded.len())));
    assert_eq!(frame_len(&encoded, MAX), Ok(Some(encoded.len())));
    assert_eq!(frame_len(&[0x00, 0x00], MAX), Err(DecodeError::InvalidPacketType(0)));
    assert!(matches!(
        frame_len(&[0x30, 0xFF, 0x7F], 100),
        Err(DecodeError::PacketTooLarge { .. })
    ));
}

#[test]
fn test_every_prefix_needs_more_data() {
    let level = ProtocolLevel::V3_1_1;
    let encoded = bytes_of(&v3_connect(), level);
    for end in 0..encoded.len() {
        assert_eq!(decode_slice(&encoded[..end], level, MAX), Ok(None), "prefix {end}");
    }
}

#[test]
fn test_consumes_only_the_first_packet() {
    let level = ProtocolLevel::V3_1_1;
    let mut stream = bytes_of(&Packet::PingReq, level);
    let second = bytes_of(&sample_publish(), level);
    stream.extend_from_slice(&second);

    let (first, consumed) = decode_slice(&stream, level, MAX).unwrap().unwrap();
    assert_eq!(first, Packet::PingReq);
    assert_eq!(consumed, 2);
    let (next, consumed) = decode_slice(&stream[2..], level, MAX).unwrap().unwrap();
    assert_eq!(next, sample_publish());
    assert_eq!(consumed, second.len());
}

#[test]
fn test_remaining_length_longer_than_four_bytes_is_malformed() {
    let level = ProtocolLevel::V3_1_1;
    assert_eq!(decode_slice(&[0x30, 0xFF, 0xFF], level, usize::MAX), Ok(None));
    assert_eq!(
        decode_slice(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01], level, usize::MAX),
        Err(DecodeError::MalformedRemainingLength)
    );
}

#[test]
fn test_rejects_malformed_packets() {
    let level = ProtocolLevel::V3_1_1;

    assert_eq!(
        decode_slice(&[0x00, 0x00], level, MAX),
        Err(DecodeError::InvalidPacketType(0))
    );
    assert_eq!(
        decode_slice(&[0x80, 0x00], level, MAX),
        Err(DecodeError::InvalidFlags {
            packet_type: PacketType::Subscribe,
            flags: 0
        })
    );
    assert_eq!(decode_slice(&[0x36, 0x00], level, MAX), Err(DecodeError::InvalidQoS(3)));
    assert_eq!(
        decode_slice(&[0x82, 0x06, 0x00, 0x00, 0x00, 0x01, b'a', 0x00], level, MAX),
        Err(DecodeError::ZeroPacketId)
    );
    assert_eq!(
        decode_slice(&[0x82, 0x02, 0x00, 0x01], level, MAX),
        Err(DecodeError::EmptyFilterList(PacketType::Subscribe))
    );
    assert_eq!(
        decode_slice(&[0xC0, 0x01, 0x00], level, MAX),
        Err(DecodeError::TrailingBytes(1))
    );
    assert_eq!(
        decode_slice(&[0x20, 0x01, 0x00], level, MAX),
        Err(DecodeError::Truncated)
    );
    assert_eq!(
        decode_slice(&[0x30, 0x03, 0x00, 0x01, b'#'], level, MAX),
        Err(DecodeError::WildcardInTopicName)
    );
    assert_eq!(
        decode_slice(&[0x30, 0x04, 0x00, 0x02, 0xC3, 0x28], level, MAX),
        Err(DecodeError::InvalidUtf8)
    );
    // QoS 0 with DUP set
    assert_eq!(
        decode_slice(&[0x38, 0x03, 0x00, 0x01, b'a'], level, MAX),
        Err(DecodeError::InvalidFlags {
            packet_type: PacketType::Publish,
            flags: 0x08
        })
    );
    // AUTH does not exist before 5.0
    assert_eq!(
        decode_slice(&[0xF0, 0x00], level, MAX),
        Err(DecodeError::InvalidPacketType(15))
    );
}

#[test]
fn test_rejects_reserved_connect_flag() {
    let mut encoded = bytes_of(
        &Packet::Connect(Box::new(Connect::new(ProtocolLevel::V3_1_1, "c"))),
        ProtocolLevel::V3_1_1,
    );
    encoded[9] |= 0x01;
    assert_eq!(
        decode_slice(&encoded, ProtocolLevel::V3_1_1, MAX),
        Err(DecodeError::InvalidConnectFlags(0x03))
    );
}

#[test]
fn test_unknown_protocol_level_still_decodes_connect() {
    let mut connect = Connect::new(ProtocolLevel::V3_1_1, "c");
    connect.protocol_level = 9;
    let packet = Packet::Connect(Box::new(connect));
    let encoded = bytes_of(&packet, ProtocolLevel::V3_1_1);
    let (decoded, _) = decode_slice(&encoded, ProtocolLevel::V3_1_1, MAX).unwrap().unwrap();
    match decoded {
        Packet::Connect(connect) => assert_eq!(connect.level(), None),
        other => panic!("expected CONNECT, got {other:?}"),
    }
}

#[test]
fn test_enforces_max_packet_size_before_body_arrives() {
    let level = ProtocolLevel::V3_1_1;
    let encoded = bytes_of(&sample_publish(), level);
    assert_eq!(
        decode_slice(&encoded[..2], level, 10),
        Err(DecodeError::PacketTooLarge {
            size: encoded.len(),
            max: 10
        })
    );
}

#[test]
fn test_encode_rejects_invalid_packets() {
    let publish = Publish::new("t", "x", QoS::AtLeastOnce);
    assert_eq!(
        encode_to_bytes(&Packet::Publish(publish), ProtocolLevel::V3_1_1),
        Err(EncodeError::MissingPacketId)
    );

    let long_topic = vec![b'a'; 70_000];
    let publish = Publish::new(long_topic, "x", QoS::AtMostOnce);
    assert_eq!(
        encode_to_bytes(&Packet::Publish(publish), ProtocolLevel::V3_1_1),
        Err(EncodeError::FieldTooLong(70_000))
    );
}

#[test]
fn test_decoder_tracks_negotiated_level() {
    let mut decoder = Decoder::new(ProtocolLevel::V3_1_1, MAX);
    let ack = Packet::PubAck(Ack::with_reason(4, reason_code::NO_MATCHING_SUBSCRIBERS));
    let encoded = bytes_of(&ack, ProtocolLevel::V5);

    assert_eq!(
        decoder.decode(&[encoded.as_slice()]),
        Err(DecodeError::TrailingBytes(1))
    );
    decoder.set_level(ProtocolLevel::V5);
    assert_eq!(decoder.level(), ProtocolLevel::V5);
    assert_eq!(
        decoder.decode(&[encoded.as_slice()]).unwrap(),
        Some((ack, encoded.len()))
    );
}
