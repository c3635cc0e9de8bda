//! MQTT control packets and the codec for MQTT 3.1, 3.1.1 and 5.0.
//!
//! [`Packet`] is a sum type with one variant per control packet. Fixed header
//! bits are computed from the variant at encode time. [`Codec`] frames and
//! unframes packets for one protocol version, either from a buffer or from a
//! live [`std::io::Read`] channel.

mod ack;
mod auth;
mod connect;
mod decoder;
mod disconnect;
mod publish;
mod subscribe;
mod unsubscribe;
pub(crate) mod writer;

use std::fmt;
use std::io::Read;

pub use ack::Ack;
pub use auth::Auth;
pub use connect::{Connack, ConnectReturnCode, Connect, Will};
pub use decoder::Decoder;
pub use disconnect::Disconnect;
pub use publish::Publish;
pub use subscribe::{Suback, Subscribe, SubscriptionOptions};
pub use unsubscribe::{Unsuback, Unsubscribe};

use crate::error::{EncodeError, Error, ProtocolError, Result};
use crate::varint;

/// MQTT Control Packet Types (4 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Pubrec = 5,
    Pubrel = 6,
    Pubcomp = 7,
    Subscribe = 8,
    Suback = 9,
    Unsubscribe = 10,
    Unsuback = 11,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
    Auth = 15,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::Connack),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::Puback),
            5 => Ok(PacketType::Pubrec),
            6 => Ok(PacketType::Pubrel),
            7 => Ok(PacketType::Pubcomp),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::Suback),
            10 => Ok(PacketType::Unsubscribe),
            11 => Ok(PacketType::Unsuback),
            12 => Ok(PacketType::Pingreq),
            13 => Ok(PacketType::Pingresp),
            14 => Ok(PacketType::Disconnect),
            15 => Ok(PacketType::Auth),
            _ => Err(ProtocolError::InvalidPacketType(value)),
        }
    }
}

/// Quality of Service levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
#[allow(clippy::enum_variant_names)] // MQTT spec names
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::MalformedPacket(format!(
                "Invalid QoS: {}",
                value
            ))),
        }
    }
}

/// Protocol revision negotiated for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum ProtocolVersion {
    V3_1 = 3,
    #[default]
    V3_1_1 = 4,
    V5 = 5,
}

impl ProtocolVersion {
    /// Protocol level byte written in CONNECT.
    pub fn level(self) -> u8 {
        self as u8
    }

    /// Protocol name written in CONNECT.
    pub fn protocol_name(self) -> &'static str {
        match self {
            ProtocolVersion::V3_1 => "MQIsdp",
            ProtocolVersion::V3_1_1 | ProtocolVersion::V5 => "MQTT",
        }
    }

    pub fn is_v5(self) -> bool {
        self == ProtocolVersion::V5
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            3 => Ok(ProtocolVersion::V3_1),
            4 => Ok(ProtocolVersion::V3_1_1),
            5 => Ok(ProtocolVersion::V5),
            _ => Err(ProtocolError::UnsupportedProtocolVersion(value)),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V3_1 => write!(f, "3.1"),
            ProtocolVersion::V3_1_1 => write!(f, "3.1.1"),
            ProtocolVersion::V5 => write!(f, "5.0"),
        }
    }
}

/// MQTT v5 Reason Codes (used in CONNACK, PUBACK, SUBACK, etc.).
/// These are constants rather than enum values since some codes have the same numeric value
/// with different semantic meanings depending on context.
#[allow(dead_code)]
pub mod reason_code {
    pub const SUCCESS: u8 = 0x00;
    pub const NORMAL_DISCONNECTION: u8 = 0x00;
    pub const GRANTED_QOS_0: u8 = 0x00;
    pub const GRANTED_QOS_1: u8 = 0x01;
    pub const GRANTED_QOS_2: u8 = 0x02;
    pub const DISCONNECT_WITH_WILL: u8 = 0x04;
    pub const NO_MATCHING_SUBSCRIBERS: u8 = 0x10;
    pub const NO_SUBSCRIPTION_EXISTED: u8 = 0x11;
    pub const CONTINUE_AUTHENTICATION: u8 = 0x18;
    pub const RE_AUTHENTICATE: u8 = 0x19;
    /// SUBACK failure in every protocol version.
    pub const GRANTED_FAILURE: u8 = 0x80;
    pub const UNSPECIFIED_ERROR: u8 = 0x80;
    pub const MALFORMED_PACKET: u8 = 0x81;
    pub const PROTOCOL_ERROR: u8 = 0x82;
    pub const IMPLEMENTATION_SPECIFIC_ERROR: u8 = 0x83;
    pub const UNSUPPORTED_PROTOCOL_VERSION: u8 = 0x84;
    pub const CLIENT_IDENTIFIER_NOT_VALID: u8 = 0x85;
    pub const BAD_USER_NAME_OR_PASSWORD: u8 = 0x86;
    pub const NOT_AUTHORIZED: u8 = 0x87;
    pub const SERVER_UNAVAILABLE: u8 = 0x88;
    pub const SERVER_BUSY: u8 = 0x89;
    pub const BANNED: u8 = 0x8A;
    pub const SERVER_SHUTTING_DOWN: u8 = 0x8B;
    pub const BAD_AUTHENTICATION_METHOD: u8 = 0x8C;
    pub const KEEP_ALIVE_TIMEOUT: u8 = 0x8D;
    pub const SESSION_TAKEN_OVER: u8 = 0x8E;
    pub const TOPIC_FILTER_INVALID: u8 = 0x8F;
    pub const TOPIC_NAME_INVALID: u8 = 0x90;
    pub const PACKET_IDENTIFIER_IN_USE: u8 = 0x91;
    pub const PACKET_IDENTIFIER_NOT_FOUND: u8 = 0x92;
    pub const RECEIVE_MAXIMUM_EXCEEDED: u8 = 0x93;
    pub const TOPIC_ALIAS_INVALID: u8 = 0x94;
    pub const PACKET_TOO_LARGE: u8 = 0x95;
    pub const MESSAGE_RATE_TOO_HIGH: u8 = 0x96;
    pub const QUOTA_EXCEEDED: u8 = 0x97;
    pub const ADMINISTRATIVE_ACTION: u8 = 0x98;
    pub const PAYLOAD_FORMAT_INVALID: u8 = 0x99;
    pub const RETAIN_NOT_SUPPORTED: u8 = 0x9A;
    pub const QOS_NOT_SUPPORTED: u8 = 0x9B;
    pub const USE_ANOTHER_SERVER: u8 = 0x9C;
    pub const SERVER_MOVED: u8 = 0x9D;
    pub const SHARED_SUBSCRIPTIONS_NOT_SUPPORTED: u8 = 0x9E;
    pub const CONNECTION_RATE_EXCEEDED: u8 = 0x9F;
    pub const MAXIMUM_CONNECT_TIME: u8 = 0xA0;
    pub const SUBSCRIPTION_IDENTIFIERS_NOT_SUPPORTED: u8 = 0xA1;
    pub const WILDCARD_SUBSCRIPTIONS_NOT_SUPPORTED: u8 = 0xA2;

    /// Reason codes of 0x80 and above report failure.
    pub fn is_failure(code: u8) -> bool {
        code >= 0x80
    }
}

/// MQTT Packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    Connack(Connack),
    Publish(Publish),
    Puback(Ack),
    Pubrec(Ack),
    Pubrel(Ack),
    Pubcomp(Ack),
    Subscribe(Subscribe),
    Suback(Suback),
    Unsubscribe(Unsubscribe),
    Unsuback(Unsuback),
    Pingreq,
    Pingresp,
    Disconnect(Disconnect),
    Auth(Auth),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::Connack(_) => PacketType::Connack,
            Packet::Publish(_) => PacketType::Publish,
            Packet::Puback(_) => PacketType::Puback,
            Packet::Pubrec(_) => PacketType::Pubrec,
            Packet::Pubrel(_) => PacketType::Pubrel,
            Packet::Pubcomp(_) => PacketType::Pubcomp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::Suback(_) => PacketType::Suback,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::Unsuback(_) => PacketType::Unsuback,
            Packet::Pingreq => PacketType::Pingreq,
            Packet::Pingresp => PacketType::Pingresp,
            Packet::Disconnect(_) => PacketType::Disconnect,
            Packet::Auth(_) => PacketType::Auth,
        }
    }

    /// Message identifier, when the packet carries one.
    pub fn packet_id(&self) -> Option<u16> {
        match self {
            Packet::Publish(p) => p.packet_id,
            Packet::Puback(a) | Packet::Pubrec(a) | Packet::Pubrel(a) | Packet::Pubcomp(a) => {
                Some(a.packet_id)
            }
            Packet::Subscribe(s) => Some(s.packet_id),
            Packet::Suback(s) => Some(s.packet_id),
            Packet::Unsubscribe(u) => Some(u.packet_id),
            Packet::Unsuback(u) => Some(u.packet_id),
            _ => None,
        }
    }

    /// QoS carried in the fixed header.
    pub fn qos(&self) -> QoS {
        match self {
            Packet::Publish(p) => p.qos,
            Packet::Pubrel(_) | Packet::Subscribe(_) | Packet::Unsubscribe(_) => QoS::AtLeastOnce,
            _ => QoS::AtMostOnce,
        }
    }

    pub fn dup(&self) -> bool {
        match self {
            Packet::Publish(p) => p.dup,
            Packet::Pubrel(a) => a.dup,
            Packet::Subscribe(s) => s.dup,
            Packet::Unsubscribe(u) => u.dup,
            _ => false,
        }
    }

    pub fn retain(&self) -> bool {
        matches!(self, Packet::Publish(p) if p.retain)
    }

    /// Low nibble of the first header byte.
    ///
    /// DUP on PUBREL, SUBSCRIBE and UNSUBSCRIBE only exists in MQTT 3.1.
    pub fn fixed_header_flags(&self, version: ProtocolVersion) -> u8 {
        match self {
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
            Packet::Pubrel(_) | Packet::Subscribe(_) | Packet::Unsubscribe(_) => {
                if version == ProtocolVersion::V3_1 && self.dup() {
                    0x0A
                } else {
                    0x02
                }
            }
            _ => 0x00,
        }
    }

    /// Copy of a PUBLISH, PUBREL, SUBSCRIBE or UNSUBSCRIBE with DUP set, for
    /// retransmission. Other packets are returned unchanged.
    pub fn with_dup(&self) -> Packet {
        let mut packet = self.clone();
        match &mut packet {
            Packet::Publish(p) if p.qos != QoS::AtMostOnce => p.dup = true,
            Packet::Pubrel(a) => a.dup = true,
            Packet::Subscribe(s) => s.dup = true,
            Packet::Unsubscribe(u) => u.dup = true,
            _ => {}
        }
        packet
    }
}

/// Frames packets for one protocol version.
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
    pub version: ProtocolVersion,
    /// Largest packet the peer accepts. Encoding a bigger packet fails, except
    /// for acknowledgments, which shed their optional properties instead.
    pub maximum_packet_size: Option<u32>,
    /// Largest packet we accept. A bigger remaining length is rejected before
    /// any of its body is read.
    pub maximum_incoming_size: Option<u32>,
}

impl Codec {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version,
            maximum_packet_size: None,
            maximum_incoming_size: None,
        }
    }

    pub fn with_maximum_packet_size(mut self, max: u32) -> Self {
        self.maximum_packet_size = Some(max);
        self
    }

    pub fn with_maximum_incoming_size(mut self, max: u32) -> Self {
        self.maximum_incoming_size = Some(max);
        self
    }

    /// Encode one packet, appending the framed bytes to `buf`.
    pub fn encode(&self, packet: &Packet, buf: &mut Vec<u8>) -> Result<()> {
        let first_byte =
            ((packet.packet_type() as u8) << 4) | packet.fixed_header_flags(self.version);

        let mut body = Vec::new();
        self.encode_body(packet, &mut body)?;

        if let Some(max) = self.maximum_packet_size {
            let max = max as usize;
            if framed_len(body.len()) > max {
                for drop_user_properties in [false, true] {
                    let Some(reduced) = drop_optional_properties(packet, drop_user_properties)
                    else {
                        break;
                    };
                    body.clear();
                    self.encode_body(&reduced, &mut body)?;
                    if framed_len(body.len()) <= max {
                        break;
                    }
                }
            }
            let size = framed_len(body.len());
            if size > max {
                return Err(EncodeError::PacketTooLarge { size, max }.into());
            }
        }

        writer::put_packet(buf, first_byte, &body)
    }

    fn encode_body(&self, packet: &Packet, body: &mut Vec<u8>) -> Result<()> {
        let version = self.version;
        match packet {
            Packet::Connect(c) => c.encode_body(version, body),
            Packet::Connack(c) => c.encode_body(version, body),
            Packet::Publish(p) => p.encode_body(version, body),
            Packet::Puback(a) => a.encode_body(PacketType::Puback, version, body),
            Packet::Pubrec(a) => a.encode_body(PacketType::Pubrec, version, body),
            Packet::Pubrel(a) => a.encode_body(PacketType::Pubrel, version, body),
            Packet::Pubcomp(a) => a.encode_body(PacketType::Pubcomp, version, body),
            Packet::Subscribe(s) => s.encode_body(version, body),
            Packet::Suback(s) => s.encode_body(version, body),
            Packet::Unsubscribe(u) => u.encode_body(version, body),
            Packet::Unsuback(u) => u.encode_body(version, body),
            Packet::Pingreq | Packet::Pingresp => Ok(()),
            Packet::Disconnect(d) => d.encode_body(version, body),
            Packet::Auth(a) => a.encode_body(version, body),
        }
    }

    /// Decode one packet from the front of `buf`.
    ///
    /// Returns `Ok(Some((packet, bytes_consumed)))` if successful,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Packet, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        let Some((remaining_len, len_bytes)) = varint::decode(&buf[1..])? else {
            return Ok(None);
        };

        let header_len = 1 + len_bytes;
        let total_len = header_len + remaining_len;
        self.check_incoming(total_len)?;
        if buf.len() < total_len {
            return Ok(None);
        }

        let packet = self.decode_body(buf[0], &buf[header_len..total_len])?;
        Ok(Some((packet, total_len)))
    }

    /// Decode one packet from a live channel whose first header byte has
    /// already been read.
    ///
    /// The body may arrive over any number of reads; this keeps reading until
    /// the full remaining length is in hand. The buffer grows with the bytes
    /// that actually arrive, never straight to the advertised length.
    pub fn read_packet<R: Read>(&self, first_byte: u8, reader: &mut R) -> Result<Packet> {
        let remaining_len = varint::read_from(reader)? as usize;
        self.check_incoming(framed_len(remaining_len))?;

        let mut body = Vec::with_capacity(remaining_len.min(READ_CHUNK));
        reader
            .by_ref()
            .take(remaining_len as u64)
            .read_to_end(&mut body)?;
        if body.len() < remaining_len {
            return Err(ProtocolError::ConnectionClosed.into());
        }

        self.decode_body(first_byte, &body)
    }

    fn check_incoming(&self, size: usize) -> Result<()> {
        match self.maximum_incoming_size {
            Some(max) if size > max as usize => Err(ProtocolError::PacketTooLarge {
                size,
                max: max as usize,
            }
            .into()),
            _ => Ok(()),
        }
    }

    /// Decode a complete body. Running out of bytes here means the remaining
    /// length lied about the fields, which is fatal.
    fn decode_body(&self, first_byte: u8, body: &[u8]) -> Result<Packet> {
        let packet_type = PacketType::try_from(first_byte >> 4)?;
        match self.decode_fields(packet_type, first_byte & 0x0F, body) {
            Err(Error::Protocol(ProtocolError::IncompletePacket { needed, have })) => {
                Err(ProtocolError::MalformedPacket(format!(
                    "{:?} body ends early: field needs {} bytes, {} left",
                    packet_type, needed, have
                ))
                .into())
            }
            result => result,
        }
    }

    fn decode_fields(&self, packet_type: PacketType, flags: u8, body: &[u8]) -> Result<Packet> {
        let version = self.version;

        check_flags(packet_type, flags, version)?;

        let mut dec = Decoder::new(body);
        let packet = match packet_type {
            PacketType::Connect => Packet::Connect(Connect::decode(&mut dec)?),
            PacketType::Connack => Packet::Connack(Connack::decode(version, &mut dec)?),
            PacketType::Publish => Packet::Publish(Publish::decode(flags, version, &mut dec)?),
            PacketType::Puback => Packet::Puback(Ack::decode(flags, version, &mut dec)?),
            PacketType::Pubrec => Packet::Pubrec(Ack::decode(flags, version, &mut dec)?),
            PacketType::Pubrel => Packet::Pubrel(Ack::decode(flags, version, &mut dec)?),
            PacketType::Pubcomp => Packet::Pubcomp(Ack::decode(flags, version, &mut dec)?),
            PacketType::Subscribe => {
                Packet::Subscribe(Subscribe::decode(flags, version, &mut dec)?)
            }
            PacketType::Suback => Packet::Suback(Suback::decode(version, &mut dec)?),
            PacketType::Unsubscribe => {
                Packet::Unsubscribe(Unsubscribe::decode(flags, version, &mut dec)?)
            }
            PacketType::Unsuback => Packet::Unsuback(Unsuback::decode(version, &mut dec)?),
            PacketType::Pingreq => {
                expect_empty(packet_type, &dec)?;
                Packet::Pingreq
            }
            PacketType::Pingresp => {
                expect_empty(packet_type, &dec)?;
                Packet::Pingresp
            }
            PacketType::Disconnect => {
                Packet::Disconnect(Disconnect::decode(version, &mut dec)?)
            }
            PacketType::Auth => Packet::Auth(Auth::decode(version, &mut dec)?),
        };

        Ok(packet)
    }
}

/// Encode with a codec that has no packet size cap.
pub fn encode_packet(packet: &Packet, version: ProtocolVersion, buf: &mut Vec<u8>) -> Result<()> {
    Codec::new(version).encode(packet, buf)
}

/// Decode one packet from the front of `buf`.
pub fn decode_packet(buf: &[u8], version: ProtocolVersion) -> Result<Option<(Packet, usize)>> {
    Codec::new(version).decode(buf)
}

const READ_CHUNK: usize = 64 * 1024;

/// Header byte plus remaining length plus body.
fn framed_len(body_len: usize) -> usize {
    1 + varint::encoded_len(body_len as u32) + body_len
}

// MQTT-3.6.1-1, MQTT-3.8.1-1, MQTT-3.10.1-1: PUBREL, SUBSCRIBE and
// UNSUBSCRIBE flags are 0010, every other non-PUBLISH type is 0000.
fn check_flags(packet_type: PacketType, flags: u8, version: ProtocolVersion) -> Result<()> {
    let expected = match packet_type {
        PacketType::Publish => return Ok(()),
        PacketType::Pubrel | PacketType::Subscribe | PacketType::Unsubscribe => 0x02,
        _ => 0x00,
    };

    // MQTT 3.1 lets these carry DUP
    let compared = if version == ProtocolVersion::V3_1 && expected == 0x02 {
        flags & 0x07
    } else {
        flags
    };

    if compared != expected {
        return Err(ProtocolError::InvalidFlagBits {
            packet_type,
            expected,
            actual: flags,
        }
        .into());
    }
    Ok(())
}

fn expect_empty(packet_type: PacketType, dec: &Decoder<'_>) -> Result<()> {
    if dec.remaining() != 0 {
        return Err(ProtocolError::MalformedPacket(format!(
            "{:?} must have no body, got {} bytes",
            packet_type,
            dec.remaining()
        ))
        .into());
    }
    Ok(())
}

/// Ack-style copy without its reason string, and optionally without its
/// user properties. `None` for packets that must not shed properties.
fn drop_optional_properties(packet: &Packet, drop_user_properties: bool) -> Option<Packet> {
    let mut packet = packet.clone();
    match &mut packet {
        Packet::Puback(a) | Packet::Pubrec(a) | Packet::Pubrel(a) | Packet::Pubcomp(a) => {
            a.properties.reason_string = None;
            if drop_user_properties {
                a.properties.user_properties.clear();
            }
        }
        Packet::Auth(a) => {
            a.properties.reason_string = None;
            if drop_user_properties {
                a.properties.user_properties.clear();
            }
        }
        _ => return None,
    }
    Some(packet)
}

/// Fail unless the connection speaks MQTT 5.0.
pub(crate) fn require_v5(version: ProtocolVersion, feature: &'static str) -> Result<()> {
    if version.is_v5() {
        Ok(())
    } else {
        Err(Error::Unsupported { feature, version })
    }
}

// === Topic Validation ===

/// Check a topic name for PUBLISH: 1..=65535 bytes, no wildcards, no null.
pub fn validate_topic_name(topic: &str) -> Result<()> {
    check_topic_length(topic)?;
    if topic.contains(['#', '+']) {
        return Err(EncodeError::InvalidTopic(format!(
            "topic name '{}' must not contain wildcards",
            topic
        ))
        .into());
    }
    Ok(())
}

/// Check a topic filter for SUBSCRIBE and UNSUBSCRIBE.
///
/// `+` must occupy a whole level; `#` must occupy the last level.
pub fn validate_topic_filter(filter: &str) -> Result<()> {
    check_topic_length(filter)?;

    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        let wildcard = level.contains(['#', '+']);
        if !wildcard {
            continue;
        }
        let valid = match *level {
            "+" => true,
            "#" => i == levels.len() - 1,
            _ => false,
        };
        if !valid {
            return Err(EncodeError::InvalidTopic(format!(
                "misplaced wildcard in filter '{}'",
                filter
            ))
            .into());
        }
    }
    Ok(())
}

fn check_topic_length(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(EncodeError::InvalidTopic("topic must not be empty".into()).into());
    }
    if topic.len() > u16::MAX as usize {
        return Err(EncodeError::InvalidTopic(format!(
            "topic of {} bytes exceeds 65535",
            topic.len()
        ))
        .into());
    }
    if topic.contains('\0') {
        return Err(EncodeError::InvalidTopic("topic must not contain null".into()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::AckProperties;

    #[test]
    fn test_pingreq_pingresp() {
        let mut buf = Vec::new();
        encode_packet(&Packet::Pingreq, ProtocolVersion::V3_1_1, &mut buf).unwrap();
        encode_packet(&Packet::Pingresp, ProtocolVersion::V3_1_1, &mut buf).unwrap();
        assert_eq!(buf, vec![0xC0, 0x00, 0xD0, 0x00]);

        let (packet, used) = decode_packet(&buf, ProtocolVersion::V3_1_1).unwrap().unwrap();
        assert_eq!(packet, Packet::Pingreq);
        assert_eq!(used, 2);
    }

    #[test]
    fn test_decode_needs_more_data() {
        let codec = Codec::new(ProtocolVersion::V3_1_1);
        assert!(codec.decode(&[]).unwrap().is_none());
        assert!(codec.decode(&[0x40]).unwrap().is_none());
        assert!(codec.decode(&[0x40, 0x02, 0x00]).unwrap().is_none());
    }

    #[test]
    fn test_reserved_packet_type() {
        let codec = Codec::new(ProtocolVersion::V3_1_1);
        assert!(matches!(
            codec.decode(&[0x00, 0x00]),
            Err(Error::Protocol(ProtocolError::InvalidPacketType(0)))
        ));
    }

    #[test]
    fn test_pubrel_flags_on_v31_allow_dup() {
        let codec = Codec::new(ProtocolVersion::V3_1);
        let (packet, _) = codec.decode(&[0x6A, 0x02, 0x00, 0x07]).unwrap().unwrap();
        assert!(packet.dup());
        assert_eq!(packet.packet_id(), Some(7));

        let strict = Codec::new(ProtocolVersion::V3_1_1);
        assert!(matches!(
            strict.decode(&[0x6A, 0x02, 0x00, 0x07]),
            Err(Error::Protocol(ProtocolError::InvalidFlagBits { .. }))
        ));
    }

    #[test]
    fn test_header_flags_are_computed() {
        let publish = Packet::Publish(Publish {
            dup: true,
            qos: QoS::ExactlyOnce,
            retain: true,
            topic: "a/b".into(),
            packet_id: Some(1),
            ..Default::default()
        });
        assert_eq!(publish.fixed_header_flags(ProtocolVersion::V5), 0x0D);

        let pubrel = Packet::Pubrel(Ack {
            packet_id: 3,
            dup: true,
            ..Default::default()
        });
        assert_eq!(pubrel.fixed_header_flags(ProtocolVersion::V3_1), 0x0A);
        assert_eq!(pubrel.fixed_header_flags(ProtocolVersion::V3_1_1), 0x02);
        assert_eq!(pubrel.qos(), QoS::AtLeastOnce);
    }

    #[test]
    fn test_maximum_packet_size_drops_ack_properties() {
        let ack = Packet::Puback(Ack {
            packet_id: 9,
            reason_code: reason_code::NO_MATCHING_SUBSCRIBERS,
            properties: AckProperties {
                reason_string: Some("nobody is listening".into()),
                user_properties: vec![("k".into(), "v".into())],
            },
            dup: false,
        });

        // Room for the user property but not the reason string
        let codec = Codec::new(ProtocolVersion::V5).with_maximum_packet_size(16);
        let mut buf = Vec::new();
        codec.encode(&ack, &mut buf).unwrap();
        let (decoded, _) = codec.decode(&buf).unwrap().unwrap();
        let Packet::Puback(decoded) = decoded else {
            panic!("expected PUBACK");
        };
        assert_eq!(decoded.properties.reason_string, None);
        assert_eq!(decoded.properties.user_properties.len(), 1);

        // Room for nothing optional
        let tight = Codec::new(ProtocolVersion::V5).with_maximum_packet_size(6);
        buf.clear();
        tight.encode(&ack, &mut buf).unwrap();
        assert_eq!(buf, vec![0x40, 0x04, 0x00, 0x09, 0x10, 0x00]);
    }

    #[test]
    fn test_maximum_packet_size_rejects_publish() {
        let publish = Packet::Publish(Publish {
            topic: "t".into(),
            payload: vec![0u8; 64].into(),
            ..Default::default()
        });
        let codec = Codec::new(ProtocolVersion::V5).with_maximum_packet_size(32);
        let mut buf = Vec::new();
        assert!(matches!(
            codec.encode(&publish, &mut buf),
            Err(Error::Encode(EncodeError::PacketTooLarge { .. }))
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_validate_topic_name() {
        assert!(validate_topic_name("sensors/kitchen/temp").is_ok());
        assert!(validate_topic_name("").is_err());
        assert!(validate_topic_name("a/+/b").is_err());
        assert!(validate_topic_name("a/#").is_err());
        assert!(validate_topic_name(&"x".repeat(65536)).is_err());
    }

    #[test]
    fn test_validate_topic_filter() {
        assert!(validate_topic_filter("#").is_ok());
        assert!(validate_topic_filter("a/+/c").is_ok());
        assert!(validate_topic_filter("a/b/#").is_ok());
        assert!(validate_topic_filter("+").is_ok());
        assert!(validate_topic_filter("a/#/c").is_err());
        assert!(validate_topic_filter("a/b#").is_err());
        assert!(validate_topic_filter("a+/b").is_err());
        assert!(validate_topic_filter("").is_err());
    }

    #[test]
    fn test_with_dup() {
        let publish = Packet::Publish(Publish {
            qos: QoS::AtLeastOnce,
            topic: "t".into(),
            packet_id: Some(5),
            ..Default::default()
        });
        assert!(publish.with_dup().dup());

        let qos0 = Packet::Publish(Publish {
            topic: "t".into(),
            ..Default::default()
        });
        assert!(!qos0.with_dup().dup());
    }
}
