//! PUBLISH.

use bytes::Bytes;

use super::writer::{put_string, put_u16};
use super::{validate_topic_name, Decoder, PacketType, ProtocolVersion, QoS};
use crate::error::{EncodeError, ProtocolError, Result};
use crate::properties::{self, PropertySet, PublishProperties};

/// PUBLISH packet data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    /// Present for QoS 1 and 2 only.
    pub packet_id: Option<u16>,
    pub payload: Bytes,
    /// MQTT v5 properties
    pub properties: PublishProperties,
}

impl Publish {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
            ..Default::default()
        }
    }

    pub(crate) fn encode_body(&self, version: ProtocolVersion, body: &mut Vec<u8>) -> Result<()> {
        validate_topic_name(&self.topic)?;

        put_string(body, &self.topic)?;

        if self.qos != QoS::AtMostOnce {
            match self.packet_id {
                Some(id) if id != 0 => put_u16(body, id),
                _ => return Err(EncodeError::ZeroPacketId(PacketType::Publish).into()),
            }
        }

        if version.is_v5() {
            properties::encode_block(&self.properties.to_properties(), body)?;
        } else if !self.properties.is_empty() {
            super::require_v5(version, "PUBLISH properties")?;
        }

        body.extend_from_slice(&self.payload);
        Ok(())
    }

    pub(crate) fn decode(flags: u8, version: ProtocolVersion, dec: &mut Decoder<'_>) -> Result<Self> {
        let dup = (flags & 0x08) != 0;
        let retain = (flags & 0x01) != 0;
        let qos_bits = (flags >> 1) & 0x03;
        let qos = QoS::try_from(qos_bits).map_err(|_| {
            ProtocolError::MalformedPacket("PUBLISH QoS bits must not both be set".into())
        })?;

        // MQTT-3.3.1-2: DUP must be 0 for QoS 0 messages
        if dup && qos == QoS::AtMostOnce && version != ProtocolVersion::V3_1 {
            return Err(ProtocolError::MalformedPacket(
                "DUP flag must be 0 for QoS 0 PUBLISH".into(),
            )
            .into());
        }

        let topic = dec.read_string()?;

        let packet_id = if qos != QoS::AtMostOnce {
            let id = dec.read_u16()?;
            if id == 0 {
                return Err(ProtocolError::MalformedPacket(
                    "PUBLISH with QoS > 0 needs a non-zero packet identifier".into(),
                )
                .into());
            }
            Some(id)
        } else {
            None
        };

        let properties = if version.is_v5() {
            PublishProperties::from_properties(properties::decode_block(dec)?)
        } else {
            PublishProperties::default()
        };

        let payload = Bytes::copy_from_slice(dec.read_rest());

        Ok(Publish {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            payload,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Codec, Packet};
    use crate::Error;

    #[test]
    fn test_qos0_layout() {
        let codec = Codec::new(ProtocolVersion::V3_1_1);
        let mut buf = Vec::new();
        let publish = Publish::new("a/b", &b"hi"[..], QoS::AtMostOnce, true);
        codec.encode(&Packet::Publish(publish), &mut buf).unwrap();
        assert_eq!(buf, vec![0x31, 0x07, 0, 3, b'a', b'/', b'b', b'h', b'i']);
    }

    #[test]
    fn test_qos1_needs_packet_id() {
        let codec = Codec::new(ProtocolVersion::V3_1_1);
        let mut buf = Vec::new();
        let publish = Publish::new("a", &b"x"[..], QoS::AtLeastOnce, false);
        assert!(matches!(
            codec.encode(&Packet::Publish(publish), &mut buf),
            Err(Error::Encode(EncodeError::ZeroPacketId(PacketType::Publish)))
        ));
    }

    #[test]
    fn test_wildcard_topic_rejected() {
        let codec = Codec::new(ProtocolVersion::V5);
        let mut buf = Vec::new();
        let publish = Publish::new("a/+", &b"x"[..], QoS::AtMostOnce, false);
        assert!(matches!(
            codec.encode(&Packet::Publish(publish), &mut buf),
            Err(Error::Encode(EncodeError::InvalidTopic(_)))
        ));
    }

    #[test]
    fn test_qos3_is_malformed() {
        let codec = Codec::new(ProtocolVersion::V3_1_1);
        assert!(matches!(
            codec.decode(&[0x36, 0x05, 0, 1, b't', 0, 1]),
            Err(Error::Protocol(ProtocolError::MalformedPacket(_)))
        ));
    }

    #[test]
    fn test_dup_on_qos0_is_malformed() {
        let codec = Codec::new(ProtocolVersion::V3_1_1);
        assert!(codec.decode(&[0x38, 0x03, 0, 1, b't']).is_err());
    }

    #[test]
    fn test_v5_properties_roundtrip() {
        let codec = Codec::new(ProtocolVersion::V5);
        let mut publish = Publish::new("reply", &b"{}"[..], QoS::ExactlyOnce, false);
        publish.packet_id = Some(77);
        publish.properties.response_topic = Some("req/1".into());
        publish.properties.correlation_data = Some(vec![1, 2, 3]);
        publish.properties.subscription_identifiers = vec![4, 9];

        let mut buf = Vec::new();
        codec.encode(&Packet::Publish(publish.clone()), &mut buf).unwrap();
        let (decoded, used) = codec.decode(&buf).unwrap().unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(decoded, Packet::Publish(publish));
    }
}
