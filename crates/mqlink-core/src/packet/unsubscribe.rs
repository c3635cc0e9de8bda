//! UNSUBSCRIBE and UNSUBACK.

use super::writer::{put_string, put_u16};
use super::{validate_topic_filter, Decoder, PacketType, ProtocolVersion};
use crate::error::{EncodeError, ProtocolError, Result};
use crate::properties::{self, AckProperties, PropertySet, UnsubscribeProperties};

/// UNSUBSCRIBE packet data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    /// Retransmission marker, written on MQTT 3.1 only.
    pub dup: bool,
    pub filters: Vec<String>,
    /// MQTT v5 properties
    pub properties: UnsubscribeProperties,
}

impl Unsubscribe {
    pub fn new(packet_id: u16, filters: Vec<String>) -> Self {
        Self {
            packet_id,
            filters,
            ..Default::default()
        }
    }

    pub(crate) fn encode_body(&self, version: ProtocolVersion, body: &mut Vec<u8>) -> Result<()> {
        if self.packet_id == 0 {
            return Err(EncodeError::ZeroPacketId(PacketType::Unsubscribe).into());
        }
        if self.filters.is_empty() {
            return Err(EncodeError::EmptyTopicList.into());
        }
        for filter in &self.filters {
            validate_topic_filter(filter)?;
        }

        put_u16(body, self.packet_id);

        if version.is_v5() {
            properties::encode_block(&self.properties.to_properties(), body)?;
        } else if !self.properties.is_empty() {
            super::require_v5(version, "UNSUBSCRIBE properties")?;
        }

        for filter in &self.filters {
            put_string(body, filter)?;
        }
        Ok(())
    }

    pub(crate) fn decode(flags: u8, version: ProtocolVersion, dec: &mut Decoder<'_>) -> Result<Self> {
        let dup = version == ProtocolVersion::V3_1 && (flags & 0x08) != 0;
        let packet_id = dec.read_u16()?;

        let properties = if version.is_v5() {
            UnsubscribeProperties::from_properties(properties::decode_block(dec)?)
        } else {
            UnsubscribeProperties::default()
        };

        let mut filters = Vec::new();
        while dec.remaining() > 0 {
            let filter = dec.read_string()?;
            if filter.is_empty() {
                return Err(ProtocolError::MalformedPacket(
                    "Topic filter must be at least 1 character".into(),
                )
                .into());
            }
            filters.push(filter);
        }

        if filters.is_empty() {
            return Err(ProtocolError::MalformedPacket("UNSUBSCRIBE with no topics".into()).into());
        }

        Ok(Unsubscribe {
            packet_id,
            dup,
            filters,
            properties,
        })
    }
}

/// UNSUBACK packet data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unsuback {
    pub packet_id: u16,
    /// Reason codes (one per topic filter) - v5 only, 3.x has no payload
    pub reason_codes: Vec<u8>,
    /// MQTT v5 properties
    pub properties: AckProperties,
}

impl Unsuback {
    pub(crate) fn encode_body(&self, version: ProtocolVersion, body: &mut Vec<u8>) -> Result<()> {
        if self.packet_id == 0 {
            return Err(EncodeError::ZeroPacketId(PacketType::Unsuback).into());
        }
        put_u16(body, self.packet_id);

        if version.is_v5() {
            properties::encode_block(&self.properties.to_properties(), body)?;
            body.extend_from_slice(&self.reason_codes);
        } else if !self.properties.is_empty() || !self.reason_codes.is_empty() {
            super::require_v5(version, "UNSUBACK reason codes and properties")?;
        }
        Ok(())
    }

    pub(crate) fn decode(version: ProtocolVersion, dec: &mut Decoder<'_>) -> Result<Self> {
        let packet_id = dec.read_u16()?;

        let mut unsuback = Unsuback {
            packet_id,
            ..Default::default()
        };
        if version.is_v5() {
            unsuback.properties = AckProperties::from_properties(properties::decode_block(dec)?);
            unsuback.reason_codes = dec.read_rest().to_vec();
        }
        Ok(unsuback)
    }
}
