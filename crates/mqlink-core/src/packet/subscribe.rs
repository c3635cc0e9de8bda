//! SUBSCRIBE and SUBACK.

use super::writer::{put_string, put_u16};
use super::{validate_topic_filter, Decoder, PacketType, ProtocolVersion, QoS};
use crate::error::{EncodeError, ProtocolError, Result};
use crate::properties::{self, AckProperties, PropertySet, SubscribeProperties};

/// Per-filter subscription options. Anything beyond `qos` is MQTT 5.0 only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionOptions {
    pub qos: QoS,
    pub no_local: bool,
    pub retain_as_published: bool,
    pub retain_handling: u8,
}

impl SubscriptionOptions {
    pub fn new(qos: QoS) -> Self {
        Self {
            qos,
            ..Default::default()
        }
    }

    /// Parse from SUBSCRIBE options byte.
    pub fn from_byte(byte: u8, version: ProtocolVersion) -> Result<Self> {
        let reserved = if version.is_v5() { 0xC0 } else { 0xFC };
        if (byte & reserved) != 0 {
            return Err(ProtocolError::MalformedPacket(format!(
                "reserved subscription option bits set: {:#04x}",
                byte
            ))
            .into());
        }

        let qos = QoS::try_from(byte & 0x03)?;
        let no_local = (byte & 0x04) != 0;
        let retain_as_published = (byte & 0x08) != 0;
        let retain_handling = (byte >> 4) & 0x03;
        if retain_handling == 3 {
            return Err(ProtocolError::MalformedPacket("retain handling 3 is reserved".into()).into());
        }

        Ok(Self {
            qos,
            no_local,
            retain_as_published,
            retain_handling,
        })
    }

    pub fn to_byte(self) -> u8 {
        (self.qos as u8)
            | if self.no_local { 0x04 } else { 0 }
            | if self.retain_as_published { 0x08 } else { 0 }
            | ((self.retain_handling & 0x03) << 4)
    }

    fn has_v5_options(self) -> bool {
        self.no_local || self.retain_as_published || self.retain_handling != 0
    }
}

/// SUBSCRIBE packet data. `filters` and `options` are parallel arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    /// Retransmission marker, written on MQTT 3.1 only.
    pub dup: bool,
    pub filters: Vec<String>,
    pub options: Vec<SubscriptionOptions>,
    /// MQTT v5 properties
    pub properties: SubscribeProperties,
}

impl Subscribe {
    pub fn new(packet_id: u16, filters: Vec<String>, qos_levels: &[QoS]) -> Self {
        Self {
            packet_id,
            dup: false,
            filters,
            options: qos_levels.iter().map(|q| SubscriptionOptions::new(*q)).collect(),
            properties: SubscribeProperties::default(),
        }
    }

    pub(crate) fn encode_body(&self, version: ProtocolVersion, body: &mut Vec<u8>) -> Result<()> {
        if self.packet_id == 0 {
            return Err(EncodeError::ZeroPacketId(PacketType::Subscribe).into());
        }
        if self.filters.is_empty() {
            return Err(EncodeError::EmptyTopicList.into());
        }
        if self.filters.len() != self.options.len() {
            return Err(EncodeError::TopicQosMismatch {
                topics: self.filters.len(),
                qos_levels: self.options.len(),
            }
            .into());
        }
        for filter in &self.filters {
            validate_topic_filter(filter)?;
        }

        put_u16(body, self.packet_id);

        if version.is_v5() {
            properties::encode_block(&self.properties.to_properties(), body)?;
        } else {
            if !self.properties.is_empty() {
                super::require_v5(version, "SUBSCRIBE properties")?;
            }
            if self.options.iter().any(|o| o.has_v5_options()) {
                super::require_v5(version, "subscription options")?;
            }
        }

        for (filter, options) in self.filters.iter().zip(&self.options) {
            put_string(body, filter)?;
            body.push(options.to_byte());
        }
        Ok(())
    }

    pub(crate) fn decode(flags: u8, version: ProtocolVersion, dec: &mut Decoder<'_>) -> Result<Self> {
        let dup = version == ProtocolVersion::V3_1 && (flags & 0x08) != 0;
        let packet_id = dec.read_u16()?;

        let properties = if version.is_v5() {
            SubscribeProperties::from_properties(properties::decode_block(dec)?)
        } else {
            SubscribeProperties::default()
        };

        // Repeating group with no count: read until the body is used up
        let mut filters = Vec::new();
        let mut options = Vec::new();
        while dec.remaining() > 0 {
            let filter = dec.read_string()?;
            if filter.is_empty() {
                return Err(ProtocolError::MalformedPacket(
                    "Topic filter must be at least 1 character".into(),
                )
                .into());
            }
            filters.push(filter);
            options.push(SubscriptionOptions::from_byte(dec.read_u8()?, version)?);
        }

        if filters.is_empty() {
            return Err(ProtocolError::MalformedPacket("SUBSCRIBE with no topics".into()).into());
        }

        Ok(Subscribe {
            packet_id,
            dup,
            filters,
            options,
            properties,
        })
    }
}

/// SUBACK packet data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Suback {
    pub packet_id: u16,
    /// Granted QoS per filter, or a failure code (0x80 and above).
    pub return_codes: Vec<u8>,
    /// MQTT v5 properties
    pub properties: AckProperties,
}

impl Suback {
    pub(crate) fn encode_body(&self, version: ProtocolVersion, body: &mut Vec<u8>) -> Result<()> {
        if self.packet_id == 0 {
            return Err(EncodeError::ZeroPacketId(PacketType::Suback).into());
        }
        put_u16(body, self.packet_id);

        if version.is_v5() {
            properties::encode_block(&self.properties.to_properties(), body)?;
        } else if !self.properties.is_empty() {
            super::require_v5(version, "SUBACK properties")?;
        }

        body.extend_from_slice(&self.return_codes);
        Ok(())
    }

    pub(crate) fn decode(version: ProtocolVersion, dec: &mut Decoder<'_>) -> Result<Self> {
        let packet_id = dec.read_u16()?;

        let properties = if version.is_v5() {
            AckProperties::from_properties(properties::decode_block(dec)?)
        } else {
            AckProperties::default()
        };

        Ok(Suback {
            packet_id,
            return_codes: dec.read_rest().to_vec(),
            properties,
        })
    }
}
