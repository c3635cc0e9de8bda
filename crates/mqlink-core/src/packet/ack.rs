//! PUBACK, PUBREC, PUBREL and PUBCOMP.

use super::writer::put_u16;
use super::{Decoder, PacketType, ProtocolVersion};
use crate::error::{EncodeError, Result};
use crate::properties::{self, AckProperties, PropertySet};

/// Body shared by the four publish acknowledgments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack {
    pub packet_id: u16,
    /// MQTT 5.0 only; must stay 0 on older versions.
    pub reason_code: u8,
    pub properties: AckProperties,
    /// Retransmission marker, written for PUBREL on MQTT 3.1 only.
    pub dup: bool,
}

impl Ack {
    pub fn new(packet_id: u16) -> Self {
        Self {
            packet_id,
            ..Default::default()
        }
    }

    pub fn with_reason_code(packet_id: u16, reason_code: u8) -> Self {
        Self {
            packet_id,
            reason_code,
            ..Default::default()
        }
    }

    pub(crate) fn encode_body(
        &self,
        packet_type: PacketType,
        version: ProtocolVersion,
        body: &mut Vec<u8>,
    ) -> Result<()> {
        if self.packet_id == 0 {
            return Err(EncodeError::ZeroPacketId(packet_type).into());
        }
        put_u16(body, self.packet_id);

        if version.is_v5() {
            body.push(self.reason_code);
            properties::encode_block(&self.properties.to_properties(), body)?;
        } else {
            if self.reason_code != 0 {
                super::require_v5(version, "acknowledgment reason code")?;
            }
            if !self.properties.is_empty() {
                super::require_v5(version, "acknowledgment properties")?;
            }
        }
        Ok(())
    }

    pub(crate) fn decode(flags: u8, version: ProtocolVersion, dec: &mut Decoder<'_>) -> Result<Self> {
        let packet_id = dec.read_u16()?;
        let dup = version == ProtocolVersion::V3_1 && (flags & 0x08) != 0;

        let mut ack = Ack {
            packet_id,
            dup,
            ..Default::default()
        };

        // Remaining length 2 means success with no properties
        if version.is_v5() && dec.remaining() > 0 {
            ack.reason_code = dec.read_u8()?;
            if dec.remaining() > 0 {
                ack.properties = AckProperties::from_properties(properties::decode_block(dec)?);
            }
        }

        Ok(ack)
    }
}
