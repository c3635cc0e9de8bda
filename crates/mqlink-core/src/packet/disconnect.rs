//! DISCONNECT.

use super::{Decoder, ProtocolVersion};
use crate::error::Result;
use crate::properties::{self, DisconnectProperties, PropertySet};

/// DISCONNECT packet data. 3.x carries neither field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disconnect {
    /// 0x00 = normal, 0x04 = with will
    pub reason_code: u8,
    pub properties: DisconnectProperties,
}

impl Disconnect {
    pub fn with_reason_code(reason_code: u8) -> Self {
        Self {
            reason_code,
            properties: DisconnectProperties::default(),
        }
    }

    pub(crate) fn encode_body(&self, version: ProtocolVersion, body: &mut Vec<u8>) -> Result<()> {
        let has_properties = !self.properties.is_empty();

        if !version.is_v5() {
            if self.reason_code != 0 || has_properties {
                super::require_v5(version, "DISCONNECT reason code")?;
            }
            return Ok(());
        }

        if self.reason_code == 0 && !has_properties {
            return Ok(());
        }

        body.push(self.reason_code);
        if has_properties {
            properties::encode_block(&self.properties.to_properties(), body)?;
        }
        Ok(())
    }

    pub(crate) fn decode(version: ProtocolVersion, dec: &mut Decoder<'_>) -> Result<Self> {
        let mut disconnect = Disconnect::default();
        if !version.is_v5() || dec.remaining() == 0 {
            return Ok(disconnect);
        }

        disconnect.reason_code = dec.read_u8()?;
        if dec.remaining() > 0 {
            disconnect.properties =
                DisconnectProperties::from_properties(properties::decode_block(dec)?);
        }
        Ok(disconnect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{reason_code, Codec, Packet};

    #[test]
    fn test_v5_reason_only() {
        let codec = Codec::new(ProtocolVersion::V5);
        let mut buf = Vec::new();
        let disconnect = Disconnect::with_reason_code(reason_code::DISCONNECT_WITH_WILL);
        codec.encode(&Packet::Disconnect(disconnect.clone()), &mut buf).unwrap();
        assert_eq!(buf, vec![0xE0, 0x01, 0x04]);
        let (decoded, _) = codec.decode(&buf).unwrap().unwrap();
        assert_eq!(decoded, Packet::Disconnect(disconnect));
    }

    #[test]
    fn test_v5_with_properties() {
        let codec = Codec::new(ProtocolVersion::V5);
        let mut disconnect = Disconnect::with_reason_code(reason_code::SERVER_SHUTTING_DOWN);
        disconnect.properties.reason_string = Some("maintenance".into());
        disconnect.properties.server_reference = Some("backup:1883".into());

        let mut buf = Vec::new();
        codec.encode(&Packet::Disconnect(disconnect.clone()), &mut buf).unwrap();
        let (decoded, _) = codec.decode(&buf).unwrap().unwrap();
        assert_eq!(decoded, Packet::Disconnect(disconnect));
    }

    #[test]
    fn test_reason_code_needs_v5() {
        let codec = Codec::new(ProtocolVersion::V3_1_1);
        let mut buf = Vec::new();
        let disconnect = Disconnect::with_reason_code(reason_code::DISCONNECT_WITH_WILL);
        assert!(codec.encode(&Packet::Disconnect(disconnect), &mut buf).is_err());
    }
}
