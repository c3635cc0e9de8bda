//! AUTH (MQTT 5.0 only).

use super::{Decoder, ProtocolVersion};
use crate::error::Result;
use crate::properties::{self, AuthProperties, PropertySet};

/// AUTH packet data for enhanced authentication exchanges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Auth {
    /// 0x00 success, 0x18 continue authentication, 0x19 re-authenticate
    pub reason_code: u8,
    pub properties: AuthProperties,
}

impl Auth {
    pub(crate) fn encode_body(&self, version: ProtocolVersion, body: &mut Vec<u8>) -> Result<()> {
        super::require_v5(version, "AUTH packet")?;

        // Success with no properties may omit the whole variable header
        if self.reason_code == 0 && self.properties.is_empty() {
            return Ok(());
        }

        body.push(self.reason_code);
        properties::encode_block(&self.properties.to_properties(), body)
    }

    pub(crate) fn decode(version: ProtocolVersion, dec: &mut Decoder<'_>) -> Result<Self> {
        super::require_v5(version, "AUTH packet")?;

        let mut auth = Auth::default();
        if dec.remaining() == 0 {
            return Ok(auth);
        }

        auth.reason_code = dec.read_u8()?;
        if dec.remaining() > 0 {
            auth.properties = AuthProperties::from_properties(properties::decode_block(dec)?);
        }
        Ok(auth)
    }
}
