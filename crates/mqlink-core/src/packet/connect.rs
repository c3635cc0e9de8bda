//! CONNECT and CONNACK.

use std::fmt;

use bytes::Bytes;

use super::writer::{put_binary, put_string, put_u16};
use super::{validate_topic_name, Decoder, ProtocolVersion, QoS};
use crate::error::{EncodeError, ProtocolError, Result};
use crate::properties::{self, ConnackProperties, ConnectProperties, PropertySet, WillProperties};

/// MQTT 3.1 caps client identifiers at 23 bytes.
const V31_MAX_CLIENT_ID_LEN: usize = 23;

/// CONNECT packet data.
///
/// The protocol name and level come from the codec's version when encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connect {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    /// MQTT v5 properties (empty for 3.x)
    pub properties: ConnectProperties,
}

/// Will message configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub message: Bytes,
    pub qos: QoS,
    pub retain: bool,
    /// MQTT v5 will properties (empty for 3.x)
    pub properties: WillProperties,
}

impl Will {
    pub fn new(topic: impl Into<String>, message: impl Into<Bytes>, qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            message: message.into(),
            qos,
            retain,
            properties: WillProperties::default(),
        }
    }
}

impl Connect {
    pub(crate) fn encode_body(&self, version: ProtocolVersion, body: &mut Vec<u8>) -> Result<()> {
        self.validate(version)?;

        put_string(body, version.protocol_name())?;
        body.push(version.level());

        let mut flags = 0u8;
        if self.clean_session {
            flags |= 0x02;
        }
        if let Some(ref will) = self.will {
            flags |= 0x04;
            flags |= (will.qos as u8) << 3;
            if will.retain {
                flags |= 0x20;
            }
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        body.push(flags);

        put_u16(body, self.keep_alive);

        if version.is_v5() {
            properties::encode_block(&self.properties.to_properties(), body)?;
        }

        put_string(body, &self.client_id)?;

        if let Some(ref will) = self.will {
            if version.is_v5() {
                properties::encode_block(&will.properties.to_properties(), body)?;
            }
            put_string(body, &will.topic)?;
            put_binary(body, &will.message)?;
        }

        if let Some(ref username) = self.username {
            put_string(body, username)?;
        }
        if let Some(ref password) = self.password {
            put_binary(body, password)?;
        }

        Ok(())
    }

    fn validate(&self, version: ProtocolVersion) -> Result<()> {
        if self.client_id.is_empty() && !self.clean_session {
            return Err(EncodeError::InvalidClientId(
                "an empty client identifier requires a clean session".into(),
            )
            .into());
        }

        if version == ProtocolVersion::V3_1
            && (self.client_id.is_empty() || self.client_id.len() > V31_MAX_CLIENT_ID_LEN)
        {
            return Err(EncodeError::InvalidClientId(format!(
                "MQTT 3.1 client identifier must be 1 to {} bytes, got {}",
                V31_MAX_CLIENT_ID_LEN,
                self.client_id.len()
            ))
            .into());
        }

        // MQTT-3.1.2-22: only 5.0 allows a password without a username
        if !version.is_v5() && self.password.is_some() && self.username.is_none() {
            return Err(EncodeError::InvalidCredentials(
                "password requires a username before MQTT 5.0".into(),
            )
            .into());
        }

        if let Some(ref will) = self.will {
            if validate_topic_name(&will.topic).is_err() {
                return Err(EncodeError::InvalidWill(format!(
                    "invalid will topic '{}'",
                    will.topic
                ))
                .into());
            }
            if !version.is_v5() && !will.properties.is_empty() {
                super::require_v5(version, "will properties")?;
            }
        }

        if !version.is_v5() && !self.properties.is_empty() {
            super::require_v5(version, "CONNECT properties")?;
        }

        Ok(())
    }

    /// Decode using the protocol level the packet itself declares.
    pub(crate) fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let protocol_name = dec.read_string()?;
        let level = dec.read_u8()?;
        let version = ProtocolVersion::try_from(level)?;
        if protocol_name != version.protocol_name() {
            return Err(ProtocolError::InvalidProtocolName(protocol_name).into());
        }

        let flags = dec.read_u8()?;
        let clean_session = (flags & 0x02) != 0;
        let will_flag = (flags & 0x04) != 0;
        let will_qos = QoS::try_from((flags >> 3) & 0x03)?;
        let will_retain = (flags & 0x20) != 0;
        let password_flag = (flags & 0x40) != 0;
        let username_flag = (flags & 0x80) != 0;

        // Reserved bit must be 0
        if (flags & 0x01) != 0 {
            return Err(ProtocolError::InvalidConnectFlags(flags).into());
        }

        // MQTT-3.1.2-11/13/15: will QoS and retain only with a will
        if !will_flag && (will_qos != QoS::AtMostOnce || will_retain) {
            return Err(ProtocolError::InvalidConnectFlags(flags).into());
        }

        if !version.is_v5() && !username_flag && password_flag {
            return Err(ProtocolError::InvalidConnectFlags(flags).into());
        }

        let keep_alive = dec.read_u16()?;

        let properties = if version.is_v5() {
            ConnectProperties::from_properties(properties::decode_block(dec)?)
        } else {
            ConnectProperties::default()
        };

        let client_id = dec.read_string()?;

        let will = if will_flag {
            let will_properties = if version.is_v5() {
                WillProperties::from_properties(properties::decode_block(dec)?)
            } else {
                WillProperties::default()
            };
            let topic = dec.read_string()?;
            let message = Bytes::from(dec.read_binary()?);
            Some(Will {
                topic,
                message,
                qos: will_qos,
                retain: will_retain,
                properties: will_properties,
            })
        } else {
            None
        };

        let username = if username_flag {
            Some(dec.read_string()?)
        } else {
            None
        };

        let password = if password_flag {
            Some(dec.read_binary()?)
        } else {
            None
        };

        Ok(Connect {
            clean_session,
            keep_alive,
            client_id,
            will,
            username,
            password,
            properties,
        })
    }
}

/// CONNACK return code, or reason code on MQTT 5.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectReturnCode(pub u8);

impl ConnectReturnCode {
    pub const ACCEPTED: Self = Self(0x00);
    pub const UNACCEPTABLE_PROTOCOL_VERSION: Self = Self(0x01);
    pub const IDENTIFIER_REJECTED: Self = Self(0x02);
    pub const SERVER_UNAVAILABLE: Self = Self(0x03);
    pub const BAD_USERNAME_PASSWORD: Self = Self(0x04);
    pub const NOT_AUTHORIZED: Self = Self(0x05);

    pub fn is_accepted(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self.0 {
            0x00 => "accepted",
            0x01 => "unacceptable protocol version",
            0x02 => "identifier rejected",
            0x03 => "server unavailable",
            0x04 => "bad user name or password",
            0x05 => "not authorized",
            _ => return write!(f, "refused ({:#04x})", self.0),
        };
        f.write_str(text)
    }
}

/// CONNACK packet data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connack {
    /// Always false on MQTT 3.1, which has no session present flag.
    pub session_present: bool,
    pub reason_code: u8,
    /// MQTT v5 properties
    pub properties: ConnackProperties,
}

impl Connack {
    pub fn return_code(&self) -> ConnectReturnCode {
        ConnectReturnCode(self.reason_code)
    }

    pub(crate) fn encode_body(&self, version: ProtocolVersion, body: &mut Vec<u8>) -> Result<()> {
        let flags = if self.session_present && version != ProtocolVersion::V3_1 {
            0x01
        } else {
            0x00
        };
        body.push(flags);
        body.push(self.reason_code);

        if version.is_v5() {
            properties::encode_block(&self.properties.to_properties(), body)?;
        } else if !self.properties.is_empty() {
            super::require_v5(version, "CONNACK properties")?;
        }
        Ok(())
    }

    pub(crate) fn decode(version: ProtocolVersion, dec: &mut Decoder<'_>) -> Result<Self> {
        let flags = dec.read_u8()?;
        let reason_code = dec.read_u8()?;

        let session_present = match version {
            ProtocolVersion::V3_1 => false,
            _ => {
                // MQTT-3.2.2-1: bits 7-1 are reserved
                if (flags & 0xFE) != 0 {
                    return Err(ProtocolError::MalformedPacket(format!(
                        "CONNACK reserved flags set: {:#04x}",
                        flags
                    ))
                    .into());
                }
                (flags & 0x01) != 0
            }
        };

        let properties = if version.is_v5() && dec.remaining() > 0 {
            ConnackProperties::from_properties(properties::decode_block(dec)?)
        } else {
            ConnackProperties::default()
        };

        Ok(Connack {
            session_present,
            reason_code,
            properties,
        })
    }
}
