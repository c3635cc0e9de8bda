//! MQTT 5.0 property codec.
//!
//! A property block is a variable byte integer length followed by a sequence
//! of `identifier, value` entries. [`Property`] is the wire-level view of one
//! entry; the typed structs below are the per-packet views the packet codec
//! exposes, converted through [`PropertySet`].

use crate::error::{ProtocolError, Result};
use crate::packet::writer::{put_binary, put_string, put_u16, put_u32};
use crate::packet::Decoder;
use crate::varint;

/// Ordered user properties. Duplicate names are allowed.
pub type UserProperties = Vec<(String, String)>;

/// Property identifiers.
pub mod id {
    pub const PAYLOAD_FORMAT_INDICATOR: u8 = 0x01;
    pub const MESSAGE_EXPIRY_INTERVAL: u8 = 0x02;
    pub const CONTENT_TYPE: u8 = 0x03;
    pub const RESPONSE_TOPIC: u8 = 0x08;
    pub const CORRELATION_DATA: u8 = 0x09;
    pub const SUBSCRIPTION_IDENTIFIER: u8 = 0x0B;
    pub const SESSION_EXPIRY_INTERVAL: u8 = 0x11;
    pub const ASSIGNED_CLIENT_IDENTIFIER: u8 = 0x12;
    pub const SERVER_KEEP_ALIVE: u8 = 0x13;
    pub const AUTHENTICATION_METHOD: u8 = 0x15;
    pub const AUTHENTICATION_DATA: u8 = 0x16;
    pub const REQUEST_PROBLEM_INFORMATION: u8 = 0x17;
    pub const WILL_DELAY_INTERVAL: u8 = 0x18;
    pub const REQUEST_RESPONSE_INFORMATION: u8 = 0x19;
    pub const RESPONSE_INFORMATION: u8 = 0x1A;
    pub const SERVER_REFERENCE: u8 = 0x1C;
    pub const REASON_STRING: u8 = 0x1F;
    pub const RECEIVE_MAXIMUM: u8 = 0x21;
    pub const TOPIC_ALIAS_MAXIMUM: u8 = 0x22;
    pub const TOPIC_ALIAS: u8 = 0x23;
    pub const MAXIMUM_QOS: u8 = 0x24;
    pub const RETAIN_AVAILABLE: u8 = 0x25;
    pub const USER_PROPERTY: u8 = 0x26;
    pub const MAXIMUM_PACKET_SIZE: u8 = 0x27;
    pub const WILDCARD_SUBSCRIPTION_AVAILABLE: u8 = 0x28;
    pub const SUBSCRIPTION_IDENTIFIER_AVAILABLE: u8 = 0x29;
    pub const SHARED_SUBSCRIPTION_AVAILABLE: u8 = 0x2A;
}

/// One property entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    PayloadFormatIndicator(u8),
    MessageExpiryInterval(u32),
    ContentType(String),
    ResponseTopic(String),
    CorrelationData(Vec<u8>),
    SubscriptionIdentifier(u32),
    SessionExpiryInterval(u32),
    AssignedClientIdentifier(String),
    ServerKeepAlive(u16),
    AuthenticationMethod(String),
    AuthenticationData(Vec<u8>),
    RequestProblemInformation(u8),
    WillDelayInterval(u32),
    RequestResponseInformation(u8),
    ResponseInformation(String),
    ServerReference(String),
    ReasonString(String),
    ReceiveMaximum(u16),
    TopicAliasMaximum(u16),
    TopicAlias(u16),
    MaximumQos(u8),
    RetainAvailable(u8),
    UserProperty(String, String),
    MaximumPacketSize(u32),
    WildcardSubscriptionAvailable(u8),
    SubscriptionIdentifierAvailable(u8),
    SharedSubscriptionAvailable(u8),
}

impl Property {
    pub fn id(&self) -> u8 {
        match self {
            Property::PayloadFormatIndicator(_) => id::PAYLOAD_FORMAT_INDICATOR,
            Property::MessageExpiryInterval(_) => id::MESSAGE_EXPIRY_INTERVAL,
            Property::ContentType(_) => id::CONTENT_TYPE,
            Property::ResponseTopic(_) => id::RESPONSE_TOPIC,
            Property::CorrelationData(_) => id::CORRELATION_DATA,
            Property::SubscriptionIdentifier(_) => id::SUBSCRIPTION_IDENTIFIER,
            Property::SessionExpiryInterval(_) => id::SESSION_EXPIRY_INTERVAL,
            Property::AssignedClientIdentifier(_) => id::ASSIGNED_CLIENT_IDENTIFIER,
            Property::ServerKeepAlive(_) => id::SERVER_KEEP_ALIVE,
            Property::AuthenticationMethod(_) => id::AUTHENTICATION_METHOD,
            Property::AuthenticationData(_) => id::AUTHENTICATION_DATA,
            Property::RequestProblemInformation(_) => id::REQUEST_PROBLEM_INFORMATION,
            Property::WillDelayInterval(_) => id::WILL_DELAY_INTERVAL,
            Property::RequestResponseInformation(_) => id::REQUEST_RESPONSE_INFORMATION,
            Property::ResponseInformation(_) => id::RESPONSE_INFORMATION,
            Property::ServerReference(_) => id::SERVER_REFERENCE,
            Property::ReasonString(_) => id::REASON_STRING,
            Property::ReceiveMaximum(_) => id::RECEIVE_MAXIMUM,
            Property::TopicAliasMaximum(_) => id::TOPIC_ALIAS_MAXIMUM,
            Property::TopicAlias(_) => id::TOPIC_ALIAS,
            Property::MaximumQos(_) => id::MAXIMUM_QOS,
            Property::RetainAvailable(_) => id::RETAIN_AVAILABLE,
            Property::UserProperty(..) => id::USER_PROPERTY,
            Property::MaximumPacketSize(_) => id::MAXIMUM_PACKET_SIZE,
            Property::WildcardSubscriptionAvailable(_) => id::WILDCARD_SUBSCRIPTION_AVAILABLE,
            Property::SubscriptionIdentifierAvailable(_) => id::SUBSCRIPTION_IDENTIFIER_AVAILABLE,
            Property::SharedSubscriptionAvailable(_) => id::SHARED_SUBSCRIPTION_AVAILABLE,
        }
    }

    /// Bytes this entry occupies on the wire, identifier included.
    pub fn encoded_len(&self) -> usize {
        let value_len = match self {
            Property::PayloadFormatIndicator(_)
            | Property::RequestProblemInformation(_)
            | Property::RequestResponseInformation(_)
            | Property::MaximumQos(_)
            | Property::RetainAvailable(_)
            | Property::WildcardSubscriptionAvailable(_)
            | Property::SubscriptionIdentifierAvailable(_)
            | Property::SharedSubscriptionAvailable(_) => 1,
            Property::ServerKeepAlive(_)
            | Property::ReceiveMaximum(_)
            | Property::TopicAliasMaximum(_)
            | Property::TopicAlias(_) => 2,
            Property::MessageExpiryInterval(_)
            | Property::SessionExpiryInterval(_)
            | Property::WillDelayInterval(_)
            | Property::MaximumPacketSize(_) => 4,
            Property::SubscriptionIdentifier(v) => varint::encoded_len(*v),
            Property::ContentType(s)
            | Property::ResponseTopic(s)
            | Property::AssignedClientIdentifier(s)
            | Property::AuthenticationMethod(s)
            | Property::ResponseInformation(s)
            | Property::ServerReference(s)
            | Property::ReasonString(s) => 2 + s.len(),
            Property::CorrelationData(b) | Property::AuthenticationData(b) => 2 + b.len(),
            Property::UserProperty(k, v) => 4 + k.len() + v.len(),
        };
        1 + value_len
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.push(self.id());
        match self {
            Property::PayloadFormatIndicator(v)
            | Property::RequestProblemInformation(v)
            | Property::RequestResponseInformation(v)
            | Property::MaximumQos(v)
            | Property::RetainAvailable(v)
            | Property::WildcardSubscriptionAvailable(v)
            | Property::SubscriptionIdentifierAvailable(v)
            | Property::SharedSubscriptionAvailable(v) => buf.push(*v),
            Property::ServerKeepAlive(v)
            | Property::ReceiveMaximum(v)
            | Property::TopicAliasMaximum(v)
            | Property::TopicAlias(v) => put_u16(buf, *v),
            Property::MessageExpiryInterval(v)
            | Property::SessionExpiryInterval(v)
            | Property::WillDelayInterval(v)
            | Property::MaximumPacketSize(v) => put_u32(buf, *v),
            Property::SubscriptionIdentifier(v) => {
                varint::encode_checked(*v as usize, buf)?;
            }
            Property::ContentType(s)
            | Property::ResponseTopic(s)
            | Property::AssignedClientIdentifier(s)
            | Property::AuthenticationMethod(s)
            | Property::ResponseInformation(s)
            | Property::ServerReference(s)
            | Property::ReasonString(s) => put_string(buf, s)?,
            Property::CorrelationData(b) | Property::AuthenticationData(b) => put_binary(buf, b)?,
            Property::UserProperty(k, v) => {
                put_string(buf, k)?;
                put_string(buf, v)?;
            }
        }
        Ok(())
    }

    /// Decode the value for `prop_id`. `None` means the identifier is unknown.
    fn decode(prop_id: u8, dec: &mut Decoder<'_>) -> Result<Option<Property>> {
        let prop = match prop_id {
            id::PAYLOAD_FORMAT_INDICATOR => Property::PayloadFormatIndicator(dec.read_u8()?),
            id::MESSAGE_EXPIRY_INTERVAL => Property::MessageExpiryInterval(dec.read_u32()?),
            id::CONTENT_TYPE => Property::ContentType(dec.read_string()?),
            id::RESPONSE_TOPIC => Property::ResponseTopic(dec.read_string()?),
            id::CORRELATION_DATA => Property::CorrelationData(dec.read_binary()?),
            id::SUBSCRIPTION_IDENTIFIER => {
                Property::SubscriptionIdentifier(dec.read_variable_byte_integer()?)
            }
            id::SESSION_EXPIRY_INTERVAL => Property::SessionExpiryInterval(dec.read_u32()?),
            id::ASSIGNED_CLIENT_IDENTIFIER => {
                Property::AssignedClientIdentifier(dec.read_string()?)
            }
            id::SERVER_KEEP_ALIVE => Property::ServerKeepAlive(dec.read_u16()?),
            id::AUTHENTICATION_METHOD => Property::AuthenticationMethod(dec.read_string()?),
            id::AUTHENTICATION_DATA => Property::AuthenticationData(dec.read_binary()?),
            id::REQUEST_PROBLEM_INFORMATION => {
                Property::RequestProblemInformation(dec.read_u8()?)
            }
            id::WILL_DELAY_INTERVAL => Property::WillDelayInterval(dec.read_u32()?),
            id::REQUEST_RESPONSE_INFORMATION => {
                Property::RequestResponseInformation(dec.read_u8()?)
            }
            id::RESPONSE_INFORMATION => Property::ResponseInformation(dec.read_string()?),
            id::SERVER_REFERENCE => Property::ServerReference(dec.read_string()?),
            id::REASON_STRING => Property::ReasonString(dec.read_string()?),
            id::RECEIVE_MAXIMUM => Property::ReceiveMaximum(dec.read_u16()?),
            id::TOPIC_ALIAS_MAXIMUM => Property::TopicAliasMaximum(dec.read_u16()?),
            id::TOPIC_ALIAS => Property::TopicAlias(dec.read_u16()?),
            id::MAXIMUM_QOS => Property::MaximumQos(dec.read_u8()?),
            id::RETAIN_AVAILABLE => Property::RetainAvailable(dec.read_u8()?),
            id::USER_PROPERTY => {
                let key = dec.read_string()?;
                let value = dec.read_string()?;
                Property::UserProperty(key, value)
            }
            id::MAXIMUM_PACKET_SIZE => Property::MaximumPacketSize(dec.read_u32()?),
            id::WILDCARD_SUBSCRIPTION_AVAILABLE => {
                Property::WildcardSubscriptionAvailable(dec.read_u8()?)
            }
            id::SUBSCRIPTION_IDENTIFIER_AVAILABLE => {
                Property::SubscriptionIdentifierAvailable(dec.read_u8()?)
            }
            id::SHARED_SUBSCRIPTION_AVAILABLE => {
                Property::SharedSubscriptionAvailable(dec.read_u8()?)
            }
            _ => return Ok(None),
        };
        Ok(Some(prop))
    }
}

/// Size of the entries of a block, without its length prefix.
pub fn content_len(props: &[Property]) -> usize {
    props.iter().map(Property::encoded_len).sum()
}

/// Size of a block on the wire, length prefix included.
pub fn block_len(props: &[Property]) -> usize {
    let len = content_len(props);
    varint::encoded_len(len as u32) + len
}

/// Write a property block: length prefix followed by every entry in order.
pub fn encode_block(props: &[Property], buf: &mut Vec<u8>) -> Result<()> {
    varint::encode_checked(content_len(props), buf)?;
    for prop in props {
        prop.encode(buf)?;
    }
    Ok(())
}

/// Read a property block.
///
/// An unknown identifier ends the walk: the cursor jumps to the end of the
/// block and the properties read so far are returned.
pub fn decode_block(dec: &mut Decoder<'_>) -> Result<Vec<Property>> {
    let len = dec.read_variable_byte_integer()? as usize;
    if len > dec.remaining() {
        return Err(ProtocolError::MalformedPacket(format!(
            "property length {} exceeds remaining {} bytes",
            len,
            dec.remaining()
        ))
        .into());
    }

    let end = dec.position() + len;
    let mut props = Vec::new();
    let mut block = Decoder::new(dec.read_bytes(len)?);

    while block.remaining() > 0 {
        let prop_id = block.read_u8()?;
        match Property::decode(prop_id, &mut block)? {
            Some(prop) => props.push(prop),
            None => break,
        }
    }

    dec.seek(end);
    Ok(props)
}

/// Typed view of the properties one packet type carries.
pub trait PropertySet: Default {
    /// Wire entries in a fixed order, user properties last.
    fn to_properties(&self) -> Vec<Property>;

    /// Build from decoded entries. Entries that do not belong to this packet
    /// type are ignored.
    fn from_properties(props: Vec<Property>) -> Self;

    fn is_empty(&self) -> bool {
        self.to_properties().is_empty()
    }
}

fn push_user_properties(out: &mut Vec<Property>, user_properties: &UserProperties) {
    out.extend(
        user_properties
            .iter()
            .map(|(k, v)| Property::UserProperty(k.clone(), v.clone())),
    );
}

fn bool_byte(v: bool) -> u8 {
    if v {
        1
    } else {
        0
    }
}

/// CONNECT properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectProperties {
    pub session_expiry_interval: Option<u32>,
    pub receive_maximum: Option<u16>,
    pub maximum_packet_size: Option<u32>,
    pub topic_alias_maximum: Option<u16>,
    pub request_response_information: Option<bool>,
    pub request_problem_information: Option<bool>,
    pub authentication_method: Option<String>,
    pub authentication_data: Option<Vec<u8>>,
    pub user_properties: UserProperties,
}

impl PropertySet for ConnectProperties {
    fn to_properties(&self) -> Vec<Property> {
        let mut out = Vec::new();
        if let Some(v) = self.session_expiry_interval {
            out.push(Property::SessionExpiryInterval(v));
        }
        if let Some(v) = self.receive_maximum {
            out.push(Property::ReceiveMaximum(v));
        }
        if let Some(v) = self.maximum_packet_size {
            out.push(Property::MaximumPacketSize(v));
        }
        if let Some(v) = self.topic_alias_maximum {
            out.push(Property::TopicAliasMaximum(v));
        }
        if let Some(v) = self.request_response_information {
            out.push(Property::RequestResponseInformation(bool_byte(v)));
        }
        if let Some(v) = self.request_problem_information {
            out.push(Property::RequestProblemInformation(bool_byte(v)));
        }
        if let Some(ref v) = self.authentication_method {
            out.push(Property::AuthenticationMethod(v.clone()));
        }
        if let Some(ref v) = self.authentication_data {
            out.push(Property::AuthenticationData(v.clone()));
        }
        push_user_properties(&mut out, &self.user_properties);
        out
    }

    fn from_properties(props: Vec<Property>) -> Self {
        let mut out = Self::default();
        for prop in props {
            match prop {
                Property::SessionExpiryInterval(v) => out.session_expiry_interval = Some(v),
                Property::ReceiveMaximum(v) => out.receive_maximum = Some(v),
                Property::MaximumPacketSize(v) => out.maximum_packet_size = Some(v),
                Property::TopicAliasMaximum(v) => out.topic_alias_maximum = Some(v),
                Property::RequestResponseInformation(v) => {
                    out.request_response_information = Some(v != 0)
                }
                Property::RequestProblemInformation(v) => {
                    out.request_problem_information = Some(v != 0)
                }
                Property::AuthenticationMethod(v) => out.authentication_method = Some(v),
                Property::AuthenticationData(v) => out.authentication_data = Some(v),
                Property::UserProperty(k, v) => out.user_properties.push((k, v)),
                _ => {}
            }
        }
        out
    }
}

/// Will properties (CONNECT payload).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WillProperties {
    pub will_delay_interval: Option<u32>,
    pub payload_format_indicator: Option<u8>,
    pub message_expiry_interval: Option<u32>,
    pub content_type: Option<String>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Vec<u8>>,
    pub user_properties: UserProperties,
}

impl PropertySet for WillProperties {
    fn to_properties(&self) -> Vec<Property> {
        let mut out = Vec::new();
        if let Some(v) = self.will_delay_interval {
            out.push(Property::WillDelayInterval(v));
        }
        if let Some(v) = self.payload_format_indicator {
            out.push(Property::PayloadFormatIndicator(v));
        }
        if let Some(v) = self.message_expiry_interval {
            out.push(Property::MessageExpiryInterval(v));
        }
        if let Some(ref v) = self.content_type {
            out.push(Property::ContentType(v.clone()));
        }
        if let Some(ref v) = self.response_topic {
            out.push(Property::ResponseTopic(v.clone()));
        }
        if let Some(ref v) = self.correlation_data {
            out.push(Property::CorrelationData(v.clone()));
        }
        push_user_properties(&mut out, &self.user_properties);
        out
    }

    fn from_properties(props: Vec<Property>) -> Self {
        let mut out = Self::default();
        for prop in props {
            match prop {
                Property::WillDelayInterval(v) => out.will_delay_interval = Some(v),
                Property::PayloadFormatIndicator(v) => out.payload_format_indicator = Some(v),
                Property::MessageExpiryInterval(v) => out.message_expiry_interval = Some(v),
                Property::ContentType(v) => out.content_type = Some(v),
                Property::ResponseTopic(v) => out.response_topic = Some(v),
                Property::CorrelationData(v) => out.correlation_data = Some(v),
                Property::UserProperty(k, v) => out.user_properties.push((k, v)),
                _ => {}
            }
        }
        out
    }
}

/// CONNACK properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnackProperties {
    pub session_expiry_interval: Option<u32>,
    pub receive_maximum: Option<u16>,
    pub maximum_qos: Option<u8>,
    pub retain_available: Option<bool>,
    pub maximum_packet_size: Option<u32>,
    pub assigned_client_identifier: Option<String>,
    pub topic_alias_maximum: Option<u16>,
    pub reason_string: Option<String>,
    pub wildcard_subscription_available: Option<bool>,
    pub subscription_identifiers_available: Option<bool>,
    pub shared_subscription_available: Option<bool>,
    pub server_keep_alive: Option<u16>,
    pub response_information: Option<String>,
    pub server_reference: Option<String>,
    pub authentication_method: Option<String>,
    pub authentication_data: Option<Vec<u8>>,
    pub user_properties: UserProperties,
}

impl PropertySet for ConnackProperties {
    fn to_properties(&self) -> Vec<Property> {
        let mut out = Vec::new();
        if let Some(v) = self.session_expiry_interval {
            out.push(Property::SessionExpiryInterval(v));
        }
        if let Some(v) = self.receive_maximum {
            out.push(Property::ReceiveMaximum(v));
        }
        if let Some(v) = self.maximum_qos {
            out.push(Property::MaximumQos(v));
        }
        if let Some(v) = self.retain_available {
            out.push(Property::RetainAvailable(bool_byte(v)));
        }
        if let Some(v) = self.maximum_packet_size {
            out.push(Property::MaximumPacketSize(v));
        }
        if let Some(ref v) = self.assigned_client_identifier {
            out.push(Property::AssignedClientIdentifier(v.clone()));
        }
        if let Some(v) = self.topic_alias_maximum {
            out.push(Property::TopicAliasMaximum(v));
        }
        if let Some(ref v) = self.reason_string {
            out.push(Property::ReasonString(v.clone()));
        }
        if let Some(v) = self.wildcard_subscription_available {
            out.push(Property::WildcardSubscriptionAvailable(bool_byte(v)));
        }
        if let Some(v) = self.subscription_identifiers_available {
            out.push(Property::SubscriptionIdentifierAvailable(bool_byte(v)));
        }
        if let Some(v) = self.shared_subscription_available {
            out.push(Property::SharedSubscriptionAvailable(bool_byte(v)));
        }
        if let Some(v) = self.server_keep_alive {
            out.push(Property::ServerKeepAlive(v));
        }
        if let Some(ref v) = self.response_information {
            out.push(Property::ResponseInformation(v.clone()));
        }
        if let Some(ref v) = self.server_reference {
            out.push(Property::ServerReference(v.clone()));
        }
        if let Some(ref v) = self.authentication_method {
            out.push(Property::AuthenticationMethod(v.clone()));
        }
        if let Some(ref v) = self.authentication_data {
            out.push(Property::AuthenticationData(v.clone()));
        }
        push_user_properties(&mut out, &self.user_properties);
        out
    }

    fn from_properties(props: Vec<Property>) -> Self {
        let mut out = Self::default();
        for prop in props {
            match prop {
                Property::SessionExpiryInterval(v) => out.session_expiry_interval = Some(v),
                Property::ReceiveMaximum(v) => out.receive_maximum = Some(v),
                Property::MaximumQos(v) => out.maximum_qos = Some(v),
                Property::RetainAvailable(v) => out.retain_available = Some(v != 0),
                Property::MaximumPacketSize(v) => out.maximum_packet_size = Some(v),
                Property::AssignedClientIdentifier(v) => {
                    out.assigned_client_identifier = Some(v)
                }
                Property::TopicAliasMaximum(v) => out.topic_alias_maximum = Some(v),
                Property::ReasonString(v) => out.reason_string = Some(v),
                Property::WildcardSubscriptionAvailable(v) => {
                    out.wildcard_subscription_available = Some(v != 0)
                }
                Property::SubscriptionIdentifierAvailable(v) => {
                    out.subscription_identifiers_available = Some(v != 0)
                }
                Property::SharedSubscriptionAvailable(v) => {
                    out.shared_subscription_available = Some(v != 0)
                }
                Property::ServerKeepAlive(v) => out.server_keep_alive = Some(v),
                Property::ResponseInformation(v) => out.response_information = Some(v),
                Property::ServerReference(v) => out.server_reference = Some(v),
                Property::AuthenticationMethod(v) => out.authentication_method = Some(v),
                Property::AuthenticationData(v) => out.authentication_data = Some(v),
                Property::UserProperty(k, v) => out.user_properties.push((k, v)),
                _ => {}
            }
        }
        out
    }
}

/// PUBLISH properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishProperties {
    pub payload_format_indicator: Option<u8>,
    pub message_expiry_interval: Option<u32>,
    pub topic_alias: Option<u16>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Vec<u8>>,
    /// A broker may attach one identifier per matching subscription.
    pub subscription_identifiers: Vec<u32>,
    pub content_type: Option<String>,
    pub user_properties: UserProperties,
}

impl PropertySet for PublishProperties {
    fn to_properties(&self) -> Vec<Property> {
        let mut out = Vec::new();
        if let Some(v) = self.payload_format_indicator {
            out.push(Property::PayloadFormatIndicator(v));
        }
        if let Some(v) = self.message_expiry_interval {
            out.push(Property::MessageExpiryInterval(v));
        }
        if let Some(v) = self.topic_alias {
            out.push(Property::TopicAlias(v));
        }
        if let Some(ref v) = self.response_topic {
            out.push(Property::ResponseTopic(v.clone()));
        }
        if let Some(ref v) = self.correlation_data {
            out.push(Property::CorrelationData(v.clone()));
        }
        out.extend(
            self.subscription_identifiers
                .iter()
                .map(|v| Property::SubscriptionIdentifier(*v)),
        );
        if let Some(ref v) = self.content_type {
            out.push(Property::ContentType(v.clone()));
        }
        push_user_properties(&mut out, &self.user_properties);
        out
    }

    fn from_properties(props: Vec<Property>) -> Self {
        let mut out = Self::default();
        for prop in props {
            match prop {
                Property::PayloadFormatIndicator(v) => out.payload_format_indicator = Some(v),
                Property::MessageExpiryInterval(v) => out.message_expiry_interval = Some(v),
                Property::TopicAlias(v) => out.topic_alias = Some(v),
                Property::ResponseTopic(v) => out.response_topic = Some(v),
                Property::CorrelationData(v) => out.correlation_data = Some(v),
                Property::SubscriptionIdentifier(v) => out.subscription_identifiers.push(v),
                Property::ContentType(v) => out.content_type = Some(v),
                Property::UserProperty(k, v) => out.user_properties.push((k, v)),
                _ => {}
            }
        }
        out
    }
}

/// Properties of PUBACK, PUBREC, PUBREL, PUBCOMP, SUBACK and UNSUBACK.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckProperties {
    pub reason_string: Option<String>,
    pub user_properties: UserProperties,
}

impl PropertySet for AckProperties {
    fn to_properties(&self) -> Vec<Property> {
        let mut out = Vec::new();
        if let Some(ref v) = self.reason_string {
            out.push(Property::ReasonString(v.clone()));
        }
        push_user_properties(&mut out, &self.user_properties);
        out
    }

    fn from_properties(props: Vec<Property>) -> Self {
        let mut out = Self::default();
        for prop in props {
            match prop {
                Property::ReasonString(v) => out.reason_string = Some(v),
                Property::UserProperty(k, v) => out.user_properties.push((k, v)),
                _ => {}
            }
        }
        out
    }
}

/// SUBSCRIBE properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeProperties {
    pub subscription_identifier: Option<u32>,
    pub user_properties: UserProperties,
}

impl PropertySet for SubscribeProperties {
    fn to_properties(&self) -> Vec<Property> {
        let mut out = Vec::new();
        if let Some(v) = self.subscription_identifier {
            out.push(Property::SubscriptionIdentifier(v));
        }
        push_user_properties(&mut out, &self.user_properties);
        out
    }

    fn from_properties(props: Vec<Property>) -> Self {
        let mut out = Self::default();
        for prop in props {
            match prop {
                Property::SubscriptionIdentifier(v) => out.subscription_identifier = Some(v),
                Property::UserProperty(k, v) => out.user_properties.push((k, v)),
                _ => {}
            }
        }
        out
    }
}

/// UNSUBSCRIBE properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnsubscribeProperties {
    pub user_properties: UserProperties,
}

impl PropertySet for UnsubscribeProperties {
    fn to_properties(&self) -> Vec<Property> {
        let mut out = Vec::new();
        push_user_properties(&mut out, &self.user_properties);
        out
    }

    fn from_properties(props: Vec<Property>) -> Self {
        let mut out = Self::default();
        for prop in props {
            if let Property::UserProperty(k, v) = prop {
                out.user_properties.push((k, v));
            }
        }
        out
    }
}

/// DISCONNECT properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisconnectProperties {
    pub session_expiry_interval: Option<u32>,
    pub reason_string: Option<String>,
    pub server_reference: Option<String>,
    pub user_properties: UserProperties,
}

impl PropertySet for DisconnectProperties {
    fn to_properties(&self) -> Vec<Property> {
        let mut out = Vec::new();
        if let Some(v) = self.session_expiry_interval {
            out.push(Property::SessionExpiryInterval(v));
        }
        if let Some(ref v) = self.reason_string {
            out.push(Property::ReasonString(v.clone()));
        }
        if let Some(ref v) = self.server_reference {
            out.push(Property::ServerReference(v.clone()));
        }
        push_user_properties(&mut out, &self.user_properties);
        out
    }

    fn from_properties(props: Vec<Property>) -> Self {
        let mut out = Self::default();
        for prop in props {
            match prop {
                Property::SessionExpiryInterval(v) => out.session_expiry_interval = Some(v),
                Property::ReasonString(v) => out.reason_string = Some(v),
                Property::ServerReference(v) => out.server_reference = Some(v),
                Property::UserProperty(k, v) => out.user_properties.push((k, v)),
                _ => {}
            }
        }
        out
    }
}

/// AUTH properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthProperties {
    pub authentication_method: Option<String>,
    pub authentication_data: Option<Vec<u8>>,
    pub reason_string: Option<String>,
    pub user_properties: UserProperties,
}

impl PropertySet for AuthProperties {
    fn to_properties(&self) -> Vec<Property> {
        let mut out = Vec::new();
        if let Some(ref v) = self.authentication_method {
            out.push(Property::AuthenticationMethod(v.clone()));
        }
        if let Some(ref v) = self.authentication_data {
            out.push(Property::AuthenticationData(v.clone()));
        }
        if let Some(ref v) = self.reason_string {
            out.push(Property::ReasonString(v.clone()));
        }
        push_user_properties(&mut out, &self.user_properties);
        out
    }

    fn from_properties(props: Vec<Property>) -> Self {
        let mut out = Self::default();
        for prop in props {
            match prop {
                Property::AuthenticationMethod(v) => out.authentication_method = Some(v),
                Property::AuthenticationData(v) => out.authentication_data = Some(v),
                Property::ReasonString(v) => out.reason_string = Some(v),
                Property::UserProperty(k, v) => out.user_properties.push((k, v)),
                _ => {}
            }
        }
        out
    }
}
