//! Error types for the MQTT codec.

use std::io;

use thiserror::Error;

use crate::packet::{PacketType, ProtocolVersion};

/// Main codec error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    #[error("{feature} is not supported by MQTT {version}")]
    Unsupported {
        feature: &'static str,
        version: ProtocolVersion,
    },
}

impl Error {
    /// True when the error means the network connection must be closed.
    pub fn is_connection_fatal(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::Protocol(e) => e.is_connection_fatal(),
            Error::Encode(_) | Error::Unsupported { .. } => false,
        }
    }
}

/// Violations found while decoding bytes received from the peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("Invalid remaining length encoding")]
    InvalidRemainingLength,

    #[error("Incomplete packet: need {needed} bytes, have {have}")]
    IncompletePacket { needed: usize, have: usize },

    #[error("Invalid protocol name: '{0}'")]
    InvalidProtocolName(String),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(u8),

    #[error("Invalid connect flags: {0:#04x}")]
    InvalidConnectFlags(u8),

    #[error("Invalid flag bits for {packet_type:?}: expected {expected:#06b}, got {actual:#06b}")]
    InvalidFlagBits {
        packet_type: PacketType,
        expected: u8,
        actual: u8,
    },

    #[error("Invalid UTF-8 string")]
    InvalidUtf8,

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Packet too large: {size} bytes exceeds maximum {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Connection closed while reading packet")]
    ConnectionClosed,
}

impl ProtocolError {
    /// Every decode failure leaves the stream at an unknown offset, so all of
    /// them are fatal except a short buffer, which only means "read more".
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(self, ProtocolError::IncompletePacket { .. })
    }
}

/// Malformed outbound requests, reported before anything reaches the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Packet identifier must be non-zero for {0:?}")]
    ZeroPacketId(PacketType),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Topic list must not be empty")]
    EmptyTopicList,

    #[error("Topic count {topics} does not match QoS count {qos_levels}")]
    TopicQosMismatch { topics: usize, qos_levels: usize },

    #[error("Invalid will message: {0}")]
    InvalidWill(String),

    #[error("Invalid client identifier: {0}")]
    InvalidClientId(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("String of {0} bytes exceeds the 65535 byte limit")]
    StringTooLong(usize),

    #[error("Packet of {size} bytes exceeds maximum {max}")]
    PacketTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
