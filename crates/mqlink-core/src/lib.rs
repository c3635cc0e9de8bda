//! mqlink-core - MQTT wire codec.
//!
//! Encodes and decodes every MQTT control packet for protocol versions 3.1,
//! 3.1.1 and 5.0, including MQTT 5.0 property blocks and the variable byte
//! integer framing shared by all versions.

pub mod error;
pub mod packet;
pub mod properties;
pub mod varint;

pub use error::{EncodeError, Error, ProtocolError, Result};
pub use packet::*;
