//! Encoding helpers shared by the packet encoders.

use crate::error::{EncodeError, Result};
use crate::varint;

pub(crate) fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// Two-byte length prefix followed by the UTF-8 bytes.
pub(crate) fn put_string(buf: &mut Vec<u8>, value: &str) -> Result<()> {
    put_binary(buf, value.as_bytes())
}

/// Two-byte length prefix followed by the raw bytes.
pub(crate) fn put_binary(buf: &mut Vec<u8>, value: &[u8]) -> Result<()> {
    if value.len() > u16::MAX as usize {
        return Err(EncodeError::StringTooLong(value.len()).into());
    }
    put_u16(buf, value.len() as u16);
    buf.extend_from_slice(value);
    Ok(())
}

/// Write the fixed header byte, the remaining length and the body.
pub(crate) fn put_packet(buf: &mut Vec<u8>, first_byte: u8, body: &[u8]) -> Result<()> {
    buf.push(first_byte);
    varint::encode_checked(body.len(), buf)?;
    buf.extend_from_slice(body);
    Ok(())
}
