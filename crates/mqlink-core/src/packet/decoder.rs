//! Cursor over a packet body.

use crate::error::{ProtocolError, Result};

/// Decoder for the variable header and payload of one packet.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes left in the body.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Current offset from the start of the body.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move the cursor to `pos`, clamped to the end of the body.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.buf.len());
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        if self.pos >= self.buf.len() {
            return Err(ProtocolError::IncompletePacket { needed: 1, have: 0 }.into());
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::IncompletePacket {
                needed: len,
                have: self.remaining(),
            }
            .into());
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Everything left in the body (PUBLISH application payload).
    pub fn read_rest(&mut self) -> &'a [u8] {
        let bytes = &self.buf[self.pos..];
        self.pos = self.buf.len();
        bytes
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        // MQTT-1.5.3-2: UTF-8 string MUST NOT contain null character U+0000
        if bytes.contains(&0u8) {
            return Err(ProtocolError::MalformedPacket(
                "UTF-8 string must not contain null character".into(),
            )
            .into());
        }
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8.into())
    }

    pub fn read_binary(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        Ok(bytes.to_vec())
    }

    /// Read Variable Byte Integer (MQTT 5.0).
    pub fn read_variable_byte_integer(&mut self) -> Result<u32> {
        let mut multiplier = 1u32;
        let mut value = 0u32;

        for _ in 0..4 {
            let byte = self.read_u8()?;
            value += ((byte & 0x7F) as u32) * multiplier;
            if (byte & 0x80) == 0 {
                return Ok(value);
            }
            multiplier *= 128;
        }

        Err(ProtocolError::InvalidRemainingLength.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_primitives() {
        let buf = [0x01, 0x00, 0x2A, 0x00, 0x00, 0x01, 0x00, 0x00, 0x02, b'h', b'i'];
        let mut dec = Decoder::new(&buf);
        assert_eq!(dec.read_u8().unwrap(), 1);
        assert_eq!(dec.read_u16().unwrap(), 42);
        assert_eq!(dec.read_u32().unwrap(), 256);
        assert_eq!(dec.read_string().unwrap(), "hi");
        assert_eq!(dec.remaining(), 0);
    }

    #[test]
    fn test_rejects_null_in_string() {
        let buf = [0x00, 0x02, b'a', 0x00];
        assert!(Decoder::new(&buf).read_string().is_err());
    }

    #[test]
    fn test_short_read() {
        let buf = [0x00];
        assert!(matches!(
            Decoder::new(&buf).read_u16(),
            Err(crate::Error::Protocol(ProtocolError::IncompletePacket { needed: 2, have: 1 }))
        ));
    }
}
