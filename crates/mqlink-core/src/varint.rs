//! Variable Byte Integer encoding/decoding for MQTT.
//!
//! Carries the fixed header's remaining length and, in MQTT 5.0, property
//! lengths and subscription identifiers. Seven value bits per byte, least
//! significant group first, high bit set while more bytes follow. At most
//! four bytes, so values stop at [`MAX_VALUE`].

use std::io::{self, Read};

use crate::error::{EncodeError, ProtocolError, Result};

/// Largest value representable in four bytes.
pub const MAX_VALUE: u32 = 268_435_455;

const MAX_BYTES: usize = 4;

/// Accumulates one integer byte by byte.
#[derive(Default)]
struct Accumulator {
    value: u32,
    count: usize,
}

impl Accumulator {
    /// Feed one byte. Returns the value once the last byte is seen.
    fn push(&mut self, byte: u8) -> Result<Option<u32>> {
        if self.count == MAX_BYTES {
            return Err(ProtocolError::InvalidRemainingLength.into());
        }
        self.value |= ((byte & 0x7F) as u32) << (7 * self.count);
        self.count += 1;

        if byte & 0x80 == 0 {
            Ok(Some(self.value))
        } else if self.count == MAX_BYTES {
            Err(ProtocolError::InvalidRemainingLength.into())
        } else {
            Ok(None)
        }
    }
}

/// Decode a variable byte integer from the front of `buf`.
///
/// Returns `Ok(Some((value, bytes_consumed)))`, `Ok(None)` if the buffer
/// ends mid-integer, or `Err` after four continuation bytes.
///
/// # Example
/// ```
/// use mqlink_core::varint::decode;
/// let (value, consumed) = decode(&[0x80, 0x01]).unwrap().unwrap();
/// assert_eq!((value, consumed), (128, 2));
/// ```
pub fn decode(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut acc = Accumulator::default();
    for &byte in buf {
        if let Some(value) = acc.push(byte)? {
            return Ok(Some((value as usize, acc.count)));
        }
    }
    Ok(None)
}

/// Read a variable byte integer from a live channel.
///
/// End of stream before the last byte is `ProtocolError::ConnectionClosed`.
pub fn read_from<R: Read>(reader: &mut R) -> Result<u32> {
    let mut acc = Accumulator::default();
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Err(ProtocolError::ConnectionClosed.into()),
            Ok(_) => {
                if let Some(value) = acc.push(byte[0])? {
                    return Ok(value);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
}

/// Append `value` to `buf`. Returns the number of bytes written.
///
/// ```
/// use mqlink_core::varint::encode_to_vec;
/// let mut buf = Vec::new();
/// assert_eq!(encode_to_vec(300, &mut buf), 2);
/// assert_eq!(buf, [0xAC, 0x02]);
/// ```
pub fn encode_to_vec(mut value: u32, buf: &mut Vec<u8>) -> usize {
    let start = buf.len();
    while value >= 0x80 {
        buf.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
    buf.len() - start
}

/// Encode a length, rejecting values that do not fit in four bytes.
pub fn encode_checked(value: usize, buf: &mut Vec<u8>) -> Result<usize> {
    match u32::try_from(value) {
        Ok(v) if v <= MAX_VALUE => Ok(encode_to_vec(v, buf)),
        _ => Err(EncodeError::PacketTooLarge {
            size: value,
            max: MAX_VALUE as usize,
        }
        .into()),
    }
}

/// Number of bytes `value` takes on the wire.
pub fn encoded_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        _ => 4,
    }
}
