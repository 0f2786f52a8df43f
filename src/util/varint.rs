//! Variable-length integer encoding utilities.
//!
//! Posting blocks, skip tables and record lengths are stored as LEB128
//! varints: 7 bits per byte with the high bit as a continuation flag.

use std::io::Write;

use crate::error::{Result, SegmergeError};

/// Encode a u32 value using variable-length encoding.
pub fn encode_u32(value: u32) -> Vec<u8> {
    encode_u64(value as u64)
}

/// Decode a u32 value from variable-length encoding.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_u32(bytes: &[u8]) -> Result<(u32, usize)> {
    let (value, read) = decode_u64(bytes)?;
    let value = u32::try_from(value)
        .map_err(|_| SegmergeError::corrupt(format!("varint {value} overflows u32")))?;
    Ok((value, read))
}

/// Encode a u64 value using variable-length encoding.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(10);
    let mut val = value;

    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;

        if val != 0 {
            byte |= 0x80; // Set continuation bit
        }

        bytes.push(byte);

        if val == 0 {
            break;
        }
    }

    bytes
}

/// Decode a u64 value from variable-length encoding.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;
    let mut bytes_read = 0;

    for &byte in bytes {
        bytes_read += 1;

        if shift >= 64 {
            return Err(SegmergeError::corrupt("varint overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, bytes_read));
        }

        shift += 7;
    }

    Err(SegmergeError::corrupt("incomplete varint"))
}

/// Write a variable-length encoded u32 to a writer.
pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<usize> {
    write_u64(writer, value as u64)
}

/// Write a variable-length encoded u64 to a writer.
pub fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<usize> {
    let bytes = encode_u64(value);
    writer.write_all(&bytes)?;
    Ok(bytes.len())
}

/// Sequential varint decoder over an in-memory block.
#[derive(Debug)]
pub struct VarIntCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> VarIntCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        VarIntCursor { bytes, pos: 0 }
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let (value, read) = decode_u32(&self.bytes[self.pos..])?;
        self.pos += read;
        Ok(value)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let (value, read) = decode_u64(&self.bytes[self.pos..])?;
        self.pos += read;
        Ok(value)
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}
