//! Structured file I/O for binary segment data.
//!
//! Every segment file is written through a [`StructWriter`]: fixed-width
//! integers are little-endian, variable-width integers are LEB128, strings
//! and byte blobs are length-prefixed. A CRC32 over all bytes written is
//! appended as a 4-byte little-endian trailer when the writer is closed.

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;

use crate::error::{Result, SegmergeError};
use crate::storage::{Storage, StorageInput, StorageOutput};
use crate::util::varint::{decode_u64, encode_u64};

/// Size of the checksum trailer at the end of every structured file.
pub const CHECKSUM_LEN: u64 = 4;

/// A structured file writer for binary data.
pub struct StructWriter<W: StorageOutput> {
    writer: W,
    hasher: Hasher,
    position: u64,
}

impl<W: StorageOutput> StructWriter<W> {
    /// Create a new structured file writer.
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: Hasher::new(),
            position: 0,
        }
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.writer.write_u8(value)?;
        self.hasher.update(&[value]);
        self.position += 1;
        Ok(())
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(value)?;
        self.hasher.update(&value.to_le_bytes());
        self.position += 4;
        Ok(())
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<LittleEndian>(value)?;
        self.hasher.update(&value.to_le_bytes());
        self.position += 8;
        Ok(())
    }

    /// Write a variable-length integer.
    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        let encoded = encode_u64(value);
        self.write_raw(&encoded)
    }

    /// Write a string with length prefix.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Write raw bytes with length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_varint(value.len() as u64)?;
        self.write_raw(value)
    }

    /// Write raw bytes without length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.hasher.update(value);
        self.position += value.len() as u64;
        Ok(())
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Get the checksum of everything written so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Append the checksum trailer, then flush and close the writer.
    ///
    /// Returns the total file size including the trailer.
    pub fn close(mut self) -> Result<u64> {
        let checksum = self.hasher.clone().finalize();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.flush_and_sync()?;
        self.writer.close()?;
        Ok(self.position + CHECKSUM_LEN)
    }
}

/// A structured file reader for binary data.
///
/// Every value read is folded into a running checksum, so a file read front
/// to back can be verified against its trailer with [`verify_checksum`].
///
/// [`verify_checksum`]: StructReader::verify_checksum
pub struct StructReader<R: StorageInput> {
    reader: R,
    hasher: Hasher,
    position: u64,
    file_size: u64,
}

impl<R: StorageInput> StructReader<R> {
    /// Create a new structured file reader.
    pub fn new(reader: R) -> Result<Self> {
        let file_size = reader.size()?;
        if file_size < CHECKSUM_LEN {
            return Err(SegmergeError::corrupt("file too short for checksum"));
        }
        Ok(StructReader {
            reader,
            hasher: Hasher::new(),
            position: 0,
            file_size,
        })
    }

    fn ensure_available(&self, len: u64, what: &str) -> Result<()> {
        if self.position + len > self.data_len() {
            return Err(SegmergeError::corrupt(format!("truncated {what}")));
        }
        Ok(())
    }

    /// Read a u8 value.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure_available(1, "u8")?;
        let value = self
            .reader
            .read_u8()
            .map_err(|e| SegmergeError::from_read(e, "u8"))?;
        self.hasher.update(&[value]);
        self.position += 1;
        Ok(value)
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure_available(4, "u32")?;
        let value = self
            .reader
            .read_u32::<LittleEndian>()
            .map_err(|e| SegmergeError::from_read(e, "u32"))?;
        self.hasher.update(&value.to_le_bytes());
        self.position += 4;
        Ok(value)
    }

    /// Read a u64 value (little-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure_available(8, "u64")?;
        let value = self
            .reader
            .read_u64::<LittleEndian>()
            .map_err(|e| SegmergeError::from_read(e, "u64"))?;
        self.hasher.update(&value.to_le_bytes());
        self.position += 8;
        Ok(value)
    }

    /// Read a variable-length integer.
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut bytes = Vec::with_capacity(10);
        loop {
            self.ensure_available(bytes.len() as u64 + 1, "varint")?;
            let byte = self
                .reader
                .read_u8()
                .map_err(|e| SegmergeError::from_read(e, "varint"))?;
            bytes.push(byte);
            if byte & 0x80 == 0 || bytes.len() > 10 {
                break;
            }
        }

        let (value, _) = decode_u64(&bytes)?;
        self.hasher.update(&bytes);
        self.position += bytes.len() as u64;
        Ok(value)
    }

    /// Read a string with length prefix.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|e| SegmergeError::corrupt(format!("invalid UTF-8: {e}")))
    }

    /// Read bytes with length prefix.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let length = self.read_varint()?;
        self.read_raw(length as usize)
    }

    /// Read exact number of raw bytes.
    pub fn read_raw(&mut self, length: usize) -> Result<Vec<u8>> {
        // Lengths come from the file itself; bound them before allocating.
        self.ensure_available(length as u64, "record")?;
        let mut bytes = vec![0u8; length];
        self.reader
            .read_exact(&mut bytes)
            .map_err(|e| SegmergeError::from_read(e, "record"))?;
        self.hasher.update(&bytes);
        self.position += length as u64;
        Ok(bytes)
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Get file size, including the checksum trailer.
    pub fn size(&self) -> u64 {
        self.file_size
    }

    /// Length of the data section, excluding the checksum trailer.
    pub fn data_len(&self) -> u64 {
        self.file_size - CHECKSUM_LEN
    }

    /// Check if all data before the checksum trailer has been consumed.
    pub fn is_eof(&self) -> bool {
        self.position >= self.data_len()
    }

    /// Verify file integrity against the trailer.
    ///
    /// Must be called once every data byte has been read. Returns `false` on
    /// a checksum mismatch and an error if unread data remains.
    pub fn verify_checksum(&mut self) -> Result<bool> {
        if self.position != self.data_len() {
            return Err(SegmergeError::corrupt(format!(
                "{} trailing bytes before checksum",
                self.data_len().saturating_sub(self.position)
            )));
        }

        let stored_checksum = self
            .reader
            .read_u32::<LittleEndian>()
            .map_err(|e| SegmergeError::from_read(e, "checksum"))?;
        Ok(stored_checksum == self.hasher.clone().finalize())
    }

    /// Close the reader.
    pub fn close(mut self) -> Result<()> {
        self.reader.close()
    }
}

/// Read a whole structured file and validate its checksum trailer.
///
/// Returns the data section without the trailer.
pub fn read_checked_file(storage: &dyn Storage, name: &str) -> Result<Vec<u8>> {
    let mut input = storage.open_input(name)?;
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;
    input.close()?;

    if (bytes.len() as u64) < CHECKSUM_LEN {
        return Err(SegmergeError::corrupt(format!(
            "{name}: file too short for checksum"
        )));
    }

    let split = bytes.len() - CHECKSUM_LEN as usize;
    let mut trailer = &bytes[split..];
    let stored = trailer
        .read_u32::<LittleEndian>()
        .map_err(|e| SegmergeError::from_read(e, "checksum"))?;
    bytes.truncate(split);

    if crc32fast::hash(&bytes) != stored {
        return Err(SegmergeError::corrupt(format!("{name}: checksum mismatch")));
    }

    Ok(bytes)
}

/// Validate a whole structured file against its checksum trailer.
pub fn verify_file_checksum(storage: &dyn Storage, name: &str) -> Result<()> {
    read_checked_file(storage, name).map(|_| ())
}
