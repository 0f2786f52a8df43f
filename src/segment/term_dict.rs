//! Term dictionary (`.tix`) encoding.
//!
//! The dictionary is a stream of entries in strictly increasing term order,
//! closed by an end marker and the entry count:
//!
//! ```text
//! magic u32 | version u32 | segment_no u64
//! ( 0x01 | term | doc_freq varint | frq_position u64 | prx_position u64
//!   | skip_delta_frq varint | skip_delta_prx varint )*
//! 0x00 | term_count u64 | crc32
//! ```

use crate::error::{Result, SegmergeError};
use crate::segment::FORMAT_VERSION;
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{Storage, StorageInput, StorageOutput};

/// Magic number for term dictionary files ("TIX1").
pub const TERM_DICT_MAGIC: u32 = 0x54495831;

const ENTRY_MARKER: u8 = 0x01;
const END_MARKER: u8 = 0x00;

/// Location of one term's merged postings inside a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermEntry {
    pub term: String,

    /// Segment the entry belongs to.
    pub segment_no: u64,

    /// Number of documents with at least one occurrence of the term.
    pub total_df: u32,

    /// Start of the term's posting block in the frequency stream.
    pub frq_position: u64,

    /// Start of the term's position block in the position stream.
    pub prx_position: u64,

    /// Offset from `frq_position` to the term's skip table.
    pub skip_delta_frq: u64,

    /// Length of the term's position block.
    pub skip_delta_prx: u64,
}

/// Streaming writer for a term dictionary.
pub struct TermDictionaryWriter {
    writer: StructWriter<Box<dyn StorageOutput>>,
    last_term: Option<String>,
    term_count: u64,
}

impl TermDictionaryWriter {
    /// Create a dictionary writer and emit the file header.
    pub fn new(output: Box<dyn StorageOutput>, segment_no: u64) -> Result<Self> {
        let mut writer = StructWriter::new(output);
        writer.write_u32(TERM_DICT_MAGIC)?;
        writer.write_u32(FORMAT_VERSION)?;
        writer.write_u64(segment_no)?;

        Ok(TermDictionaryWriter {
            writer,
            last_term: None,
            term_count: 0,
        })
    }

    /// Append one entry. Terms must arrive in strictly increasing order.
    pub fn add(&mut self, entry: &TermEntry) -> Result<()> {
        if let Some(last) = &self.last_term {
            if entry.term.as_str() <= last.as_str() {
                return Err(SegmergeError::index(format!(
                    "term '{}' written after '{last}'",
                    entry.term
                )));
            }
        }

        self.writer.write_u8(ENTRY_MARKER)?;
        self.writer.write_string(&entry.term)?;
        self.writer.write_varint(entry.total_df as u64)?;
        self.writer.write_u64(entry.frq_position)?;
        self.writer.write_u64(entry.prx_position)?;
        self.writer.write_varint(entry.skip_delta_frq)?;
        self.writer.write_varint(entry.skip_delta_prx)?;

        self.last_term = Some(entry.term.clone());
        self.term_count += 1;
        Ok(())
    }

    pub fn term_count(&self) -> u64 {
        self.term_count
    }

    /// Write the footer and close the file. Returns `(term_count, file_size)`.
    pub fn finish(mut self) -> Result<(u64, u64)> {
        self.writer.write_u8(END_MARKER)?;
        self.writer.write_u64(self.term_count)?;
        let size = self.writer.close()?;
        Ok((self.term_count, size))
    }
}

/// Streaming reader for a term dictionary.
///
/// Entries are validated for strict ordering as they are read; the footer
/// count and the checksum are validated once the end marker is reached.
pub struct TermDictionaryReader {
    name: String,
    reader: Option<StructReader<Box<dyn StorageInput>>>,
    segment_no: u64,
    last_term: Option<String>,
    entries_read: u64,
}

impl TermDictionaryReader {
    pub fn open(storage: &dyn Storage, name: &str) -> Result<Self> {
        let input = storage.open_input(name)?;
        let mut reader = StructReader::new(input)?;

        let magic = reader.read_u32()?;
        if magic != TERM_DICT_MAGIC {
            return Err(SegmergeError::corrupt(format!(
                "{name}: bad term dictionary magic {magic:#010x}"
            )));
        }
        let version = reader.read_u32()?;
        if version != FORMAT_VERSION {
            return Err(SegmergeError::corrupt(format!(
                "{name}: unsupported term dictionary version {version}"
            )));
        }
        let segment_no = reader.read_u64()?;

        Ok(TermDictionaryReader {
            name: name.to_string(),
            reader: Some(reader),
            segment_no,
            last_term: None,
            entries_read: 0,
        })
    }

    /// Segment number recorded in the header.
    pub fn segment_no(&self) -> u64 {
        self.segment_no
    }

    /// Read the next entry, or `None` once the dictionary is exhausted.
    pub fn next_entry(&mut self) -> Result<Option<TermEntry>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        match reader.read_u8()? {
            ENTRY_MARKER => {}
            END_MARKER => {
                self.finish()?;
                return Ok(None);
            }
            other => {
                return Err(SegmergeError::corrupt(format!(
                    "{}: unknown dictionary marker {other:#04x}",
                    self.name
                )));
            }
        }

        let term = reader.read_string()?;
        let total_df = u32::try_from(reader.read_varint()?)
            .map_err(|_| SegmergeError::corrupt(format!("{}: doc_freq overflow", self.name)))?;
        let frq_position = reader.read_u64()?;
        let prx_position = reader.read_u64()?;
        let skip_delta_frq = reader.read_varint()?;
        let skip_delta_prx = reader.read_varint()?;

        if let Some(last) = &self.last_term {
            if term.as_str() <= last.as_str() {
                return Err(SegmergeError::corrupt(format!(
                    "{}: term '{term}' follows '{last}'",
                    self.name
                )));
            }
        }
        if total_df == 0 {
            return Err(SegmergeError::corrupt(format!(
                "{}: term '{term}' has no postings",
                self.name
            )));
        }

        self.last_term = Some(term.clone());
        self.entries_read += 1;

        Ok(Some(TermEntry {
            term,
            segment_no: self.segment_no,
            total_df,
            frq_position,
            prx_position,
            skip_delta_frq,
            skip_delta_prx,
        }))
    }

    fn finish(&mut self) -> Result<()> {
        let Some(mut reader) = self.reader.take() else {
            return Ok(());
        };

        let term_count = reader.read_u64()?;
        if term_count != self.entries_read {
            return Err(SegmergeError::corrupt(format!(
                "{}: footer lists {term_count} terms, read {}",
                self.name, self.entries_read
            )));
        }
        if !reader.verify_checksum()? {
            return Err(SegmergeError::corrupt(format!(
                "{}: checksum mismatch",
                self.name
            )));
        }
        reader.close()
    }

    /// Number of entries returned so far.
    pub fn entries_read(&self) -> u64 {
        self.entries_read
    }

    /// Release the underlying input without reading further.
    pub fn close(&mut self) -> Result<()> {
        match self.reader.take() {
            Some(reader) => reader.close(),
            None => Ok(()),
        }
    }
}
