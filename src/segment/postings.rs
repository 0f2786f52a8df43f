//! Posting streams (`.frq` / `.prx`) and the per-segment posting reader.
//!
//! For every term the frequency stream holds a posting block followed by a
//! skip table; the position stream holds a position block:
//!
//! ```text
//! .frq block: ( doc_delta varint | freq varint )*
//! .frq skip:  count varint | ( last_doc varint | frq_rel varint | prx_rel varint )*
//! .prx block: ( freq x position_delta varint )*
//! ```
//!
//! `skip_delta_frq` in the term entry is the length of the posting block, so
//! the skip table starts at `frq_position + skip_delta_frq`. `skip_delta_prx`
//! is the length of the position block.

use crate::error::{Result, SegmergeError};
use crate::segment::term_dict::{TermDictionaryReader, TermEntry};
use crate::segment::{DocId, FORMAT_VERSION, FREQ_EXT, POS_EXT, SegmentId, TERM_DICT_EXT};
use crate::storage::structured::{StructWriter, read_checked_file};
use crate::storage::{Storage, StorageOutput};
use crate::util::varint::{self, VarIntCursor};

/// Magic number for frequency streams ("FRQ1").
pub const FREQ_MAGIC: u32 = 0x46525131;

/// Magic number for position streams ("PRX1").
pub const POS_MAGIC: u32 = 0x50525831;

/// Stream header: magic u32 + version u32.
const STREAM_HEADER_LEN: usize = 8;

/// One document's occurrences of a term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub doc_id: DocId,
    pub freq: u32,
    pub positions: Vec<u32>,
}

impl Posting {
    pub fn new(doc_id: DocId, positions: Vec<u32>) -> Self {
        Posting {
            doc_id,
            freq: positions.len() as u32,
            positions,
        }
    }
}

/// Skip pointer emitted after every `skip_interval` postings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipEntry {
    /// Last document id covered by the skipped block.
    pub last_doc: DocId,
    /// Offset of the next posting relative to the term's `frq_position`.
    pub frq_offset: u64,
    /// Offset of the next position relative to the term's `prx_position`.
    pub prx_offset: u64,
}

/// Current term of a [`PostingStreamReader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermCursor {
    pub term: String,
    /// Local document frequency.
    pub doc_freq: u32,
    pub frq_position: u64,
    pub prx_position: u64,
}

/// Appends merged or freshly built postings to a segment's posting streams.
///
/// Postings of the current term are buffered until [`finish_term`] so the
/// block lengths and skip table can be written in one piece.
///
/// [`finish_term`]: PostingsWriter::finish_term
pub struct PostingsWriter {
    frq: StructWriter<Box<dyn StorageOutput>>,
    prx: StructWriter<Box<dyn StorageOutput>>,
    segment_no: u64,
    skip_interval: usize,
    frq_block: Vec<u8>,
    prx_block: Vec<u8>,
    skips: Vec<SkipEntry>,
    doc_count: u32,
    last_doc: Option<DocId>,
    postings_written: u64,
}

impl PostingsWriter {
    pub fn new(
        frq_output: Box<dyn StorageOutput>,
        prx_output: Box<dyn StorageOutput>,
        segment_no: u64,
        skip_interval: usize,
    ) -> Result<Self> {
        if skip_interval == 0 {
            return Err(SegmergeError::invalid_config("skip_interval must be at least 1"));
        }

        let mut frq = StructWriter::new(frq_output);
        frq.write_u32(FREQ_MAGIC)?;
        frq.write_u32(FORMAT_VERSION)?;

        let mut prx = StructWriter::new(prx_output);
        prx.write_u32(POS_MAGIC)?;
        prx.write_u32(FORMAT_VERSION)?;

        Ok(PostingsWriter {
            frq,
            prx,
            segment_no,
            skip_interval,
            frq_block: Vec::new(),
            prx_block: Vec::new(),
            skips: Vec::new(),
            doc_count: 0,
            last_doc: None,
            postings_written: 0,
        })
    }

    /// Append one posting to the current term. Document ids must be strictly
    /// increasing within a term.
    pub fn add_posting(&mut self, doc_id: DocId, positions: &[u32]) -> Result<()> {
        let delta = match self.last_doc {
            Some(last) if doc_id <= last => {
                return Err(SegmergeError::index(format!(
                    "posting for doc {doc_id} written after doc {last}"
                )));
            }
            Some(last) => doc_id - last,
            None => doc_id,
        };

        varint::write_u32(&mut self.frq_block, delta)?;
        varint::write_u32(&mut self.frq_block, positions.len() as u32)?;

        let mut previous = 0u32;
        for &position in positions {
            varint::write_u32(&mut self.prx_block, position.wrapping_sub(previous))?;
            previous = position;
        }

        self.last_doc = Some(doc_id);
        self.doc_count += 1;

        if self.doc_count as usize % self.skip_interval == 0 {
            self.skips.push(SkipEntry {
                last_doc: doc_id,
                frq_offset: self.frq_block.len() as u64,
                prx_offset: self.prx_block.len() as u64,
            });
        }

        Ok(())
    }

    /// Number of postings buffered for the current term.
    pub fn pending_doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Flush the current term's postings and return its dictionary entry.
    ///
    /// Returns `None` and writes nothing when the term received no postings.
    pub fn finish_term(&mut self, term: &str) -> Result<Option<TermEntry>> {
        if self.doc_count == 0 {
            self.reset_term();
            return Ok(None);
        }

        let frq_position = self.frq.position();
        let prx_position = self.prx.position();
        let skip_delta_frq = self.frq_block.len() as u64;
        let skip_delta_prx = self.prx_block.len() as u64;

        self.frq.write_raw(&self.frq_block)?;
        self.frq.write_varint(self.skips.len() as u64)?;
        for skip in &self.skips {
            self.frq.write_varint(skip.last_doc as u64)?;
            self.frq.write_varint(skip.frq_offset)?;
            self.frq.write_varint(skip.prx_offset)?;
        }
        self.prx.write_raw(&self.prx_block)?;

        let entry = TermEntry {
            term: term.to_string(),
            segment_no: self.segment_no,
            total_df: self.doc_count,
            frq_position,
            prx_position,
            skip_delta_frq,
            skip_delta_prx,
        };
        self.postings_written += self.doc_count as u64;
        self.reset_term();
        Ok(Some(entry))
    }

    fn reset_term(&mut self) {
        self.frq_block.clear();
        self.prx_block.clear();
        self.skips.clear();
        self.doc_count = 0;
        self.last_doc = None;
    }

    /// Total postings flushed across all terms.
    pub fn postings_written(&self) -> u64 {
        self.postings_written
    }

    /// Close both streams. Returns the combined file size.
    pub fn finish(self) -> Result<u64> {
        let frq_size = self.frq.close()?;
        let prx_size = self.prx.close()?;
        Ok(frq_size + prx_size)
    }
}

/// Sequential reader over one sealed segment's term dictionary and postings.
///
/// Terms are visited with [`advance_term`]; the postings of the current term
/// are decoded on demand. Both posting streams are loaded and checksum
/// verified when the reader is opened.
///
/// [`advance_term`]: PostingStreamReader::advance_term
pub struct PostingStreamReader {
    segment: SegmentId,
    dictionary: TermDictionaryReader,
    frq: Vec<u8>,
    prx: Vec<u8>,
    current: Option<TermEntry>,
}

impl PostingStreamReader {
    pub fn open(storage: &dyn Storage, segment: SegmentId) -> Result<Self> {
        let dictionary = TermDictionaryReader::open(storage, &segment.file_name(TERM_DICT_EXT))?;
        let frq = load_stream(storage, &segment.file_name(FREQ_EXT), FREQ_MAGIC)?;
        let prx = load_stream(storage, &segment.file_name(POS_EXT), POS_MAGIC)?;

        Ok(PostingStreamReader {
            segment,
            dictionary,
            frq,
            prx,
            current: None,
        })
    }

    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    /// Move to the next term in lexicographic order.
    ///
    /// Returns `None` at the end of the dictionary; after that there is no
    /// current term.
    pub fn advance_term(&mut self) -> Result<Option<TermCursor>> {
        self.current = self.dictionary.next_entry()?;
        let Some(entry) = &self.current else {
            return Ok(None);
        };

        let frq_end = entry.frq_position.checked_add(entry.skip_delta_frq);
        let prx_end = entry.prx_position.checked_add(entry.skip_delta_prx);
        let in_bounds = entry.frq_position >= STREAM_HEADER_LEN as u64
            && entry.prx_position >= STREAM_HEADER_LEN as u64
            && frq_end.is_some_and(|end| end <= self.frq.len() as u64)
            && prx_end.is_some_and(|end| end <= self.prx.len() as u64);
        if !in_bounds {
            return Err(SegmergeError::corrupt(format!(
                "{}: postings of '{}' lie outside the posting streams",
                self.segment, entry.term
            )));
        }

        Ok(Some(TermCursor {
            term: entry.term.clone(),
            doc_freq: entry.total_df,
            frq_position: entry.frq_position,
            prx_position: entry.prx_position,
        }))
    }

    /// The term last returned by [`advance_term`](Self::advance_term).
    pub fn current_term(&self) -> Option<&str> {
        self.current.as_ref().map(|entry| entry.term.as_str())
    }

    fn current_entry(&self) -> Result<&TermEntry> {
        self.current.as_ref().ok_or_else(|| {
            SegmergeError::out_of_order(format!(
                "{}: postings requested without a current term",
                self.segment
            ))
        })
    }

    /// Decode every posting of the current term.
    pub fn read_postings_for_current_term(&self) -> Result<Vec<Posting>> {
        let entry = self.current_entry()?;

        let frq_start = entry.frq_position as usize;
        let prx_start = entry.prx_position as usize;
        let frq_block = &self.frq[frq_start..frq_start + entry.skip_delta_frq as usize];
        let prx_block = &self.prx[prx_start..prx_start + entry.skip_delta_prx as usize];

        let mut frq_cursor = VarIntCursor::new(frq_block);
        let mut prx_cursor = VarIntCursor::new(prx_block);
        let mut postings = Vec::with_capacity(entry.total_df as usize);
        let mut last_doc: Option<DocId> = None;

        for _ in 0..entry.total_df {
            let delta = frq_cursor.read_u32()?;
            let doc_id = match last_doc {
                None => delta,
                Some(_) if delta == 0 => {
                    return Err(self.corrupt_postings(entry, "repeated document id"));
                }
                Some(last) => last
                    .checked_add(delta)
                    .ok_or_else(|| self.corrupt_postings(entry, "document id overflow"))?,
            };
            let freq = frq_cursor.read_u32()?;
            if freq as usize > prx_block.len() {
                return Err(self.corrupt_postings(entry, "frequency exceeds position block"));
            }

            let mut positions = Vec::with_capacity(freq as usize);
            let mut position = 0u32;
            for _ in 0..freq {
                position = position.wrapping_add(prx_cursor.read_u32()?);
                positions.push(position);
            }

            postings.push(Posting {
                doc_id,
                freq,
                positions,
            });
            last_doc = Some(doc_id);
        }

        if !frq_cursor.is_exhausted() {
            return Err(self.corrupt_postings(entry, "posting block longer than doc_freq"));
        }
        if !prx_cursor.is_exhausted() {
            return Err(self.corrupt_postings(entry, "unread positions"));
        }

        Ok(postings)
    }

    /// Decode the postings of `term`, which must be the current term.
    pub fn read_postings(&self, term: &str) -> Result<Vec<Posting>> {
        let entry = self.current_entry()?;
        if entry.term != term {
            return Err(SegmergeError::out_of_order(format!(
                "{}: postings requested for '{term}' while positioned on '{}'",
                self.segment, entry.term
            )));
        }
        self.read_postings_for_current_term()
    }

    /// Decode the skip table that follows the current term's posting block.
    pub fn read_skip_entries_for_current_term(&self) -> Result<Vec<SkipEntry>> {
        let entry = self.current_entry()?;
        let start = (entry.frq_position + entry.skip_delta_frq) as usize;
        let mut cursor = VarIntCursor::new(&self.frq[start..]);

        let count = cursor.read_u64()?;
        if count > entry.total_df as u64 {
            return Err(self.corrupt_postings(entry, "skip table larger than posting list"));
        }

        let mut skips = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let last_doc = cursor.read_u32()?;
            let frq_offset = cursor.read_u64()?;
            let prx_offset = cursor.read_u64()?;
            if frq_offset > entry.skip_delta_frq || prx_offset > entry.skip_delta_prx {
                return Err(self.corrupt_postings(entry, "skip pointer past block end"));
            }
            skips.push(SkipEntry {
                last_doc,
                frq_offset,
                prx_offset,
            });
        }
        Ok(skips)
    }

    fn corrupt_postings(&self, entry: &TermEntry, problem: &str) -> SegmergeError {
        SegmergeError::corrupt(format!(
            "{}: postings of '{}': {problem}",
            self.segment, entry.term
        ))
    }

    /// Release the dictionary input.
    pub fn close(&mut self) -> Result<()> {
        self.current = None;
        self.dictionary.close()
    }
}

/// Load a posting stream, verify its checksum and header.
///
/// The returned buffer keeps the header so term offsets index it directly.
fn load_stream(storage: &dyn Storage, name: &str, magic: u32) -> Result<Vec<u8>> {
    let data = read_checked_file(storage, name)?;
    if data.len() < STREAM_HEADER_LEN {
        return Err(SegmergeError::corrupt(format!("{name}: missing stream header")));
    }

    let found = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if found != magic {
        return Err(SegmergeError::corrupt(format!(
            "{name}: bad stream magic {found:#010x}"
        )));
    }
    if version != FORMAT_VERSION {
        return Err(SegmergeError::corrupt(format!(
            "{name}: unsupported stream version {version}"
        )));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::term_dict::TermDictionaryWriter;
    use crate::storage::memory::MemoryStorage;

    /// Write a small segment posting set: term -> [(doc, positions)].
    fn write_postings(
        storage: &MemoryStorage,
        id: SegmentId,
        skip_interval: usize,
        terms: &[(&str, Vec<(DocId, Vec<u32>)>)],
    ) {
        let mut writer = PostingsWriter::new(
            storage.create_output(&id.file_name(FREQ_EXT)).unwrap(),
            storage.create_output(&id.file_name(POS_EXT)).unwrap(),
            id.0,
            skip_interval,
        )
        .unwrap();
        let mut dict = TermDictionaryWriter::new(
            storage.create_output(&id.file_name(TERM_DICT_EXT)).unwrap(),
            id.0,
        )
        .unwrap();

        for (term, postings) in terms {
            for (doc, positions) in postings {
                writer.add_posting(*doc, positions).unwrap();
            }
            if let Some(entry) = writer.finish_term(term).unwrap() {
                dict.add(&entry).unwrap();
            }
        }
        writer.finish().unwrap();
        dict.finish().unwrap();
    }

    #[test]
    fn test_advance_and_read_postings() {
        let storage = MemoryStorage::new_default();
        let id = SegmentId(1);
        write_postings(
            &storage,
            id,
            16,
            &[
                ("cat", vec![(0, vec![0, 4]), (3, vec![1])]),
                ("dog", vec![(2, vec![7])]),
            ],
        );

        let mut reader = PostingStreamReader::open(&storage, id).unwrap();

        let cursor = reader.advance_term().unwrap().unwrap();
        assert_eq!(cursor.term, "cat");
        assert_eq!(cursor.doc_freq, 2);
        assert_eq!(
            reader.read_postings("cat").unwrap(),
            vec![Posting::new(0, vec![0, 4]), Posting::new(3, vec![1])]
        );

        let cursor = reader.advance_term().unwrap().unwrap();
        assert_eq!(cursor.term, "dog");
        assert_eq!(
            reader.read_postings_for_current_term().unwrap(),
            vec![Posting::new(2, vec![7])]
        );

        assert!(reader.advance_term().unwrap().is_none());
        assert!(reader.current_term().is_none());
    }

    #[test]
    fn test_out_of_order_access() {
        let storage = MemoryStorage::new_default();
        let id = SegmentId(2);
        write_postings(&storage, id, 16, &[("cat", vec![(0, vec![0])])]);

        let mut reader = PostingStreamReader::open(&storage, id).unwrap();
        let err = reader.read_postings_for_current_term().unwrap_err();
        assert!(matches!(err, SegmergeError::OutOfOrderAccess(_)));

        reader.advance_term().unwrap();
        let err = reader.read_postings("dog").unwrap_err();
        assert!(matches!(err, SegmergeError::OutOfOrderAccess(_)));

        assert!(reader.advance_term().unwrap().is_none());
        let err = reader.read_postings("cat").unwrap_err();
        assert!(matches!(err, SegmergeError::OutOfOrderAccess(_)));
    }

    #[test]
    fn test_skip_table() {
        let storage = MemoryStorage::new_default();
        let id = SegmentId(3);
        let postings: Vec<(DocId, Vec<u32>)> = (0..10).map(|d| (d * 2, vec![d])).collect();
        write_postings(&storage, id, 4, &[("many", postings)]);

        let mut reader = PostingStreamReader::open(&storage, id).unwrap();
        reader.advance_term().unwrap();

        let skips = reader.read_skip_entries_for_current_term().unwrap();
        assert_eq!(skips.len(), 2);
        assert_eq!(skips[0].last_doc, 6);
        assert_eq!(skips[1].last_doc, 14);
        assert!(skips[0].frq_offset < skips[1].frq_offset);
        assert_eq!(reader.read_postings_for_current_term().unwrap().len(), 10);
    }

    #[test]
    fn test_writer_rejects_unsorted_docs() {
        let storage = MemoryStorage::new_default();
        let mut writer = PostingsWriter::new(
            storage.create_output("x.frq").unwrap(),
            storage.create_output("x.prx").unwrap(),
            0,
            8,
        )
        .unwrap();
        writer.add_posting(5, &[0]).unwrap();
        assert!(writer.add_posting(5, &[1]).is_err());
        assert!(writer.add_posting(2, &[1]).is_err());

        // A term without postings produces no entry
        let mut writer = PostingsWriter::new(
            storage.create_output("y.frq").unwrap(),
            storage.create_output("y.prx").unwrap(),
            0,
            8,
        )
        .unwrap();
        assert!(writer.finish_term("ghost").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_frequency_stream() {
        let storage = MemoryStorage::new_default();
        let id = SegmentId(4);
        write_postings(&storage, id, 16, &[("cat", vec![(0, vec![0])])]);

        let name = id.file_name(FREQ_EXT);
        let mut bytes = storage.read_all(&name).unwrap();
        bytes[STREAM_HEADER_LEN] ^= 0x7F;
        storage.overwrite(&name, bytes);

        let err = PostingStreamReader::open(&storage, id).err().unwrap();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_missing_stream_is_an_error() {
        let storage = MemoryStorage::new_default();
        let id = SegmentId(5);
        write_postings(&storage, id, 16, &[("cat", vec![(0, vec![0])])]);
        storage.delete_file(&id.file_name(POS_EXT)).unwrap();

        assert!(PostingStreamReader::open(&storage, id).is_err());
    }
}
