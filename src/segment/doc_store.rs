//! Document store (`.doc`): length-prefixed stored bodies in local-id order.
//!
//! ```text
//! magic u32 | version u32 | ( 0x01 | len varint | body )* | 0x00 | doc_count u32 | crc32
//! ```

use std::sync::Arc;

use crate::error::{Result, SegmergeError};
use crate::segment::deletion::DeletionBitmap;
use crate::segment::{DOC_EXT, DocId, FORMAT_VERSION, SegmentId};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{Storage, StorageInput, StorageOutput};

/// Magic number for document store files ("DOC1").
pub const DOC_STORE_MAGIC: u32 = 0x444F4331;

const RECORD_MARKER: u8 = 0x01;
const END_MARKER: u8 = 0x00;

/// One record returned by [`DocStoreReader::next_document`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub local_id: DocId,
    pub body: Vec<u8>,
    pub is_live: bool,
}

/// Appends document bodies to a new document store.
pub struct DocStoreWriter {
    writer: StructWriter<Box<dyn StorageOutput>>,
    doc_count: u32,
}

impl DocStoreWriter {
    pub fn new(output: Box<dyn StorageOutput>) -> Result<Self> {
        let mut writer = StructWriter::new(output);
        writer.write_u32(DOC_STORE_MAGIC)?;
        writer.write_u32(FORMAT_VERSION)?;
        Ok(DocStoreWriter {
            writer,
            doc_count: 0,
        })
    }

    /// Append a body and return its document id.
    pub fn add(&mut self, body: &[u8]) -> Result<DocId> {
        let doc_id = self.doc_count;
        self.writer.write_u8(RECORD_MARKER)?;
        self.writer.write_bytes(body)?;
        self.doc_count = self
            .doc_count
            .checked_add(1)
            .ok_or_else(|| SegmergeError::index("document store is full"))?;
        Ok(doc_id)
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Write the footer and close. Returns `(doc_count, file_size)`.
    pub fn finish(mut self) -> Result<(u32, u64)> {
        self.writer.write_u8(END_MARKER)?;
        self.writer.write_u32(self.doc_count)?;
        let size = self.writer.close()?;
        Ok((self.doc_count, size))
    }
}

/// Sequential reader over one segment's stored documents.
pub struct DocStoreReader {
    segment: SegmentId,
    reader: Option<StructReader<Box<dyn StorageInput>>>,
    deletions: Option<Arc<DeletionBitmap>>,
    expected_docs: u32,
    next_id: DocId,
}

impl DocStoreReader {
    /// Open the document store of `segment`.
    ///
    /// `expected_docs` is the document count recorded in the catalog; the
    /// store's footer must agree with it.
    pub fn open(
        storage: &dyn Storage,
        segment: SegmentId,
        expected_docs: u32,
        deletions: Option<Arc<DeletionBitmap>>,
    ) -> Result<Self> {
        let name = segment.file_name(DOC_EXT);
        let mut reader = StructReader::new(storage.open_input(&name)?)?;

        let magic = reader.read_u32()?;
        if magic != DOC_STORE_MAGIC {
            return Err(SegmergeError::corrupt(format!(
                "{name}: bad document store magic {magic:#010x}"
            )));
        }
        let version = reader.read_u32()?;
        if version != FORMAT_VERSION {
            return Err(SegmergeError::corrupt(format!(
                "{name}: unsupported document store version {version}"
            )));
        }

        Ok(DocStoreReader {
            segment,
            reader: Some(reader),
            deletions,
            expected_docs,
            next_id: 0,
        })
    }

    /// Read the next document in local-id order, or `None` at the end.
    pub fn next_document(&mut self) -> Result<Option<StoredDocument>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        match reader.read_u8()? {
            RECORD_MARKER => {}
            END_MARKER => {
                self.finish()?;
                return Ok(None);
            }
            other => {
                return Err(SegmergeError::corrupt(format!(
                    "{}: unknown record marker {other:#04x} at document {}",
                    self.segment, self.next_id
                )));
            }
        }

        if self.next_id >= self.expected_docs {
            return Err(SegmergeError::corrupt(format!(
                "{}: more than {} stored documents",
                self.segment, self.expected_docs
            )));
        }

        let body = reader.read_bytes()?;
        let local_id = self.next_id;
        self.next_id += 1;

        let is_live = !self
            .deletions
            .as_ref()
            .is_some_and(|bitmap| bitmap.is_deleted(local_id));

        Ok(Some(StoredDocument {
            local_id,
            body,
            is_live,
        }))
    }

    fn finish(&mut self) -> Result<()> {
        let Some(mut reader) = self.reader.take() else {
            return Ok(());
        };

        let footer_count = reader.read_u32()?;
        if footer_count != self.next_id || footer_count != self.expected_docs {
            return Err(SegmergeError::corrupt(format!(
                "{}: footer lists {footer_count} documents, read {}, expected {}",
                self.segment, self.next_id, self.expected_docs
            )));
        }
        if !reader.verify_checksum()? {
            return Err(SegmergeError::corrupt(format!(
                "{}: document store checksum mismatch",
                self.segment
            )));
        }
        reader.close()
    }

    /// Release the underlying input without reading further.
    pub fn close(&mut self) -> Result<()> {
        match self.reader.take() {
            Some(reader) => reader.close(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    fn write_store(storage: &MemoryStorage, id: SegmentId, bodies: &[&[u8]]) {
        let mut writer = DocStoreWriter::new(storage.create_output(&id.file_name(DOC_EXT)).unwrap())
            .unwrap();
        for (i, body) in bodies.iter().enumerate() {
            assert_eq!(writer.add(body).unwrap(), i as DocId);
        }
        writer.finish().unwrap();
    }

    fn read_all(reader: &mut DocStoreReader) -> Result<Vec<StoredDocument>> {
        let mut docs = Vec::new();
        while let Some(doc) = reader.next_document()? {
            docs.push(doc);
        }
        Ok(docs)
    }

    #[test]
    fn test_read_documents_with_liveness() {
        let storage = MemoryStorage::new_default();
        let id = SegmentId(1);
        write_store(&storage, id, &[b"a", b"b", b"c"]);

        let mut bitmap = DeletionBitmap::new(id, 3);
        bitmap.delete_document(1).unwrap();

        let mut reader = DocStoreReader::open(&storage, id, 3, Some(Arc::new(bitmap))).unwrap();
        let docs = read_all(&mut reader).unwrap();

        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].body, b"a");
        assert!(docs[0].is_live);
        assert_eq!(docs[1].local_id, 1);
        assert!(!docs[1].is_live);
        assert_eq!(docs[2].body, b"c");
        assert!(reader.next_document().unwrap().is_none());
    }

    #[test]
    fn test_count_mismatch_with_catalog() {
        let storage = MemoryStorage::new_default();
        let id = SegmentId(2);
        write_store(&storage, id, &[b"a", b"b"]);

        let mut reader = DocStoreReader::open(&storage, id, 3, None).unwrap();
        assert!(read_all(&mut reader).unwrap_err().is_corruption());

        let mut reader = DocStoreReader::open(&storage, id, 1, None).unwrap();
        assert!(read_all(&mut reader).unwrap_err().is_corruption());
    }

    #[test]
    fn test_malformed_records() {
        let storage = MemoryStorage::new_default();
        let id = SegmentId(3);
        write_store(&storage, id, &[b"hello", b"world"]);
        let name = id.file_name(DOC_EXT);
        let original = storage.read_all(&name).unwrap();

        // Unknown record marker in place of the first 0x01
        let mut bytes = original.clone();
        bytes[8] = 0x07;
        storage.overwrite(&name, bytes);
        let mut reader = DocStoreReader::open(&storage, id, 2, None).unwrap();
        assert!(read_all(&mut reader).unwrap_err().is_corruption());

        // Truncated in the middle of the second record
        storage.overwrite(&name, original[..18].to_vec());
        let mut reader = DocStoreReader::open(&storage, id, 2, None).unwrap();
        assert!(read_all(&mut reader).unwrap_err().is_corruption());

        // Flipped body byte only shows up in the checksum
        let mut bytes = original.clone();
        bytes[10] ^= 0x20;
        storage.overwrite(&name, bytes);
        let mut reader = DocStoreReader::open(&storage, id, 2, None).unwrap();
        assert!(read_all(&mut reader).unwrap_err().is_corruption());
    }
}
