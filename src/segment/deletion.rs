//! Per-segment deletion bitmaps (`.del`).
//!
//! Segments are immutable, so deleting a document only sets its bit in the
//! bitmap; the document disappears physically when the segment is merged.

use bit_vec::BitVec;

use crate::error::{Result, SegmergeError};
use crate::segment::{DEL_EXT, DocId, FORMAT_VERSION, SegmentId};
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};

/// Magic number for deletion bitmap files ("DELB").
pub const DELETION_MAGIC: u32 = 0x44454C42;

/// A bitmap-based deletion tracker for a segment.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletionBitmap {
    /// Segment this bitmap belongs to.
    segment_id: SegmentId,

    /// Bitmap of deleted documents (bit set = deleted).
    deleted_docs: BitVec,

    /// Number of deleted documents.
    deleted_count: u32,
}

impl DeletionBitmap {
    /// Create an empty bitmap for a segment of `doc_count` documents.
    pub fn new(segment_id: SegmentId, doc_count: u32) -> Self {
        DeletionBitmap {
            segment_id,
            deleted_docs: BitVec::from_elem(doc_count as usize, false),
            deleted_count: 0,
        }
    }

    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// Mark a document as deleted. Returns `false` if it already was.
    pub fn delete_document(&mut self, doc_id: DocId) -> Result<bool> {
        if doc_id as usize >= self.deleted_docs.len() {
            return Err(SegmergeError::index(format!(
                "document {doc_id} out of range for {} ({} documents)",
                self.segment_id,
                self.deleted_docs.len()
            )));
        }

        let was_already_deleted = self.deleted_docs.get(doc_id as usize).unwrap_or(false);
        if !was_already_deleted {
            self.deleted_docs.set(doc_id as usize, true);
            self.deleted_count += 1;
        }

        Ok(!was_already_deleted)
    }

    /// Check if a document is deleted. Out-of-range ids are reported live.
    pub fn is_deleted(&self, doc_id: DocId) -> bool {
        self.deleted_docs.get(doc_id as usize).unwrap_or(false)
    }

    pub fn doc_count(&self) -> u32 {
        self.deleted_docs.len() as u32
    }

    pub fn deleted_count(&self) -> u32 {
        self.deleted_count
    }

    /// Get number of live (non-deleted) documents.
    pub fn live_count(&self) -> u32 {
        self.doc_count() - self.deleted_count
    }

    /// Get all deleted document IDs.
    pub fn deleted_docs(&self) -> Vec<DocId> {
        self.deleted_docs
            .iter()
            .enumerate()
            .filter(|(_, bit)| *bit)
            .map(|(i, _)| i as DocId)
            .collect()
    }

    /// Persist the bitmap as `seg_XXXXXXXX.del`.
    ///
    /// The file is written under a temporary name and renamed into place.
    pub fn write_to_storage(&self, storage: &dyn Storage) -> Result<u64> {
        let name = self.segment_id.file_name(DEL_EXT);
        let temp_name = format!("{name}.tmp");

        let mut writer = StructWriter::new(storage.create_output(&temp_name)?);
        writer.write_u32(DELETION_MAGIC)?;
        writer.write_u32(FORMAT_VERSION)?;
        writer.write_u64(self.doc_count() as u64)?;
        writer.write_u64(self.deleted_count as u64)?;
        writer.write_bytes(&self.deleted_docs.to_bytes())?;
        let size = writer.close()?;

        storage.rename_file(&temp_name, &name)?;
        Ok(size)
    }

    /// Load the bitmap of a segment, or `None` if it has no deletions file.
    ///
    /// `doc_count` is the segment's document count as recorded in the catalog.
    pub fn read_from_storage(
        storage: &dyn Storage,
        segment_id: SegmentId,
        doc_count: u32,
    ) -> Result<Option<Self>> {
        let name = segment_id.file_name(DEL_EXT);
        if !storage.file_exists(&name) {
            return Ok(None);
        }

        let mut reader = StructReader::new(storage.open_input(&name)?)?;

        let magic = reader.read_u32()?;
        if magic != DELETION_MAGIC {
            return Err(SegmergeError::corrupt(format!(
                "{name}: invalid deletion bitmap magic {magic:#010x}"
            )));
        }
        let version = reader.read_u32()?;
        if version != FORMAT_VERSION {
            return Err(SegmergeError::corrupt(format!(
                "{name}: unsupported bitmap version {version}"
            )));
        }

        let stored_docs = reader.read_u64()?;
        let stored_deleted = reader.read_u64()?;
        let bitmap_bytes = reader.read_bytes()?;
        if !reader.verify_checksum()? {
            return Err(SegmergeError::corrupt(format!("{name}: checksum mismatch")));
        }
        reader.close()?;

        if stored_docs != doc_count as u64 {
            return Err(SegmergeError::corrupt(format!(
                "{name}: bitmap covers {stored_docs} documents, segment has {doc_count}"
            )));
        }

        let mut deleted_docs = BitVec::from_bytes(&bitmap_bytes);
        if deleted_docs.len() < doc_count as usize {
            return Err(SegmergeError::corrupt(format!("{name}: bitmap too short")));
        }
        deleted_docs.truncate(doc_count as usize);

        let deleted_count = deleted_docs.iter().filter(|bit| *bit).count() as u32;
        if deleted_count as u64 != stored_deleted {
            return Err(SegmergeError::corrupt(format!(
                "{name}: header lists {stored_deleted} deletions, bitmap has {deleted_count}"
            )));
        }

        Ok(Some(DeletionBitmap {
            segment_id,
            deleted_docs,
            deleted_count,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_delete_documents() {
        let mut bitmap = DeletionBitmap::new(SegmentId(1), 10);
        assert_eq!(bitmap.live_count(), 10);

        assert!(bitmap.delete_document(3).unwrap());
        assert!(bitmap.delete_document(7).unwrap());
        assert!(!bitmap.delete_document(3).unwrap());

        assert!(bitmap.is_deleted(3));
        assert!(!bitmap.is_deleted(4));
        assert!(!bitmap.is_deleted(99));
        assert_eq!(bitmap.deleted_count(), 2);
        assert_eq!(bitmap.live_count(), 8);
        assert_eq!(bitmap.deleted_docs(), vec![3, 7]);

        assert!(bitmap.delete_document(10).is_err());
    }

    #[test]
    fn test_storage_round_trip() {
        let storage = MemoryStorage::new_default();
        let mut bitmap = DeletionBitmap::new(SegmentId(2), 13);
        bitmap.delete_document(0).unwrap();
        bitmap.delete_document(12).unwrap();
        bitmap.write_to_storage(&storage).unwrap();

        assert!(!storage.file_exists("seg_00000002.del.tmp"));

        let loaded = DeletionBitmap::read_from_storage(&storage, SegmentId(2), 13)
            .unwrap()
            .unwrap();
        assert_eq!(loaded, bitmap);
    }

    #[test]
    fn test_missing_file_means_no_deletions() {
        let storage = MemoryStorage::new_default();
        let loaded = DeletionBitmap::read_from_storage(&storage, SegmentId(9), 4).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_doc_count_mismatch_is_corruption() {
        let storage = MemoryStorage::new_default();
        DeletionBitmap::new(SegmentId(3), 5)
            .write_to_storage(&storage)
            .unwrap();

        let err = DeletionBitmap::read_from_storage(&storage, SegmentId(3), 6).unwrap_err();
        assert!(err.is_corruption());
    }
}
