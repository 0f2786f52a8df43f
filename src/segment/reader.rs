//! Opening a sealed segment for reading.

use std::sync::Arc;

use serde::Serialize;

use crate::error::{Result, SegmergeError};
use crate::segment::deletion::DeletionBitmap;
use crate::segment::doc_store::DocStoreReader;
use crate::segment::postings::PostingStreamReader;
use crate::segment::sort_map::SortMapReader;
use crate::segment::{SegmentId, SegmentMeta};
use crate::storage::Storage;

/// The reader triple of one segment plus its deletion bitmap.
pub struct SegmentReaders {
    pub meta: SegmentMeta,
    pub postings: PostingStreamReader,
    pub documents: DocStoreReader,
    pub sort_maps: SortMapReader,
    pub deletions: Option<Arc<DeletionBitmap>>,
}

impl SegmentReaders {
    /// Open every reader of the segment described by `meta`.
    pub fn open(storage: &dyn Storage, meta: &SegmentMeta) -> Result<Self> {
        let deletions = DeletionBitmap::read_from_storage(storage, meta.id, meta.doc_count)?;
        let stored_deleted = deletions.as_ref().map_or(0, DeletionBitmap::deleted_count);
        if stored_deleted != meta.deleted_count {
            return Err(SegmergeError::corrupt(format!(
                "{}: catalog lists {} deletions, bitmap has {stored_deleted}",
                meta.id, meta.deleted_count
            )));
        }
        let deletions = deletions.map(Arc::new);

        let postings = PostingStreamReader::open(storage, meta.id)?;
        let documents = DocStoreReader::open(storage, meta.id, meta.doc_count, deletions.clone())?;
        let sort_maps = SortMapReader::open(storage, meta.id)?;

        Ok(SegmentReaders {
            meta: meta.clone(),
            postings,
            documents,
            sort_maps,
            deletions,
        })
    }

    pub fn id(&self) -> SegmentId {
        self.meta.id
    }

    pub fn is_deleted(&self, doc_id: u32) -> bool {
        self.deletions
            .as_ref()
            .is_some_and(|bitmap| bitmap.is_deleted(doc_id))
    }

    /// Release open inputs.
    pub fn close(&mut self) -> Result<()> {
        let postings = self.postings.close();
        let documents = self.documents.close();
        postings.and(documents)
    }
}

/// Result of a full scan of one segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SegmentSummary {
    pub term_count: u64,
    pub posting_count: u64,
    pub doc_count: u32,
    pub live_doc_count: u32,
    pub sort_fields: Vec<String>,
}

/// Decode every term, posting, document and sort-map of a segment.
///
/// Any structural damage surfaces as `CorruptSegment`. Postings and sort
/// arrays must reference documents inside the segment.
pub fn scan_segment(storage: &dyn Storage, meta: &SegmentMeta) -> Result<SegmentSummary> {
    let mut readers = SegmentReaders::open(storage, meta)?;
    let mut summary = SegmentSummary {
        sort_fields: readers.sort_maps.fields().to_vec(),
        ..Default::default()
    };

    while readers.postings.advance_term()?.is_some() {
        let postings = readers.postings.read_postings_for_current_term()?;
        if let Some(last) = postings.last() {
            if last.doc_id >= meta.doc_count {
                return Err(SegmergeError::corrupt(format!(
                    "{}: posting references document {} of {}",
                    meta.id, last.doc_id, meta.doc_count
                )));
            }
        }
        summary.term_count += 1;
        summary.posting_count += postings.len() as u64;
    }

    while let Some(document) = readers.documents.next_document()? {
        summary.doc_count += 1;
        if document.is_live {
            summary.live_doc_count += 1;
        }
    }

    for field in readers.sort_maps.fields() {
        let ids = readers.sort_maps.doc_ids(field)?;
        if let Some(bad) = ids.iter().find(|&&doc_id| doc_id >= meta.doc_count) {
            return Err(SegmergeError::corrupt(format!(
                "{}: sort-map '{field}' references document {bad} of {}",
                meta.id, meta.doc_count
            )));
        }
    }

    if summary.term_count != meta.term_count {
        return Err(SegmergeError::corrupt(format!(
            "{}: catalog lists {} terms, dictionary has {}",
            meta.id, meta.term_count, summary.term_count
        )));
    }

    readers.close()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::builder::{DocumentInput, SegmentBuilder};
    use crate::storage::memory::MemoryStorage;

    fn build(storage: &Arc<dyn Storage>) -> SegmentMeta {
        let mut builder = SegmentBuilder::new();
        builder.add_document(DocumentInput::new("a").with_tokens(["cat"]).with_sort_key("n", 2));
        builder.add_document(DocumentInput::new("b").with_tokens(["cat", "dog"]).with_sort_key("n", 1));
        builder
            .build(storage.clone(), SegmentId(1), &["n".to_string()], 16)
            .unwrap()
    }

    #[test]
    fn test_scan_segment() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let meta = build(&storage);

        let summary = scan_segment(storage.as_ref(), &meta).unwrap();
        assert_eq!(summary.term_count, 2);
        assert_eq!(summary.posting_count, 3);
        assert_eq!(summary.doc_count, 2);
        assert_eq!(summary.live_doc_count, 2);
        assert_eq!(summary.sort_fields, vec!["n".to_string()]);
    }

    #[test]
    fn test_open_with_deletions() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut meta = build(&storage);

        let mut bitmap = DeletionBitmap::new(meta.id, meta.doc_count);
        bitmap.delete_document(0).unwrap();
        bitmap.write_to_storage(storage.as_ref()).unwrap();

        // Catalog still believes there are no deletions
        assert!(SegmentReaders::open(storage.as_ref(), &meta).err().unwrap().is_corruption());

        meta.deleted_count = 1;
        let readers = SegmentReaders::open(storage.as_ref(), &meta).unwrap();
        assert!(readers.is_deleted(0));
        assert!(!readers.is_deleted(1));

        let summary = scan_segment(storage.as_ref(), &meta).unwrap();
        assert_eq!(summary.live_doc_count, 1);
    }

    #[test]
    fn test_term_count_mismatch() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut meta = build(&storage);
        meta.term_count = 5;
        assert!(scan_segment(storage.as_ref(), &meta).unwrap_err().is_corruption());
    }
}
