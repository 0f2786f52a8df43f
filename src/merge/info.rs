//! Document id remapping for a merge.

use std::sync::Arc;

use crate::error::{Result, SegmergeError};
use crate::segment::deletion::DeletionBitmap;
use crate::segment::{DocId, SegmentId, SegmentMeta};

/// Where one source segment lands in the merged id space.
#[derive(Debug, Clone)]
pub struct SegmentMergeInfo {
    pub segment_id: SegmentId,
    /// Position of the segment in the merge, 0-based, ascending segment id.
    pub ordinal: usize,
    /// First global id assigned to this segment's live documents.
    pub base: DocId,
    pub doc_count: u32,
    pub live_count: u32,
    pub deletions: Option<Arc<DeletionBitmap>>,
    doc_map: Vec<Option<DocId>>,
}

impl SegmentMergeInfo {
    /// Global id of a local document, or `None` if it is deleted.
    pub fn map(&self, local: DocId) -> Result<Option<DocId>> {
        self.doc_map.get(local as usize).copied().ok_or_else(|| {
            SegmergeError::corrupt(format!(
                "{}: document {local} is outside the segment ({} documents)",
                self.segment_id, self.doc_count
            ))
        })
    }

    pub fn is_deleted(&self, local: DocId) -> bool {
        self.deletions
            .as_ref()
            .is_some_and(|bitmap| bitmap.is_deleted(local))
    }
}

/// Doc-id mapping of every segment taking part in a merge.
///
/// Live documents are renumbered densely: segment `i` starts at the sum of
/// the live counts of segments `0..i`, and its live documents keep their
/// relative order.
#[derive(Debug, Clone, Default)]
pub struct MergeInfo {
    segments: Vec<SegmentMergeInfo>,
    total_live: u32,
}

impl MergeInfo {
    /// Build the mapping for segments given in merge order.
    pub fn new<'a, I>(sources: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a SegmentMeta, Option<Arc<DeletionBitmap>>)>,
    {
        let mut segments = Vec::new();
        let mut base: u64 = 0;

        for (ordinal, (meta, deletions)) in sources.into_iter().enumerate() {
            if let Some(bitmap) = &deletions {
                if bitmap.doc_count() != meta.doc_count {
                    return Err(SegmergeError::corrupt(format!(
                        "{}: deletion bitmap covers {} documents, segment has {}",
                        meta.id,
                        bitmap.doc_count(),
                        meta.doc_count
                    )));
                }
            }

            let mut next = base;
            let doc_map: Vec<Option<DocId>> = (0..meta.doc_count)
                .map(|local| {
                    let deleted = deletions
                        .as_ref()
                        .is_some_and(|bitmap| bitmap.is_deleted(local));
                    if deleted {
                        None
                    } else {
                        next += 1;
                        Some((next - 1) as DocId)
                    }
                })
                .collect();

            let live_count = (next - base) as u32;
            if next > DocId::MAX as u64 {
                return Err(SegmergeError::index(
                    "merged segment would exceed the document id space",
                ));
            }

            segments.push(SegmentMergeInfo {
                segment_id: meta.id,
                ordinal,
                base: base as DocId,
                doc_count: meta.doc_count,
                live_count,
                deletions,
                doc_map,
            });
            base = next;
        }

        Ok(MergeInfo {
            segments,
            total_live: base as u32,
        })
    }

    pub fn segment(&self, ordinal: usize) -> Option<&SegmentMergeInfo> {
        self.segments.get(ordinal)
    }

    pub fn segments(&self) -> &[SegmentMergeInfo] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Document count of the merged segment.
    pub fn total_live(&self) -> u32 {
        self.total_live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn meta(id: u64, doc_count: u32, deleted_count: u32) -> SegmentMeta {
        SegmentMeta {
            id: SegmentId(id),
            doc_count,
            deleted_count,
            term_count: 0,
            size_bytes: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_bases_without_deletions() {
        let a = meta(1, 3, 0);
        let b = meta(2, 2, 0);
        let info = MergeInfo::new([(&a, None), (&b, None)]).unwrap();

        assert_eq!(info.len(), 2);
        assert_eq!(info.total_live(), 5);
        let second = info.segment(1).unwrap();
        assert_eq!(second.base, 3);
        assert_eq!(second.ordinal, 1);
        assert_eq!(second.map(0).unwrap(), Some(3));
        assert_eq!(second.map(1).unwrap(), Some(4));
    }

    #[test]
    fn test_deleted_documents_are_skipped_densely() {
        // Segment A has docs 0..3 with doc 1 deleted; B has 2 docs.
        let a = meta(1, 3, 1);
        let mut bitmap = DeletionBitmap::new(a.id, 3);
        bitmap.delete_document(1).unwrap();
        let b = meta(2, 2, 0);

        let info = MergeInfo::new([(&a, Some(Arc::new(bitmap))), (&b, None)]).unwrap();
        let first = info.segment(0).unwrap();
        assert_eq!(first.live_count, 2);
        assert_eq!(first.map(0).unwrap(), Some(0));
        assert_eq!(first.map(1).unwrap(), None);
        assert!(first.is_deleted(1));
        assert_eq!(first.map(2).unwrap(), Some(1));

        let second = info.segment(1).unwrap();
        assert_eq!(second.base, 2);
        assert_eq!(second.map(1).unwrap(), Some(3));
        assert_eq!(info.total_live(), 4);
    }

    #[test]
    fn test_out_of_range_local_id_is_corruption() {
        let a = meta(1, 2, 0);
        let info = MergeInfo::new([(&a, None)]).unwrap();
        assert!(info.segment(0).unwrap().map(2).unwrap_err().is_corruption());
    }

    #[test]
    fn test_bitmap_size_mismatch() {
        let a = meta(1, 4, 0);
        let bitmap = DeletionBitmap::new(a.id, 2);
        assert!(MergeInfo::new([(&a, Some(Arc::new(bitmap)))]).is_err());
    }

    #[test]
    fn test_fully_deleted_segment() {
        let a = meta(1, 2, 2);
        let mut bitmap = DeletionBitmap::new(a.id, 2);
        bitmap.delete_document(0).unwrap();
        bitmap.delete_document(1).unwrap();
        let b = meta(2, 1, 0);

        let info = MergeInfo::new([(&a, Some(Arc::new(bitmap))), (&b, None)]).unwrap();
        assert_eq!(info.segment(0).unwrap().live_count, 0);
        assert_eq!(info.segment(1).unwrap().base, 0);
        assert_eq!(info.total_live(), 1);
    }
}
