//! Immutable index segments.
//!
//! A segment is a self-contained file set addressed by local document ids:
//!
//! | extension | content                                   |
//! |-----------|-------------------------------------------|
//! | `.tix`    | term dictionary, one entry per term       |
//! | `.frq`    | frequency stream with per-term skip table |
//! | `.prx`    | position stream                           |
//! | `.doc`    | document store                            |
//! | `.srt`    | per-field sort-maps                       |
//! | `.del`    | deletion bitmap (optional)                |
//!
//! All files share the stem `seg_{id:08}` and end with a CRC32 trailer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod builder;
pub mod deletion;
pub mod doc_store;
pub mod postings;
pub mod reader;
pub mod sort_map;
pub mod term_dict;
pub mod writer;

/// Local or global document id.
pub type DocId = u32;

/// On-disk format version shared by all segment files.
pub const FORMAT_VERSION: u32 = 1;

pub const TERM_DICT_EXT: &str = "tix";
pub const FREQ_EXT: &str = "frq";
pub const POS_EXT: &str = "prx";
pub const DOC_EXT: &str = "doc";
pub const SORT_EXT: &str = "srt";
pub const DEL_EXT: &str = "del";

/// Every extension a segment may own.
pub const SEGMENT_EXTENSIONS: [&str; 6] =
    [TERM_DICT_EXT, FREQ_EXT, POS_EXT, DOC_EXT, SORT_EXT, DEL_EXT];

const SEGMENT_PREFIX: &str = "seg_";

/// Segment sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(pub u64);

impl SegmentId {
    /// File stem shared by every file of this segment.
    pub fn file_stem(&self) -> String {
        format!("{SEGMENT_PREFIX}{:08}", self.0)
    }

    /// Full file name for one of this segment's extensions.
    pub fn file_name(&self, ext: &str) -> String {
        format!("{}.{ext}", self.file_stem())
    }

    /// Names of every file this segment may own, present or not.
    ///
    /// Includes the temporary name used while rewriting the deletion bitmap.
    pub fn all_file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = SEGMENT_EXTENSIONS
            .iter()
            .map(|ext| self.file_name(ext))
            .collect();
        names.push(format!("{}.tmp", self.file_name(DEL_EXT)));
        names
    }

    /// Recover the owning segment id from a file name such as
    /// `seg_00000012.frq`. Returns `None` for files that are not segment files.
    pub fn from_file_name(name: &str) -> Option<SegmentId> {
        let rest = name.strip_prefix(SEGMENT_PREFIX)?;
        let (digits, ext) = rest.split_once('.')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let ext = ext.strip_suffix(".tmp").unwrap_or(ext);
        if !SEGMENT_EXTENSIONS.contains(&ext) {
            return None;
        }
        digits.parse().ok().map(SegmentId)
    }

    /// Parse a user-supplied id, accepting either `12` or `seg_00000012`.
    pub fn parse(text: &str) -> Option<SegmentId> {
        let digits = text.strip_prefix(SEGMENT_PREFIX).unwrap_or(text);
        digits.parse().ok().map(SegmentId)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_stem())
    }
}

/// Catalog-level description of a sealed segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub id: SegmentId,

    /// Number of documents stored, live or deleted.
    pub doc_count: u32,

    /// Number of documents marked in the deletion bitmap.
    pub deleted_count: u32,

    /// Number of entries in the term dictionary.
    pub term_count: u64,

    /// Combined size of the segment files in bytes.
    pub size_bytes: u64,

    pub created_at: DateTime<Utc>,
}

impl SegmentMeta {
    pub fn live_doc_count(&self) -> u32 {
        self.doc_count.saturating_sub(self.deleted_count)
    }

    /// Fraction of stored documents that are deleted.
    pub fn deletion_ratio(&self) -> f64 {
        if self.doc_count == 0 {
            0.0
        } else {
            self.deleted_count as f64 / self.doc_count as f64
        }
    }

    pub fn has_deletions(&self) -> bool {
        self.deleted_count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names() {
        let id = SegmentId(12);
        assert_eq!(id.file_stem(), "seg_00000012");
        assert_eq!(id.file_name(FREQ_EXT), "seg_00000012.frq");
        assert_eq!(id.to_string(), "seg_00000012");
        assert_eq!(id.all_file_names().len(), SEGMENT_EXTENSIONS.len() + 1);
    }

    #[test]
    fn test_from_file_name() {
        assert_eq!(
            SegmentId::from_file_name("seg_00000012.frq"),
            Some(SegmentId(12))
        );
        assert_eq!(
            SegmentId::from_file_name("seg_00000003.del.tmp"),
            Some(SegmentId(3))
        );
        assert_eq!(SegmentId::from_file_name("catalog.json"), None);
        assert_eq!(SegmentId::from_file_name("seg_abc.frq"), None);
        assert_eq!(SegmentId::from_file_name("seg_00000001.txt"), None);
        assert_eq!(SegmentId::from_file_name("seg_.tix"), None);
    }

    #[test]
    fn test_parse() {
        assert_eq!(SegmentId::parse("7"), Some(SegmentId(7)));
        assert_eq!(SegmentId::parse("seg_00000007"), Some(SegmentId(7)));
        assert_eq!(SegmentId::parse("seven"), None);
    }

    #[test]
    fn test_meta_counts() {
        let meta = SegmentMeta {
            id: SegmentId(1),
            doc_count: 10,
            deleted_count: 4,
            term_count: 3,
            size_bytes: 100,
            created_at: Utc::now(),
        };
        assert_eq!(meta.live_doc_count(), 6);
        assert!((meta.deletion_ratio() - 0.4).abs() < f64::EPSILON);
        assert!(meta.has_deletions());
    }
}
