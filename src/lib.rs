//! # segmerge
//!
//! Throttled N-way compaction of immutable full-text index segments.
//!
//! An index is a set of sealed segments listed in a versioned [`catalog`].
//! Each segment stores a sorted term dictionary with postings, a document
//! store, per-field sort-maps and an optional deletion bitmap. A merge
//! streams K segments into one, renumbering live documents densely and
//! dropping deleted ones, and publishes the result with a single atomic
//! catalog commit.
//!
//! ## Features
//!
//! - K-way term merge over streaming posting readers
//! - Fixed-schedule throttling of the term, document and sort-map phases
//! - Atomic, version-checked catalog commits with rollback of partial output
//! - Tiered merge policy and a maintenance front end
//! - Pluggable storage backends (directory or in-memory)
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use segmerge::catalog::Catalog;
//! use segmerge::config::{MergeConfig, MergePolicyConfig};
//! use segmerge::maintenance::IndexMaintainer;
//! use segmerge::segment::builder::{DocumentInput, SegmentBuilder};
//! use segmerge::storage::memory::MemoryStorage;
//! use segmerge::storage::Storage;
//!
//! # fn main() -> segmerge::error::Result<()> {
//! let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
//! let catalog = Arc::new(Catalog::create(storage, vec!["date".to_string()])?);
//! let maintainer =
//!     IndexMaintainer::new(catalog, MergeConfig::unthrottled(), MergePolicyConfig::default())?;
//!
//! let mut ids = Vec::new();
//! for words in [["apple", "pear"], ["pear", "plum"]] {
//!     let mut builder = SegmentBuilder::new();
//!     builder.add_document(DocumentInput::new(words.join(" ")).with_tokens(words));
//!     ids.push(maintainer.add_segment(builder)?.id);
//! }
//!
//! let outcome = maintainer.merge(&ids)?;
//! assert_eq!(outcome.live_doc_count, 2);
//! assert_eq!(outcome.new_segment.term_count, 3);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod merge;
pub mod segment;
pub mod storage;
pub mod util;

pub mod prelude {
    pub use crate::catalog::{Catalog, CatalogSnapshot};
    pub use crate::config::{MergeConfig, MergePolicyConfig, ThrottlePolicy};
    pub use crate::error::{Result, SegmergeError};
    pub use crate::maintenance::IndexMaintainer;
    pub use crate::merge::{CancellationToken, MergeCoordinator, MergeOutcome, MergeState};
    pub use crate::segment::builder::{DocumentInput, SegmentBuilder};
    pub use crate::segment::{DocId, SegmentId, SegmentMeta};
    pub use crate::storage::Storage;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
