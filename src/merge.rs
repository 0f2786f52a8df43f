//! Merging sealed segments into one.
//!
//! A merge reads K source segments as streams and writes a single new
//! segment holding every live document exactly once:
//!
//! - [`info`] assigns each source a base in the merged id space and maps
//!   local document ids to global ones, dropping deleted documents.
//! - [`coordinator`] drives the merge through its phases and publishes the
//!   result through the catalog.
//! - [`throttle`] paces the merge so it does not starve foreground work.
//! - [`policy`] decides which segments are worth merging.

pub mod coordinator;
pub mod info;
pub mod policy;
pub mod throttle;

pub use coordinator::{
    CancellationToken, MergeCoordinator, MergeOutcome, MergeState, MergeStats,
};
pub use info::{MergeInfo, SegmentMergeInfo};
pub use policy::{MergeCandidate, MergeReason, TieredMergePolicy};
pub use throttle::Throttle;
