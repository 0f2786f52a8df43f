//! High-level index maintenance: adding segments and running merges.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::catalog::{Catalog, CatalogSnapshot};
use crate::config::{MergeConfig, MergePolicyConfig};
use crate::error::{Result, SegmergeError};
use crate::merge::coordinator::{CancellationToken, MergeCoordinator, MergeOutcome};
use crate::merge::policy::{MergeCandidate, TieredMergePolicy};
use crate::segment::builder::SegmentBuilder;
use crate::segment::{SegmentId, SegmentMeta};

/// Owns the merge configuration and policy of one index.
pub struct IndexMaintainer {
    catalog: Arc<Catalog>,
    config: MergeConfig,
    policy: TieredMergePolicy,
    cancel: CancellationToken,
}

impl IndexMaintainer {
    pub fn new(
        catalog: Arc<Catalog>,
        config: MergeConfig,
        policy: MergePolicyConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(IndexMaintainer {
            catalog,
            config,
            policy: TieredMergePolicy::new(policy)?,
            cancel: CancellationToken::new(),
        })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Token that cancels every merge started by this maintainer.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Seal `builder` into a new segment and register it.
    pub fn add_segment(&self, builder: SegmentBuilder) -> Result<SegmentMeta> {
        let id = self.catalog.allocate_segment_id()?;
        let sort_fields = self.catalog.sort_fields();
        let built = builder
            .build(
                self.catalog.storage().clone(),
                id,
                &sort_fields,
                self.config.skip_interval,
            )
            .and_then(|meta| {
                self.catalog.register_segment(meta.clone())?;
                Ok(meta)
            });

        match built {
            Ok(meta) => Ok(meta),
            Err(err) => {
                if let Err(cleanup) = self.catalog.rollback_partial(id) {
                    warn!("Failed to remove unregistered segment {id}: {cleanup}");
                }
                Err(err)
            }
        }
    }

    /// Merge candidates for the current catalog, most urgent first.
    pub fn plan(&self) -> Vec<MergeCandidate> {
        self.policy.find_merges(&self.catalog.snapshot())
    }

    /// Merge `segment_ids` against the current catalog and purge the sources.
    pub fn merge(&self, segment_ids: &[SegmentId]) -> Result<MergeOutcome> {
        self.run_merge(&self.catalog.snapshot(), segment_ids)
    }

    /// Like [`merge`](Self::merge), but replans against a fresh snapshot when
    /// the commit loses a race, up to `max_attempts` attempts in total.
    pub fn merge_with_retry(
        &self,
        segment_ids: &[SegmentId],
        max_attempts: usize,
    ) -> Result<MergeOutcome> {
        self.merge_from_snapshot_with_retry(self.catalog.snapshot(), segment_ids, max_attempts)
    }

    /// Retrying merge whose first attempt uses a snapshot the caller planned
    /// against.
    ///
    /// After a `CatalogConflict` the plan keeps only the segments still in
    /// the catalog; if none remain the conflict is returned.
    pub fn merge_from_snapshot_with_retry(
        &self,
        snapshot: CatalogSnapshot,
        segment_ids: &[SegmentId],
        max_attempts: usize,
    ) -> Result<MergeOutcome> {
        let max_attempts = max_attempts.max(1);
        let mut snapshot = snapshot;
        let mut plan = segment_ids.to_vec();
        let mut attempt = 1;

        loop {
            let err = match self.run_merge(&snapshot, &plan) {
                Ok(outcome) => return Ok(outcome),
                Err(err) => err,
            };
            if !err.is_retriable() || attempt >= max_attempts {
                return Err(err);
            }

            snapshot = self.catalog.snapshot();
            plan.retain(|id| snapshot.segment(*id).is_some());
            if plan.is_empty() {
                return Err(err);
            }
            warn!(
                "Merge attempt {attempt} of {max_attempts} conflicted ({err}); \
                 retrying {plan:?} at catalog version {}",
                snapshot.version
            );
            attempt += 1;
        }
    }

    /// Run the most urgent policy candidate, if any.
    pub fn maybe_merge(&self) -> Result<Option<MergeOutcome>> {
        let snapshot = self.catalog.snapshot();
        let Some(candidate) = self.policy.find_merges(&snapshot).into_iter().next() else {
            debug!("No merge needed at catalog version {}", snapshot.version);
            return Ok(None);
        };
        info!(
            "Policy selected {:?} ({:?}, score {:.2})",
            candidate.segments, candidate.reason, candidate.score
        );
        self.run_merge(&snapshot, &candidate.segments).map(Some)
    }

    /// Merge every segment into one.
    ///
    /// Does nothing for an empty index or a single segment without deletions.
    pub fn force_merge(&self) -> Result<Option<MergeOutcome>> {
        let snapshot = self.catalog.snapshot();
        let nothing_to_do = match snapshot.segments.as_slice() {
            [] => true,
            [only] => !only.has_deletions(),
            _ => false,
        };
        if nothing_to_do {
            return Ok(None);
        }
        let ids = snapshot.segment_ids();
        self.run_merge(&snapshot, &ids).map(Some)
    }

    fn run_merge(
        &self,
        snapshot: &CatalogSnapshot,
        segment_ids: &[SegmentId],
    ) -> Result<MergeOutcome> {
        if self.cancel.is_cancelled() {
            return Err(SegmergeError::cancelled("maintenance was cancelled"));
        }
        let mut coordinator = MergeCoordinator::new(self.catalog.clone(), self.config.clone())?
            .with_cancellation(self.cancel.clone());
        let outcome = coordinator.merge(snapshot, segment_ids)?;

        match self.catalog.purge_pending() {
            Ok(purged) => debug!("Purged {} replaced segments", purged.len()),
            Err(err) => warn!("Failed to purge replaced segments: {err}"),
        }
        Ok(outcome)
    }
}
