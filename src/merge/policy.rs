//! Choosing which segments to merge.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::catalog::CatalogSnapshot;
use crate::config::MergePolicyConfig;
use crate::error::Result;
use crate::segment::{SegmentId, SegmentMeta};

/// Why a merge was proposed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeReason {
    /// A tier holds too many segments.
    TierOverflow { tier: u32 },

    /// A segment is dominated by deleted documents.
    Deletions { ratio: f64 },
}

/// A set of segments worth merging together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeCandidate {
    /// Segments to merge, ascending id.
    pub segments: Vec<SegmentId>,

    /// Priority score (higher = more urgent).
    pub score: f64,

    /// Live documents in the merged segment.
    pub estimated_live_docs: u64,

    pub reason: MergeReason,
}

/// Tiered merge policy keyed on live document counts.
///
/// Tier 0 holds segments of up to `floor_segment_docs` live documents, and
/// every following tier is `tier_factor` times larger. A tier with at least
/// `segments_per_tier` segments yields a merge of its smallest members.
/// Segments whose deletion ratio exceeds `max_deletion_ratio` are rewritten
/// on their own.
#[derive(Debug, Clone)]
pub struct TieredMergePolicy {
    config: MergePolicyConfig,
}

impl TieredMergePolicy {
    pub fn new(config: MergePolicyConfig) -> Result<Self> {
        config.validate()?;
        Ok(TieredMergePolicy { config })
    }

    pub fn config(&self) -> &MergePolicyConfig {
        &self.config
    }

    pub fn tier_of(&self, live_docs: u64) -> u32 {
        let mut tier = 0;
        let mut ceiling = self.config.floor_segment_docs;
        while live_docs > ceiling {
            tier += 1;
            ceiling = ceiling.saturating_mul(self.config.tier_factor);
        }
        tier
    }

    /// Proposed merges, most urgent first. Candidates never overlap.
    pub fn find_merges(&self, snapshot: &CatalogSnapshot) -> Vec<MergeCandidate> {
        let mut tiers: BTreeMap<u32, Vec<&SegmentMeta>> = BTreeMap::new();
        for meta in &snapshot.segments {
            tiers
                .entry(self.tier_of(meta.live_doc_count() as u64))
                .or_default()
                .push(meta);
        }

        let mut candidates = Vec::new();
        let mut claimed: Vec<SegmentId> = Vec::new();

        for (tier, mut members) in tiers {
            if members.len() < self.config.segments_per_tier {
                continue;
            }
            members.sort_by_key(|meta| (meta.live_doc_count(), meta.id));
            let group = &members[..members.len().min(self.config.max_merge_at_once)];

            let overflow = members.len() as f64 / self.config.segments_per_tier as f64;
            candidates.push(candidate(
                group,
                overflow + 1.0 / (tier as f64 + 1.0),
                MergeReason::TierOverflow { tier },
            ));
            claimed.extend(group.iter().map(|meta| meta.id));
        }

        for meta in &snapshot.segments {
            let ratio = meta.deletion_ratio();
            if ratio > self.config.max_deletion_ratio && !claimed.contains(&meta.id) {
                candidates.push(candidate(
                    &[meta],
                    ratio * 10.0,
                    MergeReason::Deletions { ratio },
                ));
            }
        }

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates
    }
}

fn candidate(group: &[&SegmentMeta], score: f64, reason: MergeReason) -> MergeCandidate {
    let mut segments: Vec<SegmentId> = group.iter().map(|meta| meta.id).collect();
    segments.sort_unstable();
    MergeCandidate {
        segments,
        score,
        estimated_live_docs: group.iter().map(|meta| meta.live_doc_count() as u64).sum(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn segment(id: u64, doc_count: u32, deleted_count: u32) -> SegmentMeta {
        SegmentMeta {
            id: SegmentId(id),
            doc_count,
            deleted_count,
            term_count: 1,
            size_bytes: 100,
            created_at: Utc::now(),
        }
    }

    fn snapshot(segments: Vec<SegmentMeta>) -> CatalogSnapshot {
        CatalogSnapshot {
            version: 1,
            segments,
            sort_fields: Vec::new(),
        }
    }

    fn policy() -> TieredMergePolicy {
        TieredMergePolicy::new(MergePolicyConfig {
            segments_per_tier: 3,
            max_merge_at_once: 4,
            floor_segment_docs: 100,
            tier_factor: 10,
            max_deletion_ratio: 0.5,
        })
        .unwrap()
    }

    #[test]
    fn test_tier_of() {
        let policy = policy();
        assert_eq!(policy.tier_of(0), 0);
        assert_eq!(policy.tier_of(100), 0);
        assert_eq!(policy.tier_of(101), 1);
        assert_eq!(policy.tier_of(1_000), 1);
        assert_eq!(policy.tier_of(1_001), 2);
        assert_eq!(policy.tier_of(u64::MAX), 18);
    }

    #[test]
    fn test_no_merge_below_threshold() {
        let snapshot = snapshot(vec![segment(1, 10, 0), segment(2, 20, 0)]);
        assert!(policy().find_merges(&snapshot).is_empty());
    }

    #[test]
    fn test_tier_overflow_takes_smallest() {
        let snapshot = snapshot(vec![
            segment(1, 50, 0),
            segment(2, 10, 0),
            segment(3, 30, 0),
            segment(4, 20, 0),
            segment(5, 40, 0),
            segment(6, 5_000, 0),
        ]);
        let candidates = policy().find_merges(&snapshot);
        assert_eq!(candidates.len(), 1);
        let candidate = &candidates[0];
        assert_eq!(candidate.reason, MergeReason::TierOverflow { tier: 0 });
        assert_eq!(
            candidate.segments,
            vec![SegmentId(2), SegmentId(3), SegmentId(4), SegmentId(5)]
        );
        assert_eq!(candidate.estimated_live_docs, 100);
    }

    #[test]
    fn test_deletion_heavy_segments() {
        // Live counts 100, 4000 and 90 keep tier 0 below its limit.
        let snapshot = snapshot(vec![
            segment(1, 1_000, 900),
            segment(2, 10_000, 6_000),
            segment(3, 100, 10),
        ]);
        let candidates = policy().find_merges(&snapshot);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].segments, vec![SegmentId(1)]);
        assert_eq!(candidates[1].segments, vec![SegmentId(2)]);
        assert!(candidates[0].score > candidates[1].score);
    }

    #[test]
    fn test_candidates_do_not_overlap() {
        let snapshot = snapshot(vec![
            segment(1, 10, 8),
            segment(2, 10, 0),
            segment(3, 10, 0),
        ]);
        let candidates = policy().find_merges(&snapshot);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].segments.len(), 3);
    }
}
