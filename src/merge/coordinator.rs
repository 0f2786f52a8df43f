//! The merge state machine.
//!
//! ```text
//! Init -> MergingTerms -> MergingDocs -> MergingSortMaps -> Flushing -> Committed
//!   \__________\______________\______________\________________\------> Aborted
//! ```
//!
//! A coordinator runs exactly one merge. Every failure, including a lost
//! commit race, moves it to `Aborted`, deletes the partial output and hands
//! the original error back to the caller.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::catalog::{Catalog, CatalogSnapshot};
use crate::config::MergeConfig;
use crate::error::{Result, SegmergeError};
use crate::merge::info::MergeInfo;
use crate::merge::throttle::Throttle;
use crate::segment::postings::PostingStreamReader;
use crate::segment::reader::{SegmentReaders, scan_segment};
use crate::segment::sort_map::decode_doc_ids;
use crate::segment::writer::SegmentWriter;
use crate::segment::{SegmentId, SegmentMeta};
use crate::storage::Storage;

/// Phase of a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MergeState {
    Init,
    MergingTerms,
    MergingDocs,
    MergingSortMaps,
    Flushing,
    Committed,
    Aborted,
}

impl MergeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MergeState::Committed | MergeState::Aborted)
    }
}

impl fmt::Display for MergeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MergeState::Init => "init",
            MergeState::MergingTerms => "merging-terms",
            MergeState::MergingDocs => "merging-docs",
            MergeState::MergingSortMaps => "merging-sortmaps",
            MergeState::Flushing => "flushing",
            MergeState::Committed => "committed",
            MergeState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Shared flag for stopping a running merge from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters collected while merging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub segments_merged: usize,
    /// Terms written to the new dictionary.
    pub terms_merged: u64,
    /// Terms whose postings all belonged to deleted documents.
    pub terms_dropped: u64,
    pub postings_merged: u64,
    pub docs_merged: u64,
    pub deleted_docs_removed: u64,
    pub throttle_pauses: u64,
    pub elapsed_ms: u64,
}

/// Result of a committed merge.
#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub merge_id: Uuid,
    pub new_segment: SegmentMeta,
    pub live_doc_count: u32,
    /// Source segments, now pending deletion.
    pub consumed: Vec<SegmentId>,
    /// Catalog version that published the new segment.
    pub catalog_version: u64,
    pub stats: MergeStats,
}

/// Min-heap key: current term of a source, then its ordinal.
type HeapEntry = Reverse<(String, usize)>;

/// Per-source progress of the term merge.
struct SegmentMergeState {
    ordinal: usize,
    current_term: Option<String>,
    done: bool,
}

impl SegmentMergeState {
    fn new(ordinal: usize) -> Self {
        SegmentMergeState {
            ordinal,
            current_term: None,
            done: false,
        }
    }

    /// Move to the next term, returning its heap entry.
    fn advance(&mut self, postings: &mut PostingStreamReader) -> Result<Option<HeapEntry>> {
        if self.done {
            return Ok(None);
        }
        match postings.advance_term()? {
            Some(cursor) => {
                self.current_term = Some(cursor.term.clone());
                Ok(Some(Reverse((cursor.term, self.ordinal))))
            }
            None => {
                self.current_term = None;
                self.done = true;
                Ok(None)
            }
        }
    }
}

/// Runs one merge of sealed segments into a new segment.
pub struct MergeCoordinator {
    catalog: Arc<Catalog>,
    storage: Arc<dyn Storage>,
    config: MergeConfig,
    cancel: CancellationToken,
    state: MergeState,
    merge_id: Uuid,
}

impl MergeCoordinator {
    pub fn new(catalog: Arc<Catalog>, config: MergeConfig) -> Result<Self> {
        config.validate()?;
        let storage = catalog.storage().clone();
        Ok(MergeCoordinator {
            catalog,
            storage,
            config,
            cancel: CancellationToken::new(),
            state: MergeState::Init,
            merge_id: Uuid::new_v4(),
        })
    }

    /// Observe `token` between terms, documents and sort fields.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> MergeState {
        self.state
    }

    pub fn merge_id(&self) -> Uuid {
        self.merge_id
    }

    /// Merge `segment_ids`, as listed in `snapshot`, into one new segment.
    ///
    /// The new segment is committed only if the catalog is still at
    /// `snapshot.version`; otherwise the merge aborts with `CatalogConflict`
    /// and the caller may replan against a fresh snapshot.
    pub fn merge(
        &mut self,
        snapshot: &CatalogSnapshot,
        segment_ids: &[SegmentId],
    ) -> Result<MergeOutcome> {
        if self.state != MergeState::Init {
            return Err(SegmergeError::index(format!(
                "merge {} already ran (state {})",
                self.merge_id, self.state
            )));
        }
        let started = Instant::now();

        let sources = match self
            .ensure_current(snapshot)
            .and_then(|()| resolve_sources(snapshot, segment_ids))
        {
            Ok(sources) => sources,
            Err(err) => {
                self.abort_state();
                return Err(err);
            }
        };
        let new_id = match self.catalog.allocate_segment_id() {
            Ok(id) => id,
            Err(err) => {
                self.abort_state();
                return Err(err);
            }
        };
        info!(
            "Merge {} started: {} segments -> {new_id}",
            self.merge_id,
            sources.len()
        );

        let mut readers = Vec::with_capacity(sources.len());
        let result = self.run(snapshot, &sources, new_id, &mut readers, started);

        for reader in &mut readers {
            if let Err(err) = reader.close() {
                warn!("Failed to close readers of {}: {err}", reader.id());
            }
        }

        match result {
            Ok(outcome) => {
                info!(
                    "Merge {} committed {new_id}: {} live docs, {} terms in {} ms",
                    self.merge_id,
                    outcome.live_doc_count,
                    outcome.stats.terms_merged,
                    outcome.stats.elapsed_ms
                );
                Ok(outcome)
            }
            Err(err) => {
                let err = self.conflict_if_moved(snapshot, err);
                let failed_in = self.state;
                self.abort_state();
                if let Err(cleanup) = self.catalog.rollback_partial(new_id) {
                    warn!("Failed to remove partial segment {new_id}: {cleanup}");
                }
                warn!("Merge {} aborted in {failed_in}: {err}", self.merge_id);
                Err(err)
            }
        }
    }

    fn run(
        &mut self,
        snapshot: &CatalogSnapshot,
        sources: &[SegmentMeta],
        new_id: SegmentId,
        readers: &mut Vec<SegmentReaders>,
        started: Instant,
    ) -> Result<MergeOutcome> {
        for meta in sources {
            readers.push(SegmentReaders::open(self.storage.as_ref(), meta)?);
        }
        let info = MergeInfo::new(
            readers
                .iter()
                .map(|reader| (&reader.meta, reader.deletions.clone())),
        )?;
        let mut writer =
            SegmentWriter::create(self.storage.clone(), new_id, self.config.skip_interval)?;
        let mut stats = MergeStats {
            segments_merged: sources.len(),
            ..Default::default()
        };

        self.transition(MergeState::MergingTerms);
        self.merge_terms(readers, &info, &mut writer, &mut stats)?;

        self.transition(MergeState::MergingDocs);
        self.merge_documents(readers, &info, &mut writer, &mut stats)?;

        self.transition(MergeState::MergingSortMaps);
        self.merge_sort_maps(readers, &info, &snapshot.sort_fields, &mut writer, &mut stats)?;

        self.transition(MergeState::Flushing);
        let new_segment = writer.finish()?;
        let live_doc_count = info.total_live();
        if new_segment.doc_count != live_doc_count {
            return Err(SegmergeError::index(format!(
                "{new_id}: wrote {} documents, expected {live_doc_count}",
                new_segment.doc_count
            )));
        }
        if self.config.verify_after_merge {
            self.verify(&new_segment, &stats)?;
        }
        self.check_cancelled()?;

        let consumed: Vec<SegmentId> = sources.iter().map(|meta| meta.id).collect();
        let catalog_version = self
            .catalog
            .commit(snapshot.version, new_segment.clone(), &consumed)?;
        self.transition(MergeState::Committed);

        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(MergeOutcome {
            merge_id: self.merge_id,
            new_segment,
            live_doc_count,
            consumed,
            catalog_version,
            stats,
        })
    }

    fn merge_terms(
        &self,
        readers: &mut [SegmentReaders],
        info: &MergeInfo,
        writer: &mut SegmentWriter,
        stats: &mut MergeStats,
    ) -> Result<()> {
        let mut throttle = Throttle::new(
            "term",
            self.config.throttle.delay(),
            self.config.throttle.batch_factor,
        );
        let mut states: Vec<SegmentMergeState> =
            (0..readers.len()).map(SegmentMergeState::new).collect();

        // Ties on a term pop in source order.
        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(readers.len());
        for (state, reader) in states.iter_mut().zip(readers.iter_mut()) {
            if let Some(entry) = state.advance(&mut reader.postings)? {
                heap.push(entry);
            }
        }

        let mut contributors = Vec::with_capacity(readers.len());
        while let Some(Reverse((term, first))) = heap.pop() {
            self.check_cancelled()?;

            contributors.clear();
            contributors.push(first);
            while heap
                .peek()
                .is_some_and(|Reverse((next, _))| *next == term)
            {
                if let Some(Reverse((_, ordinal))) = heap.pop() {
                    contributors.push(ordinal);
                }
            }
            contributors.sort_unstable();

            for &ordinal in &contributors {
                let segment = info.segment(ordinal).ok_or_else(|| {
                    SegmergeError::index(format!("no merge info for source {ordinal}"))
                })?;
                debug_assert_eq!(states[ordinal].current_term.as_deref(), Some(term.as_str()));
                let reader = &mut readers[ordinal];
                for posting in reader.postings.read_postings(&term)? {
                    if let Some(global) = segment.map(posting.doc_id)? {
                        writer.add_posting(global, &posting.positions)?;
                        stats.postings_merged += 1;
                    }
                }
                if let Some(entry) = states[ordinal].advance(&mut reader.postings)? {
                    heap.push(entry);
                }
            }

            match writer.finish_term(&term)? {
                Some(_) => stats.terms_merged += 1,
                None => stats.terms_dropped += 1,
            }
            if throttle.tick() {
                stats.throttle_pauses += 1;
            }
        }

        debug!(
            "Merge {}: {} terms merged, {} dropped, {} postings",
            self.merge_id, stats.terms_merged, stats.terms_dropped, stats.postings_merged
        );
        Ok(())
    }

    fn merge_documents(
        &self,
        readers: &mut [SegmentReaders],
        info: &MergeInfo,
        writer: &mut SegmentWriter,
        stats: &mut MergeStats,
    ) -> Result<()> {
        writer.begin_documents()?;
        let mut throttle = Throttle::new(
            "document",
            self.config.throttle.delay(),
            self.config.doc_batch_size(),
        );

        for (segment, reader) in info.segments().iter().zip(readers.iter_mut()) {
            while let Some(document) = reader.documents.next_document()? {
                self.check_cancelled()?;
                match segment.map(document.local_id)? {
                    Some(global) => {
                        let written = writer.add_document(&document.body)?;
                        if written != global {
                            return Err(SegmergeError::index(format!(
                                "{}: document {} landed at {written}, expected {global}",
                                segment.segment_id, document.local_id
                            )));
                        }
                        stats.docs_merged += 1;
                    }
                    None => stats.deleted_docs_removed += 1,
                }
                if throttle.tick() {
                    stats.throttle_pauses += 1;
                }
            }
        }

        debug!(
            "Merge {}: {} documents copied, {} deleted dropped",
            self.merge_id, stats.docs_merged, stats.deleted_docs_removed
        );
        Ok(())
    }

    fn merge_sort_maps(
        &self,
        readers: &[SegmentReaders],
        info: &MergeInfo,
        sort_fields: &[String],
        writer: &mut SegmentWriter,
        stats: &mut MergeStats,
    ) -> Result<()> {
        writer.begin_sort_maps()?;
        let mut throttle = Throttle::new("sort-map", self.config.sortmap_pause(), 1);

        for (i, field) in sort_fields.iter().enumerate() {
            self.check_cancelled()?;
            if i > 0 {
                throttle.pause();
                stats.throttle_pauses += 1;
            }

            let mut merged = Vec::new();
            for (segment, reader) in info.segments().iter().zip(readers) {
                let Some(region) = reader.sort_maps.read_field_sortmap(field) else {
                    continue;
                };
                for local in decode_doc_ids(reader.sort_maps.read_region(region)?)? {
                    if let Some(global) = segment.map(local)? {
                        merged.push(global);
                    }
                }
            }
            writer.append_sort_map(field, &merged)?;
        }
        Ok(())
    }

    fn verify(&self, new_segment: &SegmentMeta, stats: &MergeStats) -> Result<()> {
        let summary = scan_segment(self.storage.as_ref(), new_segment)?;
        if summary.live_doc_count != new_segment.doc_count
            || summary.term_count != stats.terms_merged
            || summary.posting_count != stats.postings_merged
        {
            return Err(SegmergeError::index(format!(
                "{}: verification found {} docs, {} terms, {} postings; \
                 expected {}, {}, {}",
                new_segment.id,
                summary.live_doc_count,
                summary.term_count,
                summary.posting_count,
                new_segment.doc_count,
                stats.terms_merged,
                stats.postings_merged
            )));
        }
        Ok(())
    }

    /// Refuse a snapshot the catalog has already moved past.
    fn ensure_current(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        let current = self.catalog.version();
        if current != snapshot.version {
            return Err(SegmergeError::catalog_conflict(format!(
                "planned against catalog version {}, catalog is at {current}",
                snapshot.version
            )));
        }
        Ok(())
    }

    /// Report a failure as a conflict when the catalog moved while the merge
    /// ran. Deletions rewrite bitmaps and purges remove source files, so the
    /// sources no longer match the snapshot.
    fn conflict_if_moved(&self, snapshot: &CatalogSnapshot, err: SegmergeError) -> SegmergeError {
        if err.is_retriable() || matches!(err, SegmergeError::OperationCancelled(_)) {
            return err;
        }
        let current = self.catalog.version();
        if current == snapshot.version {
            return err;
        }
        SegmergeError::catalog_conflict(format!(
            "catalog moved from version {} to {current} during the merge: {err}",
            snapshot.version
        ))
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SegmergeError::cancelled(format!(
                "merge {} cancelled during {}",
                self.merge_id, self.state
            )));
        }
        Ok(())
    }

    fn transition(&mut self, next: MergeState) {
        debug!("Merge {}: {} -> {next}", self.merge_id, self.state);
        self.state = next;
    }

    fn abort_state(&mut self) {
        self.transition(MergeState::Aborted);
    }
}

/// Look up every requested segment in the snapshot, in ascending id order.
fn resolve_sources(
    snapshot: &CatalogSnapshot,
    segment_ids: &[SegmentId],
) -> Result<Vec<SegmentMeta>> {
    if segment_ids.is_empty() {
        return Err(SegmergeError::index("nothing to merge"));
    }
    let mut ids = segment_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    if ids.len() != segment_ids.len() {
        return Err(SegmergeError::index("a segment is listed twice"));
    }

    ids.into_iter()
        .map(|id| {
            snapshot.segment(id).cloned().ok_or_else(|| {
                SegmergeError::catalog_conflict(format!(
                    "{id} is not in catalog version {}",
                    snapshot.version
                ))
            })
        })
        .collect()
}

/// Total sleep a merge of `terms` terms and `docs` documents takes under
/// `config`, excluding sort-map pauses.
pub fn scheduled_delay(config: &MergeConfig, terms: u64, docs: u64) -> Duration {
    let term_pauses = terms / config.throttle.batch_factor as u64;
    let doc_pauses = docs / config.doc_batch_size() as u64;
    config
        .throttle
        .delay()
        .saturating_mul((term_pauses + doc_pauses).min(u32::MAX as u64) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThrottlePolicy;
    use crate::segment::builder::{DocumentInput, SegmentBuilder};
    use crate::segment::doc_store::DocStoreReader;
    use crate::segment::postings::Posting;
    use crate::storage::memory::MemoryStorage;

    fn catalog() -> Arc<Catalog> {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        Arc::new(Catalog::create(storage, vec!["rank".to_string()]).unwrap())
    }

    fn add(catalog: &Catalog, docs: &[(&str, &[&str], i64)]) -> SegmentMeta {
        let id = catalog.allocate_segment_id().unwrap();
        let mut builder = SegmentBuilder::new();
        for (body, tokens, rank) in docs {
            builder.add_document(
                DocumentInput::new(*body)
                    .with_tokens(tokens.iter().copied())
                    .with_sort_key("rank", *rank),
            );
        }
        let meta = builder
            .build(catalog.storage().clone(), id, &catalog.sort_fields(), 4)
            .unwrap();
        catalog.register_segment(meta.clone()).unwrap();
        meta
    }

    fn coordinator(catalog: &Arc<Catalog>) -> MergeCoordinator {
        MergeCoordinator::new(catalog.clone(), MergeConfig::unthrottled()).unwrap()
    }

    #[test]
    fn test_merge_two_segments() {
        let catalog = catalog();
        let a = add(&catalog, &[("a0", &["apple", "pear"], 5), ("a1", &["pear"], 1)]);
        let b = add(&catalog, &[("b0", &["apple"], 3)]);

        let mut merge = coordinator(&catalog);
        let outcome = merge.merge(&catalog.snapshot(), &[b.id, a.id]).unwrap();
        assert_eq!(merge.state(), MergeState::Committed);
        assert_eq!(outcome.consumed, vec![a.id, b.id]);
        assert_eq!(outcome.live_doc_count, 3);
        assert_eq!(outcome.stats.terms_merged, 2);
        assert_eq!(outcome.stats.postings_merged, 4);

        let storage = catalog.storage().clone();
        let mut postings = PostingStreamReader::open(storage.as_ref(), outcome.new_segment.id).unwrap();
        assert_eq!(postings.advance_term().unwrap().unwrap().term, "apple");
        assert_eq!(
            postings.read_postings_for_current_term().unwrap(),
            vec![Posting::new(0, vec![0]), Posting::new(2, vec![0])]
        );

        let readers = SegmentReaders::open(storage.as_ref(), &outcome.new_segment).unwrap();
        // Ranks 5, 1 then 3 concatenated per segment: [1, 0] then [2].
        assert_eq!(readers.sort_maps.doc_ids("rank").unwrap(), vec![1, 0, 2]);

        assert_eq!(catalog.snapshot().segment_ids(), vec![outcome.new_segment.id]);
    }

    #[test]
    fn test_term_with_only_deleted_postings_is_dropped() {
        let catalog = catalog();
        let a = add(&catalog, &[("a0", &["gone"], 0), ("a1", &["kept"], 0)]);
        catalog.delete_documents(a.id, &[0]).unwrap();

        let mut merge = coordinator(&catalog);
        let outcome = merge.merge(&catalog.snapshot(), &[a.id]).unwrap();
        assert_eq!(outcome.stats.terms_dropped, 1);
        assert_eq!(outcome.stats.deleted_docs_removed, 1);
        assert_eq!(outcome.new_segment.term_count, 1);

        let storage = catalog.storage().clone();
        let mut docs =
            DocStoreReader::open(storage.as_ref(), outcome.new_segment.id, 1, None).unwrap();
        assert_eq!(docs.next_document().unwrap().unwrap().body, b"a1");
        assert!(docs.next_document().unwrap().is_none());
    }

    #[test]
    fn test_unknown_segment_is_a_conflict() {
        let catalog = catalog();
        add(&catalog, &[("a0", &["x"], 0)]);
        let mut merge = coordinator(&catalog);
        let err = merge.merge(&catalog.snapshot(), &[SegmentId(77)]).unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(merge.state(), MergeState::Aborted);
    }

    #[test]
    fn test_stale_snapshot_is_refused_before_reading() {
        let catalog = catalog();
        let a = add(&catalog, &[("a0", &["x"], 0), ("a1", &["y"], 1)]);
        let stale = catalog.snapshot();
        catalog.delete_documents(a.id, &[0]).unwrap();
        let files = catalog.storage().list_files().unwrap();

        let mut merge = coordinator(&catalog);
        let err = merge.merge(&stale, &[a.id]).unwrap_err();
        assert!(err.is_retriable(), "unexpected error {err}");
        assert_eq!(merge.state(), MergeState::Aborted);
        assert_eq!(catalog.storage().list_files().unwrap(), files);
    }

    #[test]
    fn test_failures_after_catalog_moved_are_conflicts() {
        let catalog = catalog();
        let a = add(&catalog, &[("a0", &["x"], 0)]);
        let stale = catalog.snapshot();
        let merge = coordinator(&catalog);

        let err = merge.conflict_if_moved(&stale, SegmergeError::corrupt("bitmap changed"));
        assert!(err.is_corruption());

        catalog.delete_documents(a.id, &[0]).unwrap();
        let err = merge.conflict_if_moved(&stale, SegmergeError::corrupt("bitmap changed"));
        assert!(err.is_retriable());
        let err = merge.conflict_if_moved(&stale, SegmergeError::cancelled("stop"));
        assert!(matches!(err, SegmergeError::OperationCancelled(_)));
    }

    #[test]
    fn test_coordinator_runs_once() {
        let catalog = catalog();
        let a = add(&catalog, &[("a0", &["x"], 0)]);
        let mut merge = coordinator(&catalog);
        merge.merge(&catalog.snapshot(), &[a.id]).unwrap();
        assert!(merge.merge(&catalog.snapshot(), &[a.id]).is_err());
    }

    #[test]
    fn test_cancelled_merge_leaves_no_files() {
        let catalog = catalog();
        let a = add(&catalog, &[("a0", &["x"], 0)]);
        let b = add(&catalog, &[("b0", &["y"], 0)]);
        let before = catalog.storage().list_files().unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let mut merge = coordinator(&catalog).with_cancellation(token);
        let err = merge.merge(&catalog.snapshot(), &[a.id, b.id]).unwrap_err();
        assert!(matches!(err, SegmergeError::OperationCancelled(_)));
        assert_eq!(merge.state(), MergeState::Aborted);

        assert_eq!(catalog.storage().list_files().unwrap(), before);
        assert_eq!(catalog.snapshot().segment_ids(), vec![a.id, b.id]);
    }

    #[test]
    fn test_throttle_pauses_are_counted() {
        let catalog = catalog();
        let a = add(&catalog, &[("a0", &["a", "b", "c"], 0), ("a1", &["d"], 0)]);

        let config = MergeConfig {
            throttle: ThrottlePolicy::new(0.0, 2).unwrap(),
            doc_batch_scale: 1,
            sortmap_pause_seconds: 0.0,
            ..Default::default()
        };
        let mut merge = MergeCoordinator::new(catalog.clone(), config.clone()).unwrap();
        let outcome = merge.merge(&catalog.snapshot(), &[a.id]).unwrap();
        // 4 terms / 2 + 2 documents / 2, one sort field.
        assert_eq!(outcome.stats.throttle_pauses, 3);
        assert_eq!(scheduled_delay(&config, 4, 2), Duration::ZERO);
    }

    #[test]
    fn test_scheduled_delay() {
        let config = MergeConfig {
            throttle: ThrottlePolicy::new(0.5, 10).unwrap(),
            doc_batch_scale: 10,
            ..Default::default()
        };
        assert_eq!(scheduled_delay(&config, 25, 250), Duration::from_millis(2000));
    }
}
