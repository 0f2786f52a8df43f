//! The versioned list of live segments.
//!
//! The catalog is the single source of truth for which segments make up the
//! index. It is persisted as `catalog.json`:
//!
//! ```json
//! {
//!   "version": 7,
//!   "next_segment_id": 12,
//!   "segments": [ { "id": 3, "doc_count": 1000, ... } ],
//!   "sort_fields": ["date"],
//!   "pending_deletions": [1, 2],
//!   "updated_at": "2024-05-01T12:00:00Z"
//! }
//! ```
//!
//! Every mutation writes the whole state to `catalog.json.tmp` and renames it
//! over `catalog.json`, so a reader of the file sees either the old or the new
//! segment set. In memory, one mutex serializes all mutations; the in-memory
//! state only changes after the new file has been published.
//!
//! Segments replaced by a merge are kept on disk as *pending deletions* until
//! [`Catalog::purge_pending`] removes their files. A merge planned against an
//! older snapshot never reads them: it fails with `CatalogConflict` as soon
//! as it sees the catalog has moved on.

use std::io::{Read, Write};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmergeError};
use crate::segment::deletion::DeletionBitmap;
use crate::segment::{
    DEL_EXT, DOC_EXT, DocId, FREQ_EXT, POS_EXT, SORT_EXT, SegmentId, SegmentMeta, TERM_DICT_EXT,
};
use crate::storage::{Storage, StorageInput, StorageOutput};

/// Name of the published catalog file.
pub const CATALOG_FILE: &str = "catalog.json";

const CATALOG_TEMP_FILE: &str = "catalog.json.tmp";

const REQUIRED_EXTENSIONS: [&str; 5] = [TERM_DICT_EXT, FREQ_EXT, POS_EXT, DOC_EXT, SORT_EXT];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogState {
    version: u64,
    next_segment_id: u64,
    segments: Vec<SegmentMeta>,
    #[serde(default)]
    sort_fields: Vec<String>,
    #[serde(default)]
    pending_deletions: Vec<SegmentId>,
    updated_at: DateTime<Utc>,
}

impl CatalogState {
    fn contains(&self, id: SegmentId) -> bool {
        self.segments.iter().any(|meta| meta.id == id)
    }

    fn touched(&self, bump_version: bool) -> CatalogState {
        let mut next = self.clone();
        if bump_version {
            next.version += 1;
        }
        next.updated_at = Utc::now();
        next
    }
}

/// Immutable view of the catalog at one version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogSnapshot {
    pub version: u64,
    /// Live segments in ascending id order.
    pub segments: Vec<SegmentMeta>,
    /// Sortable fields declared on the index.
    pub sort_fields: Vec<String>,
}

impl CatalogSnapshot {
    pub fn segment(&self, id: SegmentId) -> Option<&SegmentMeta> {
        self.segments.iter().find(|meta| meta.id == id)
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments.iter().map(|meta| meta.id).collect()
    }

    /// Stored documents across all segments, deleted ones included.
    pub fn doc_count(&self) -> u64 {
        self.segments.iter().map(|meta| meta.doc_count as u64).sum()
    }

    pub fn live_doc_count(&self) -> u64 {
        self.segments
            .iter()
            .map(|meta| meta.live_doc_count() as u64)
            .sum()
    }
}

/// Persistent, versioned segment catalog.
#[derive(Debug)]
pub struct Catalog {
    storage: Arc<dyn Storage>,
    state: Mutex<CatalogState>,
}

impl Catalog {
    /// Create an empty catalog. Fails if one already exists in `storage`.
    pub fn create(storage: Arc<dyn Storage>, sort_fields: Vec<String>) -> Result<Self> {
        if storage.file_exists(CATALOG_FILE) {
            return Err(SegmergeError::index("catalog already exists"));
        }
        for (i, field) in sort_fields.iter().enumerate() {
            if field.is_empty() {
                return Err(SegmergeError::invalid_config("sort field names must not be empty"));
            }
            if sort_fields[..i].contains(field) {
                return Err(SegmergeError::invalid_config(format!(
                    "sort field '{field}' declared twice"
                )));
            }
        }

        let state = CatalogState {
            version: 1,
            next_segment_id: 1,
            segments: Vec::new(),
            sort_fields,
            pending_deletions: Vec::new(),
            updated_at: Utc::now(),
        };
        let catalog = Catalog {
            storage,
            state: Mutex::new(state.clone()),
        };
        catalog.persist(&state)?;
        info!("Created catalog with sort fields {:?}", state.sort_fields);
        Ok(catalog)
    }

    /// Load the published catalog and remove files no segment owns.
    pub fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        if !storage.file_exists(CATALOG_FILE) {
            return Err(SegmergeError::index("no catalog found"));
        }

        let mut text = String::new();
        let mut input = storage.open_input(CATALOG_FILE)?;
        input.read_to_string(&mut text)?;
        input.close()?;
        let mut state: CatalogState = serde_json::from_str(&text)?;

        state.segments.sort_by_key(|meta| meta.id);
        if state.segments.windows(2).any(|pair| pair[0].id == pair[1].id) {
            return Err(SegmergeError::index("catalog lists a segment twice"));
        }
        if let Some(bad) = state
            .segments
            .iter()
            .find(|meta| meta.deleted_count > meta.doc_count)
        {
            return Err(SegmergeError::index(format!(
                "catalog lists {} with more deletions than documents",
                bad.id
            )));
        }
        let highest = state
            .segments
            .iter()
            .map(|meta| meta.id)
            .chain(state.pending_deletions.iter().copied())
            .max();
        if let Some(highest) = highest {
            state.next_segment_id = state.next_segment_id.max(highest.0 + 1);
        }

        let catalog = Catalog {
            storage,
            state: Mutex::new(state),
        };
        let removed = catalog.remove_orphans()?;
        if !removed.is_empty() {
            info!("Removed {} orphaned files: {:?}", removed.len(), removed);
        }
        debug!(
            "Opened catalog version {} with {} segments",
            catalog.version(),
            catalog.state.lock().segments.len()
        );
        Ok(catalog)
    }

    pub fn open_or_create(storage: Arc<dyn Storage>, sort_fields: Vec<String>) -> Result<Self> {
        if storage.file_exists(CATALOG_FILE) {
            Self::open(storage)
        } else {
            Self::create(storage, sort_fields)
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    pub fn snapshot(&self) -> CatalogSnapshot {
        let state = self.state.lock();
        CatalogSnapshot {
            version: state.version,
            segments: state.segments.clone(),
            sort_fields: state.sort_fields.clone(),
        }
    }

    pub fn sort_fields(&self) -> Vec<String> {
        self.state.lock().sort_fields.clone()
    }

    pub fn segment(&self, id: SegmentId) -> Option<SegmentMeta> {
        self.state
            .lock()
            .segments
            .iter()
            .find(|meta| meta.id == id)
            .cloned()
    }

    /// Segments replaced by a merge whose files are still on disk.
    pub fn pending_deletions(&self) -> Vec<SegmentId> {
        self.state.lock().pending_deletions.clone()
    }

    /// Reserve a fresh segment id. Ids are never reused.
    pub fn allocate_segment_id(&self) -> Result<SegmentId> {
        let mut state = self.state.lock();
        let id = SegmentId(state.next_segment_id);
        let mut next = state.touched(false);
        next.next_segment_id += 1;
        self.persist(&next)?;
        *state = next;
        debug!("Allocated {id}");
        Ok(id)
    }

    /// Publish a newly built segment.
    pub fn register_segment(&self, meta: SegmentMeta) -> Result<u64> {
        let mut state = self.state.lock();
        if state.contains(meta.id) {
            return Err(SegmergeError::index(format!("{} is already registered", meta.id)));
        }
        if meta.id.0 >= state.next_segment_id {
            return Err(SegmergeError::index(format!(
                "{} was not allocated by this catalog",
                meta.id
            )));
        }
        if meta.deleted_count != 0 {
            return Err(SegmergeError::index(format!(
                "{} must be registered without deletions",
                meta.id
            )));
        }
        if let Some(missing) = REQUIRED_EXTENSIONS
            .iter()
            .map(|ext| meta.id.file_name(ext))
            .find(|name| !self.storage.file_exists(name))
        {
            return Err(SegmergeError::index(format!(
                "cannot register {}: {missing} is missing",
                meta.id
            )));
        }

        let mut next = state.touched(true);
        let id = meta.id;
        next.segments.push(meta);
        next.segments.sort_by_key(|meta| meta.id);
        self.persist(&next)?;
        *state = next;
        info!("Registered {id} at catalog version {}", state.version);
        Ok(state.version)
    }

    /// Mark documents of a segment as deleted.
    ///
    /// Rewrites the segment's deletion bitmap and bumps the catalog version,
    /// which makes any merge planned against an older snapshot conflict.
    /// Returns the number of documents that were not deleted before.
    pub fn delete_documents(&self, id: SegmentId, doc_ids: &[DocId]) -> Result<u32> {
        let mut state = self.state.lock();
        let position = state
            .segments
            .iter()
            .position(|meta| meta.id == id)
            .ok_or_else(|| SegmergeError::index(format!("{id} is not in the catalog")))?;
        let doc_count = state.segments[position].doc_count;

        let previous = DeletionBitmap::read_from_storage(self.storage.as_ref(), id, doc_count)?;
        let mut bitmap = previous
            .clone()
            .unwrap_or_else(|| DeletionBitmap::new(id, doc_count));
        let mut newly_deleted = 0;
        for &doc_id in doc_ids {
            if bitmap.delete_document(doc_id)? {
                newly_deleted += 1;
            }
        }
        if newly_deleted == 0 {
            return Ok(0);
        }

        bitmap.write_to_storage(self.storage.as_ref())?;

        let mut next = state.touched(true);
        next.segments[position].deleted_count = bitmap.deleted_count();
        if let Err(err) = self.persist(&next) {
            let restored = match &previous {
                Some(previous) => previous.write_to_storage(self.storage.as_ref()).map(|_| ()),
                None => self.storage.delete_file(&id.file_name(DEL_EXT)),
            };
            if let Err(restore_err) = restored {
                warn!("Failed to restore deletion bitmap of {id}: {restore_err}");
            }
            return Err(err);
        }
        *state = next;
        debug!(
            "Deleted {newly_deleted} documents from {id} ({} total)",
            bitmap.deleted_count()
        );
        Ok(newly_deleted)
    }

    /// Atomically replace `consumed` segments with `new_segment`.
    ///
    /// Fails with `CatalogConflict`, leaving the catalog untouched, if the
    /// version is no longer `expected_version` or a consumed segment is gone.
    /// Consumed segments become pending deletions. Returns the new version.
    pub fn commit(
        &self,
        expected_version: u64,
        new_segment: SegmentMeta,
        consumed: &[SegmentId],
    ) -> Result<u64> {
        let mut state = self.state.lock();
        if state.version != expected_version {
            return Err(SegmergeError::catalog_conflict(format!(
                "expected catalog version {expected_version}, found {}",
                state.version
            )));
        }
        if let Some(missing) = consumed.iter().find(|id| !state.contains(**id)) {
            return Err(SegmergeError::catalog_conflict(format!(
                "{missing} is no longer in the catalog"
            )));
        }
        if state.contains(new_segment.id) {
            return Err(SegmergeError::index(format!(
                "{} is already in the catalog",
                new_segment.id
            )));
        }

        let new_id = new_segment.id;
        let mut next = state.touched(true);
        next.segments.retain(|meta| !consumed.contains(&meta.id));
        next.segments.push(new_segment);
        next.segments.sort_by_key(|meta| meta.id);
        for id in consumed {
            if !next.pending_deletions.contains(id) {
                next.pending_deletions.push(*id);
            }
        }

        self.persist(&next)?;
        *state = next;
        info!(
            "Committed {new_id} replacing {consumed:?} at catalog version {}",
            state.version
        );
        Ok(state.version)
    }

    /// Delete every file of a segment that was never committed.
    ///
    /// Idempotent: missing files are ignored. Refuses to touch a segment the
    /// catalog lists.
    pub fn rollback_partial(&self, id: SegmentId) -> Result<()> {
        let state = self.state.lock();
        if state.contains(id) {
            return Err(SegmergeError::index(format!(
                "refusing to roll back committed segment {id}"
            )));
        }
        delete_segment_files(self.storage.as_ref(), id)?;
        debug!("Rolled back partial segment {id}");
        Ok(())
    }

    /// Delete the files of segments replaced by earlier merges.
    ///
    /// Segments whose files could not be deleted stay pending.
    pub fn purge_pending(&self) -> Result<Vec<SegmentId>> {
        let mut state = self.state.lock();
        if state.pending_deletions.is_empty() {
            return Ok(Vec::new());
        }

        let mut purged = Vec::new();
        let mut remaining = Vec::new();
        for &id in &state.pending_deletions {
            match delete_segment_files(self.storage.as_ref(), id) {
                Ok(()) => purged.push(id),
                Err(err) => {
                    warn!("Failed to purge {id}: {err}");
                    remaining.push(id);
                }
            }
        }

        let mut next = state.touched(false);
        next.pending_deletions = remaining;
        self.persist(&next)?;
        *state = next;
        debug!("Purged {purged:?}");
        Ok(purged)
    }

    fn remove_orphans(&self) -> Result<Vec<String>> {
        let state = self.state.lock();
        let mut removed = Vec::new();
        for name in self.storage.list_files()? {
            let orphaned = if name == CATALOG_TEMP_FILE {
                true
            } else if let Some(id) = SegmentId::from_file_name(&name) {
                let known = state.contains(id) || state.pending_deletions.contains(&id);
                !known || name.ends_with(".tmp")
            } else {
                false
            };
            if orphaned {
                self.storage.delete_file(&name)?;
                removed.push(name);
            }
        }
        Ok(removed)
    }

    fn persist(&self, state: &CatalogState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)?;
        let mut output = self.storage.create_output(CATALOG_TEMP_FILE)?;
        output.write_all(&json)?;
        output.flush_and_sync()?;
        output.close()?;
        self.storage.rename_file(CATALOG_TEMP_FILE, CATALOG_FILE)?;

        // Published once renamed: a failed sync must not undo the mutation.
        if let Err(err) = self.storage.sync() {
            warn!("Catalog version {} published but not synced: {err}", state.version);
        }
        Ok(())
    }
}

fn delete_segment_files(storage: &dyn Storage, id: SegmentId) -> Result<()> {
    for name in id.all_file_names() {
        storage.delete_file(&name)?;
    }
    Ok(())
}
