//! Writer for a new segment's file set.

use std::sync::Arc;

use chrono::Utc;
use log::debug;

use crate::error::{Result, SegmergeError};
use crate::segment::doc_store::DocStoreWriter;
use crate::segment::postings::PostingsWriter;
use crate::segment::sort_map::SortMapWriter;
use crate::segment::term_dict::{TermDictionaryWriter, TermEntry};
use crate::segment::{
    DOC_EXT, DocId, FREQ_EXT, POS_EXT, SORT_EXT, SegmentId, SegmentMeta, TERM_DICT_EXT,
};
use crate::storage::Storage;

/// Owns the output streams of one segment under construction.
///
/// Posting and dictionary outputs are created with the writer; the document
/// store is created by [`begin_documents`] and the sort-map file by
/// [`begin_sort_maps`]. [`finish`] closes postings, then documents, then
/// sort-maps. A writer that is dropped unfinished leaves partial files that
/// the owner must remove.
///
/// [`begin_documents`]: SegmentWriter::begin_documents
/// [`begin_sort_maps`]: SegmentWriter::begin_sort_maps
/// [`finish`]: SegmentWriter::finish
pub struct SegmentWriter {
    storage: Arc<dyn Storage>,
    id: SegmentId,
    postings: PostingsWriter,
    dictionary: TermDictionaryWriter,
    documents: Option<DocStoreWriter>,
    sort_maps: Option<SortMapWriter>,
}

impl SegmentWriter {
    pub fn create(storage: Arc<dyn Storage>, id: SegmentId, skip_interval: usize) -> Result<Self> {
        for name in id.all_file_names() {
            if storage.file_exists(&name) {
                return Err(SegmergeError::index(format!(
                    "refusing to overwrite existing file {name}"
                )));
            }
        }

        let postings = PostingsWriter::new(
            storage.create_output(&id.file_name(FREQ_EXT))?,
            storage.create_output(&id.file_name(POS_EXT))?,
            id.0,
            skip_interval,
        )?;
        let dictionary =
            TermDictionaryWriter::new(storage.create_output(&id.file_name(TERM_DICT_EXT))?, id.0)?;

        debug!("Created writer for {id}");
        Ok(SegmentWriter {
            storage,
            id,
            postings,
            dictionary,
            documents: None,
            sort_maps: None,
        })
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Append a posting to the term currently being written.
    pub fn add_posting(&mut self, doc_id: DocId, positions: &[u32]) -> Result<()> {
        self.postings.add_posting(doc_id, positions)
    }

    /// Postings added to the current term so far.
    pub fn pending_doc_freq(&self) -> u32 {
        self.postings.pending_doc_count()
    }

    /// Close the current term. Writes and returns its dictionary entry, or
    /// `None` if the term received no postings.
    pub fn finish_term(&mut self, term: &str) -> Result<Option<TermEntry>> {
        let entry = self.postings.finish_term(term)?;
        if let Some(entry) = &entry {
            self.dictionary.add(entry)?;
        }
        Ok(entry)
    }

    pub fn term_count(&self) -> u64 {
        self.dictionary.term_count()
    }

    /// Create the document store output.
    pub fn begin_documents(&mut self) -> Result<()> {
        if self.documents.is_none() {
            let output = self.storage.create_output(&self.id.file_name(DOC_EXT))?;
            self.documents = Some(DocStoreWriter::new(output)?);
        }
        Ok(())
    }

    /// Append a document body. Returns its id in the new segment.
    pub fn add_document(&mut self, body: &[u8]) -> Result<DocId> {
        match self.documents.as_mut() {
            Some(documents) => documents.add(body),
            None => Err(SegmergeError::index(format!(
                "{}: documents written before begin_documents",
                self.id
            ))),
        }
    }

    pub fn doc_count(&self) -> u32 {
        self.documents.as_ref().map_or(0, DocStoreWriter::doc_count)
    }

    /// Create the sort-map output.
    pub fn begin_sort_maps(&mut self) -> Result<()> {
        if self.sort_maps.is_none() {
            let output = self.storage.create_output(&self.id.file_name(SORT_EXT))?;
            self.sort_maps = Some(SortMapWriter::new(output));
        }
        Ok(())
    }

    /// Append ids to a field's sort array, declaring the field if needed.
    pub fn append_sort_map(&mut self, field: &str, doc_ids: &[DocId]) -> Result<()> {
        match self.sort_maps.as_mut() {
            Some(sort_maps) => {
                if doc_ids.is_empty() {
                    sort_maps.declare_field(field);
                } else {
                    sort_maps.append_doc_ids(field, doc_ids);
                }
                Ok(())
            }
            None => Err(SegmergeError::index(format!(
                "{}: sort-maps written before begin_sort_maps",
                self.id
            ))),
        }
    }

    /// Flush and close every stream and describe the sealed segment.
    pub fn finish(mut self) -> Result<SegmentMeta> {
        self.begin_documents()?;
        self.begin_sort_maps()?;

        let SegmentWriter {
            storage,
            id,
            postings,
            dictionary,
            documents,
            sort_maps,
        } = self;

        let postings_size = postings.finish()?;
        let (term_count, dictionary_size) = dictionary.finish()?;
        let (doc_count, documents_size) = match documents {
            Some(documents) => documents.finish()?,
            None => (0, 0),
        };
        let sort_maps_size = match sort_maps {
            Some(sort_maps) => sort_maps.finish()?,
            None => 0,
        };

        storage.sync()?;

        let meta = SegmentMeta {
            id,
            doc_count,
            deleted_count: 0,
            term_count,
            size_bytes: postings_size + dictionary_size + documents_size + sort_maps_size,
            created_at: Utc::now(),
        };
        debug!(
            "Sealed {}: {} docs, {} terms, {} bytes",
            meta.id, meta.doc_count, meta.term_count, meta.size_bytes
        );
        Ok(meta)
    }
}
