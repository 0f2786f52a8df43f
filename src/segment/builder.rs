//! Sealing pre-analyzed documents into a new segment.
//!
//! Text analysis is not part of this crate: callers hand over documents
//! whose terms and positions are already known.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Result, SegmergeError};
use crate::segment::writer::SegmentWriter;
use crate::segment::{DocId, SegmentId, SegmentMeta};
use crate::storage::Storage;

/// One document ready for indexing.
#[derive(Debug, Clone, Default)]
pub struct DocumentInput {
    body: Vec<u8>,
    terms: BTreeMap<String, Vec<u32>>,
    sort_keys: BTreeMap<String, i64>,
}

impl DocumentInput {
    pub fn new<B: Into<Vec<u8>>>(body: B) -> Self {
        DocumentInput {
            body: body.into(),
            ..Default::default()
        }
    }

    /// Add a token stream; each token's position is its index in `tokens`.
    pub fn with_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let offset = self.terms.values().map(Vec::len).sum::<usize>() as u32;
        for (position, token) in tokens.into_iter().enumerate() {
            self.terms
                .entry(token.as_ref().to_string())
                .or_default()
                .push(offset + position as u32);
        }
        self
    }

    /// Add explicit positions for a term.
    pub fn with_term<S: Into<String>>(mut self, term: S, positions: &[u32]) -> Self {
        let slot = self.terms.entry(term.into()).or_default();
        slot.extend_from_slice(positions);
        slot.sort_unstable();
        slot.dedup();
        self
    }

    /// Set the sort key of a sortable field.
    pub fn with_sort_key<S: Into<String>>(mut self, field: S, key: i64) -> Self {
        self.sort_keys.insert(field.into(), key);
        self
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Accumulates documents in memory and writes them as one sealed segment.
#[derive(Debug, Default)]
pub struct SegmentBuilder {
    documents: Vec<DocumentInput>,
}

impl SegmentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a document. Returns its local id in the segment to be built.
    pub fn add_document(&mut self, document: DocumentInput) -> DocId {
        self.documents.push(document);
        (self.documents.len() - 1) as DocId
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Write the queued documents as segment `id`.
    ///
    /// Sort-maps are written for every field in `sort_fields`: documents are
    /// ordered by key, then by local id; documents without a key are left
    /// out of that field's sort array.
    pub fn build(
        self,
        storage: Arc<dyn Storage>,
        id: SegmentId,
        sort_fields: &[String],
        skip_interval: usize,
    ) -> Result<SegmentMeta> {
        if self.documents.len() > DocId::MAX as usize {
            return Err(SegmergeError::index("too many documents for one segment"));
        }

        let mut inverted: BTreeMap<&str, Vec<(DocId, &[u32])>> = BTreeMap::new();
        for (doc_id, document) in self.documents.iter().enumerate() {
            for (term, positions) in &document.terms {
                inverted
                    .entry(term.as_str())
                    .or_default()
                    .push((doc_id as DocId, positions.as_slice()));
            }
        }

        let mut writer = SegmentWriter::create(storage, id, skip_interval)?;

        for (term, postings) in &inverted {
            for (doc_id, positions) in postings {
                writer.add_posting(*doc_id, positions)?;
            }
            writer.finish_term(term)?;
        }

        writer.begin_documents()?;
        for document in &self.documents {
            writer.add_document(&document.body)?;
        }

        writer.begin_sort_maps()?;
        for field in sort_fields {
            let mut keyed: Vec<(i64, DocId)> = self
                .documents
                .iter()
                .enumerate()
                .filter_map(|(doc_id, document)| {
                    document
                        .sort_keys
                        .get(field)
                        .map(|&key| (key, doc_id as DocId))
                })
                .collect();
            keyed.sort_unstable();
            let order: Vec<DocId> = keyed.into_iter().map(|(_, doc_id)| doc_id).collect();
            writer.append_sort_map(field, &order)?;
        }

        writer.finish()
    }
}
