//! Immutable index segments.
//!
//! A segment is written once, when a batch is flushed, and never changes
//! afterwards. Readers share segments through `Arc<Segment>`, so cloning a
//! reader never copies stored documents or postings. Deletions are tracked
//! outside the segment, in live-doc bitsets owned by the writer.

use std::collections::HashMap;

use ahash::RandomState;
use serde::{Deserialize, Serialize};

use crate::analysis;
use crate::document::Document;
use crate::error::Result;
use crate::index::codec;

/// File extension of persisted segments.
pub const SEGMENT_EXTENSION: &str = "seg";

type FieldPostings = HashMap<String, Vec<u32>, RandomState>;

/// An immutable set of documents plus their postings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    name: String,
    documents: Vec<Document>,
    /// field -> term -> ascending local doc ids.
    postings: HashMap<String, FieldPostings, RandomState>,
}

impl Segment {
    /// Build a segment by analyzing `documents`.
    pub fn build(name: impl Into<String>, documents: Vec<Document>) -> Self {
        let mut postings: HashMap<String, FieldPostings, RandomState> = HashMap::default();

        for (local_id, doc) in documents.iter().enumerate() {
            let local_id = local_id as u32;
            for (field, value) in doc.fields() {
                let terms = postings.entry(field.to_string()).or_default();
                for token in analysis::index_terms(value) {
                    let docs = terms.entry(token).or_default();
                    if docs.last() != Some(&local_id) {
                        docs.push(local_id);
                    }
                }
            }
        }

        Segment {
            name: name.into(),
            documents,
            postings,
        }
    }

    /// Segment name (without extension).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File name used when this segment is persisted.
    pub fn file_name(&self) -> String {
        file_name(&self.name)
    }

    /// Number of documents, deleted or not.
    pub fn max_doc(&self) -> u32 {
        self.documents.len() as u32
    }

    /// Stored document by local id.
    pub fn document(&self, local_id: u32) -> Option<&Document> {
        self.documents.get(local_id as usize)
    }

    /// Local doc ids containing `term` in `field`.
    pub fn postings(&self, field: &str, term: &str) -> &[u32] {
        self.postings
            .get(field)
            .and_then(|terms| terms.get(term))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Serialize into the checksummed on-disk form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        Ok(codec::encode(&payload))
    }

    /// Deserialize from the on-disk form, verifying the checksum.
    pub fn decode(file_name: &str, data: &[u8]) -> Result<Self> {
        let payload = codec::decode(file_name, data)?;
        Ok(bincode::deserialize(payload)?)
    }
}

/// File name of the segment called `name`.
pub fn file_name(name: &str) -> String {
    format!("{name}.{SEGMENT_EXTENSION}")
}
