//! Index writer: metadata and index-mode documents, upserted atomically
//! (with respect to a single call) into a segment's inverted index.

use crate::error::Result;
use crate::series::SeriesID;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Prefix applied to entity-tag field keys on an index-mode document, so
/// they don't collide with the record's own declared tag fields.
pub const INDEX_MODE_ENTITY_TAG_PREFIX: &str = "_entity_";

/// The subject field key on an index-mode document.
pub const SUBJECT_FIELD_KEY: &str = "_subject";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IndexFieldKey {
    Rule { index_rule_id: u32, analyzer: Option<String> },
    Tag { tag_name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexField {
    pub key: IndexFieldKey,
    pub value: Vec<u8>,
    pub index: bool,
    pub store: bool,
    pub no_sort: bool,
}

impl IndexField {
    pub fn tag_name(&self) -> Option<&str> {
        match &self.key {
            IndexFieldKey::Tag { tag_name } => Some(tag_name),
            IndexFieldKey::Rule { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument {
    pub doc_id: SeriesID,
    pub entity_values: Vec<u8>,
    pub fields: Vec<IndexField>,
    pub version: u64,
    pub timestamp: i64,
}

/// Minimal in-memory inverted index. The real implementation's on-disk
/// format is out of scope; this satisfies the insert/update/search contract
/// the ingest and scan paths need to be exercised end to end.
#[derive(Debug, Default)]
pub struct InvertedIndex {
    metadata: RwLock<HashMap<SeriesID, IndexDocument>>,
    index_mode: RwLock<HashMap<SeriesID, IndexDocument>>,
}

impl InvertedIndex {
    /// Appends-or-overwrites metadata documents, keyed by `doc_id`.
    pub fn insert(&self, docs: Vec<IndexDocument>) -> Result<()> {
        let mut metadata = self.metadata.write();
        for doc in docs {
            upsert(&mut metadata, doc);
        }
        Ok(())
    }

    /// Upserts full index-mode documents, last-write-wins by version then timestamp.
    pub fn update(&self, docs: Vec<IndexDocument>) -> Result<()> {
        let mut index_mode = self.index_mode.write();
        for doc in docs {
            upsert(&mut index_mode, doc);
        }
        Ok(())
    }

    pub fn contains_series(&self, id: SeriesID) -> bool {
        self.metadata.read().contains_key(&id)
    }

    pub fn series_ids(&self) -> Vec<SeriesID> {
        self.metadata.read().keys().copied().collect()
    }

    /// Intersects the metadata index with a candidate series set.
    pub fn resolve(&self, candidates: &[SeriesID]) -> Vec<SeriesID> {
        let metadata = self.metadata.read();
        candidates.iter().copied().filter(|id| metadata.contains_key(id)).collect()
    }

    /// Finds index-mode documents carrying a tag field with the given
    /// encoded value, for arbitrary-predicate style property/tag lookups.
    pub fn search_by_tag(&self, tag_name: &str, value: &[u8]) -> Vec<IndexDocument> {
        self.index_mode
            .read()
            .values()
            .filter(|doc| {
                doc.fields
                    .iter()
                    .any(|f| f.tag_name() == Some(tag_name) && f.value == value)
            })
            .cloned()
            .collect()
    }
}

fn upsert(map: &mut HashMap<SeriesID, IndexDocument>, doc: IndexDocument) {
    use std::collections::hash_map::Entry;
    match map.entry(doc.doc_id) {
        Entry::Vacant(slot) => {
            slot.insert(doc);
        }
        Entry::Occupied(mut slot) => {
            if wins(&doc, slot.get()) {
                slot.insert(doc);
            }
        }
    }
}

/// Higher version wins; ties broken by higher timestamp; full ties resolve
/// to the incoming document, which both matches "later arrival wins" and
/// keeps a repeated `insert`/`update` of the same document idempotent.
fn wins(incoming: &IndexDocument, existing: &IndexDocument) -> bool {
    (incoming.version, incoming.timestamp) >= (existing.version, existing.timestamp)
}
