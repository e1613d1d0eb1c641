//! Property CRUD: a tag-set store with MERGE/REPLACE update semantics,
//! built as a thin layer over [`InvertedIndex`] rather than a parallel
//! storage path — the same contract the ingest path exercises, applied to
//! key/value tag sets instead of time-series rows.

use crate::codec::NameValue;
use crate::index::{IndexDocument, IndexField, IndexFieldKey, InvertedIndex};
use crate::series::stable64;
use parking_lot::RwLock;
use std::collections::HashMap;

pub type PropertyID = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    Merge,
    Replace,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub group: String,
    pub subject: String,
    pub entity_id: String,
    pub tags: Vec<NameValue>,
    pub version: u64,
    pub timestamp: i64,
}

/// Deterministic id over `(group, subject, entity_id)`, length-prefixed for
/// the same boundary-collision reason [`crate::series::Series::bind`] is.
pub fn property_id(group: &str, subject: &str, entity_id: &str) -> PropertyID {
    let mut buf = Vec::new();
    for part in [group, subject, entity_id] {
        buf.extend_from_slice(&(part.len() as u32).to_be_bytes());
        buf.extend_from_slice(part.as_bytes());
    }
    stable64(&buf)
}

/// Holds the authoritative tag-set values; the [`InvertedIndex`] is a
/// search-only projection kept in step with every `apply`.
#[derive(Debug, Default)]
pub struct PropertyStore {
    index: InvertedIndex,
    properties: RwLock<HashMap<PropertyID, Property>>,
}

impl PropertyStore {
    /// Applies an incoming property under the given strategy. `Replace`
    /// discards any existing tag set outright; `Merge` overlays the
    /// incoming tags onto the existing ones by name, leaving tags the
    /// incoming property doesn't mention untouched.
    pub fn apply(&self, mut incoming: Property, strategy: UpdateStrategy) -> PropertyID {
        let id = property_id(&incoming.group, &incoming.subject, &incoming.entity_id);
        let mut properties = self.properties.write();
        if strategy == UpdateStrategy::Merge {
            if let Some(existing) = properties.get(&id) {
                let mut merged = existing.tags.clone();
                for tag in incoming.tags {
                    match merged.iter_mut().find(|t| t.name == tag.name) {
                        Some(slot) => *slot = tag,
                        None => merged.push(tag),
                    }
                }
                incoming.tags = merged;
            }
        }
        let _ = self.index.update(vec![to_index_document(id, &incoming)]);
        properties.insert(id, incoming);
        id
    }

    /// Removes a property's value. The index keeps its last document for
    /// that id (no removal primitive — out of scope per the index's own
    /// module docs); `query`/`get` go through `properties`, not the index,
    /// so a deleted property is invisible to both regardless.
    pub fn delete(&self, group: &str, subject: &str, entity_id: &str) -> Option<Property> {
        let id = property_id(group, subject, entity_id);
        self.properties.write().remove(&id)
    }

    pub fn get(&self, group: &str, subject: &str, entity_id: &str) -> Option<Property> {
        let id = property_id(group, subject, entity_id);
        self.properties.read().get(&id).cloned()
    }

    pub fn query(&self, group: &str, subject: &str) -> Vec<Property> {
        self.properties
            .read()
            .values()
            .filter(|p| p.group == group && p.subject == subject)
            .cloned()
            .collect()
    }

    /// Finds live properties carrying a tag with the given encoded value.
    /// Filters the index's result set through `properties` to drop ids a
    /// `delete` removed after the index last saw them.
    pub fn find_by_tag(&self, tag_name: &str, value: &[u8]) -> Vec<Property> {
        let properties = self.properties.read();
        self.index
            .search_by_tag(tag_name, value)
            .into_iter()
            .filter_map(|doc| properties.get(&doc.doc_id).cloned())
            .collect()
    }
}

fn to_index_document(id: PropertyID, property: &Property) -> IndexDocument {
    IndexDocument {
        doc_id: id,
        entity_values: property.entity_id.as_bytes().to_vec(),
        fields: property
            .tags
            .iter()
            .map(|t| IndexField {
                key: IndexFieldKey::Tag { tag_name: t.name.clone() },
                value: t.value.clone().unwrap_or_default(),
                index: true,
                store: true,
                no_sort: false,
            })
            .collect(),
        version: property.version,
        timestamp: property.timestamp,
    }
}
