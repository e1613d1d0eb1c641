//! Measure/stream schema: tag families, field specs, index rules, and the
//! per-group registry the batcher and scanner consult. Not specified in
//! detail by the ingest/query contract, but required to implement it.

use crate::codec::ValueType;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    Stream,
    Measure,
}

/// An index rule attached to a tag: presence of a rule (or `index_mode`)
/// routes the tag into an `IndexField` instead of (or in addition to) the
/// columnar payload.
#[derive(Debug, Clone)]
pub struct IndexRule {
    pub id: u32,
    pub analyzer: Option<String>,
    pub no_sort: bool,
}

#[derive(Debug, Clone)]
pub struct TagSpec {
    pub name: String,
    pub value_type: ValueType,
    pub index_rule: Option<IndexRule>,
    /// Dropped from the columnar payload even without an index rule.
    pub indexed_only: bool,
    /// Part of the entity tuple; not physically stored in the table, and
    /// synthesized at query time from `series_to_entity`.
    pub is_entity: bool,
}

#[derive(Debug, Clone)]
pub struct TagFamilySpec {
    pub name: String,
    pub tags: Vec<TagSpec>,
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub value_type: ValueType,
}

/// The schema for one subject (stream or measure) within a group.
#[derive(Debug, Clone)]
pub struct Schema {
    pub subject: String,
    pub kind: SubjectKind,
    pub tag_families: Vec<TagFamilySpec>,
    pub fields: Vec<FieldSpec>,
    pub index_mode: bool,
    /// Entity tag names in tuple order; position here is the position used
    /// to index `series_to_entity` entries at query time.
    pub entity_tag_names: Vec<String>,
}

impl Schema {
    pub fn find_tag_with_family(&self, tag_name: &str) -> Option<(usize, &TagSpec)> {
        self.tag_families.iter().enumerate().find_map(|(idx, family)| {
            family.tags.iter().find(|t| t.name == tag_name).map(|t| (idx, t))
        })
    }

    pub fn find_tag(&self, family_name: &str, tag_name: &str) -> Option<&TagSpec> {
        self.tag_families
            .iter()
            .find(|f| f.name == family_name)?
            .tags
            .iter()
            .find(|t| t.name == tag_name)
    }

    pub fn family_position(&self, family_name: &str) -> Option<usize> {
        self.tag_families.iter().position(|f| f.name == family_name)
    }

    pub fn entity_position(&self, tag_name: &str) -> Option<usize> {
        self.entity_tag_names.iter().position(|n| n == tag_name)
    }
}

/// Per-group, per-subject schema lookup. Holds no back-reference to
/// segments or tables — the batcher takes a per-batch `Arc<Schema>`
/// snapshot instead of a live handle, which is what avoids the
/// schema-repo/table reference cycle flagged in the design notes.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    groups: RwLock<HashMap<String, HashMap<String, Arc<Schema>>>>,
}

impl SchemaRegistry {
    pub fn register(&self, group: impl Into<String>, schema: Schema) {
        self.groups
            .write()
            .entry(group.into())
            .or_default()
            .insert(schema.subject.clone(), Arc::new(schema));
    }

    pub fn get(&self, group: &str, subject: &str) -> Result<Arc<Schema>> {
        let groups = self.groups.read();
        let subjects = groups.get(group).ok_or_else(|| Error::UnknownGroup(group.to_string()))?;
        subjects
            .get(subject)
            .cloned()
            .ok_or_else(|| Error::UnknownMeasure {
                group: group.to_string(),
                subject: subject.to_string(),
            })
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.groups.read().contains_key(group)
    }
}
