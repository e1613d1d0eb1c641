//! Batcher: binds each write event to a series, resolves its target
//! segment/shard, and stages columnar rows plus index documents for a
//! single atomic-per-call flush.
//!
//! Events arrive either already typed (the in-process hot path) or
//! pre-encoded (the wire path, where the caller already paid the encode
//! cost) — [`WriteEvent`] carries both without forcing a round trip through
//! [`crate::codec`] for data that's already canonical bytes.

use crate::codec::{encode_named, NameValue, Value};
use crate::context::EngineContext;
use crate::error::{Error, Result};
use crate::index::{IndexDocument, IndexField, IndexFieldKey, INDEX_MODE_ENTITY_TAG_PREFIX, SUBJECT_FIELD_KEY};
use crate::schema::{Schema, SchemaRegistry, TagSpec};
use crate::segment::{AppendBatch, GroupName, SegmentManager, ShardId, Tsdb};
use crate::series::Series;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone)]
pub enum WriteEvent {
    Typed(TypedWrite),
    Serialized(SerializedWrite),
}

/// A write expressed as caller-level [`Value`]s, encoded during staging.
#[derive(Debug, Clone)]
pub struct TypedWrite {
    pub timestamp: i64,
    pub version: u64,
    /// Entity tag values in `schema.entity_tag_names` order.
    pub entity_values: Vec<Value>,
    /// Per declared tag family: `(tag_name, value)` pairs present on this event.
    pub tag_families: Vec<Vec<(String, Value)>>,
    pub fields: Vec<(String, Value)>,
}

/// A write already encoded to canonical bytes, e.g. received over the wire
/// where the sender already paid the encode cost.
#[derive(Debug, Clone)]
pub struct SerializedWrite {
    pub timestamp: i64,
    pub version: u64,
    pub entity_values: Vec<Vec<u8>>,
    pub tag_families: Vec<Vec<NameValue>>,
    pub fields: Vec<NameValue>,
}

/// One event's outcome within a batch.
#[derive(Debug, Clone)]
pub enum Status {
    Accepted,
    Rejected(Error),
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub statuses: Vec<Status>,
}

impl BatchOutcome {
    pub fn accepted(&self) -> usize {
        self.statuses.iter().filter(|s| matches!(s, Status::Accepted)).count()
    }

    pub fn rejected(&self) -> usize {
        self.statuses.len() - self.accepted()
    }
}

/// Per-segment staging area: one columnar builder per touched shard, plus
/// the index documents produced for rows landing in that segment. Keyed
/// separately from [`PerGroupBatch`] by segment start timestamp so a batch
/// spanning segments only indexes each row into the segment it actually
/// lands in.
#[derive(Debug, Default)]
struct SegmentStage {
    shards: HashMap<ShardId, AppendBatch>,
    metadata_docs: Vec<IndexDocument>,
    index_mode_docs: Vec<IndexDocument>,
}

/// A group's staged batch: one [`SegmentStage`] per segment start touched
/// by the events ingested so far.
#[derive(Debug, Default)]
pub struct PerGroupBatch {
    segments: HashMap<i64, SegmentStage>,
}

struct NormalizedWrite {
    timestamp: i64,
    version: u64,
    series: Series,
    tag_families: Vec<Vec<NameValue>>,
    fields: Vec<NameValue>,
    index_fields_metadata: Vec<IndexField>,
    index_fields_full: Vec<IndexField>,
}

#[derive(Clone)]
pub struct Batcher {
    segments: Arc<SegmentManager>,
    schemas: Arc<SchemaRegistry>,
    ctx: Arc<EngineContext>,
    shard_count: u32,
}

impl std::fmt::Debug for Batcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batcher").field("shard_count", &self.shard_count).finish()
    }
}

impl Batcher {
    pub fn new(
        segments: Arc<SegmentManager>,
        schemas: Arc<SchemaRegistry>,
        ctx: Arc<EngineContext>,
        shard_count: u32,
    ) -> Self {
        Self {
            segments,
            schemas,
            ctx,
            shard_count: shard_count.max(1),
        }
    }

    /// Stages and flushes one group's batch of events. Individual event
    /// failures (schema mismatch, bad timestamp, bad series) are recorded
    /// per-event in the returned [`BatchOutcome`] and don't fail the whole
    /// call; admission control and unknown group/subject failures are
    /// call-fatal since no event in the batch could possibly be staged.
    pub async fn ingest(&self, group: GroupName, subject: String, events: Vec<WriteEvent>) -> Result<BatchOutcome> {
        if !self.ctx.admits_writes() {
            return Err(Error::DiskFull);
        }
        let schema = self.schemas.get(&group, &subject)?;
        let tsdb = self.segments.load_tsdb(&group)?;

        let mut batch = PerGroupBatch::default();
        let mut statuses = Vec::with_capacity(events.len());
        for event in events {
            match self.stage_event(&schema, &tsdb, event, &mut batch) {
                Ok(()) => statuses.push(Status::Accepted),
                Err(e) => {
                    warn!(group = %group, subject = %subject, error = %e, "rejected write event");
                    statuses.push(Status::Rejected(e));
                }
            }
        }
        self.finalize(&tsdb, batch)?;
        Ok(BatchOutcome { statuses })
    }

    /// Runs independent groups' ingests concurrently as separate tokio
    /// tasks; one group's admission-control rejection doesn't block another
    /// group's batch from landing.
    pub async fn ingest_many(&self, requests: Vec<(GroupName, String, Vec<WriteEvent>)>) -> Vec<Result<BatchOutcome>> {
        let mut handles = Vec::with_capacity(requests.len());
        for (group, subject, events) in requests {
            let this = self.clone();
            handles.push(tokio::spawn(async move { this.ingest(group, subject, events).await }));
        }
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            out.push(match handle.await {
                Ok(result) => result,
                Err(_) => Err(Error::Cancelled),
            });
        }
        out
    }

    fn stage_event(&self, schema: &Schema, tsdb: &Tsdb, event: WriteEvent, batch: &mut PerGroupBatch) -> Result<()> {
        let normalized = self.normalize(schema, event)?;
        let segment = tsdb.segment_for(normalized.timestamp);
        let segment_start = segment.range().start;
        let stage = batch.segments.entry(segment_start).or_default();

        if schema.index_mode {
            let mut fields = normalized.index_fields_full;
            fields.extend(entity_tag_fields(schema, &normalized.series));
            stage.index_mode_docs.push(IndexDocument {
                doc_id: normalized.series.id(),
                entity_values: normalized.series.canonical_bytes().to_vec(),
                fields,
                version: normalized.version,
                timestamp: normalized.timestamp,
            });
            return Ok(());
        }

        let shard = (normalized.series.id() % self.shard_count as u64) as ShardId;
        let append = stage.shards.entry(shard).or_default();
        append.series_id.push(normalized.series.id());
        append.timestamp.push(normalized.timestamp);
        append.version.push(normalized.version);
        append.tag_families.push(normalized.tag_families);
        append.fields.push(normalized.fields);

        if !normalized.index_fields_metadata.is_empty() {
            stage.metadata_docs.push(IndexDocument {
                doc_id: normalized.series.id(),
                entity_values: normalized.series.canonical_bytes().to_vec(),
                fields: normalized.index_fields_metadata,
                version: normalized.version,
                timestamp: normalized.timestamp,
            });
        }
        Ok(())
    }

    fn normalize(&self, schema: &Schema, event: WriteEvent) -> Result<NormalizedWrite> {
        let cfg = self.ctx.config;
        let (timestamp, version, entity_values, tag_families_in, fields_in) = match event {
            WriteEvent::Typed(w) => {
                if w.entity_values.len() != schema.entity_tag_names.len() {
                    return Err(Error::BadSeries(format!(
                        "expected {} entity values, got {}",
                        schema.entity_tag_names.len(),
                        w.entity_values.len()
                    )));
                }
                let entity_values = w.entity_values.iter().map(|v| encode_named("", v).value.unwrap_or_default()).collect();
                let tag_families = w
                    .tag_families
                    .into_iter()
                    .map(|tags| tags.into_iter().map(|(name, value)| encode_named(name, &value)).collect())
                    .collect();
                let fields = w.fields.into_iter().map(|(name, value)| encode_named(name, &value)).collect();
                (w.timestamp, w.version, entity_values, tag_families, fields)
            }
            WriteEvent::Serialized(w) => {
                if w.entity_values.len() != schema.entity_tag_names.len() {
                    return Err(Error::BadSeries(format!(
                        "expected {} entity values, got {}",
                        schema.entity_tag_names.len(),
                        w.entity_values.len()
                    )));
                }
                (w.timestamp, w.version, w.entity_values, w.tag_families, w.fields)
            }
        };

        if timestamp < cfg.min_timestamp_nanos || timestamp >= cfg.max_timestamp_nanos {
            return Err(Error::BadTimestamp {
                ts: timestamp,
                min: cfg.min_timestamp_nanos,
                max: cfg.max_timestamp_nanos,
            });
        }
        if schema.tag_families.is_empty() {
            return Err(Error::NoTagFamily);
        }

        let series = Series::bind(schema.subject.clone(), entity_values);

        let mut tag_families_out = Vec::with_capacity(schema.tag_families.len());
        let mut index_fields_metadata = Vec::new();
        let mut index_fields_full = Vec::new();
        for (family_idx, family_spec) in schema.tag_families.iter().enumerate() {
            let provided = tag_families_in.get(family_idx);
            let mut columnar = Vec::new();
            for tag_spec in &family_spec.tags {
                let Some(nv) = provided.and_then(|cells| cells.iter().find(|nv| nv.name == tag_spec.name)) else {
                    continue;
                };
                check_type(tag_spec, nv)?;
                if let Some(field) = index_field_for(tag_spec, nv, schema.index_mode) {
                    index_fields_full.push(field.clone());
                    index_fields_metadata.push(field);
                }
                if !tag_spec.indexed_only && !tag_spec.is_entity {
                    columnar.push(nv.clone());
                }
            }
            tag_families_out.push(columnar);
        }

        let mut fields_out = Vec::with_capacity(schema.fields.len());
        for field_spec in &schema.fields {
            if let Some(nv) = fields_in.iter().find(|nv| nv.name == field_spec.name) {
                if nv.value_type != field_spec.value_type {
                    return Err(Error::SchemaMismatch(format!(
                        "field {:?}: expected {:?}, got {:?}",
                        field_spec.name, field_spec.value_type, nv.value_type
                    )));
                }
                fields_out.push(nv.clone());
            }
        }

        Ok(NormalizedWrite {
            timestamp,
            version,
            series,
            tag_families: tag_families_out,
            fields: fields_out,
            index_fields_metadata,
            index_fields_full,
        })
    }

    /// Index-write failures are logged, not surfaced: the data append and
    /// clock advance for a segment must not roll back because its index
    /// upsert failed. This is the engine's one known asymmetry between the
    /// columnar and index write paths.
    fn finalize(&self, tsdb: &Tsdb, batch: PerGroupBatch) -> Result<()> {
        for (segment_start, stage) in batch.segments {
            let segment = tsdb.segment_for(segment_start);
            for (shard, append) in stage.shards {
                segment.table_for(shard).write().append(append)?;
            }
            if !stage.metadata_docs.is_empty() {
                if let Err(err) = segment.index().insert(stage.metadata_docs) {
                    warn!(%err, segment_start, "metadata index write failed");
                }
            }
            if !stage.index_mode_docs.is_empty() {
                if let Err(err) = segment.index().update(stage.index_mode_docs) {
                    warn!(%err, segment_start, "index-mode document write failed");
                }
            }
            tsdb.advance_clock(segment.range().end);
        }
        Ok(())
    }
}

fn check_type(spec: &TagSpec, nv: &NameValue) -> Result<()> {
    if nv.value_type != spec.value_type {
        return Err(Error::SchemaMismatch(format!(
            "tag {:?}: expected {:?}, got {:?}",
            spec.name, spec.value_type, nv.value_type
        )));
    }
    Ok(())
}

/// Builds the [`IndexField`] for a tag: an explicit index rule always
/// produces one. Absent a rule, a tag still produces one when the subject is
/// in `indexMode` — otherwise its value would be dropped entirely, since
/// `indexMode` subjects never land a columnar row to recover it from.
fn index_field_for(spec: &TagSpec, nv: &NameValue, index_mode: bool) -> Option<IndexField> {
    if let Some(rule) = spec.index_rule.as_ref() {
        return Some(IndexField {
            key: IndexFieldKey::Rule {
                index_rule_id: rule.id,
                analyzer: rule.analyzer.clone(),
            },
            value: nv.value.clone().unwrap_or_default(),
            index: true,
            store: true,
            no_sort: rule.no_sort,
        });
    }
    if index_mode {
        return Some(IndexField {
            key: IndexFieldKey::Tag { tag_name: spec.name.clone() },
            value: nv.value.clone().unwrap_or_default(),
            index: false,
            store: true,
            no_sort: false,
        });
    }
    None
}

/// Synthesizes the entity-tag fields carried only on index-mode documents
/// (which have no columnar companion row to recover entity values from).
fn entity_tag_fields(schema: &Schema, series: &Series) -> Vec<IndexField> {
    let mut out = Vec::with_capacity(schema.entity_tag_names.len() + 1);
    for (pos, name) in schema.entity_tag_names.iter().enumerate() {
        let Some(value) = series.entity_values().get(pos) else {
            continue;
        };
        out.push(IndexField {
            key: IndexFieldKey::Tag {
                tag_name: format!("{INDEX_MODE_ENTITY_TAG_PREFIX}{name}"),
            },
            value: value.clone(),
            index: true,
            store: true,
            no_sort: true,
        });
    }
    out.push(IndexField {
        key: IndexFieldKey::Tag {
            tag_name: SUBJECT_FIELD_KEY.to_string(),
        },
        value: schema.subject.as_bytes().to_vec(),
        index: true,
        store: true,
        no_sort: true,
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ValueType;
    use crate::context::{EngineConfig, StaticDiskUsage};
    use crate::schema::{FieldSpec, IndexRule, SubjectKind, TagFamilySpec};

    fn make_batcher(schema: Schema) -> (Batcher, String) {
        let segments = Arc::new(SegmentManager::default());
        segments.register_group("g1", 1_000);
        let schemas = Arc::new(SchemaRegistry::default());
        schemas.register("g1", schema.clone());
        let ctx = Arc::new(EngineContext::new(EngineConfig::default(), Arc::new(StaticDiskUsage::default())));
        (Batcher::new(segments, schemas, ctx, 4), schema.subject)
    }

    fn measure_schema(index_mode: bool) -> Schema {
        Schema {
            subject: "cpu".to_string(),
            kind: SubjectKind::Measure,
            tag_families: vec![TagFamilySpec {
                name: "default".to_string(),
                tags: vec![
                    TagSpec {
                        name: "service".to_string(),
                        value_type: ValueType::Str,
                        index_rule: None,
                        indexed_only: false,
                        is_entity: true,
                    },
                    TagSpec {
                        name: "region".to_string(),
                        value_type: ValueType::Str,
                        index_rule: Some(IndexRule {
                            id: 1,
                            analyzer: None,
                            no_sort: false,
                        }),
                        indexed_only: false,
                        is_entity: false,
                    },
                ],
            }],
            fields: vec![FieldSpec {
                name: "usage".to_string(),
                value_type: ValueType::Int64,
            }],
            index_mode,
            entity_tag_names: vec!["service".to_string()],
        }
    }

    fn typed_event(ts: i64) -> WriteEvent {
        WriteEvent::Typed(TypedWrite {
            timestamp: ts,
            version: 1,
            entity_values: vec![Value::Str("svc1".to_string())],
            tag_families: vec![vec![("region".to_string(), Value::Str("us-east".to_string()))]],
            fields: vec![("usage".to_string(), Value::Int64(42))],
        })
    }

    #[tokio::test]
    async fn accepted_write_lands_in_the_table_and_metadata_index() {
        let (batcher, subject) = make_batcher(measure_schema(false));
        let outcome = batcher.ingest("g1".to_string(), subject, vec![typed_event(100)]).await.unwrap();
        assert_eq!(outcome.accepted(), 1);

        let tsdb = batcher.segments.load_tsdb("g1").unwrap();
        let segment = tsdb.segment_for(100);
        let total_rows: usize = segment.tables().values().map(|t| t.read().row_count()).sum();
        assert_eq!(total_rows, 1);
        assert_eq!(segment.index().series_ids().len(), 1);
    }

    #[tokio::test]
    async fn index_mode_write_skips_the_columnar_table() {
        let (batcher, subject) = make_batcher(measure_schema(true));
        let outcome = batcher.ingest("g1".to_string(), subject, vec![typed_event(100)]).await.unwrap();
        assert_eq!(outcome.accepted(), 1);

        let tsdb = batcher.segments.load_tsdb("g1").unwrap();
        let segment = tsdb.segment_for(100);
        let total_rows: usize = segment.tables().values().map(|t| t.read().row_count()).sum();
        assert_eq!(total_rows, 0);
        assert!(segment.index().series_ids().is_empty());
        assert_eq!(segment.index().search_by_tag(SUBJECT_FIELD_KEY, b"cpu").len(), 1);
    }

    #[tokio::test]
    async fn index_mode_write_retains_a_ruleless_tags_value_in_the_index() {
        let mut schema = measure_schema(true);
        schema.tag_families[0].tags.push(TagSpec {
            name: "az".to_string(),
            value_type: ValueType::Str,
            index_rule: None,
            indexed_only: false,
            is_entity: false,
        });
        let (batcher, subject) = make_batcher(schema);
        let event = WriteEvent::Typed(TypedWrite {
            timestamp: 100,
            version: 1,
            entity_values: vec![Value::Str("svc1".to_string())],
            tag_families: vec![vec![
                ("region".to_string(), Value::Str("us-east".to_string())),
                ("az".to_string(), Value::Str("us-east-1a".to_string())),
            ]],
            fields: vec![("usage".to_string(), Value::Int64(42))],
        });
        let outcome = batcher.ingest("g1".to_string(), subject, vec![event]).await.unwrap();
        assert_eq!(outcome.accepted(), 1);

        let tsdb = batcher.segments.load_tsdb("g1").unwrap();
        let segment = tsdb.segment_for(100);
        let az_value = encode_named("az", &Value::Str("us-east-1a".to_string())).value.unwrap();
        assert_eq!(segment.index().search_by_tag("az", &az_value).len(), 1);
    }

    #[tokio::test]
    async fn out_of_window_timestamp_is_rejected_without_failing_the_batch() {
        let (batcher, subject) = make_batcher(measure_schema(false));
        let outcome = batcher
            .ingest("g1".to_string(), subject, vec![typed_event(100), typed_event(-1)])
            .await
            .unwrap();
        assert_eq!(outcome.accepted(), 1);
        assert_eq!(outcome.rejected(), 1);
    }

    #[tokio::test]
    async fn disk_full_rejects_the_whole_batch() {
        let (batcher, subject) = make_batcher(measure_schema(false));
        let ctx = EngineContext::new(EngineConfig::default(), Arc::new(StaticDiskUsage::new(100)));
        let batcher = Batcher::new(Arc::clone(&batcher.segments), Arc::clone(&batcher.schemas), Arc::new(ctx), 4);
        let err = batcher.ingest("g1".to_string(), subject, vec![typed_event(100)]).await.unwrap_err();
        assert!(matches!(err, Error::DiskFull));
    }

    #[tokio::test]
    async fn batch_spanning_segments_indexes_each_row_only_in_its_own_segment() {
        let (batcher, subject) = make_batcher(measure_schema(false));
        batcher
            .ingest("g1".to_string(), subject, vec![typed_event(100), typed_event(5_000)])
            .await
            .unwrap();

        let tsdb = batcher.segments.load_tsdb("g1").unwrap();
        let first = tsdb.segment_for(100);
        let second = tsdb.segment_for(5_000);
        assert_eq!(first.index().series_ids().len(), 1);
        assert_eq!(second.index().series_ids().len(), 1);
    }
}
