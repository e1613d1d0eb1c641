//! End-to-end coverage of the ingest + parallel query contract, one test
//! per scenario the engine is expected to satisfy.

use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::{Arc, Once};
use tsengine_core::codec::{Value, ValueType};
use tsengine_core::schema::{FieldSpec, Schema, SubjectKind, TagFamilySpec, TagSpec};
use tsengine_core::series::Series;
use tsengine_core::{
    Engine, EngineConfig, EngineContext, Property, QueryOptions, StaticDiskUsage, TimeRange, TypedWrite, UpdateStrategy,
    WriteEvent,
};

fn cpu_schema(index_mode: bool) -> Schema {
    Schema {
        subject: "cpu".to_string(),
        kind: SubjectKind::Measure,
        tag_families: vec![TagFamilySpec {
            name: "default".to_string(),
            tags: vec![TagSpec {
                name: "host".to_string(),
                value_type: ValueType::Str,
                index_rule: None,
                indexed_only: false,
                is_entity: true,
            }],
        }],
        fields: vec![FieldSpec {
            name: "usage".to_string(),
            value_type: ValueType::Int64,
        }],
        index_mode,
        entity_tag_names: vec!["host".to_string()],
    }
}

fn write_event(host: &str, ts: i64, usage: i64) -> WriteEvent {
    WriteEvent::Typed(TypedWrite {
        timestamp: ts,
        version: 1,
        entity_values: vec![Value::Str(host.to_string())],
        tag_families: vec![vec![]],
        fields: vec![("usage".to_string(), Value::Int64(usage))],
    })
}

/// Schema variant carrying a ruleless, non-entity `env` tag alongside the
/// `host` entity tag, for S4's "a tag with no index rule must still reach
/// the index in `indexMode`" coverage.
fn cpu_schema_with_env_tag(index_mode: bool) -> Schema {
    let mut schema = cpu_schema(index_mode);
    schema.tag_families[0].tags.push(TagSpec {
        name: "env".to_string(),
        value_type: ValueType::Str,
        index_rule: None,
        indexed_only: false,
        is_entity: false,
    });
    schema
}

fn write_event_with_env(host: &str, env: &str, ts: i64, usage: i64) -> WriteEvent {
    WriteEvent::Typed(TypedWrite {
        timestamp: ts,
        version: 1,
        entity_values: vec![Value::Str(host.to_string())],
        tag_families: vec![vec![("env".to_string(), Value::Str(env.to_string()))]],
        fields: vec![("usage".to_string(), Value::Int64(usage))],
    })
}

static TRACING: Once = Once::new();

/// Surfaces `tracing::warn!`/`error!` (e.g. the index-write-failure log in
/// `Batcher::finalize`) on the test output instead of discarding them.
fn init_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt().with_test_writer().init();
    });
}

fn engine_with_watermark(max_disk_usage_percent: u8, used_percent: u8) -> Engine {
    init_tracing();
    let config = EngineConfig {
        max_disk_usage_percent,
        ..EngineConfig::default()
    };
    let ctx = EngineContext::new(config, Arc::new(StaticDiskUsage::new(used_percent)));
    Engine::new(ctx, 4)
}

fn query_options(series_ids: Vec<u64>, asc: bool, max_element_size: usize) -> QueryOptions {
    QueryOptions {
        time_range: TimeRange::new(0, 10_000_000),
        series_set: series_ids,
        tag_projection: vec![],
        field_projection: vec!["usage".to_string()],
        max_element_size,
        asc,
        series_to_entity: HashMap::new(),
        predicate: None,
    }
}

#[tokio::test]
async fn s1_simple_write_then_query() {
    let engine = engine_with_watermark(95, 0);
    engine.register_group("g1", 1_000_000);
    engine.register_schema("g1", cpu_schema(false));

    engine
        .write("g1".to_string(), "cpu".to_string(), vec![write_event("host-1", 100, 1)])
        .await
        .unwrap();

    let series_id = Series::bind("cpu", vec![b"host-1".to_vec()]).id();
    let mut options = query_options(vec![series_id], true, 10);
    options.series_to_entity.insert(series_id, vec![b"host-1".to_vec()]);

    let rows = engine.query("g1", "cpu", &options).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].timestamp, 100);
}

#[tokio::test]
async fn s2_multi_shard_results_merge_in_global_time_order() {
    let engine = engine_with_watermark(95, 0);
    engine.register_group("g1", 1_000_000);
    engine.register_schema("g1", cpu_schema(false));

    let hosts = ["host-1", "host-2", "host-3", "host-4"];
    let mut series_ids = Vec::new();
    let mut series_to_entity = HashMap::new();
    for (i, host) in hosts.iter().enumerate() {
        let id = Series::bind("cpu", vec![host.as_bytes().to_vec()]).id();
        series_ids.push(id);
        series_to_entity.insert(id, vec![host.as_bytes().to_vec()]);
        // Interleave timestamps across hosts/shards so global ordering only
        // holds if the executor's cross-shard merge is correct.
        engine
            .write("g1".to_string(), "cpu".to_string(), vec![write_event(host, (100 - i as i64 * 10) + 1000, 1)])
            .await
            .unwrap();
    }

    let mut options = query_options(series_ids, true, 100);
    options.series_to_entity = series_to_entity;
    let rows = engine.query("g1", "cpu", &options).unwrap();

    let timestamps: Vec<i64> = rows.iter().map(|r| r.timestamp).collect();
    let mut sorted = timestamps.clone();
    sorted.sort();
    assert_eq!(timestamps, sorted);
    assert_eq!(rows.len(), hosts.len());
}

#[tokio::test]
async fn s3_query_result_is_truncated_at_the_requested_limit() {
    let engine = engine_with_watermark(95, 0);
    engine.register_group("g1", 10_000_000);
    engine.register_schema("g1", cpu_schema(false));

    let mut events = Vec::new();
    for ts in 1..=1000i64 {
        events.push(write_event("host-1", ts, ts));
    }
    engine.write("g1".to_string(), "cpu".to_string(), events).await.unwrap();

    let series_id = Series::bind("cpu", vec![b"host-1".to_vec()]).id();
    let mut options = query_options(vec![series_id], false, 5);
    options.series_to_entity.insert(series_id, vec![b"host-1".to_vec()]);

    let rows = engine.query("g1", "cpu", &options).unwrap();
    let timestamps: Vec<i64> = rows.iter().map(|r| r.timestamp).collect();
    assert_eq!(timestamps, vec![1000, 999, 998, 997, 996]);
}

#[tokio::test]
async fn s4_index_mode_write_is_searchable_without_a_columnar_row() {
    let engine = engine_with_watermark(95, 0);
    engine.register_group("g1", 1_000_000);
    engine.register_schema("g1", cpu_schema_with_env_tag(true));

    engine
        .write("g1".to_string(), "cpu".to_string(), vec![write_event_with_env("host-1", "prod", 100, 1)])
        .await
        .unwrap();

    let series_id = Series::bind("cpu", vec![b"host-1".to_vec()]).id();
    let mut options = query_options(vec![series_id], true, 10);
    options.series_to_entity.insert(series_id, vec![b"host-1".to_vec()]);

    // Index-mode subjects never land a columnar row, so a block scan finds nothing.
    let rows = engine.query("g1", "cpu", &options).unwrap();
    assert!(rows.is_empty());

    // The ruleless `env` tag still reaches the index document (no index rule,
    // but the subject is in indexMode), so it's searchable by tag value.
    let tsdb = engine.segments().load_tsdb("g1").unwrap();
    let segment = tsdb.segment_for(100);
    let env_value = tsengine_core::codec::encode_named("env", &Value::Str("prod".to_string())).value.unwrap();
    let docs = segment.index().search_by_tag("env", &env_value);
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].doc_id, series_id);
}

#[tokio::test]
async fn s5_write_is_rejected_when_disk_usage_is_above_the_watermark() {
    let engine = engine_with_watermark(90, 95);
    engine.register_group("g1", 1_000_000);
    engine.register_schema("g1", cpu_schema(false));

    let err = engine
        .write("g1".to_string(), "cpu".to_string(), vec![write_event("host-1", 100, 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, tsengine_core::Error::DiskFull));
}

#[tokio::test]
async fn s6_property_merge_preserves_untouched_tags_replace_does_not() {
    let engine = engine_with_watermark(95, 0);
    let store = engine.properties();

    let base = Property {
        group: "g1".to_string(),
        subject: "host".to_string(),
        entity_id: "host-1".to_string(),
        tags: vec![
            tsengine_core::codec::encode_named("rack", &Value::Str("a1".to_string())),
            tsengine_core::codec::encode_named("os", &Value::Str("linux".to_string())),
        ],
        version: 1,
        timestamp: 100,
    };
    store.apply(base, UpdateStrategy::Replace);

    let merge_update = Property {
        group: "g1".to_string(),
        subject: "host".to_string(),
        entity_id: "host-1".to_string(),
        tags: vec![tsengine_core::codec::encode_named("os", &Value::Str("bsd".to_string()))],
        version: 2,
        timestamp: 200,
    };
    store.apply(merge_update, UpdateStrategy::Merge);
    let merged = store.get("g1", "host", "host-1").unwrap();
    assert_eq!(merged.tags.len(), 2);

    let replace_update = Property {
        group: "g1".to_string(),
        subject: "host".to_string(),
        entity_id: "host-1".to_string(),
        tags: vec![tsengine_core::codec::encode_named("os", &Value::Str("windows".to_string()))],
        version: 3,
        timestamp: 300,
    };
    store.apply(replace_update, UpdateStrategy::Replace);
    let replaced = store.get("g1", "host", "host-1").unwrap();
    assert_eq!(replaced.tags.len(), 1);
    assert_eq!(replaced.tags[0].name, "os");
}
