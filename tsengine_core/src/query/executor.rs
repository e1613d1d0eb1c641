//! Parallel Query Executor: fans block scans across a worker pool, builds a
//! per-worker heap-merge, then reduces to one bounded, time-ordered result.

use crate::codec::NameValue;
use crate::context::CancellationToken;
use crate::cpu;
use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::query::heap::{BlockCursor, BlockCursorHeap, DecodedBlock, ResultRow};
use crate::scanner::{BlockDescriptor, BlockScanner};
use crate::schema::Schema;
use crate::segment::{SegmentHandle, TimeRange};
use crate::series::SeriesID;
use std::collections::HashMap;
use std::sync::Arc;

/// Resolved query parameters. `series_to_entity` is populated during series
/// resolution (before the executor runs) and consumed here to synthesize
/// entity-tag columns the table never physically stores.
#[derive(Clone)]
pub struct QueryOptions {
    pub time_range: TimeRange,
    pub series_set: Vec<SeriesID>,
    /// Family name -> ordered tag names to project from that family.
    pub tag_projection: Vec<(String, Vec<String>)>,
    pub field_projection: Vec<String>,
    pub max_element_size: usize,
    pub asc: bool,
    pub series_to_entity: HashMap<SeriesID, Vec<Vec<u8>>>,
    pub predicate: Option<Arc<dyn Fn(&ResultRow) -> bool + Send + Sync>>,
}

impl std::fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOptions")
            .field("time_range", &self.time_range)
            .field("series_set", &self.series_set)
            .field("tag_projection", &self.tag_projection)
            .field("field_projection", &self.field_projection)
            .field("max_element_size", &self.max_element_size)
            .field("asc", &self.asc)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

/// Synthesizes a [`BlockCursor`] for one descriptor: decodes the requested
/// tag/field columns, replicating entity-tag values from `series_to_entity`
/// and materializing any projected family absent from the block as empty
/// tags. Projected tags are pushed rather than index-assigned into a
/// pre-sized slot, so a missing or skipped tag simply isn't present instead
/// of indexing into an uninitialized row.
fn load_block_cursor(descriptor: BlockDescriptor, qo: &QueryOptions, schema: &Schema) -> Option<BlockCursor> {
    let table = descriptor.table.read();
    let mut rows = descriptor.row_indices.clone();
    rows.sort_by_key(|&i| table.timestamp_at(i));
    if rows.is_empty() {
        return None;
    }

    let entity_values = qo.series_to_entity.get(&descriptor.series_id);
    let family_positions: Vec<Option<usize>> = qo
        .tag_projection
        .iter()
        .map(|(family_name, _)| schema.family_position(family_name))
        .collect();

    let mut timestamps = Vec::with_capacity(rows.len());
    let mut versions = Vec::with_capacity(rows.len());
    let mut fields_out = Vec::with_capacity(rows.len());
    let mut tag_families_out: Vec<Vec<Vec<NameValue>>> = Vec::with_capacity(rows.len());

    for &row in &rows {
        timestamps.push(table.timestamp_at(row));
        versions.push(table.version_at(row));
        fields_out.push(project_fields(table.fields_at(row), &qo.field_projection));

        let mut row_families = Vec::with_capacity(qo.tag_projection.len());
        for (family_idx, (family_name, tag_names)) in qo.tag_projection.iter().enumerate() {
            let stored = family_positions[family_idx].and_then(|pos| table.tag_family_at(row, pos));
            let mut tags = Vec::with_capacity(tag_names.len());
            for tag_name in tag_names {
                let Some(spec) = schema.find_tag(family_name, tag_name) else {
                    continue;
                };
                if spec.indexed_only {
                    continue;
                }
                if spec.is_entity {
                    if let Some(pos) = schema.entity_position(tag_name) {
                        if let Some(value) = entity_values.and_then(|v| v.get(pos)) {
                            tags.push(NameValue {
                                name: tag_name.clone(),
                                value_type: spec.value_type,
                                value: Some(value.clone()),
                                value_arr: None,
                            });
                        }
                    }
                    continue;
                }
                if let Some(nv) = stored.and_then(|family| family.iter().find(|nv| &nv.name == tag_name)) {
                    tags.push(nv.clone());
                }
            }
            row_families.push(tags);
        }
        tag_families_out.push(row_families);
    }
    drop(table);

    BlockCursor::new(
        DecodedBlock {
            series_id: descriptor.series_id,
            timestamps,
            versions,
            tag_families: tag_families_out,
            fields: fields_out,
        },
        qo.asc,
    )
}

fn project_fields(stored: &[NameValue], projection: &[String]) -> Vec<NameValue> {
    if projection.is_empty() {
        return stored.to_vec();
    }
    projection
        .iter()
        .filter_map(|name| stored.iter().find(|nv| &nv.name == name).cloned())
        .collect()
}

/// Runs the full query pipeline: segments visited in scan-direction order,
/// each segment's matching rows fanned out to a worker pool that merges
/// into a bounded per-worker result, then one final reduce across workers
/// (and across segments) to a single bounded, time-ordered result.
pub fn execute(
    mut segments: Vec<SegmentHandle>,
    qo: &QueryOptions,
    schema: &Schema,
    cancel: &CancellationToken,
) -> Result<Vec<ResultRow>> {
    segments.sort_by_key(|s| s.range().start);
    if !qo.asc {
        segments.reverse();
    }

    let worker_count = cpu::worker_pool_size();
    let mut per_worker_results: Vec<Vec<ResultRow>> = Vec::new();
    let mut worker_errors: Vec<Error> = Vec::new();
    // Shared across every segment's worker fan-out so heap allocations survive
    // past one segment's scan instead of being rebuilt from scratch each time.
    let heap_pool: Arc<Pool<BlockCursorHeap>> = Arc::new(Pool::new(BlockCursorHeap::new));

    for segment in &segments {
        if cancel.is_cancelled() {
            break;
        }
        let tables = BlockScanner::segment_tables(segment);
        let candidates = segment.index().resolve(&qo.series_set);
        let descriptors = BlockScanner::search_series(&candidates, qo.time_range, &tables);
        let (rx, producer_handles) = BlockScanner::scan_shards_in_parallel(descriptors, worker_count);

        let mut worker_handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let rx = rx.clone();
            let qo = qo.clone();
            let schema = schema.clone();
            let cancel = cancel.clone();
            let heap_pool = Arc::clone(&heap_pool);
            worker_handles.push(std::thread::spawn(move || -> Result<Vec<ResultRow>> {
                let mut heap = heap_pool.acquire();
                while let Ok(batch) = rx.recv() {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if let Some(err) = batch.err {
                        heap.clear();
                        return Err(err);
                    }
                    for descriptor in batch.descriptors {
                        if let Some(cursor) = load_block_cursor(descriptor, &qo, &schema) {
                            heap.push(cursor);
                        }
                    }
                }
                let mut merged = heap.merge(qo.max_element_size);
                heap.clear();
                if let Some(predicate) = &qo.predicate {
                    merged.retain(|row| predicate(row));
                }
                Ok(merged)
            }));
        }

        drop(rx);
        for handle in producer_handles {
            let _ = handle.join();
        }
        for handle in worker_handles {
            match handle.join() {
                Ok(Ok(result)) => per_worker_results.push(result),
                Ok(Err(e)) => worker_errors.push(e),
                Err(_) => worker_errors.push(Error::Cancelled),
            }
        }
    }

    if let Some(combined) = Error::combine(worker_errors) {
        return Err(combined);
    }

    Ok(merge_sorted(per_worker_results, qo.asc, qo.max_element_size))
}

/// Final k-way reduce of already time-ordered, bounded per-worker results
/// into one ordered, limited result. A [`DecodedBlock`] carries one
/// `series_id` for its whole run of rows, so a worker's mixed-series result
/// vector is split back out by series before being wrapped in cursors —
/// otherwise every row would be mislabeled with whichever series happened
/// to be first. Each series' rows arrive in scan order (ascending or
/// descending per `asc`); [`BlockCursor::new`] requires timestamps sorted
/// ascending regardless of scan direction, so they're re-sorted here.
fn merge_sorted(worker_results: Vec<Vec<ResultRow>>, asc: bool, limit: usize) -> Vec<ResultRow> {
    let mut heap = BlockCursorHeap::new();
    let mut by_series: HashMap<SeriesID, Vec<ResultRow>> = HashMap::new();
    for rows in worker_results {
        for row in rows {
            by_series.entry(row.series_id).or_default().push(row);
        }
    }
    for (series_id, mut rows) in by_series {
        rows.sort_by_key(|r| r.timestamp);
        let timestamps = rows.iter().map(|r| r.timestamp).collect();
        let versions = rows.iter().map(|r| r.version).collect();
        let tag_families = rows.iter().map(|r| r.tag_families.clone()).collect();
        let fields = rows.iter().map(|r| r.fields.clone()).collect();
        if let Some(cursor) = BlockCursor::new(
            DecodedBlock {
                series_id,
                timestamps,
                versions,
                tag_families,
                fields,
            },
            asc,
        ) {
            heap.push(cursor);
        }
    }
    heap.merge(limit)
}
