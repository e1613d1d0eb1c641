//! Segment Manager: per-group TSDB handle, time-segment resolution, and
//! per-shard columnar tables.
//!
//! The on-disk format of the underlying block store is out of scope; a
//! `TSTable` here is an in-memory columnar append-only vector store that
//! satisfies the same append/alignment invariants a real one would.

use crate::codec::NameValue;
use crate::error::{Error, Result};
use crate::index::InvertedIndex;
use crate::series::SeriesID;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};

pub type GroupName = String;
pub type ShardId = u32;

/// A half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn intersects(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// One append call's worth of columnar rows. All vectors must have equal
/// length; `TSTable::append` rejects mismatched batches rather than
/// silently truncating.
#[derive(Debug, Default)]
pub struct AppendBatch {
    pub series_id: Vec<SeriesID>,
    pub timestamp: Vec<i64>,
    pub version: Vec<u64>,
    /// Per row, per declared tag family: the columnar tags for that family.
    pub tag_families: Vec<Vec<Vec<NameValue>>>,
    /// Per row: the measure's field cells, empty for streams.
    pub fields: Vec<Vec<NameValue>>,
}

impl AppendBatch {
    pub fn len(&self) -> usize {
        self.series_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series_id.is_empty()
    }
}

/// Columnar, append-only store for one `(segment, shard)`. Ordering within
/// the table is not assumed; ordering is imposed entirely at query time.
#[derive(Debug, Default)]
pub struct TsTable {
    series_id: Vec<SeriesID>,
    timestamp: Vec<i64>,
    version: Vec<u64>,
    tag_families: Vec<Vec<Vec<NameValue>>>,
    fields: Vec<Vec<NameValue>>,
}

impl TsTable {
    /// Appends a batch's columns in one call. Rejects the batch (without
    /// partially applying it) if its column vectors aren't equal length.
    pub fn append(&mut self, batch: AppendBatch) -> Result<()> {
        let n = batch.len();
        if batch.timestamp.len() != n
            || batch.version.len() != n
            || batch.tag_families.len() != n
            || batch.fields.len() != n
        {
            return Err(Error::Io("append batch column length mismatch".to_string()));
        }
        self.series_id.extend(batch.series_id);
        self.timestamp.extend(batch.timestamp);
        self.version.extend(batch.version);
        self.tag_families.extend(batch.tag_families);
        self.fields.extend(batch.fields);
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.series_id.len()
    }

    pub fn series_id_at(&self, row: usize) -> SeriesID {
        self.series_id[row]
    }

    pub fn timestamp_at(&self, row: usize) -> i64 {
        self.timestamp[row]
    }

    pub fn version_at(&self, row: usize) -> u64 {
        self.version[row]
    }

    pub fn fields_at(&self, row: usize) -> &[NameValue] {
        &self.fields[row]
    }

    pub fn tag_family_at(&self, row: usize, family_position: usize) -> Option<&Vec<NameValue>> {
        self.tag_families.get(row).and_then(|families| families.get(family_position))
    }
}

/// A segment's storage: per-shard tables plus its own inverted index.
#[derive(Debug)]
pub struct SegmentInner {
    pub id: u64,
    pub range: TimeRange,
    tables: RwLock<HashMap<ShardId, Arc<RwLock<TsTable>>>>,
    pub index: InvertedIndex,
    refcount: AtomicUsize,
}

impl SegmentInner {
    fn new(id: u64, range: TimeRange) -> Self {
        Self {
            id,
            range,
            tables: RwLock::new(HashMap::new()),
            index: InvertedIndex::default(),
            refcount: AtomicUsize::new(0),
        }
    }

    pub fn table_for(&self, shard: ShardId) -> Arc<RwLock<TsTable>> {
        Arc::clone(
            self.tables
                .write()
                .entry(shard)
                .or_insert_with(|| Arc::new(RwLock::new(TsTable::default()))),
        )
    }

    pub fn tables(&self) -> HashMap<ShardId, Arc<RwLock<TsTable>>> {
        self.tables.read().clone()
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::SeqCst)
    }
}

/// A reference-counted handle to a segment. Acquiring increments the
/// refcount; the handle releases it automatically when dropped, on every
/// exit path (success, error, or cancellation) without requiring callers to
/// remember a manual `decRef`.
#[derive(Debug)]
pub struct SegmentHandle {
    inner: Arc<SegmentInner>,
}

impl SegmentHandle {
    fn acquire(inner: Arc<SegmentInner>) -> Self {
        inner.refcount.fetch_add(1, Ordering::SeqCst);
        Self { inner }
    }

    pub fn range(&self) -> TimeRange {
        self.inner.range
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn index(&self) -> &InvertedIndex {
        &self.inner.index
    }

    pub fn table_for(&self, shard: ShardId) -> Arc<RwLock<TsTable>> {
        self.inner.table_for(shard)
    }

    pub fn tables(&self) -> HashMap<ShardId, Arc<RwLock<TsTable>>> {
        self.inner.tables()
    }

    pub fn refcount(&self) -> usize {
        self.inner.refcount()
    }
}

impl Clone for SegmentHandle {
    fn clone(&self) -> Self {
        SegmentHandle::acquire(Arc::clone(&self.inner))
    }
}

impl Drop for SegmentHandle {
    fn drop(&mut self) {
        self.inner.refcount.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A group's TSDB: its segments (tiled, non-overlapping time windows) and a
/// monotonic write-frontier clock that retention/rotation can observe.
#[derive(Debug)]
pub struct Tsdb {
    segment_duration_nanos: i64,
    segments: RwLock<std::collections::BTreeMap<i64, Arc<SegmentInner>>>,
    clock: AtomicI64,
    next_segment_id: AtomicU64,
}

impl Tsdb {
    fn new(segment_duration_nanos: i64) -> Self {
        Self {
            segment_duration_nanos,
            segments: RwLock::new(std::collections::BTreeMap::new()),
            clock: AtomicI64::new(i64::MIN),
            next_segment_id: AtomicU64::new(1),
        }
    }

    /// Returns the existing segment containing `timestamp`, creating one if
    /// none exists. Idempotent under concurrent callers: the segment map is
    /// locked for the whole get-or-create.
    pub fn segment_for(&self, timestamp: i64) -> SegmentHandle {
        let start = timestamp.div_euclid(self.segment_duration_nanos) * self.segment_duration_nanos;
        let mut segments = self.segments.write();
        let inner = segments
            .entry(start)
            .or_insert_with(|| {
                let id = self.next_segment_id.fetch_add(1, Ordering::SeqCst);
                Arc::new(SegmentInner::new(
                    id,
                    TimeRange::new(start, start + self.segment_duration_nanos),
                ))
            })
            .clone();
        SegmentHandle::acquire(inner)
    }

    pub fn table_for(&self, segment: &SegmentHandle, shard: ShardId) -> Arc<RwLock<TsTable>> {
        segment.table_for(shard)
    }

    pub fn advance_clock(&self, ts: i64) {
        self.clock.fetch_max(ts, Ordering::SeqCst);
    }

    pub fn clock(&self) -> i64 {
        self.clock.load(Ordering::SeqCst)
    }

    /// Segments whose range intersects `range`, ordered oldest-first.
    pub fn segments_in_range(&self, range: TimeRange) -> Vec<SegmentHandle> {
        self.segments
            .read()
            .values()
            .filter(|inner| inner.range.intersects(&range))
            .map(|inner| SegmentHandle::acquire(Arc::clone(inner)))
            .collect()
    }
}

/// Owns one [`Tsdb`] per registered group.
#[derive(Debug, Default)]
pub struct SegmentManager {
    groups: RwLock<HashMap<GroupName, Arc<Tsdb>>>,
}

impl SegmentManager {
    pub fn register_group(&self, group: impl Into<String>, segment_duration_nanos: i64) {
        self.groups
            .write()
            .entry(group.into())
            .or_insert_with(|| Arc::new(Tsdb::new(segment_duration_nanos)));
    }

    pub fn load_tsdb(&self, group: &str) -> Result<Arc<Tsdb>> {
        self.groups
            .read()
            .get(group)
            .cloned()
            .ok_or_else(|| Error::UnknownGroup(group.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_for_is_create_if_not_exist_and_idempotent() {
        let tsdb = Tsdb::new(1_000);
        let a = tsdb.segment_for(100);
        let b = tsdb.segment_for(900);
        assert_eq!(a.id(), b.id());
        assert_eq!(a.range(), TimeRange::new(0, 1_000));
    }

    #[test]
    fn distinct_windows_get_distinct_segments() {
        let tsdb = Tsdb::new(1_000);
        let a = tsdb.segment_for(100);
        let b = tsdb.segment_for(1_100);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn refcount_balances_across_clone_and_drop() {
        let tsdb = Tsdb::new(1_000);
        let a = tsdb.segment_for(1);
        assert_eq!(a.refcount(), 1);
        {
            let b = a.clone();
            assert_eq!(a.refcount(), 2);
            drop(b);
        }
        assert_eq!(a.refcount(), 1);
    }

    #[test]
    fn table_append_rejects_mismatched_column_lengths() {
        let mut table = TsTable::default();
        let batch = AppendBatch {
            series_id: vec![1, 2],
            timestamp: vec![1],
            version: vec![1, 1],
            tag_families: vec![vec![], vec![]],
            fields: vec![vec![], vec![]],
        };
        assert!(table.append(batch).is_err());
        assert_eq!(table.row_count(), 0);
    }

    #[test]
    fn table_append_preserves_column_alignment() {
        let mut table = TsTable::default();
        let batch = AppendBatch {
            series_id: vec![1, 2],
            timestamp: vec![10, 20],
            version: vec![1, 1],
            tag_families: vec![vec![], vec![]],
            fields: vec![vec![], vec![]],
        };
        table.append(batch).unwrap();
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn unknown_group_lookup_fails() {
        let manager = SegmentManager::default();
        assert!(matches!(manager.load_tsdb("nope"), Err(Error::UnknownGroup(_))));
    }
}
