//! Block Scanner: resolves candidate rows for a series set over a time
//! range and fans the resulting per-shard descriptors out to worker
//! threads on a bounded channel.

use crate::error::Error;
use crate::segment::{SegmentHandle, ShardId, TimeRange, TsTable};
use crate::series::SeriesID;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A candidate set of rows within one `(shard, series)` pair, matching a
/// time predicate. Not a physically compressed block (the underlying block
/// format is out of scope) — the row indices it names are re-read from the
/// live table by the worker that decodes it.
#[derive(Debug, Clone)]
pub struct BlockDescriptor {
    pub shard: ShardId,
    pub series_id: SeriesID,
    pub table: Arc<RwLock<TsTable>>,
    pub row_indices: Vec<usize>,
}

/// One scan batch's worth of descriptors, plus any per-batch error. Errors
/// here are not fatal to the overall scan.
#[derive(Debug)]
pub struct BlockScanResultBatch {
    pub descriptors: Vec<BlockDescriptor>,
    pub err: Option<Error>,
}

#[derive(Debug, Clone, Copy)]
pub struct BlockScanner;

impl BlockScanner {
    /// Intersects the segment's tables with the requested series set and
    /// time range, grouped into one descriptor per `(shard, series)` with a
    /// non-empty match.
    pub fn search_series(
        series: &[SeriesID],
        time_range: TimeRange,
        tables: &HashMap<ShardId, Arc<RwLock<TsTable>>>,
    ) -> Vec<BlockDescriptor> {
        let wanted: HashSet<SeriesID> = series.iter().copied().collect();
        let mut out = Vec::new();
        for (&shard, table) in tables {
            let guard = table.read();
            let mut by_series: HashMap<SeriesID, Vec<usize>> = HashMap::new();
            for row in 0..guard.row_count() {
                let sid = guard.series_id_at(row);
                if !wanted.contains(&sid) {
                    continue;
                }
                if !time_range.contains(guard.timestamp_at(row)) {
                    continue;
                }
                by_series.entry(sid).or_default().push(row);
            }
            drop(guard);
            for (series_id, row_indices) in by_series {
                out.push(BlockDescriptor {
                    shard,
                    series_id,
                    table: Arc::clone(table),
                    row_indices,
                });
            }
        }
        out
    }

    /// Fans per-shard descriptor groups out onto a bounded channel sized to
    /// `min(shard_count, worker_pool_size)`, which is the channel's
    /// capacity and hence the scan's natural backpressure point. Returns
    /// the receiving end plus join handles for the producer threads
    /// (the scan's per-shard "finalizers": invoke after consumption
    /// completes to release producer-side resources).
    pub fn scan_shards_in_parallel(
        descriptors: Vec<BlockDescriptor>,
        worker_pool_size: usize,
    ) -> (
        crossbeam_channel::Receiver<BlockScanResultBatch>,
        Vec<std::thread::JoinHandle<()>>,
    ) {
        let mut by_shard: HashMap<ShardId, Vec<BlockDescriptor>> = HashMap::new();
        for d in descriptors {
            by_shard.entry(d.shard).or_default().push(d);
        }

        let capacity = worker_pool_size.min(by_shard.len().max(1)).max(1);
        let (tx, rx) = crossbeam_channel::bounded(capacity);

        let mut handles = Vec::with_capacity(by_shard.len());
        for (_, shard_descriptors) in by_shard {
            let tx = tx.clone();
            handles.push(std::thread::spawn(move || {
                let _ = tx.send(BlockScanResultBatch {
                    descriptors: shard_descriptors,
                    err: None,
                });
            }));
        }
        drop(tx);

        (rx, handles)
    }

    pub fn segment_tables(segment: &SegmentHandle) -> HashMap<ShardId, Arc<RwLock<TsTable>>> {
        segment.tables()
    }
}
