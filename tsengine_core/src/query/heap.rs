//! K-way time-ordered merge of block cursors, with early termination at a
//! result limit.

use crate::codec::NameValue;
use crate::series::SeriesID;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// One series' decoded, time-sorted rows for a single block scan.
#[derive(Debug, Clone)]
pub struct DecodedBlock {
    pub series_id: SeriesID,
    pub timestamps: Vec<i64>,
    pub versions: Vec<u64>,
    pub tag_families: Vec<Vec<Vec<NameValue>>>,
    pub fields: Vec<Vec<NameValue>>,
}

/// A materialized output row, positionally aligned across tag families and fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub series_id: SeriesID,
    pub timestamp: i64,
    pub version: u64,
    pub tag_families: Vec<Vec<NameValue>>,
    pub fields: Vec<NameValue>,
}

/// A stateful reader over one decoded block, positioned at one row. `idx`
/// walks forward for ascending scans and backward for descending ones.
#[derive(Debug, Clone)]
pub struct BlockCursor {
    block: DecodedBlock,
    idx: i64,
    asc: bool,
    seq: u64,
}

impl BlockCursor {
    /// `idx` starts at 0 for ascending scans, or the last row for
    /// descending ones. `block.timestamps` must already be sorted
    /// ascending; returns `None` for an empty block (nothing to scan).
    pub fn new(block: DecodedBlock, asc: bool) -> Option<Self> {
        if block.timestamps.is_empty() {
            return None;
        }
        let idx = if asc { 0 } else { block.timestamps.len() as i64 - 1 };
        Some(Self {
            block,
            idx,
            asc,
            seq: 0,
        })
    }

    fn current_ts(&self) -> i64 {
        self.block.timestamps[self.idx as usize]
    }

    fn row(&self) -> ResultRow {
        let i = self.idx as usize;
        ResultRow {
            series_id: self.block.series_id,
            timestamp: self.block.timestamps[i],
            version: self.block.versions[i],
            tag_families: self.block.tag_families[i].clone(),
            fields: self.block.fields[i].clone(),
        }
    }

    /// Advances the cursor one row in scan direction. Returns `false` once
    /// the cursor has walked off either end of the block.
    fn advance(&mut self) -> bool {
        if self.asc {
            self.idx += 1;
        } else {
            self.idx -= 1;
        }
        self.idx >= 0 && (self.idx as usize) < self.block.timestamps.len()
    }
}

#[derive(Debug)]
struct HeapEntry(BlockCursor);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.current_ts() == other.0.current_ts() && self.0.seq == other.0.seq
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert the timestamp comparison so the
        // "best" cursor (smallest ts for asc, largest for desc) pops first.
        let by_ts = if self.0.asc {
            other.0.current_ts().cmp(&self.0.current_ts())
        } else {
            self.0.current_ts().cmp(&other.0.current_ts())
        };
        // Equal timestamps: earlier-inserted cursor pops first (stable over
        // insertion order), an explicit choice where the spec leaves
        // cross-cursor tie-breaking unspecified.
        by_ts.then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

/// A min/max-heap (by scan direction) of block cursors, pooled across
/// worker iterations.
#[derive(Debug, Default)]
pub struct BlockCursorHeap {
    heap: BinaryHeap<HeapEntry>,
    next_seq: u64,
}

impl BlockCursorHeap {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, mut cursor: BlockCursor) {
        cursor.seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(HeapEntry(cursor));
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Drains the heap in time order, copying each popped cursor's current
    /// row to the output and advancing it back into the heap if still in
    /// range. Terminates when the heap empties or `limit` rows are produced.
    pub fn merge(&mut self, limit: usize) -> Vec<ResultRow> {
        let mut out = Vec::with_capacity(limit.min(1024));
        while out.len() < limit {
            let Some(HeapEntry(mut cursor)) = self.heap.pop() else {
                break;
            };
            out.push(cursor.row());
            if cursor.advance() {
                self.heap.push(HeapEntry(cursor));
            }
        }
        out
    }

    /// Resets the heap for reuse from a pool, without deallocating its backing storage.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.next_seq = 0;
    }
}
