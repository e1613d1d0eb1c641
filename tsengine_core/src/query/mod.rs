//! Parallel, time-ordered query pipeline: block heap-merge primitives and
//! the executor that fans scans across a worker pool.

pub mod executor;
pub mod heap;

pub use executor::{execute, QueryOptions};
pub use heap::{BlockCursor, BlockCursorHeap, DecodedBlock, ResultRow};
