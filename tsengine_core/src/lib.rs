//! Ingestion and parallel time-ordered query core for a columnar,
//! group/segment/shard-partitioned store with an integrated secondary
//! index.
//!
//! [`Engine`] is the public entry point: it owns the [`SegmentManager`],
//! [`SchemaRegistry`], [`Batcher`], and [`PropertyStore`], and exposes an
//! async `write` path (per-group tokio tasks, matching the ingest path's
//! concurrency model) and a sync `query` path (the parallel, OS-threaded
//! block scanner/executor).

pub mod batcher;
pub mod codec;
pub mod context;
pub mod cpu;
pub mod error;
pub mod index;
pub mod pool;
pub mod property;
pub mod query;
pub mod scanner;
pub mod schema;
pub mod segment;
pub mod series;

use std::sync::Arc;

pub use batcher::{Batcher, BatchOutcome, SerializedWrite, TypedWrite, WriteEvent};
pub use context::{CancellationToken, DiskUsageProbe, EngineConfig, EngineContext, StaticDiskUsage};
pub use error::{Error, Result};
pub use property::{Property, PropertyID, PropertyStore, UpdateStrategy};
pub use query::{QueryOptions, ResultRow};
pub use schema::{Schema, SchemaRegistry};
pub use segment::{GroupName, SegmentManager, ShardId, TimeRange};
pub use series::SeriesID;

/// Ties the write and query paths together behind one handle. Registering a
/// group allocates its [`segment::Tsdb`]; registering a schema makes a
/// subject's writes and queries resolvable.
#[derive(Clone)]
pub struct Engine {
    segments: Arc<SegmentManager>,
    schemas: Arc<SchemaRegistry>,
    ctx: Arc<EngineContext>,
    batcher: Batcher,
    properties: Arc<PropertyStore>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(ctx: EngineContext, shard_count: u32) -> Self {
        let segments = Arc::new(SegmentManager::default());
        let schemas = Arc::new(SchemaRegistry::default());
        let ctx = Arc::new(ctx);
        let batcher = Batcher::new(Arc::clone(&segments), Arc::clone(&schemas), Arc::clone(&ctx), shard_count);
        Self {
            segments,
            schemas,
            ctx,
            batcher,
            properties: Arc::new(PropertyStore::default()),
        }
    }

    pub fn register_group(&self, group: impl Into<String>, segment_duration_nanos: i64) {
        self.segments.register_group(group, segment_duration_nanos);
    }

    pub fn register_schema(&self, group: impl Into<String>, schema: Schema) {
        self.schemas.register(group, schema);
    }

    /// Ingests one group's batch of events. Delegates straight to the
    /// [`Batcher`]; see its docs for per-event vs. call-fatal error handling.
    pub async fn write(&self, group: GroupName, subject: String, events: Vec<WriteEvent>) -> Result<BatchOutcome> {
        self.batcher.ingest(group, subject, events).await
    }

    /// Runs the bounded, time-ordered query pipeline: resolves segments for
    /// the requested group and time range, then fans the scan across a
    /// cgroup-aware worker pool and reduces to one ordered result.
    pub fn query(&self, group: &str, subject: &str, options: &QueryOptions) -> Result<Vec<ResultRow>> {
        let schema = self.schemas.get(group, subject)?;
        let tsdb = self.segments.load_tsdb(group)?;
        let segments = tsdb.segments_in_range(options.time_range);
        query::execute(segments, options, &schema, &CancellationToken::new())
    }

    pub fn properties(&self) -> &PropertyStore {
        &self.properties
    }

    pub fn segments(&self) -> &SegmentManager {
        &self.segments
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }
}
