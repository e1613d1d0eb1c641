//! Engine-scoped context, replacing the global logger/pool-registry
//! singletons flagged in the design notes with explicit, injected
//! dependencies.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// The one ingestion tunable in scope: the admission-control watermark.
/// `max_disk_usage_percent == 0` puts the engine in read-only mode.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub max_disk_usage_percent: u8,
    pub min_timestamp_nanos: i64,
    pub max_timestamp_nanos: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_disk_usage_percent: 95,
            // A wide, sane epoch window: 1970-01-01 through roughly 2100,
            // rejecting obviously-corrupt clocks without constraining callers.
            min_timestamp_nanos: 0,
            max_timestamp_nanos: 4_102_444_800_000_000_000,
        }
    }
}

impl EngineConfig {
    pub fn is_read_only(&self) -> bool {
        self.max_disk_usage_percent == 0
    }
}

/// External collaborator: reports current disk utilization as a percentage.
/// The real implementation (out of scope here) polls the underlying block
/// store; tests and callers supply their own.
pub trait DiskUsageProbe: Send + Sync + std::fmt::Debug {
    fn used_percent(&self) -> u8;
}

/// A disk usage probe with a value set directly, for tests and for callers
/// that already poll usage elsewhere and just want to push the number in.
#[derive(Debug)]
pub struct StaticDiskUsage(AtomicU8);

impl StaticDiskUsage {
    pub fn new(percent: u8) -> Self {
        Self(AtomicU8::new(percent))
    }

    pub fn set(&self, percent: u8) {
        self.0.store(percent, Ordering::SeqCst);
    }
}

impl Default for StaticDiskUsage {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DiskUsageProbe for StaticDiskUsage {
    fn used_percent(&self) -> u8 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cooperative cancellation token for long-running query operations. Workers
/// check it at batch boundaries; outstanding decodes still complete before a
/// worker exits.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Engine-scoped context threaded through the write and query paths instead
/// of process-wide statics.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub config: EngineConfig,
    pub disk_usage: Arc<dyn DiskUsageProbe>,
}

impl EngineContext {
    pub fn new(config: EngineConfig, disk_usage: Arc<dyn DiskUsageProbe>) -> Self {
        Self { config, disk_usage }
    }

    pub fn admits_writes(&self) -> bool {
        !self.config.is_read_only() && self.disk_usage.used_percent() <= self.config.max_disk_usage_percent
    }
}
