use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error taxonomy for the ingest and query paths. Kinds, not exhaustive
/// wire-level types — see module docs in `batcher` and `query` for which
/// kinds are event-fatal vs batch-fatal.
#[derive(Debug, Error, Clone)]
pub enum Error {
    #[error("tag or field type mismatch: {0}")]
    SchemaMismatch(String),

    #[error("timestamp {ts} outside accepted window [{min}, {max})")]
    BadTimestamp { ts: i64, min: i64, max: i64 },

    #[error("unknown group {0:?}")]
    UnknownGroup(String),

    #[error("unknown measure or stream {subject:?} in group {group:?}")]
    UnknownMeasure { group: String, subject: String },

    #[error("series binding failed: {0}")]
    BadSeries(String),

    #[error("entity requires at least one tag family")]
    NoTagFamily,

    #[error("disk usage above admission watermark")]
    DiskFull,

    #[error("table append failed: {0}")]
    Io(String),

    #[error("index write failed: {0}")]
    IndexWrite(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0} errors occurred: {1:?}")]
    Multi(usize, Vec<Error>),
}

impl Error {
    /// Client-facing status code for errors that are surfaced rather than swallowed.
    /// Only `DiskFull` has a dedicated status per the admission-control contract;
    /// everything else maps through as an internal error at the RPC boundary
    /// (out of scope here).
    pub fn status_code(&self) -> &'static str {
        match self {
            Error::DiskFull => "STATUS_DISK_FULL",
            Error::Cancelled => "STATUS_CANCELLED",
            _ => "STATUS_INTERNAL",
        }
    }

    /// Combines independently-collected errors (e.g. from parallel query
    /// workers) into one, per the multi-error semantics in the error design.
    pub fn combine(errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.into_iter().next(),
            n => Some(Error::Multi(n, errors)),
        }
    }
}
