//! Series binding: deriving a stable [`SeriesID`] from `(subject, entityValues)`.

use fnv::FnvHasher;
use std::hash::Hasher;

pub type SeriesID = u64;

/// A bound series: `(subject, entityValues)` plus its canonical byte form and
/// derived [`SeriesID`]. The canonical buffer is computed once and cached —
/// it is reused verbatim as `IndexDocument.entity_values`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    subject: String,
    entity_values: Vec<Vec<u8>>,
    canonical: Vec<u8>,
    id: SeriesID,
}

impl Series {
    /// Binds a subject and its already-encoded entity tag values to a series
    /// identity. Equal `(subject, entity_values)` always yields an equal id;
    /// different inputs yield different ids modulo 64-bit hash collision.
    pub fn bind(subject: impl Into<String>, entity_values: Vec<Vec<u8>>) -> Self {
        let subject = subject.into();
        let canonical = canonical_buffer(&subject, &entity_values);
        let id = stable64(&canonical);
        Self {
            subject,
            entity_values,
            canonical,
            id,
        }
    }

    pub fn id(&self) -> SeriesID {
        self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn entity_values(&self) -> &[Vec<u8>] {
        &self.entity_values
    }

    pub fn canonical_bytes(&self) -> &[u8] {
        &self.canonical
    }
}

fn canonical_buffer(subject: &str, entity_values: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(subject.len() + entity_values.iter().map(Vec::len).sum::<usize>() + 8);
    write_len_prefixed(&mut buf, subject.as_bytes());
    for v in entity_values {
        write_len_prefixed(&mut buf, v);
    }
    buf
}

fn write_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

/// A deterministic 64-bit hash, fixed across runs and processes (unlike
/// `std::collections::hash_map::RandomState`, which is seeded per-process).
/// `SeriesID`/`PropertyID` stability depends on this.
pub fn stable64(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}
