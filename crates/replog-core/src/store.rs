//! Gap-free message store
//!
//! Entries are keyed by id and inserted idempotently. Readers only ever see
//! the contiguous prefix `1..=k`: an entry stored behind a gap stays hidden
//! until the gap is filled.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single replicated log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Sequence id assigned by the master, starting at 1
    pub id: u64,
    /// Opaque payload
    pub payload: String,
}

impl LogEntry {
    /// Create a new entry
    pub fn new(id: u64, payload: impl Into<String>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: BTreeMap<u64, String>,
    /// Largest k such that 1..=k are all present
    contiguous: u64,
}

/// Ordered, append-only, deduplicated entry store
#[derive(Debug, Default)]
pub struct MessageStore {
    inner: Mutex<StoreInner>,
}

impl MessageStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `payload` under `id` unless the id is already present.
    ///
    /// Returns whether this call added a new entry. Id 0 is never valid and
    /// is rejected without touching the store.
    pub fn append(&self, id: u64, payload: impl Into<String>) -> bool {
        if id == 0 {
            return false;
        }

        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&id) {
            return false;
        }
        inner.entries.insert(id, payload.into());

        // Advance the visible prefix over any run this insert closed
        while inner.entries.contains_key(&(inner.contiguous + 1)) {
            inner.contiguous += 1;
        }
        true
    }

    /// Largest id `k` such that ids `1..=k` are all present (0 if id 1 is absent)
    pub fn contiguous_prefix(&self) -> u64 {
        self.inner.lock().contiguous
    }

    /// Look up an entry among everything stored, including entries behind a gap
    pub fn get(&self, id: u64) -> Option<LogEntry> {
        self.inner
            .lock()
            .entries
            .get(&id)
            .map(|payload| LogEntry::new(id, payload.clone()))
    }

    /// Entries `1..=contiguous_prefix()` in id order
    pub fn visible_snapshot(&self) -> Vec<LogEntry> {
        let inner = self.inner.lock();
        inner
            .entries
            .range(1..=inner.contiguous)
            .map(|(id, payload)| LogEntry::new(*id, payload.clone()))
            .collect()
    }

    /// Up to `limit` stored entries with consecutive ids starting at `from`.
    ///
    /// Stops at the first missing id.
    pub fn entries_from(&self, from: u64, limit: usize) -> Vec<LogEntry> {
        let inner = self.inner.lock();
        let mut out = Vec::new();
        let mut next = from;
        while out.len() < limit {
            match inner.entries.get(&next) {
                Some(payload) => out.push(LogEntry::new(next, payload.clone())),
                None => break,
            }
            next += 1;
        }
        out
    }

    /// Highest id stored, gap or not
    pub fn max_id(&self) -> u64 {
        self.inner
            .lock()
            .entries
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0)
    }

    /// Number of stored entries, including those behind a gap
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether nothing has been stored yet
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}
