//! L1 in-memory bounded cache: a common interface over three eviction
//! policies (FIFO, LRU, LFU).
//!
//! All three implementations share the same contract: bounded by `memMax`
//! entries, at most one eviction per overflowing `put`, and an
//! [`EvictionSink`] notified of whatever gets pushed out. They differ only
//! in *which* entry is chosen.

pub mod fifo;
pub mod lfu;
pub mod lru;

mod intrusive;

use bytes::Bytes;
use std::collections::HashMap;

/// A value held by an L1 entry.
///
/// The source stores values under weak/soft references so the JVM can
/// reclaim them under memory pressure; a `get` on a reclaimed entry returns
/// absent even though the key's shell survives in the stack until evicted.
/// This crate ships the common case — an owned, never-reclaimed buffer — as
/// [`Value::Owned`], and keeps [`Value::Provided`] for hosts that want to
/// opt into reclaim semantics via a custom [`ValueProvider`].
#[derive(Clone)]
pub enum Value {
    Owned(Bytes),
    Provided(std::sync::Arc<dyn ValueProvider>),
}

impl Value {
    /// Resolve to bytes, or `None` if the underlying value has been reclaimed.
    pub fn resolve(&self) -> Option<Bytes> {
        match self {
            Value::Owned(b) => Some(b.clone()),
            Value::Provided(p) => p.provide(),
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Owned(b) => f.debug_tuple("Owned").field(&b.len()).finish(),
            Value::Provided(_) => f.write_str("Provided(..)"),
        }
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Owned(b)
    }
}

/// A value that may silently disappear, simulating reclaim of a weakly-held
/// reference under memory pressure.
pub trait ValueProvider: Send + Sync {
    fn provide(&self) -> Option<Bytes>;
}

/// Receives `(key, value)` pairs evicted from L1.
///
/// The coordinator installs one of these at construction time so evictions
/// flow straight into L2 (see `src/coordinator.rs`); tests may install a
/// simple `Vec`-backed sink to assert on eviction order.
pub trait EvictionSink: Send + Sync {
    fn on_evict(&self, key: String, value: Bytes);
}

/// A sink that does nothing; useful for standalone `MemoryCache` tests.
pub struct NullSink;

impl EvictionSink for NullSink {
    fn on_evict(&self, _key: String, _value: Bytes) {}
}

/// Common interface implemented by the FIFO, LRU, and LFU caches.
///
/// `get`/`put`/`remove` never return an `Err`: L1 has no error returns (see
/// the error handling design) and a full cache simply evicts to make room.
pub trait MemoryCache: Send + Sync {
    /// Insert or replace `key`. If this is a replacement, the existing
    /// entry's `hits` counter carries over. If this is a new key and the
    /// cache is full, exactly one entry is evicted and handed to the sink.
    fn put(&self, key: String, value: Bytes);

    /// Look up `key`, incrementing its hit counter on success. Returns
    /// `None` if absent or if the value has been reclaimed.
    fn get(&self, key: &str) -> Option<Bytes>;

    /// Remove `key` if present. Never notifies the eviction sink.
    fn remove(&self, key: &str);

    /// `true` if `key` is currently resident (regardless of whether its
    /// value has been reclaimed).
    fn contains(&self, key: &str) -> bool;

    /// Snapshot of keys to still-live values, skipping reclaimed entries.
    fn live_contents(&self) -> HashMap<String, Bytes>;

    /// Debug snapshot: `key -> "<hits> - <valueOrNull>"`.
    fn snapshot(&self) -> HashMap<String, String>;

    /// Number of resident entries (including any with reclaimed values).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One-line description for the coordinator's `describe()`.
    fn describe(&self) -> String;
}
