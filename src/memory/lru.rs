//! LRU memory cache: an order-preserving map bounded by `memMax` with
//! recency-on-access ordering. Every successful `get` promotes the entry to
//! "newest"; eviction and sink notification are otherwise identical in
//! shape to [`crate::memory::fifo::FifoCache`].

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::memory::intrusive::OrderedStore;
use crate::memory::{EvictionSink, MemoryCache, Value};

pub struct LruCache {
    mem_max: usize,
    store: Mutex<OrderedStore>,
    sink: Arc<dyn EvictionSink>,
}

impl LruCache {
    pub fn new(mem_max: usize, sink: Arc<dyn EvictionSink>) -> Self {
        Self {
            mem_max,
            store: Mutex::new(OrderedStore::new()),
            sink,
        }
    }
}

impl MemoryCache for LruCache {
    fn put(&self, key: String, value: Bytes) {
        let value = Value::from(value);
        let mut store = self.store.lock();
        if store.contains(&key) {
            store.replace(&key, value);
            return;
        }
        let evicted = if store.len() >= self.mem_max {
            store.evict_front()
        } else {
            None
        };
        store.insert_new(key, value);
        drop(store);
        if let Some((k, Some(v))) = evicted {
            self.sink.on_evict(k, v);
        }
    }

    fn get(&self, key: &str) -> Option<Bytes> {
        self.store.lock().get(key, true)
    }

    fn remove(&self, key: &str) {
        self.store.lock().remove(key);
    }

    fn contains(&self, key: &str) -> bool {
        self.store.lock().contains(key)
    }

    fn live_contents(&self) -> HashMap<String, Bytes> {
        self.store.lock().live_contents()
    }

    fn snapshot(&self) -> HashMap<String, String> {
        self.store.lock().snapshot()
    }

    fn len(&self) -> usize {
        self.store.lock().len()
    }

    fn describe(&self) -> String {
        format!("LruCache(memMax={}, size={})", self.mem_max, self.len())
    }
}
