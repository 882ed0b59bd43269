//! Shared intrusive doubly-linked arena used by the FIFO and LRU caches.
//!
//! Both policies are "order-preserving map bounded by memMax, evict the
//! front" — they differ only in whether a successful `get` moves the entry
//! to the back. Keeping one arena-backed list avoids maintaining two
//! near-identical unsafe-pointer structures; slots are reused via a free
//! list so repeated put/evict cycles don't grow the backing `Vec` forever.

use std::collections::HashMap;

use bytes::Bytes;

use crate::memory::Value;

const NIL: usize = usize::MAX;

struct Node {
    key: String,
    value: Value,
    hits: u32,
    prev: usize,
    next: usize,
}

/// An arena-backed doubly linked list plus a key index, shared by the FIFO
/// and LRU caches. The caller's lock (one per cache instance) guards all of
/// this; there's no internal synchronization here.
pub(crate) struct OrderedStore {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    head: usize, // oldest / least-recently-used
    tail: usize, // newest / most-recently-used
}

impl OrderedStore {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: NIL,
            tail: NIL,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    fn alloc(&mut self, node: Node) -> usize {
        if let Some(idx) = self.free.pop() {
            self.nodes[idx] = Some(node);
            idx
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let n = self.nodes[idx].as_ref().unwrap();
            (n.prev, n.next)
        };
        if prev != NIL {
            self.nodes[prev].as_mut().unwrap().next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].as_mut().unwrap().prev = prev;
        } else {
            self.tail = prev;
        }
    }

    fn push_back(&mut self, idx: usize) {
        let old_tail = self.tail;
        {
            let n = self.nodes[idx].as_mut().unwrap();
            n.prev = old_tail;
            n.next = NIL;
        }
        if old_tail != NIL {
            self.nodes[old_tail].as_mut().unwrap().next = idx;
        } else {
            self.head = idx;
        }
        self.tail = idx;
    }

    /// Insert a brand-new key at the back. Caller is responsible for
    /// evicting first if the cache is at capacity.
    pub(crate) fn insert_new(&mut self, key: String, value: Value) {
        let node = Node {
            key: key.clone(),
            value,
            hits: 0,
            prev: NIL,
            next: NIL,
        };
        let idx = self.alloc(node);
        self.push_back(idx);
        self.index.insert(key, idx);
    }

    /// Replace the value of an existing key, carrying over `hits`, and move
    /// it to the back (newest position) per the FIFO/LRU re-put contract.
    pub(crate) fn replace(&mut self, key: &str, value: Value) {
        let idx = *self.index.get(key).expect("replace on missing key");
        self.unlink(idx);
        {
            let n = self.nodes[idx].as_mut().unwrap();
            n.value = value;
        }
        self.push_back(idx);
    }

    /// Evict the front (oldest) entry, returning its key/value if still live.
    pub(crate) fn evict_front(&mut self) -> Option<(String, Option<Bytes>)> {
        let idx = self.head;
        if idx == NIL {
            return None;
        }
        self.unlink(idx);
        let node = self.nodes[idx].take().unwrap();
        self.free.push(idx);
        self.index.remove(&node.key);
        Some((node.key, node.value.resolve()))
    }

    pub(crate) fn remove(&mut self, key: &str) {
        if let Some(idx) = self.index.remove(key) {
            self.unlink(idx);
            self.nodes[idx] = None;
            self.free.push(idx);
        }
    }

    /// Look up a value, incrementing `hits`. If `promote` is set, moves the
    /// entry to the back (LRU semantics); FIFO passes `promote = false`.
    pub(crate) fn get(&mut self, key: &str, promote: bool) -> Option<Bytes> {
        let idx = *self.index.get(key)?;
        let resolved = self.nodes[idx].as_ref().unwrap().value.resolve();
        if resolved.is_none() {
            return None;
        }
        self.nodes[idx].as_mut().unwrap().hits += 1;
        if promote {
            self.unlink(idx);
            self.push_back(idx);
        }
        resolved
    }

    pub(crate) fn live_contents(&self) -> HashMap<String, Bytes> {
        let mut out = HashMap::with_capacity(self.index.len());
        for (key, &idx) in &self.index {
            let n = self.nodes[idx].as_ref().unwrap();
            if let Some(v) = n.value.resolve() {
                out.insert(key.clone(), v);
            }
        }
        out
    }

    pub(crate) fn snapshot(&self) -> HashMap<String, String> {
        let mut out = HashMap::with_capacity(self.index.len());
        for (key, &idx) in &self.index {
            let n = self.nodes[idx].as_ref().unwrap();
            let value_repr = match n.value.resolve() {
                Some(v) => format!("{}b", v.len()),
                None => "null".to_string(),
            };
            out.insert(key.clone(), format!("{} - {}", n.hits, value_repr));
        }
        out
    }
}
