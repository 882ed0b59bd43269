//! LFU memory cache: the "Hitched Stack".
//!
//! A naive LFU needs a priority queue keyed by hit count, which is O(log n)
//! on every `get`. This structure trades strict ordering for O(1) amortized
//! `get`/`put` by bucketing entries between 256 sentinel "hitches" whose
//! ranges double in width as hit counts grow, and lazily rebalancing
//! mis-bucketed entries during the eviction sweep rather than on every
//! access.
//!
//! Concurrency note: the reference design allows the `get` path to increment
//! `hits` without taking the stack lock, tolerating lost increments under
//! contention since they only feed an approximate bucket choice. This
//! implementation instead takes a single `parking_lot::Mutex` around the
//! whole arena (hitches, data entries, and the key index together) for
//! every operation including `get`. Splitting the key index into a
//! concurrent map and the hit counters into atomics would restore the
//! lock-free read path, but would also require defending against a data
//! entry being concurrently promoted by a sweep while a reader holds its
//! index — a single mutex keeps the invariant in §8 trivially true at the
//! cost of serializing reads during eviction. See DESIGN.md.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::memory::{EvictionSink, MemoryCache, Value};

const HITCHES_COUNT: usize = 256;
const NIL: usize = usize::MAX;

enum Slot {
    Hitch {
        hits_min: u32,
        hits_max: u32,
        prev: usize,
        next: usize,
    },
    Data {
        key: String,
        value: Value,
        hits: u32,
        prev: usize,
        next: usize,
    },
    Free {
        next_free: usize,
    },
}

impl Slot {
    fn prev(&self) -> usize {
        match self {
            Slot::Hitch { prev, .. } | Slot::Data { prev, .. } => *prev,
            Slot::Free { .. } => unreachable!("prev() on a free slot"),
        }
    }

    fn next(&self) -> usize {
        match self {
            Slot::Hitch { next, .. } | Slot::Data { next, .. } => *next,
            Slot::Free { .. } => unreachable!("next() on a free slot"),
        }
    }

    fn set_prev(&mut self, p: usize) {
        match self {
            Slot::Hitch { prev, .. } | Slot::Data { prev, .. } => *prev = p,
            Slot::Free { .. } => unreachable!("set_prev() on a free slot"),
        }
    }

    fn set_next(&mut self, n: usize) {
        match self {
            Slot::Hitch { next, .. } | Slot::Data { next, .. } => *next = n,
            Slot::Free { .. } => unreachable!("set_next() on a free slot"),
        }
    }
}

/// Arena holding the 256 hitches plus data entries, linked into one stack.
struct Stack {
    slots: Vec<Slot>,
    free_head: usize,
    /// hitsMax -> hitch index, for O(log h) ceiling lookup.
    ceiling: BTreeMap<u32, usize>,
    entries_count: usize,
}

impl Stack {
    fn new() -> Self {
        let mut slots = Vec::with_capacity(HITCHES_COUNT);
        let mut ceiling = BTreeMap::new();
        let mut cursor: u64 = 0;

        let mut widths = Vec::new();
        let mut w = 1u64;
        while w <= 128 {
            widths.push(w);
            w *= 2;
        }

        for &width in &widths {
            for _ in 0..width {
                let hits_min = cursor as u32;
                let hits_max = (cursor + width - 1) as u32;
                let idx = slots.len();
                slots.push(Slot::Hitch {
                    hits_min,
                    hits_max,
                    prev: if idx == 0 { NIL } else { idx - 1 },
                    next: idx + 1,
                });
                ceiling.insert(hits_max, idx);
                cursor += width;
            }
        }
        // Final hitch covers the remainder up to u32::MAX.
        let idx = slots.len();
        slots.push(Slot::Hitch {
            hits_min: cursor as u32,
            hits_max: u32::MAX,
            prev: idx - 1,
            next: NIL,
        });
        ceiling.insert(u32::MAX, idx);

        debug_assert_eq!(slots.len(), HITCHES_COUNT);

        Self {
            slots,
            free_head: NIL,
            ceiling,
            entries_count: 0,
        }
    }

    const TOP: usize = 0;

    fn alloc_data(&mut self, key: String, value: Value) -> usize {
        let node = Slot::Data {
            key,
            value,
            hits: 0,
            prev: NIL,
            next: NIL,
        };
        if self.free_head != NIL {
            let idx = self.free_head;
            self.free_head = match &self.slots[idx] {
                Slot::Free { next_free } => *next_free,
                _ => unreachable!(),
            };
            self.slots[idx] = node;
            idx
        } else {
            self.slots.push(node);
            self.slots.len() - 1
        }
    }

    fn free_data(&mut self, idx: usize) {
        self.slots[idx] = Slot::Free {
            next_free: self.free_head,
        };
        self.free_head = idx;
    }

    fn unlink(&mut self, idx: usize) {
        let p = self.slots[idx].prev();
        let n = self.slots[idx].next();
        if p != NIL {
            self.slots[p].set_next(n);
        }
        if n != NIL {
            self.slots[n].set_prev(p);
        }
    }

    fn insert_after(&mut self, idx: usize, target: usize) {
        let t_next = self.slots[target].next();
        self.slots[target].set_next(idx);
        self.slots[idx].set_prev(target);
        self.slots[idx].set_next(t_next);
        if t_next != NIL {
            self.slots[t_next].set_prev(idx);
        }
    }

    fn ceiling_hitch(&self, hits: u32) -> usize {
        *self
            .ceiling
            .range(hits..)
            .next()
            .map(|(_, idx)| idx)
            .expect("final hitch covers u32::MAX")
    }

    /// Insert a brand new entry immediately after `top`.
    fn insert_new(&mut self, key: String, value: Value) -> usize {
        let idx = self.alloc_data(key, value);
        self.insert_after(idx, Self::TOP);
        self.entries_count += 1;
        idx
    }

    /// Replace an existing entry's value/position, carrying over `hits`.
    /// The new node is spliced into the old node's position.
    fn replace(&mut self, old_idx: usize, key: String, value: Value) -> usize {
        let hits = match &self.slots[old_idx] {
            Slot::Data { hits, .. } => *hits,
            _ => unreachable!(),
        };
        let prev = self.slots[old_idx].prev();
        self.unlink(old_idx);
        self.free_data(old_idx);

        let new_idx = self.alloc_data(key, value);
        if let Slot::Data { hits: h, .. } = &mut self.slots[new_idx] {
            *h = hits;
        }
        self.insert_after(new_idx, prev);
        new_idx
    }

    /// `removeLeastFrequent`: sweep from `top`, promoting mis-bucketed
    /// entries and returning the first entry that belongs in its bucket.
    fn remove_least_frequent(&mut self) -> (String, Option<Bytes>, u32) {
        let mut curr_hitch = Self::TOP;
        let mut cursor = self.slots[Self::TOP].next();

        loop {
            match &self.slots[cursor] {
                Slot::Hitch { .. } => {
                    curr_hitch = cursor;
                    cursor = self.slots[cursor].next();
                }
                Slot::Data { hits, .. } => {
                    let hits = *hits;
                    let hits_max = match &self.slots[curr_hitch] {
                        Slot::Hitch { hits_max, .. } => *hits_max,
                        _ => unreachable!(),
                    };
                    if hits <= hits_max {
                        break;
                    }
                    let moving = cursor;
                    cursor = self.slots[cursor].next();
                    self.unlink(moving);
                    let target = self.ceiling_hitch(hits);
                    self.insert_after(moving, target);
                }
                Slot::Free { .. } => unreachable!("walked into a free slot"),
            }
        }

        self.unlink(cursor);
        self.entries_count -= 1;
        match std::mem::replace(&mut self.slots[cursor], Slot::Free { next_free: NIL }) {
            Slot::Data { key, value, hits, .. } => {
                self.free_data(cursor);
                (key, value.resolve(), hits)
            }
            _ => unreachable!(),
        }
    }
}

pub struct LfuCache {
    mem_max: usize,
    stack: Mutex<Stack>,
    index: Mutex<HashMap<String, usize>>,
    sink: Arc<dyn EvictionSink>,
}

impl LfuCache {
    pub fn new(mem_max: usize, sink: Arc<dyn EvictionSink>) -> Self {
        Self {
            mem_max,
            stack: Mutex::new(Stack::new()),
            index: Mutex::new(HashMap::new()),
            sink,
        }
    }
}

impl MemoryCache for LfuCache {
    fn put(&self, key: String, value: Bytes) {
        let value = Value::from(value);
        // Lock order is index-then-stack everywhere (see get/remove) to
        // avoid an AB-BA deadlock between concurrent callers.
        let mut index = self.index.lock();
        let mut stack = self.stack.lock();

        if let Some(&old_idx) = index.get(&key) {
            let new_idx = stack.replace(old_idx, key.clone(), value);
            index.insert(key, new_idx);
            return;
        }

        let evicted = if stack.entries_count >= self.mem_max {
            Some(stack.remove_least_frequent())
        } else {
            None
        };
        if let Some((ref evicted_key, _, _)) = evicted {
            index.remove(evicted_key);
        }
        let idx = stack.insert_new(key.clone(), value);
        index.insert(key, idx);

        drop(index);
        drop(stack);
        if let Some((k, Some(v), _)) = evicted {
            self.sink.on_evict(k, v);
        }
    }

    fn get(&self, key: &str) -> Option<Bytes> {
        let index = self.index.lock();
        let &idx = index.get(key)?;
        let mut stack = self.stack.lock();
        match &mut stack.slots[idx] {
            Slot::Data { value, hits, .. } => {
                let resolved = value.resolve();
                if resolved.is_some() {
                    *hits += 1;
                }
                resolved
            }
            _ => unreachable!(),
        }
    }

    fn remove(&self, key: &str) {
        let mut index = self.index.lock();
        if let Some(idx) = index.remove(key) {
            let mut stack = self.stack.lock();
            stack.unlink(idx);
            stack.free_data(idx);
            stack.entries_count -= 1;
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.index.lock().contains_key(key)
    }

    fn live_contents(&self) -> HashMap<String, Bytes> {
        let index = self.index.lock();
        let stack = self.stack.lock();
        let mut out = HashMap::with_capacity(index.len());
        for (key, &idx) in index.iter() {
            if let Slot::Data { value, .. } = &stack.slots[idx] {
                if let Some(v) = value.resolve() {
                    out.insert(key.clone(), v);
                }
            }
        }
        out
    }

    fn snapshot(&self) -> HashMap<String, String> {
        let index = self.index.lock();
        let stack = self.stack.lock();
        let mut out = HashMap::with_capacity(index.len());
        for (key, &idx) in index.iter() {
            if let Slot::Data { value, hits, .. } = &stack.slots[idx] {
                let repr = match value.resolve() {
                    Some(v) => format!("{}b", v.len()),
                    None => "null".to_string(),
                };
                out.insert(key.clone(), format!("{hits} - {repr}"));
            }
        }
        out
    }

    fn len(&self) -> usize {
        self.index.lock().len()
    }

    fn describe(&self) -> String {
        format!("LfuCache(memMax={}, size={})", self.mem_max, self.len())
    }
}
