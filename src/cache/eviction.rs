//! Eviction policies.
//!
//! The store consults its policy on every insert and hit. The default policy
//! never evicts, so a key once cached keeps its bytes for the life of the
//! process. `LruCapacity` is the opt-in bound.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::key::CacheKey;

/// Decides which entries leave the cache.
pub trait EvictionPolicy: Send + Sync + std::fmt::Debug {
    /// Record an insert of `key` and hand `apply` the keys that must leave.
    ///
    /// `apply` publishes `key` and removes the victims. Bounded policies call
    /// it while holding their own lock, so the map never holds a key the
    /// policy is not tracking.
    fn record_insert(&self, key: &CacheKey, apply: &mut dyn FnMut(Vec<CacheKey>));

    /// Called on every cache hit.
    fn record_hit(&self, _key: &CacheKey) {}
}

/// Unbounded growth: nothing is ever evicted.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unbounded;

impl EvictionPolicy for Unbounded {
    fn record_insert(&self, _key: &CacheKey, apply: &mut dyn FnMut(Vec<CacheKey>)) {
        apply(Vec::new());
    }
}

/// Least-recently-used eviction once `capacity` entries are held.
#[derive(Debug)]
pub struct LruCapacity {
    capacity: usize,
    order: Mutex<LruOrder>,
}

/// Recency index. Every use takes a fresh tick; the smallest tick is the
/// least recently used key.
#[derive(Debug, Default)]
struct LruOrder {
    next_tick: u64,
    ticks: HashMap<CacheKey, u64>,
    by_tick: BTreeMap<u64, CacheKey>,
}

impl LruOrder {
    fn touch(&mut self, key: &CacheKey) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(old) = self.ticks.insert(key.clone(), tick) {
            self.by_tick.remove(&old);
        }
        self.by_tick.insert(tick, key.clone());
    }

    fn pop_oldest(&mut self) -> Option<CacheKey> {
        let (_, key) = self.by_tick.pop_first()?;
        self.ticks.remove(&key);
        Some(key)
    }

    fn len(&self) -> usize {
        self.ticks.len()
    }
}

impl LruCapacity {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: Mutex::new(LruOrder::default()),
        }
    }
}

impl EvictionPolicy for LruCapacity {
    fn record_insert(&self, key: &CacheKey, apply: &mut dyn FnMut(Vec<CacheKey>)) {
        let mut order = self.order.lock().expect("lru order mutex poisoned");
        order.touch(key);

        let mut victims = Vec::new();
        while order.len() > self.capacity {
            match order.pop_oldest() {
                Some(victim) => victims.push(victim),
                None => break,
            }
        }
        apply(victims);
    }

    fn record_hit(&self, key: &CacheKey) {
        let mut order = self.order.lock().expect("lru order mutex poisoned");
        if order.ticks.contains_key(key) {
            order.touch(key);
        }
    }
}
