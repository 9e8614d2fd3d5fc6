//! Size-bounded LRU cache of computed plug values.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use crate::hash::StructuralHash;
use crate::value::Value;

/// Default cost ceiling: 500 MiB.
pub const DEFAULT_CACHE_CEILING: usize = 1024 * 1024 * 500;

/// Default number of shards.
pub const DEFAULT_CACHE_SHARDS: usize = 16;

/// An entry removed from the cache by cost pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evicted {
    /// Key of the removed entry.
    pub hash: StructuralHash,
    /// Cost the entry was accounted with.
    pub cost: usize,
}

/// Thread-safe, size-bounded cache from [`StructuralHash`] to [`Value`].
///
/// Every entry has a cost (normally the value's memory usage). When an
/// insertion pushes the total cost over the ceiling, least recently used
/// entries are evicted until the total fits again.
///
/// # Sharding
///
/// Entries are spread over independently locked shards by hash, which only
/// splits lock contention. Every insertion and lookup is stamped from one
/// clock shared by all shards, and eviction always takes the entry with the
/// oldest stamp, so the order is least recently used across the whole cache.
pub struct ValueCache {
    shards: Box<[Mutex<Shard>]>,
    ceiling: AtomicUsize,
    cost: AtomicUsize,
    clock: AtomicU64,
}

impl Default for ValueCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CEILING)
    }
}

impl ValueCache {
    /// Create a cache with the given cost ceiling and the default shard count.
    pub fn new(ceiling: usize) -> Self {
        Self::with_shards(ceiling, DEFAULT_CACHE_SHARDS)
    }

    /// Create a cache with an explicit shard count (at least one).
    pub fn with_shards(ceiling: usize, shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(Shard::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            ceiling: AtomicUsize::new(ceiling),
            cost: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
        }
    }

    fn shard_index(&self, hash: &StructuralHash) -> usize {
        (hash.low() % self.shards.len() as u64) as usize
    }

    /// Must be called with the entry's shard locked, so stamps within a shard
    /// follow its LRU order.
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Look up a value, refreshing its recency. Never computes anything.
    pub fn get(&self, hash: &StructuralHash) -> Option<Value> {
        let mut shard = self.shards[self.shard_index(hash)].lock();
        let entry = shard.entries.get_mut(hash)?;
        entry.tick = self.tick();
        Some(entry.value.clone())
    }

    /// Returns true if an entry exists, without touching its recency.
    pub fn contains(&self, hash: &StructuralHash) -> bool {
        self.shards[self.shard_index(hash)]
            .lock()
            .entries
            .contains(hash)
    }

    /// Insert or replace an entry, then evict until the total cost fits the
    /// ceiling.
    ///
    /// An entry whose cost alone exceeds the ceiling is not retained (any
    /// previous entry under the same hash is dropped). Returns the entries
    /// evicted to make room.
    pub fn set(&self, hash: StructuralHash, value: Value, cost: usize) -> Vec<Evicted> {
        let ceiling = self.ceiling.load(Ordering::Acquire);
        let mut evicted = Vec::new();

        {
            let mut shard = self.shards[self.shard_index(&hash)].lock();
            if cost > ceiling {
                if let Some(old) = shard.remove(&hash) {
                    self.cost.fetch_sub(old.cost, Ordering::AcqRel);
                }
                return evicted;
            }
            let entry = CachedValue {
                value,
                cost,
                tick: self.tick(),
            };
            self.cost.fetch_add(cost, Ordering::AcqRel);
            if let Some(old) = shard.insert(hash, entry) {
                self.cost.fetch_sub(old.cost, Ordering::AcqRel);
            }
        }

        // The new entry is the most recent one; never evict it here.
        self.evict(ceiling, Some(hash), &mut evicted);
        evicted
    }

    /// Remove an entry, returning its value.
    pub fn remove(&self, hash: &StructuralHash) -> Option<Value> {
        let entry = self.shards[self.shard_index(hash)].lock().remove(hash)?;
        self.cost.fetch_sub(entry.cost, Ordering::AcqRel);
        Some(entry.value)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            self.cost.fetch_sub(shard.cost, Ordering::AcqRel);
            shard.entries.clear();
            shard.cost = 0;
        }
    }

    /// The configured cost ceiling.
    pub fn ceiling(&self) -> usize {
        self.ceiling.load(Ordering::Acquire)
    }

    /// Change the cost ceiling, evicting immediately if the cache no longer fits.
    pub fn set_ceiling(&self, ceiling: usize) -> Vec<Evicted> {
        self.ceiling.store(ceiling, Ordering::Release);
        let mut evicted = Vec::new();
        self.evict(ceiling, None, &mut evicted);
        evicted
    }

    /// Total cost of all entries.
    pub fn current_cost(&self) -> usize {
        self.cost.load(Ordering::Acquire)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().entries.len()).sum()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.lock().entries.is_empty())
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Evict globally least recently used entries until the cost fits.
    fn evict(&self, ceiling: usize, keep: Option<StructuralHash>, evicted: &mut Vec<Evicted>) {
        while self.cost.load(Ordering::Acquire) > ceiling {
            let Some((index, hash)) = self.oldest(keep) else {
                return;
            };
            let mut shard = self.shards[index].lock();
            // Touched or evicted by another thread since it was picked.
            if shard.oldest().map(|(oldest, _)| oldest) != Some(hash) {
                continue;
            }
            if let Some(entry) = shard.pop_lru() {
                self.cost.fetch_sub(entry.cost, Ordering::AcqRel);
                evicted.push(entry);
            }
        }
    }

    /// Shard index and key of the entry with the oldest stamp, ignoring
    /// `keep`. Shards are locked one at a time.
    fn oldest(&self, keep: Option<StructuralHash>) -> Option<(usize, StructuralHash)> {
        let mut oldest: Option<(usize, StructuralHash, u64)> = None;
        for (index, shard) in self.shards.iter().enumerate() {
            let Some((hash, tick)) = shard.lock().oldest() else {
                continue;
            };
            if Some(hash) == keep {
                continue;
            }
            if oldest.map_or(true, |(_, _, best)| tick < best) {
                oldest = Some((index, hash, tick));
            }
        }
        oldest.map(|(index, hash, _)| (index, hash))
    }
}

struct CachedValue {
    value: Value,
    cost: usize,
    /// Clock reading of the last insert or `get`.
    tick: u64,
}

struct Shard {
    entries: LruCache<StructuralHash, CachedValue, ahash::RandomState>,
    cost: usize,
}

impl Shard {
    fn new() -> Self {
        Self {
            entries: LruCache::unbounded_with_hasher(ahash::RandomState::new()),
            cost: 0,
        }
    }

    /// Returns the replaced entry, if any.
    fn insert(&mut self, hash: StructuralHash, entry: CachedValue) -> Option<CachedValue> {
        self.cost += entry.cost;
        let (_, old) = self.entries.push(hash, entry)?;
        self.cost -= old.cost;
        Some(old)
    }

    fn remove(&mut self, hash: &StructuralHash) -> Option<CachedValue> {
        let entry = self.entries.pop(hash)?;
        self.cost -= entry.cost;
        Some(entry)
    }

    fn oldest(&self) -> Option<(StructuralHash, u64)> {
        self.entries.peek_lru().map(|(hash, entry)| (*hash, entry.tick))
    }

    fn pop_lru(&mut self) -> Option<Evicted> {
        let (hash, entry) = self.entries.pop_lru()?;
        self.cost -= entry.cost;
        Some(Evicted {
            hash,
            cost: entry.cost,
        })
    }
}
