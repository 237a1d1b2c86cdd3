//! Hash-indexed entry store (spec.md §4.1): a fixed number of
//! independently-locked shards, each a plain hash map from key to
//! `Arc<Entry<K, V>>`. Grounded on `foyer-memory`'s `GenericCache` sharding
//! (`generic.rs`: `shards: Vec<RwLock<CacheShard<...>>>`, `hash %
//! shards.len()`), simplified since entries here are ordinary `Arc`s rather
//! than intrusively-linked handles a shard must also order for eviction.

use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use heapcache_common::Key;
use itertools::Itertools;
use parking_lot::RwLock;

use crate::entry::Entry;

/// Mixes the bits of an `ahash`-produced hash the way spec.md §4.1
/// specifies (`h ^= h >>> 16`), folding the high bits down before shard
/// selection masks off the low ones.
#[inline]
fn mix(mut h: u64) -> u64 {
    h ^= h >> 16;
    h
}

struct Shard<K: Key, V> {
    map: HashMap<K, Arc<Entry<K, V>>>,
}

/// The segmented table. `shard_count` is fixed at construction (spec.md
/// §4.1 doesn't call for dynamic resharding, only for the global lock used
/// by `clear`/`resize`/stats to quiesce all shards at once).
pub struct SegmentedTable<K: Key, V> {
    shards: Vec<RwLock<Shard<K, V>>>,
    hasher: RandomState,
    mask: u64,
}

impl<K: Key, V> SegmentedTable<K, V> {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.next_power_of_two().max(1);
        let shards = (0..shard_count)
            .map(|_| {
                RwLock::new(Shard {
                    map: HashMap::new(),
                })
            })
            .collect();
        Self {
            shards,
            hasher: RandomState::new(),
            mask: (shard_count - 1) as u64,
        }
    }

    pub fn hash_of(&self, key: &K) -> u64 {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        mix(hasher.finish())
    }

    fn shard_index(&self, hash: u64) -> usize {
        (hash & self.mask) as usize
    }

    /// Returns the entry for `key` if present, without creating one.
    pub fn get(&self, key: &K, hash: u64) -> Option<Arc<Entry<K, V>>> {
        let shard = self.shards[self.shard_index(hash)].read();
        shard.map.get(key).cloned()
    }

    /// Returns the existing entry for `key`, or atomically inserts a fresh
    /// `Entry::Virgin` and returns that. Every mutating operation in
    /// spec.md §4.3 starts here: the table only ever hands out a key's
    /// single `Entry`, so two concurrent callers racing on the same new key
    /// converge on the same `Entry` and then serialize through its
    /// processing lock (spec.md §4.2).
    pub fn get_or_create(&self, key: K, hash: u64) -> Arc<Entry<K, V>> {
        let mut shard = self.shards[self.shard_index(hash)].write();
        if let Some(existing) = shard.map.get(&key) {
            return existing.clone();
        }
        let entry = Entry::new(key.clone(), hash);
        shard.map.insert(key, entry.clone());
        entry
    }

    /// Removes `key`'s entry unconditionally, returning it if present.
    pub fn remove(&self, key: &K, hash: u64) -> Option<Arc<Entry<K, V>>> {
        let mut shard = self.shards[self.shard_index(hash)].write();
        shard.map.remove(key)
    }

    /// Removes `key`'s entry only if it is still the same `Arc` the caller
    /// observed (guards against a concurrent remove-then-reinsert swapping
    /// in an unrelated entry for the same key while the caller was deciding
    /// to remove it).
    pub fn remove_if_same(&self, key: &K, hash: u64, expected: &Arc<Entry<K, V>>) -> bool {
        let mut shard = self.shards[self.shard_index(hash)].write();
        match shard.map.get(key) {
            Some(current) if Arc::ptr_eq(current, expected) => {
                shard.map.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().map.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains every shard under its write lock, in shard order, and calls
    /// `f` for each entry found — the building block for `clear()`'s
    /// spec.md §9 "global structure lock" semantics: taking every shard's
    /// write lock in a fixed order before the first removal makes the whole
    /// sweep appear atomic to concurrent readers, who can acquire at most
    /// one shard lock at a time.
    pub fn drain_all(&self) -> Vec<Arc<Entry<K, V>>> {
        let mut drained = Vec::new();
        let mut guards: Vec<_> = self.shards.iter().map(|s| s.write()).collect();
        for guard in &mut guards {
            drained.extend(guard.map.drain().map(|(_, v)| v));
        }
        drained
    }

    /// Snapshots every entry currently in the table without removing
    /// anything, for iteration-style operations (`keys()`,
    /// `entries_snapshot()`) that spec.md §9 says must not hold a lock
    /// across caller code.
    pub fn snapshot(&self) -> Vec<Arc<Entry<K, V>>> {
        self.shards
            .iter()
            .flat_map(|shard| shard.read().map.values().cloned().collect_vec())
            .collect()
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_count_rounds_up_to_a_power_of_two() {
        let table: SegmentedTable<i32, i32> = SegmentedTable::new(5);
        assert_eq!(table.shard_count(), 8);
    }

    #[test]
    fn get_or_create_returns_the_same_entry_for_the_same_key() {
        let table: SegmentedTable<&'static str, i32> = SegmentedTable::new(4);
        let hash = table.hash_of(&"k");
        let a = table.get_or_create("k", hash);
        let b = table.get_or_create("k", hash);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn remove_if_same_refuses_a_stale_handle() {
        let table: SegmentedTable<&'static str, i32> = SegmentedTable::new(4);
        let hash = table.hash_of(&"k");
        let stale = table.get_or_create("k", hash);
        table.remove(&"k", hash);
        let _current = table.get_or_create("k", hash);
        assert!(!table.remove_if_same(&"k", hash, &stale));
    }

    #[test]
    fn drain_all_empties_every_shard() {
        let table: SegmentedTable<i32, i32> = SegmentedTable::new(4);
        for i in 0..50 {
            let hash = table.hash_of(&i);
            table.get_or_create(i, hash);
        }
        assert_eq!(table.drain_all().len(), 50);
        assert_eq!(table.len(), 0);
    }
}
