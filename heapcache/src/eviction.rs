//  Copyright 2024 heapcache contributors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

//! Pluggable eviction collaborator (spec.md §6: "deliberately out of scope
//! internally — a pluggable collaborator with a contract, not an
//! algorithm").
//!
//! `foyer-memory`'s eviction traits (`eviction/fifo.rs`, `eviction/mod.rs`)
//! operate on intrusive `NonNull<Handle>` pointers the eviction collaborator
//! owns outright, which lets it splice handles in and out of its list
//! without going back through the table. That shape needs `unsafe` at every
//! call site and a handle type threaded through the whole crate. Since
//! spec.md treats eviction as a black-box policy the core merely consults
//! ("when over capacity, ask the collaborator which key to evict, remove
//! it"), the trait here is key-based instead: the collaborator tracks
//! recency/frequency however it likes internally, and only ever hands the
//! core a `K` to remove through the table's own safe removal path.

use std::collections::VecDeque;
use std::sync::Mutex;

use heapcache_common::Key;

/// Ask-then-remove eviction contract. `touch`/`track`/`untrack` let the
/// collaborator maintain its own ordering; `evict_eventually` is called by
/// the core when the table is over its configured capacity and must return
/// a key currently tracked (or `None` if the collaborator has nothing left
/// to evict, e.g. it has fewer entries than the core does mid-insert).
pub trait Eviction<K: Key>: Send + Sync {
    /// A new entry was inserted into the table.
    fn track(&self, key: &K);
    /// An entry was removed from the table outside of eviction (explicit
    /// `remove`, expiry reclaim, `clear`).
    fn untrack(&self, key: &K);
    /// An entry was read or refreshed; update recency/frequency.
    fn touch(&self, key: &K);
    /// Pick a victim to remove. Called in a loop by the core until the
    /// table is back under capacity or this returns `None`.
    fn evict_eventually(&self) -> Option<K>;
    /// Current number of keys the collaborator believes it is tracking, for
    /// `CacheStatistics`/diagnostics.
    fn len(&self) -> usize;
}

/// No eviction: the cache grows without bound (spec.md's default when no
/// capacity limit is configured).
#[derive(Debug, Default)]
pub struct NullEviction;

impl<K: Key> Eviction<K> for NullEviction {
    fn track(&self, _key: &K) {}
    fn untrack(&self, _key: &K) {}
    fn touch(&self, _key: &K) {}
    fn evict_eventually(&self) -> Option<K> {
        None
    }
    fn len(&self) -> usize {
        0
    }
}

/// FIFO eviction: plain insertion order, no recency tracking on touch.
/// Grounded on `foyer-memory`'s `eviction/fifo.rs`, reshaped from an
/// intrusive linked list of handles to a `VecDeque<K>` now that the
/// collaborator no longer owns the entry's storage.
#[derive(Debug, Default)]
pub struct FifoEviction<K: Key> {
    order: Mutex<VecDeque<K>>,
}

impl<K: Key> Eviction<K> for FifoEviction<K> {
    fn track(&self, key: &K) {
        self.order.lock().unwrap().push_back(key.clone());
    }

    fn untrack(&self, key: &K) {
        let mut order = self.order.lock().unwrap();
        if let Some(pos) = order.iter().position(|k| k == key) {
            order.remove(pos);
        }
    }

    fn touch(&self, _key: &K) {
        // FIFO order is insertion order only; a touch does not move the key.
    }

    fn evict_eventually(&self) -> Option<K> {
        self.order.lock().unwrap().pop_front()
    }

    fn len(&self) -> usize {
        self.order.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_in_insertion_order() {
        let fifo: FifoEviction<i32> = FifoEviction::default();
        fifo.track(&1);
        fifo.track(&2);
        fifo.track(&3);
        assert_eq!(fifo.evict_eventually(), Some(1));
        assert_eq!(fifo.evict_eventually(), Some(2));
        assert_eq!(fifo.len(), 1);
    }

    #[test]
    fn untrack_removes_from_the_middle() {
        let fifo: FifoEviction<i32> = FifoEviction::default();
        fifo.track(&1);
        fifo.track(&2);
        fifo.track(&3);
        fifo.untrack(&2);
        assert_eq!(fifo.evict_eventually(), Some(1));
        assert_eq!(fifo.evict_eventually(), Some(3));
        assert_eq!(fifo.evict_eventually(), None);
    }
}
