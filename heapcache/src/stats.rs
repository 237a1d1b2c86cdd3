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

//! Point-in-time statistics snapshot (spec.md §9, §11: "dirty counters are
//! acceptable", "CacheStatistics snapshot struct").

use heapcache_common::Counter;

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub hits: Counter,
    pub misses: Counter,
    pub loads: Counter,
    pub load_failures: Counter,
    pub puts: Counter,
    pub removals: Counter,
    pub evictions: Counter,
    pub expirations: Counter,
    pub refreshes: Counter,
}

/// An immutable snapshot of [`Counters`] at the moment `HeapCache::stats()`
/// was called. Counts are advisory under contention (spec.md's Non-goals).
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStatistics {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub puts: u64,
    pub removals: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub refreshes: u64,
}

impl Counters {
    pub fn snapshot(&self, size: usize) -> CacheStatistics {
        CacheStatistics {
            size,
            hits: self.hits.get(),
            misses: self.misses.get(),
            loads: self.loads.get(),
            load_failures: self.load_failures.get(),
            puts: self.puts.get(),
            removals: self.removals.get(),
            evictions: self.evictions.get(),
            expirations: self.expirations.get(),
            refreshes: self.refreshes.get(),
        }
    }
}

/// A snapshot of what the configured [`crate::eviction::Eviction`]
/// collaborator is tracking (spec.md §11's "EvictionMetrics shape").
#[derive(Debug, Clone, Copy, Default)]
pub struct EvictionMetrics {
    pub tracked: usize,
    pub capacity: Option<usize>,
}
