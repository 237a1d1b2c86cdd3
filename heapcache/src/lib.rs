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

//! An in-process, thread-safe, bounded cache with loader/writer/listener
//! orchestration, expiry, and refresh-ahead.
//!
//! Start with [`HeapCache::builder`].

mod action;
mod cache;
mod entry;
mod error;
mod eviction;
mod listener;
mod loader;
mod processor;
mod scheduler;
mod stats;
mod table;
mod timing;
mod view;

pub use cache::{HeapCache, HeapCacheBuilder};
pub use error::{BoxError, CacheError, ExceptionInfo};
pub use eviction::{Eviction, FifoEviction, NullEviction};
pub use listener::{CacheEvent, Listener};
pub use loader::{AsyncLoadContext, AsyncLoader, BoxFuture, ExpiryPolicy, Loader, NoResilience, ResiliencePolicy, ETERNAL, NO_CACHE};
pub use processor::MutableEntryView;
pub use stats::{CacheStatistics, EvictionMetrics};
pub use view::{CacheEntryView, EntryState};

/// Re-exports for glob-importing everything a typical caller needs, the way
/// `foyer`'s own `prelude` module does.
pub mod prelude {
    pub use crate::{
        AsyncLoadContext, AsyncLoader, BoxError, BoxFuture, CacheEntryView, CacheError, CacheEvent, CacheStatistics,
        Eviction, EvictionMetrics, ExceptionInfo, ExpiryPolicy, FifoEviction, HeapCache, HeapCacheBuilder, Listener,
        Loader, MutableEntryView, NoResilience, NullEviction, ResiliencePolicy, ETERNAL, NO_CACHE,
    };
}

impl<K: heapcache_common::Key, V: heapcache_common::Value> HeapCache<K, V> {
    /// `get(key)` (spec.md §4.3): returns the fresh value, loading it if a
    /// loader is configured and none is present.
    pub fn get(&self, key: &K) -> Result<Option<V>, CacheError<K>> {
        self.core.get(key)
    }

    /// `peek(key)` (spec.md §4.3): like [`Self::get`] but never loads.
    pub fn peek(&self, key: &K) -> Result<Option<V>, CacheError<K>> {
        self.core.peek(key)
    }

    pub fn get_entry(&self, key: &K) -> Result<Option<CacheEntryView<K, V>>, CacheError<K>> {
        self.core.get_entry(key)
    }

    pub fn contains_key(&self, key: &K) -> Result<bool, CacheError<K>> {
        self.core.contains_key(key)
    }

    pub fn put(&self, key: K, value: V) -> Result<(), CacheError<K>> {
        self.core.put(key, value)
    }

    /// Bulk `putAll` (spec.md §4.3): applies each pair independently,
    /// collecting per-key results rather than aborting on the first
    /// failure.
    pub fn put_all(&self, entries: impl IntoIterator<Item = (K, V)>) -> Vec<(K, Result<(), CacheError<K>>)> {
        entries
            .into_iter()
            .map(|(k, v)| {
                let result = self.core.put(k.clone(), v);
                (k, result)
            })
            .collect()
    }

    pub fn put_if_absent(&self, key: K, value: V) -> Result<bool, CacheError<K>> {
        self.core.put_if_absent(key, value)
    }

    pub fn replace(&self, key: &K, value: V) -> Result<bool, CacheError<K>> {
        self.core.replace(key, value)
    }

    pub fn replace_if_equals(&self, key: &K, expected: &V, value: V) -> Result<bool, CacheError<K>> {
        self.core.replace_if_equals(key, expected, value)
    }

    pub fn remove(&self, key: &K) -> Result<(), CacheError<K>> {
        self.core.remove(key)
    }

    pub fn remove_if_equals(&self, key: &K, expected: &V) -> Result<bool, CacheError<K>> {
        self.core.remove_if_equals(key, expected)
    }

    pub fn contains_and_remove(&self, key: &K) -> Result<bool, CacheError<K>> {
        self.core.contains_and_remove(key)
    }

    pub fn peek_and_put(&self, key: K, value: V) -> Result<Option<V>, CacheError<K>> {
        self.core.peek_and_put(key, value)
    }

    pub fn peek_and_remove(&self, key: &K) -> Result<Option<V>, CacheError<K>> {
        self.core.peek_and_remove(key)
    }

    pub fn peek_and_replace(&self, key: &K, value: V) -> Result<Option<V>, CacheError<K>> {
        self.core.peek_and_replace(key, value)
    }

    /// `computeIfAbsent(key, f)` (spec.md §4.3).
    pub fn compute_if_absent(
        &self,
        key: K,
        f: impl FnOnce() -> Result<Option<V>, BoxError>,
    ) -> Result<Option<V>, CacheError<K>> {
        self.core.compute_if_absent(key, f)
    }

    /// `invoke(key, processor)` (spec.md §4.3).
    pub fn invoke<R>(
        &self,
        key: K,
        processor: impl FnOnce(&mut MutableEntryView<K, V>) -> Result<R, BoxError>,
    ) -> Result<R, CacheError<K>> {
        self.core.invoke(key, processor)
    }

    /// `invokeAll` (spec.md §4.3): runs `processor` once per key, each
    /// independently atomic, collecting per-key results.
    pub fn invoke_all<R>(
        &self,
        keys: impl IntoIterator<Item = K>,
        mut processor: impl FnMut(&mut MutableEntryView<K, V>) -> Result<R, BoxError>,
    ) -> Vec<(K, Result<R, CacheError<K>>)> {
        keys.into_iter()
            .map(|k| {
                let result = self.core.invoke(k.clone(), |view| processor(view));
                (k, result)
            })
            .collect()
    }

    /// `loadAll` (spec.md §4.3): ensures every key has fresh data, loading
    /// whatever isn't already cached.
    pub fn load_all(&self, keys: impl IntoIterator<Item = K>) -> Vec<(K, Result<Option<V>, CacheError<K>>)> {
        keys.into_iter()
            .map(|k| {
                let result = self.core.get(&k);
                (k, result)
            })
            .collect()
    }

    /// `expireAt(key, time)` (spec.md §4.3).
    pub fn expire_at(&self, key: &K, time_millis: i64) -> Result<(), CacheError<K>> {
        self.core.expire_at(key, time_millis)
    }
}
