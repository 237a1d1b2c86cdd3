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

//! Top-level cache handle and builder (spec.md §2, §9, §11).
//!
//! `HeapCache<K, V>` is a thin, cloneable facade over [`CacheCore`]
//! (`Arc`-shared state); `action.rs` implements the per-key operations as
//! methods on `CacheCore` so this file stays focused on construction,
//! global (`clear`/`close`) operations, and the builder — mirroring how
//! `foyer-memory`'s `GenericCache` separates the shared `GenericCacheInner`
//! from the handle type wrapping it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use heapcache_common::{Clock, Key, SystemClock, Value};
use tracing::{debug, instrument};

use crate::error::CacheError;
use crate::eviction::{Eviction, NullEviction};
use crate::listener::Listener;
use crate::loader::{AsyncLoader, ExpiryPolicy, Loader, NoResilience, ResiliencePolicy, Writer};
use crate::scheduler::Scheduler;
use crate::stats::{CacheStatistics, Counters, EvictionMetrics};
use crate::table::SegmentedTable;
use crate::timing::{RefreshAhead, StaticDurations, TimingHandler};

/// Default shard count when a builder doesn't specify one; chosen the way
/// `foyer-memory`'s `GenericCacheConfig` defaults `shards` to a multiple of
/// available parallelism rather than a fixed constant.
fn default_shard_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 4)
        .unwrap_or(16)
}

pub(crate) struct CacheCore<K: Key, V: Value> {
    pub(crate) table: SegmentedTable<K, V>,
    pub(crate) eviction: Arc<dyn Eviction<K>>,
    pub(crate) capacity: Option<usize>,
    pub(crate) loader: Option<Arc<dyn Loader<K, V>>>,
    pub(crate) async_loader: Option<Arc<dyn AsyncLoader<K, V>>>,
    pub(crate) writer: Option<Arc<dyn Writer<K, V>>>,
    pub(crate) listeners: Vec<Arc<dyn Listener<K, V>>>,
    pub(crate) timing: TimingHandler<K, V>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) closed: AtomicBool,
    pub(crate) reject_null_values: bool,
    pub(crate) counters: Counters,
    pub(crate) async_runtime: Option<tokio::runtime::Handle>,
}

impl<K: Key, V: Value> CacheCore<K, V> {
    pub(crate) fn check_open(&self) -> Result<(), CacheError<K>> {
        if self.closed.load(Ordering::Acquire) {
            Err(CacheError::Closed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn now(&self) -> i64 {
        self.clock.millis()
    }
}

/// A cloneable handle to an in-process, thread-safe, bounded cache (spec.md
/// §1). Cloning shares the same underlying table; there is no meaningful
/// notion of an independent copy, the same way `foyer`'s `Cache` and
/// `moka`'s `Cache` are handle types over `Arc`-shared state.
pub struct HeapCache<K: Key, V: Value> {
    pub(crate) core: Arc<CacheCore<K, V>>,
    pub(crate) scheduler: Arc<Scheduler>,
}

impl<K: Key, V: Value> Clone for HeapCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<K: Key, V: Value> HeapCache<K, V> {
    pub fn builder() -> HeapCacheBuilder<K, V> {
        HeapCacheBuilder::default()
    }

    /// Current entry count; a point-in-time read across shards, not a
    /// single atomic number (spec.md's Non-goals around exact counts under
    /// contention).
    pub fn len(&self) -> usize {
        self.core.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.table.is_empty()
    }

    /// Removes every entry (spec.md §9's "global structure lock protocol":
    /// every shard's write lock is taken before any removal happens, so a
    /// concurrent reader sees either the table as it was or fully cleared,
    /// never a partial sweep). Listeners are notified for each removed
    /// entry after the locks are released.
    #[instrument(level = "debug", skip(self))]
    pub fn clear(&self) -> Result<(), CacheError<K>> {
        self.core.check_open()?;
        let drained = self.core.table.drain_all();
        for entry in &drained {
            self.core.eviction.untrack(&entry.key);
            self.core.timing.cancel_expiry_timer(entry);
            let guard = entry.inner.lock().unwrap();
            if let Some(value) = guard.slot.as_value() {
                let _ = crate::listener::notify_removed(&self.core.listeners, &entry.key, value);
            }
        }
        self.core.counters.removals.add(drained.len() as u64);
        debug!(removed = drained.len(), "cache cleared");
        Ok(())
    }

    /// Shuts the cache down: rejects every further operation (spec.md
    /// §7.7), drops all entries, and stops the timer thread once the last
    /// handle/scheduler `Arc` is dropped. Idempotent.
    pub fn close(&self) -> Result<(), CacheError<K>> {
        if self.core.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _ = self.core.table.drain_all();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CacheStatistics {
        self.core.counters.snapshot(self.core.table.len())
    }

    pub fn eviction_metrics(&self) -> EvictionMetrics {
        EvictionMetrics {
            tracked: self.core.eviction.len(),
            capacity: self.core.capacity,
        }
    }

    /// A consistent-ish snapshot of every key currently present, for
    /// iteration-style use (spec.md §9: must not hold a table lock across
    /// caller code, so this copies out first).
    pub fn keys(&self) -> Vec<K> {
        self.core
            .table
            .snapshot()
            .into_iter()
            .map(|e| e.key.clone())
            .collect()
    }
}

/// Builds a [`HeapCache`] (spec.md §6, §11's "HeapCacheBuilder with full
/// example"). Mirrors `foyer-memory`'s `GenericCacheConfig`/builder split:
/// every knob has a sensible default so `HeapCache::builder().build()` is
/// always valid.
pub struct HeapCacheBuilder<K: Key, V: Value> {
    shards: Option<usize>,
    capacity: Option<usize>,
    eviction: Option<Arc<dyn Eviction<K>>>,
    loader: Option<Arc<dyn Loader<K, V>>>,
    async_loader: Option<Arc<dyn AsyncLoader<K, V>>>,
    async_runtime: Option<tokio::runtime::Handle>,
    writer: Option<Arc<dyn Writer<K, V>>>,
    listeners: Vec<Arc<dyn Listener<K, V>>>,
    expiry_policy: Option<Arc<dyn ExpiryPolicy<K, V>>>,
    resilience: Option<Arc<dyn ResiliencePolicy<K>>>,
    durations: StaticDurations,
    refresh_ahead: Option<RefreshAhead>,
    sharp_expiry_safety_gap_millis: i64,
    reject_null_values: bool,
    clock: Option<Arc<dyn Clock>>,
}

impl<K: Key, V: Value> Default for HeapCacheBuilder<K, V> {
    fn default() -> Self {
        Self {
            shards: None,
            capacity: None,
            eviction: None,
            loader: None,
            async_loader: None,
            async_runtime: None,
            writer: None,
            listeners: Vec::new(),
            expiry_policy: None,
            resilience: None,
            durations: StaticDurations::default(),
            refresh_ahead: None,
            sharp_expiry_safety_gap_millis: 500,
            reject_null_values: true,
            clock: None,
        }
    }
}

impl<K: Key, V: Value> HeapCacheBuilder<K, V> {
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = Some(shards);
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn eviction(mut self, eviction: Arc<dyn Eviction<K>>) -> Self {
        self.eviction = Some(eviction);
        self
    }

    pub fn loader(mut self, loader: impl Loader<K, V> + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn async_loader(mut self, loader: impl AsyncLoader<K, V> + 'static, runtime: tokio::runtime::Handle) -> Self {
        self.async_loader = Some(Arc::new(loader));
        self.async_runtime = Some(runtime);
        self
    }

    pub fn writer(mut self, writer: impl Writer<K, V> + 'static) -> Self {
        self.writer = Some(Arc::new(writer));
        self
    }

    pub fn listener(mut self, listener: impl Listener<K, V> + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn expiry_policy(mut self, policy: impl ExpiryPolicy<K, V> + 'static) -> Self {
        self.expiry_policy = Some(Arc::new(policy));
        self
    }

    pub fn resilience_policy(mut self, policy: impl ResiliencePolicy<K> + 'static) -> Self {
        self.resilience = Some(Arc::new(policy));
        self
    }

    pub fn expire_after_write(mut self, millis: i64) -> Self {
        self.durations.expire_after_write_millis = Some(millis);
        self
    }

    pub fn refresh_ahead(mut self, fraction: f64) -> Self {
        self.refresh_ahead = Some(RefreshAhead { fraction });
        self
    }

    pub fn sharp_expiry_safety_gap(mut self, millis: i64) -> Self {
        self.sharp_expiry_safety_gap_millis = millis;
        self
    }

    pub fn reject_null_values(mut self, reject: bool) -> Self {
        self.reject_null_values = reject;
        self
    }

    /// Overrides the clock source; used by tests to inject a
    /// [`heapcache_common::ManualClock`] instead of wall-clock time.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> HeapCache<K, V> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::default()));
        let scheduler = Arc::new(Scheduler::start(clock.clone()));
        let resilience = self.resilience.unwrap_or_else(|| Arc::new(NoResilience::default()));
        let timing = TimingHandler::new(
            clock.clone(),
            scheduler.clone(),
            self.durations,
            self.refresh_ahead,
            self.expiry_policy,
            resilience,
            self.sharp_expiry_safety_gap_millis,
        );
        let eviction: Arc<dyn Eviction<K>> = self.eviction.unwrap_or_else(|| Arc::new(NullEviction));
        let shard_count = self.shards.unwrap_or_else(default_shard_count);

        let core = Arc::new(CacheCore {
            table: SegmentedTable::new(shard_count),
            eviction,
            capacity: self.capacity,
            loader: self.loader,
            async_loader: self.async_loader,
            writer: self.writer,
            listeners: self.listeners,
            timing,
            clock,
            closed: AtomicBool::new(false),
            reject_null_values: self.reject_null_values,
            counters: Counters::default(),
            async_runtime: self.async_runtime,
        });

        let refresh_core = Arc::downgrade(&core);
        core.timing.set_refresh_trigger(Arc::new(move |entry| {
            if let Some(core) = refresh_core.upgrade() {
                crate::action::run_refresh(&core, entry);
            }
        }));

        let expired_core = Arc::downgrade(&core);
        core.timing.set_expired_trigger(Arc::new(move |entry| {
            if let Some(core) = expired_core.upgrade() {
                crate::action::run_expired_notification(&core, entry);
            }
        }));

        HeapCache { core, scheduler }
    }
}
