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

//! The entry-action state machine: every public `HeapCache` operation
//! (spec.md §4.3's table) is implemented here as a method on [`CacheCore`],
//! driving one `Entry` through `begin_processing`/mutate/`end_processing`
//! under the per-key serialization spec.md §4.2 requires.

use std::sync::Arc;

use heapcache_common::{Key, Value};
use tracing::{instrument, warn};

use crate::cache::CacheCore;
use crate::entry::{self, Entry, Slot, ABORTED, EXPIRED, REMOVE_PENDING};
use crate::error::{BoxError, CacheError, ExceptionInfo};
use crate::processor::{MutableEntryView, ProcessorAction};
use crate::view::{CacheEntryView, EntryState};

impl<K: Key, V: Value> CacheCore<K, V> {
    fn snapshot_view(&self, entry: &Entry<K, V>) -> Option<CacheEntryView<K, V>> {
        let guard = entry.inner.lock().unwrap();
        let state = match &guard.slot {
            Slot::Virgin => return None,
            Slot::Value(v) => EntryState::Value(v.clone()),
            Slot::Exception(e) => EntryState::Exception(e.clone()),
        };
        Some(CacheEntryView {
            key: entry.key.clone(),
            state,
            last_modification_time: guard.last_modification_time,
            next_refresh_time: guard.next_refresh_time,
        })
    }

    /// Writes a freshly produced value into `entry`, computing its expiry
    /// via [`crate::timing::TimingHandler`] and arming the associated
    /// timers. Returns the old value (for update notifications) and whether
    /// this was a creation vs. an update.
    fn install_value(&self, entry: &Arc<Entry<K, V>>, value: V, load_time: i64) -> Result<Option<V>, CacheError<K>> {
        let old_view = self.snapshot_view(entry);
        let next_refresh_time = self
            .timing
            .calculate_next_refresh_time(&entry.key, &value, load_time, old_view.as_ref())
            .map_err(|e| crate::timing::wrap_expiry_error(entry.key.clone(), e))?;

        let old_value = {
            let mut guard = entry.inner.lock().unwrap();
            let old = std::mem::replace(&mut guard.slot, Slot::Value(value));
            guard.last_modification_time = load_time;
            guard.next_refresh_time = next_refresh_time;
            old.as_value().cloned()
        };
        self.timing.arm(entry, load_time);
        Ok(old_value)
    }

    /// Writes a load/compute failure into `entry` (spec.md §7.1–§7.4):
    /// consults the resilience policy to decide whether to suppress it and
    /// keep serving the previous value, or cache the exception itself.
    fn install_exception(&self, entry: &Arc<Entry<K, V>>, cause: BoxError, load_time: i64) -> ExceptionInfo<K> {
        let info = self
            .timing
            .suppress_exception_until(&entry.key, Arc::new(cause), load_time);

        let mut guard = entry.inner.lock().unwrap();
        if info.until > load_time && matches!(guard.slot, Slot::Value(_)) {
            // Suppressed: the previous value stays live, only its expiry moves.
            guard.next_refresh_time = info.until.max(entry::DATA_VALID_LOWER_BOUND);
        } else {
            guard.slot = Slot::Exception(info.clone());
            guard.last_modification_time = load_time;
            guard.next_refresh_time = self.timing.exception_next_refresh_time(&info);
        }
        drop(guard);
        self.timing.arm(entry, load_time);
        info
    }

    fn run_loader(&self, key: &K, current: Option<&V>) -> Result<V, BoxError> {
        match &self.loader {
            Some(loader) => loader.load(key, self.now(), current),
            None => Err(Box::new(NoLoaderConfigured)),
        }
    }

    /// Admits a freshly tracked key, evicting victims through the table's
    /// own removal path until back under the configured capacity (spec.md
    /// §6's key-based eviction contract).
    fn admit(&self, key: &K) {
        self.eviction.track(key);
        let Some(capacity) = self.capacity else { return };
        while self.table.len() > capacity {
            let Some(victim_key) = self.eviction.evict_eventually() else {
                break;
            };
            let hash = self.table.hash_of(&victim_key);
            if let Some(victim) = self.table.remove(&victim_key, hash) {
                self.timing.cancel_expiry_timer(&victim);
                let guard = victim.inner.lock().unwrap();
                if let Some(value) = guard.slot.as_value() {
                    let _ = crate::listener::notify_removed(&self.listeners, &victim_key, value);
                }
                drop(guard);
                self.counters.evictions.incr();
            }
        }
    }

    fn notify_write_through(&self, key: &K, value: &V) -> Result<(), CacheError<K>> {
        if let Some(writer) = &self.writer {
            writer.write(key, value).map_err(|e| CacheError::Writer {
                key: key.clone(),
                source: Arc::new(e),
            })?;
        }
        Ok(())
    }

    fn notify_delete_through(&self, key: &K) -> Result<(), CacheError<K>> {
        if let Some(writer) = &self.writer {
            writer.delete(key).map_err(|e| CacheError::Writer {
                key: key.clone(),
                source: Arc::new(e),
            })?;
        }
        Ok(())
    }

    // ---- read path -----------------------------------------------------

    /// `get(key)` (spec.md §4.3): returns fresh data, otherwise loads.
    #[instrument(level = "trace", skip(self))]
    pub(crate) fn get(&self, key: &K) -> Result<Option<V>, CacheError<K>> {
        self.check_open()?;
        let hash = self.table.hash_of(key);
        if let Some(entry) = self.table.get(key, hash) {
            if entry.has_fresh_data(self.now()) {
                self.eviction.touch(key);
                self.timing.touch(&entry);
                self.counters.hits.incr();
                let guard = entry.inner.lock().unwrap();
                return match &guard.slot {
                    Slot::Value(v) => Ok(Some(v.clone())),
                    Slot::Exception(e) => Err(CacheError::Loader {
                        key: key.clone(),
                        source: e.cause.clone(),
                    }),
                    Slot::Virgin => Ok(None),
                };
            }
        }
        self.counters.misses.incr();
        self.get_or_load(key, hash)
    }

    /// `peek(key)` (spec.md §4.3): like `get` but never triggers a load.
    pub(crate) fn peek(&self, key: &K) -> Result<Option<V>, CacheError<K>> {
        self.check_open()?;
        let hash = self.table.hash_of(key);
        let Some(entry) = self.table.get(key, hash) else {
            return Ok(None);
        };
        if !entry.has_fresh_data(self.now()) {
            return Ok(None);
        }
        self.eviction.touch(key);
        self.timing.touch(&entry);
        let guard = entry.inner.lock().unwrap();
        match &guard.slot {
            Slot::Value(v) => Ok(Some(v.clone())),
            Slot::Exception(_) | Slot::Virgin => Ok(None),
        }
    }

    pub(crate) fn get_entry(&self, key: &K) -> Result<Option<CacheEntryView<K, V>>, CacheError<K>> {
        self.check_open()?;
        let hash = self.table.hash_of(key);
        match self.table.get(key, hash) {
            Some(entry) if entry.has_fresh_data(self.now()) => Ok(self.snapshot_view(&entry)),
            _ => Ok(None),
        }
    }

    pub(crate) fn contains_key(&self, key: &K) -> Result<bool, CacheError<K>> {
        self.check_open()?;
        let hash = self.table.hash_of(key);
        Ok(self
            .table
            .get(key, hash)
            .is_some_and(|e| e.has_fresh_data(self.now())))
    }

    /// Loads a value for `key`, serialized through the entry's processing
    /// lock so concurrent callers on the same missing key converge on one
    /// load (spec.md §4.3's concurrent-`get` scenario).
    fn get_or_load(&self, key: &K, hash: u64) -> Result<Option<V>, CacheError<K>> {
        let entry = self.table.get_or_create(key.clone(), hash);
        entry.begin_processing();
        let result = (|| {
            if entry.has_fresh_data(self.now()) {
                let guard = entry.inner.lock().unwrap();
                return match &guard.slot {
                    Slot::Value(v) => Ok(Some(v.clone())),
                    Slot::Exception(e) => Err(CacheError::Loader {
                        key: key.clone(),
                        source: e.cause.clone(),
                    }),
                    Slot::Virgin => Ok(None),
                };
            }
            let current = { entry.inner.lock().unwrap().slot.as_value().cloned() };
            let load_time = self.now();
            match self.run_loader(key, current.as_ref()) {
                Ok(value) => {
                    self.counters.loads.incr();
                    self.admit(key);
                    let old = self.install_value(&entry, value.clone(), load_time)?;
                    if old.is_some() {
                        let _ = crate::listener::notify_updated(&self.listeners, key, old.as_ref().unwrap(), &value);
                    } else {
                        let _ = crate::listener::notify_created(&self.listeners, key, &value);
                    }
                    Ok(Some(value))
                }
                Err(cause) => {
                    self.counters.load_failures.incr();
                    let info = self.install_exception(&entry, cause, load_time);
                    Err(CacheError::Loader {
                        key: key.clone(),
                        source: info.cause,
                    })
                }
            }
        })();
        entry.end_processing();
        result
    }

    /// Background refresh-ahead kickoff (spec.md §4.2), invoked from the
    /// scheduler thread via the closure `HeapCacheBuilder::build` installs.
    pub(crate) fn refresh_entry(&self, entry: &Arc<Entry<K, V>>) {
        if self.closed.load(std::sync::atomic::Ordering::Acquire) {
            return;
        }
        entry.begin_processing();
        let current = { entry.inner.lock().unwrap().slot.as_value().cloned() };
        let Some(current) = current else {
            entry.end_processing();
            return;
        };
        let load_time = self.now();
        match self.run_loader(&entry.key, Some(&current)) {
            Ok(value) => {
                self.counters.refreshes.incr();
                if let Err(e) = self.install_value(entry, value.clone(), load_time) {
                    warn!(key = ?entry.key, error = ?e, "refresh-ahead expiry computation failed");
                } else {
                    let _ = crate::listener::notify_updated(&self.listeners, &entry.key, &current, &value);
                }
            }
            Err(cause) => {
                warn!(key = ?entry.key, "refresh-ahead load failed, keeping previous value");
                self.install_exception(entry, cause, load_time);
            }
        }
        entry.end_processing();
    }

    // ---- write path ------------------------------------------------------

    /// `put(key, value)` (spec.md §4.3): unconditional insert/replace.
    pub(crate) fn put(&self, key: K, value: V) -> Result<(), CacheError<K>> {
        self.check_open()?;
        let hash = self.table.hash_of(&key);
        let entry = self.table.get_or_create(key.clone(), hash);
        entry.begin_processing();
        let result = (|| {
            self.notify_write_through(&key, &value)?;
            self.counters.puts.incr();
            let existed = { !entry.inner.lock().unwrap().slot.is_virgin() };
            if !existed {
                self.admit(&key);
            }
            let load_time = self.now();
            let old = self.install_value(&entry, value.clone(), load_time)?;
            match &old {
                Some(old) => {
                    let _ = crate::listener::notify_updated(&self.listeners, &key, old, &value);
                }
                None => {
                    let _ = crate::listener::notify_created(&self.listeners, &key, &value);
                }
            }
            Ok(())
        })();
        entry.end_processing();
        result
    }

    /// `putIfAbsent(key, value)` (spec.md §4.3): only inserts when no fresh
    /// data is present, returns whether it inserted.
    pub(crate) fn put_if_absent(&self, key: K, value: V) -> Result<bool, CacheError<K>> {
        self.check_open()?;
        let hash = self.table.hash_of(&key);
        let entry = self.table.get_or_create(key.clone(), hash);
        entry.begin_processing();
        let result = (|| {
            if entry.has_fresh_data(self.now()) {
                return Ok(false);
            }
            self.notify_write_through(&key, &value)?;
            self.admit(&key);
            self.counters.puts.incr();
            let load_time = self.now();
            self.install_value(&entry, value.clone(), load_time)?;
            let _ = crate::listener::notify_created(&self.listeners, &key, &value);
            Ok(true)
        })();
        entry.end_processing();
        result
    }

    /// `replace(key, value)` (spec.md §4.3): only updates an existing
    /// mapping, never creates one.
    pub(crate) fn replace(&self, key: &K, value: V) -> Result<bool, CacheError<K>> {
        self.check_open()?;
        let hash = self.table.hash_of(key);
        let Some(entry) = self.table.get(key, hash) else {
            return Ok(false);
        };
        entry.begin_processing();
        let result = (|| {
            if !entry.has_fresh_data(self.now()) {
                return Ok(false);
            }
            self.notify_write_through(key, &value)?;
            let load_time = self.now();
            let old = self.install_value(&entry, value.clone(), load_time)?;
            if let Some(old) = old {
                let _ = crate::listener::notify_updated(&self.listeners, key, &old, &value);
            }
            Ok(true)
        })();
        entry.end_processing();
        result
    }

    /// `replaceIfEquals(key, expected, value)` (spec.md §4.3): compare-and-set.
    pub(crate) fn replace_if_equals(&self, key: &K, expected: &V, value: V) -> Result<bool, CacheError<K>> {
        self.check_open()?;
        let hash = self.table.hash_of(key);
        let Some(entry) = self.table.get(key, hash) else {
            return Ok(false);
        };
        entry.begin_processing();
        let result = (|| {
            if !entry.has_fresh_data(self.now()) {
                return Ok(false);
            }
            let matches = entry.inner.lock().unwrap().slot.as_value() == Some(expected);
            if !matches {
                return Ok(false);
            }
            self.notify_write_through(key, &value)?;
            let load_time = self.now();
            self.install_value(&entry, value.clone(), load_time)?;
            let _ = crate::listener::notify_updated(&self.listeners, key, expected, &value);
            Ok(true)
        })();
        entry.end_processing();
        result
    }

    fn remove_entry(&self, key: &K, entry: &Arc<Entry<K, V>>, hash: u64) -> Result<Option<V>, CacheError<K>> {
        let removed_value = {
            let mut guard = entry.inner.lock().unwrap();
            guard.next_refresh_time = REMOVE_PENDING;
            guard.slot.as_value().cloned()
        };
        if let Err(e) = self.notify_delete_through(key) {
            let mut guard = entry.inner.lock().unwrap();
            guard.next_refresh_time = ABORTED;
            return Err(e);
        }
        self.timing.cancel_expiry_timer(entry);
        self.table.remove_if_same(key, hash, entry);
        self.eviction.untrack(key);
        self.counters.removals.incr();
        if let Some(value) = &removed_value {
            let _ = crate::listener::notify_removed(&self.listeners, key, value);
        }
        Ok(removed_value)
    }

    /// `remove(key)` (spec.md §4.3).
    pub(crate) fn remove(&self, key: &K) -> Result<(), CacheError<K>> {
        self.check_open()?;
        let hash = self.table.hash_of(key);
        let Some(entry) = self.table.get(key, hash) else {
            return Ok(());
        };
        entry.begin_processing();
        let result = self.remove_entry(key, &entry, hash).map(|_| ());
        entry.end_processing();
        result
    }

    /// `peekAndRemove(key)` (spec.md §4.3): remove and return the old value.
    pub(crate) fn peek_and_remove(&self, key: &K) -> Result<Option<V>, CacheError<K>> {
        self.check_open()?;
        let hash = self.table.hash_of(key);
        let Some(entry) = self.table.get(key, hash) else {
            return Ok(None);
        };
        entry.begin_processing();
        let result = self.remove_entry(key, &entry, hash);
        entry.end_processing();
        result
    }

    /// `containsAndRemove(key)` (spec.md §4.3): like `remove` but reports
    /// whether fresh data was actually present.
    pub(crate) fn contains_and_remove(&self, key: &K) -> Result<bool, CacheError<K>> {
        self.check_open()?;
        let hash = self.table.hash_of(key);
        let Some(entry) = self.table.get(key, hash) else {
            return Ok(false);
        };
        entry.begin_processing();
        let had_data = entry.has_fresh_data(self.now());
        let result = self.remove_entry(key, &entry, hash).map(|_| had_data);
        entry.end_processing();
        result
    }

    /// `removeIfEquals(key, expected)` (spec.md §4.3).
    pub(crate) fn remove_if_equals(&self, key: &K, expected: &V) -> Result<bool, CacheError<K>> {
        self.check_open()?;
        let hash = self.table.hash_of(key);
        let Some(entry) = self.table.get(key, hash) else {
            return Ok(false);
        };
        entry.begin_processing();
        let result = (|| {
            if !entry.has_fresh_data(self.now()) {
                return Ok(false);
            }
            let matches = entry.inner.lock().unwrap().slot.as_value() == Some(expected);
            if !matches {
                return Ok(false);
            }
            self.remove_entry(key, &entry, hash)?;
            Ok(true)
        })();
        entry.end_processing();
        result
    }

    /// `peekAndPut(key, value)` (spec.md §4.3): put, returning the old
    /// value.
    pub(crate) fn peek_and_put(&self, key: K, value: V) -> Result<Option<V>, CacheError<K>> {
        self.check_open()?;
        let hash = self.table.hash_of(&key);
        let entry = self.table.get_or_create(key.clone(), hash);
        entry.begin_processing();
        let result = (|| {
            self.notify_write_through(&key, &value)?;
            let existed = { !entry.inner.lock().unwrap().slot.is_virgin() };
            if !existed {
                self.admit(&key);
            }
            self.counters.puts.incr();
            let load_time = self.now();
            let old = self.install_value(&entry, value.clone(), load_time)?;
            match &old {
                Some(old) => {
                    let _ = crate::listener::notify_updated(&self.listeners, &key, old, &value);
                }
                None => {
                    let _ = crate::listener::notify_created(&self.listeners, &key, &value);
                }
            }
            Ok(old)
        })();
        entry.end_processing();
        result
    }

    /// `peekAndReplace(key, value)` (spec.md §4.3): replace only if present,
    /// returning the old value.
    pub(crate) fn peek_and_replace(&self, key: &K, value: V) -> Result<Option<V>, CacheError<K>> {
        self.check_open()?;
        let hash = self.table.hash_of(key);
        let Some(entry) = self.table.get(key, hash) else {
            return Ok(None);
        };
        entry.begin_processing();
        let result = (|| {
            if !entry.has_fresh_data(self.now()) {
                return Ok(None);
            }
            self.notify_write_through(key, &value)?;
            let load_time = self.now();
            let old = self.install_value(&entry, value.clone(), load_time)?;
            if let Some(old) = &old {
                let _ = crate::listener::notify_updated(&self.listeners, key, old, &value);
            }
            Ok(old)
        })();
        entry.end_processing();
        result
    }

    /// `computeIfAbsent(key, f)` (spec.md §4.3): atomic get-or-insert
    /// against a fallible closure. A closure returning `Ok(None)` declines
    /// to cache anything; whether that's treated as success-with-nothing or
    /// as [`CacheError::NullValue`] is controlled by
    /// `HeapCacheBuilder::reject_null_values` (spec.md §7.8, §11).
    pub(crate) fn compute_if_absent(
        &self,
        key: K,
        f: impl FnOnce() -> Result<Option<V>, BoxError>,
    ) -> Result<Option<V>, CacheError<K>> {
        self.check_open()?;
        let hash = self.table.hash_of(&key);
        let entry = self.table.get_or_create(key.clone(), hash);
        entry.begin_processing();
        let result = (|| {
            if entry.has_fresh_data(self.now()) {
                let guard = entry.inner.lock().unwrap();
                return Ok(guard.slot.as_value().cloned());
            }
            let load_time = self.now();
            match f() {
                Ok(Some(value)) => {
                    self.admit(&key);
                    self.counters.loads.incr();
                    self.install_value(&entry, value.clone(), load_time)?;
                    let _ = crate::listener::notify_created(&self.listeners, &key, &value);
                    Ok(Some(value))
                }
                Ok(None) if self.reject_null_values => Err(CacheError::NullValue { key: key.clone() }),
                Ok(None) => Ok(None),
                Err(cause) => {
                    self.counters.load_failures.incr();
                    let info = self.install_exception(&entry, cause, load_time);
                    Err(CacheError::Loader {
                        key: key.clone(),
                        source: info.cause,
                    })
                }
            }
        })();
        entry.end_processing();
        result
    }

    /// `invoke(key, processor)` (spec.md §4.3): atomic read-modify-write
    /// against a closure operating on a [`MutableEntryView`].
    pub(crate) fn invoke<R>(
        &self,
        key: K,
        processor: impl FnOnce(&mut MutableEntryView<K, V>) -> Result<R, BoxError>,
    ) -> Result<R, CacheError<K>> {
        self.check_open()?;
        let hash = self.table.hash_of(&key);
        let entry = self.table.get_or_create(key.clone(), hash);
        entry.begin_processing();
        let result = (|| {
            let now = self.now();
            let existed = entry.has_fresh_data(now);
            let current = if existed {
                entry.inner.lock().unwrap().slot.as_value().cloned()
            } else {
                None
            };
            let mut view = MutableEntryView::new(key.clone(), current);
            let outcome = processor(&mut view).map_err(|e| CacheError::Internal(e.to_string()))?;

            match view.action {
                ProcessorAction::SetValue => {
                    let value = view
                        .into_value()
                        .ok_or_else(|| crate::error::bug!("SetValue action recorded with no value"))?;
                    self.notify_write_through(&key, &value)?;
                    if !existed {
                        self.admit(&key);
                    }
                    let load_time = self.now();
                    let old = self.install_value(&entry, value.clone(), load_time)?;
                    match old {
                        Some(old) => {
                            let _ = crate::listener::notify_updated(&self.listeners, &key, &old, &value);
                        }
                        None => {
                            let _ = crate::listener::notify_created(&self.listeners, &key, &value);
                        }
                    }
                }
                ProcessorAction::Remove if existed => {
                    self.remove_entry(&key, &entry, hash)?;
                }
                ProcessorAction::Remove | ProcessorAction::Unchanged => {}
            }
            Ok(outcome)
        })();
        entry.end_processing();
        result
    }

    /// `expireAt(key, time)` (spec.md §4.3): forces an entry to a specific
    /// expiry time, bypassing the configured policy.
    pub(crate) fn expire_at(&self, key: &K, time: i64) -> Result<(), CacheError<K>> {
        self.check_open()?;
        let hash = self.table.hash_of(key);
        let Some(entry) = self.table.get(key, hash) else {
            return Ok(());
        };
        entry.begin_processing();
        self.timing.cancel_expiry_timer(&entry);
        {
            let mut guard = entry.inner.lock().unwrap();
            guard.next_refresh_time = if time <= self.now() {
                EXPIRED
            } else {
                time.max(entry::DATA_VALID_LOWER_BOUND)
            };
        }
        self.timing.arm(&entry, self.now());
        entry.end_processing();
        self.counters.expirations.incr();
        Ok(())
    }
}

/// Entry point the scheduler's refresh-ahead timer callback uses; kept as a
/// free function (rather than a method called directly from a closure
/// captured in `timing.rs`) so `timing.rs` doesn't need to know about
/// `CacheCore` at all.
pub(crate) fn run_refresh<K: Key, V: Value>(core: &CacheCore<K, V>, entry: Arc<Entry<K, V>>) {
    core.refresh_entry(&entry);
}

/// Entry point the scheduler's sharp-expiry sweep timer uses once it flips
/// an entry holding a value to `EXPIRED` (spec.md §6's `on_expired` hook).
pub(crate) fn run_expired_notification<K: Key, V: Value>(core: &CacheCore<K, V>, entry: Arc<Entry<K, V>>) {
    core.counters.expirations.incr();
    let value = entry.inner.lock().unwrap().slot.as_value().cloned();
    if let Some(value) = value {
        let _ = crate::listener::notify_expired(&core.listeners, &entry.key, &value);
    }
}

#[derive(Debug)]
struct NoLoaderConfigured;

impl std::fmt::Display for NoLoaderConfigured {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no loader configured for this cache")
    }
}

impl std::error::Error for NoLoaderConfigured {}
