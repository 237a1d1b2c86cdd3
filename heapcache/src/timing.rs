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

//! Expiry/refresh-ahead timing (spec.md §4.2, §6): turns an `ExpiryPolicy`
//! result (or the builder's static durations) into a `nextRefreshTime`
//! encoding, and drives the background timers that enforce sharp expiry and
//! kick off refresh-ahead loads.

use std::sync::{Arc, Weak};

use heapcache_common::{Clock, Key, Value};

use crate::entry::{self, Entry, ABORTED, ETERNAL, EXPIRED, VIRGIN};
use crate::error::{BoxError, CacheError, ExceptionInfo};
use crate::loader::{ExpiryPolicy, ResiliencePolicy, NO_CACHE};
use crate::scheduler::Scheduler;
use crate::view::CacheEntryView;

/// Static durations used when no [`ExpiryPolicy`] is configured (spec.md §6
/// "a builder may instead configure static durations").
#[derive(Debug, Clone, Copy)]
pub struct StaticDurations {
    pub expire_after_write_millis: Option<i64>,
    pub expire_after_access_millis: Option<i64>,
}

impl Default for StaticDurations {
    fn default() -> Self {
        Self {
            expire_after_write_millis: None,
            expire_after_access_millis: None,
        }
    }
}

/// How far ahead of expiry a refresh load should be kicked off, expressed
/// as the fraction of the entry's remaining lifetime at which to trigger
/// (spec.md §4.2's refresh-ahead: e.g. `0.8` starts a reload at 80% of the
/// way to expiry).
#[derive(Debug, Clone, Copy)]
pub struct RefreshAhead {
    pub fraction: f64,
}

pub struct TimingHandler<K: Key, V: Value> {
    clock: Arc<dyn Clock>,
    scheduler: Arc<Scheduler>,
    durations: StaticDurations,
    refresh_ahead: Option<RefreshAhead>,
    expiry_policy: Option<Arc<dyn ExpiryPolicy<K, V>>>,
    resilience: Arc<dyn ResiliencePolicy<K>>,
    /// Fixed safety gap added after a sharp-expiry deadline before the final
    /// sweep timer fires, to absorb scheduler jitter (spec.md §11's
    /// "configurable sharp_expiry_safety_gap").
    sharp_expiry_safety_gap_millis: i64,
    /// Set once by `HeapCache::new` after both it and the timing handler
    /// exist, closing the otherwise-circular dependency between "timing
    /// schedules a refresh" and "refreshing needs the whole cache".
    refresh_trigger: std::sync::OnceLock<Arc<dyn Fn(Arc<Entry<K, V>>) + Send + Sync>>,
    /// Same closing-the-loop trick as `refresh_trigger`, called once an
    /// entry's final sweep timer actually flips it to `EXPIRED` with a
    /// value still present, so `Listener::on_expired` fires (spec.md §6).
    expired_trigger: std::sync::OnceLock<Arc<dyn Fn(Arc<Entry<K, V>>) + Send + Sync>>,
}

impl<K: Key, V: Value> TimingHandler<K, V> {
    pub fn new(
        clock: Arc<dyn Clock>,
        scheduler: Arc<Scheduler>,
        durations: StaticDurations,
        refresh_ahead: Option<RefreshAhead>,
        expiry_policy: Option<Arc<dyn ExpiryPolicy<K, V>>>,
        resilience: Arc<dyn ResiliencePolicy<K>>,
        sharp_expiry_safety_gap_millis: i64,
    ) -> Self {
        Self {
            clock,
            scheduler,
            durations,
            refresh_ahead,
            expiry_policy,
            resilience,
            sharp_expiry_safety_gap_millis,
            refresh_trigger: std::sync::OnceLock::new(),
            expired_trigger: std::sync::OnceLock::new(),
        }
    }

    pub fn set_refresh_trigger(&self, trigger: Arc<dyn Fn(Arc<Entry<K, V>>) + Send + Sync>) {
        let _ = self.refresh_trigger.set(trigger);
    }

    pub fn set_expired_trigger(&self, trigger: Arc<dyn Fn(Arc<Entry<K, V>>) + Send + Sync>) {
        let _ = self.expired_trigger.set(trigger);
    }

    pub fn now(&self) -> i64 {
        self.clock.millis()
    }

    /// Computes the `nextRefreshTime` for a freshly loaded/put value
    /// (spec.md §6's `calculateExpiryTime` contract; falls back to
    /// `durations` when no policy is configured).
    pub fn calculate_next_refresh_time(
        &self,
        key: &K,
        value: &V,
        load_time: i64,
        old_entry: Option<&CacheEntryView<K, V>>,
    ) -> Result<i64, BoxError> {
        if let Some(policy) = &self.expiry_policy {
            return policy.calculate_expiry_time(key, value, load_time, old_entry);
        }
        match self.durations.expire_after_write_millis {
            None => Ok(ETERNAL),
            Some(0) => Ok(NO_CACHE),
            Some(ttl) => Ok(load_time.saturating_add(ttl)),
        }
    }

    /// Resolves a suppressed-exception decision for a failed load (spec.md
    /// §7.1/§7.2): returns `Some(suppress_until)` when the previous value
    /// should be kept live instead of surfacing the exception.
    pub fn suppress_exception_until(&self, key: &K, cause: Arc<BoxError>, load_time: i64) -> ExceptionInfo<K> {
        let mut info = ExceptionInfo {
            key: key.clone(),
            cause,
            load_time,
            until: load_time,
        };
        let suppress_until = self.resilience.suppress_exception_until(key, &info);
        let until = if suppress_until > load_time {
            suppress_until
        } else {
            self.resilience.retry_load_after(key, &info)
        };
        info.until = until;
        info
    }

    /// Encodes an [`ExceptionInfo`]'s `until` into `nextRefreshTime`: an
    /// exception's expiry is always a plain future timestamp, never sharp
    /// (spec.md §7's exceptions are not subject to refresh-ahead).
    pub fn exception_next_refresh_time(&self, info: &ExceptionInfo<K>) -> i64 {
        if info.until <= info.load_time {
            EXPIRED
        } else {
            info.until.max(entry::DATA_VALID_LOWER_BOUND)
        }
    }

    /// Applies refresh-ahead to a computed expiry, returning the timestamp
    /// at which a background refresh should be triggered, if configured and
    /// applicable (never for `ETERNAL`/`NO_CACHE`/sentinel entries).
    pub fn refresh_trigger_time(&self, load_time: i64, next_refresh_time: i64) -> Option<i64> {
        let ahead = self.refresh_ahead?;
        if next_refresh_time == ETERNAL || next_refresh_time < entry::DATA_VALID_LOWER_BOUND {
            return None;
        }
        let deadline = next_refresh_time.abs();
        let lifetime = deadline.saturating_sub(load_time);
        if lifetime <= 0 {
            return None;
        }
        Some(load_time + (lifetime as f64 * ahead.fraction) as i64)
    }

    /// Arms the background timers for `entry` given the `nextRefreshTime`
    /// just written to it: a sharp-expiry safety-gap sweep when the
    /// encoding is negative, and/or a refresh-ahead kickoff.
    pub fn arm(&self, entry: &Arc<Entry<K, V>>, load_time: i64) {
        let (next_refresh_time, generation) = {
            let mut guard = entry.inner.lock().unwrap();
            guard.timer_generation += 1;
            (guard.next_refresh_time, guard.timer_generation)
        };

        if next_refresh_time == VIRGIN
            || next_refresh_time == ABORTED
            || next_refresh_time == EXPIRED
            || next_refresh_time == ETERNAL
        {
            return;
        }

        if let Some(deadline) = entry::sharp_expiry_deadline(next_refresh_time) {
            self.schedule_final_timer_for_sharp_expiry(entry, generation, deadline);
        } else if next_refresh_time >= entry::DATA_VALID_LOWER_BOUND {
            self.schedule_final_timer_for_sharp_expiry(entry, generation, next_refresh_time);
        }

        if let Some(trigger_at) = self.refresh_trigger_time(load_time, next_refresh_time) {
            self.schedule_refresh(entry, generation, trigger_at);
        }
    }

    /// Schedules the timer that sweeps `entry` to `EXPIRED` once its
    /// deadline (plus the configured safety gap) passes (spec.md §4.2's
    /// sharp-expiry safety gap).
    fn schedule_final_timer_for_sharp_expiry(&self, entry: &Arc<Entry<K, V>>, generation: u64, deadline: i64) {
        let weak: Weak<Entry<K, V>> = Arc::downgrade(entry);
        let fire_at = deadline.saturating_add(self.sharp_expiry_safety_gap_millis);
        let expired_trigger = self.expired_trigger.get().cloned();
        self.scheduler.schedule(fire_at, move || {
            let Some(entry) = weak.upgrade() else { return };
            let had_value = {
                let mut guard = entry.inner.lock().unwrap();
                if guard.timer_generation != generation {
                    return;
                }
                let had_value = guard.next_refresh_time != VIRGIN
                    && guard.next_refresh_time != ABORTED
                    && guard.slot.as_value().is_some();
                if guard.next_refresh_time != VIRGIN && guard.next_refresh_time != ABORTED {
                    guard.next_refresh_time = EXPIRED;
                }
                had_value
            };
            if had_value {
                if let Some(trigger) = expired_trigger {
                    trigger(entry);
                }
            }
        });
    }

    fn schedule_refresh(&self, entry: &Arc<Entry<K, V>>, generation: u64, fire_at: i64) {
        let weak: Weak<Entry<K, V>> = Arc::downgrade(entry);
        let trigger = self.refresh_trigger.get().cloned();
        self.scheduler.schedule(fire_at, move || {
            let Some(entry) = weak.upgrade() else { return };
            {
                let guard = entry.inner.lock().unwrap();
                if guard.timer_generation != generation {
                    return;
                }
            }
            if let Some(trigger) = trigger {
                (trigger)(entry);
            }
        });
    }

    /// Invalidates every timer currently armed for `entry` by bumping its
    /// generation, so callbacks already queued on the scheduler thread
    /// observe a stale generation and no-op (spec.md §5's cancellation
    /// requirement, see `scheduler` module docs for why this is a token
    /// check rather than a real heap removal).
    pub fn cancel_expiry_timer(&self, entry: &Entry<K, V>) {
        let mut guard = entry.inner.lock().unwrap();
        guard.timer_generation += 1;
    }

    /// Extends a live, value-holding entry's deadline on access when
    /// `expire_after_access_millis` is configured (spec.md §6's sliding
    /// expiry knob), re-arming whatever timers were already scheduled for
    /// it. A no-op for exception entries, sentinel states, and eternal
    /// entries — there is no deadline to slide.
    pub fn touch(&self, entry: &Arc<Entry<K, V>>) {
        let Some(extension) = self.durations.expire_after_access_millis else {
            return;
        };
        let now = self.now();
        let sharp = {
            let guard = entry.inner.lock().unwrap();
            if guard.slot.as_value().is_none() || guard.next_refresh_time == ETERNAL {
                return;
            }
            entry::sharp_expiry_deadline(guard.next_refresh_time).is_some()
        };
        let new_deadline = now.saturating_add(extension);
        {
            let mut guard = entry.inner.lock().unwrap();
            if guard.slot.as_value().is_none() || guard.next_refresh_time == ETERNAL {
                return;
            }
            guard.next_refresh_time = if sharp { -new_deadline } else { new_deadline };
        }
        self.arm(entry, now);
    }
}

/// Wraps a collaborator failure into the appropriately tagged
/// [`CacheError`] (spec.md §7's per-collaborator error kinds).
pub fn wrap_expiry_error<K: Key>(key: K, source: BoxError) -> CacheError<K> {
    CacheError::ExpiryPolicy {
        key,
        source: Arc::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapcache_common::SystemClock;

    fn handler() -> TimingHandler<&'static str, i32> {
        let clock = Arc::new(SystemClock);
        let scheduler = Arc::new(Scheduler::start(clock.clone()));
        TimingHandler::new(
            clock,
            scheduler,
            StaticDurations {
                expire_after_write_millis: Some(1_000),
                expire_after_access_millis: None,
            },
            Some(RefreshAhead { fraction: 0.8 }),
            None,
            Arc::new(crate::loader::NoResilience::default()),
            50,
        )
    }

    #[test]
    fn static_duration_is_applied_when_no_policy_is_configured() {
        let h = handler();
        let next = h.calculate_next_refresh_time(&"k", &1, 0, None).unwrap();
        assert_eq!(next, 1_000);
    }

    #[test]
    fn refresh_trigger_time_is_a_fraction_of_the_remaining_lifetime() {
        let h = handler();
        let trigger = h.refresh_trigger_time(0, 1_000).unwrap();
        assert_eq!(trigger, 800);
    }

    #[test]
    fn refresh_trigger_time_is_none_for_eternal_entries() {
        let h = handler();
        assert_eq!(h.refresh_trigger_time(0, ETERNAL), None);
    }

    #[test]
    fn no_resilience_retries_shortly_after_a_failure() {
        let h = handler();
        let info = h.suppress_exception_until(&"k", Arc::new("boom".into()), 1_000);
        assert_eq!(info.until, 2_000);
    }
}
