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

//! Per-key entry: the `nextRefreshTime` encoding, the value/exception slot,
//! and the state machine that serializes every operation on one key
//! (spec.md §3, §4.2, §4.3).
//!
//! `nextRefreshTime` packs lifecycle state and expiry timestamp into a
//! single `i64`, exactly as spec.md §3 describes. The sentinel band below
//! [`DATA_VALID_LOWER_BOUND`] is five values wide (`VIRGIN` plus four
//! "pending" sentinels); spec.md's own example value of 4 for the bound
//! doesn't leave room for all of them, so the bound used here is 5 — the
//! first value at which a positive `nextRefreshTime` can be taken literally
//! as "cache until this wall-clock time".
use std::sync::{Arc, Condvar, Mutex};

use heapcache_common::Key;

use crate::error::ExceptionInfo;

/// The entry has never been populated.
pub const VIRGIN: i64 = 0;
/// A `remove()` is in flight; the entry is logically gone but still
/// occupies its table slot until the action finishes.
pub const REMOVE_PENDING: i64 = 1;
/// An in-flight operation was aborted (e.g. a writer threw); the entry
/// reverts to whatever it held before the attempt, this sentinel is
/// transient and never observed outside the action that set it.
pub const ABORTED: i64 = 2;
/// The entry's data expired and no refresh is in flight.
pub const EXPIRED: i64 = 3;
/// Reserved sentinel for the `get` seeing a value that formally expired but
/// was already refreshed, one of the four states the sentinel band
/// (spec.md §3) is sized for. This build never produces it: the generation
/// token on every timer (see `timing::arm`) already invalidates a stale
/// sharp-expiry sweep the moment a refresh installs a new value, so the
/// race this state exists to paper over can't occur here. Kept as a named
/// constant so the encoding stays byte-compatible with the full sentinel
/// band spec.md describes.
pub const EXPIRED_REFRESHED: i64 = 4;
/// First value at and above which `nextRefreshTime` is a literal timestamp
/// (or [`ETERNAL`]) rather than a sentinel.
pub const DATA_VALID_LOWER_BOUND: i64 = 5;
/// The entry never expires.
pub const ETERNAL: i64 = i64::MAX;

/// True once `nextRefreshTime` is at or past `DATA_VALID_LOWER_BOUND` but
/// the wall-clock time given has passed it (ETERNAL never expires; negative
/// encodes sharp expiry, handled by [`is_sharp_expired`]).
pub fn is_expired_at(next_refresh_time: i64, now: i64) -> bool {
    if next_refresh_time == ETERNAL {
        return false;
    }
    if next_refresh_time < 0 {
        return is_sharp_expired(next_refresh_time, now);
    }
    if next_refresh_time < DATA_VALID_LOWER_BOUND {
        return next_refresh_time == EXPIRED;
    }
    now >= next_refresh_time
}

/// Convenience for call sites that don't have `now` handy and only care
/// about the sentinel states (`EXPIRED`/`ABORTED`/`VIRGIN` all read as "no
/// live data").
pub fn is_expired(next_refresh_time: i64) -> bool {
    next_refresh_time != ETERNAL
        && next_refresh_time < DATA_VALID_LOWER_BOUND
        && next_refresh_time != REMOVE_PENDING
}

/// Negative `nextRefreshTime` encodes a sharp-expiry deadline at
/// `-next_refresh_time` (spec.md §4.2's "negative = sharp-expiry-pending").
/// The sign is restored on read since a safety-gap timer, not the reader,
/// is what's supposed to flip the entry to `EXPIRED` — a reader observing
/// the deadline has already passed treats it as expired without waiting for
/// the timer.
pub fn is_sharp_expired(next_refresh_time: i64, now: i64) -> bool {
    debug_assert!(next_refresh_time < 0);
    now >= -next_refresh_time
}

pub fn sharp_expiry_deadline(next_refresh_time: i64) -> Option<i64> {
    (next_refresh_time < 0).then_some(-next_refresh_time)
}

/// What an entry currently holds: nothing yet, a value, or a recorded
/// exception (spec.md §3's tagged union, modeled as an enum rather than a
/// subclass hierarchy).
#[derive(Debug)]
pub enum Slot<K: Key, V> {
    Virgin,
    Value(V),
    Exception(ExceptionInfo<K>),
}

impl<K: Key, V> Slot<K, V> {
    pub fn as_value(&self) -> Option<&V> {
        match self {
            Slot::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_exception(&self) -> Option<&ExceptionInfo<K>> {
        match self {
            Slot::Exception(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_virgin(&self) -> bool {
        matches!(self, Slot::Virgin)
    }
}

/// Serializes every operation performed on a single key (spec.md §4.2: "All
/// mutating operations on a given key execute as if under a per-key lock").
/// A second caller arriving while `processing` is true waits on `cond`
/// instead of running its own state transition concurrently; this replaces
/// the Java implementation's successor-pointer "follow-up queue" with plain
/// blocking, which is sufficient because heapcache never needs to run two
/// operations on the same key truly concurrently — only to avoid starving a
/// second caller behind the first.
pub struct EntryInner<K: Key, V> {
    pub slot: Slot<K, V>,
    pub next_refresh_time: i64,
    /// Wall-clock time the current `slot` was produced.
    pub last_modification_time: i64,
    /// Generation counter bumped every time a timer is (re)scheduled for
    /// this entry, so a timer callback that fires after the entry moved on
    /// can recognize it's stale and no-op (spec.md §5's scheduler cancel
    /// requirement, reframed as a token check instead of a real cancel
    /// since cancellation from inside a `Mutex`-guarded callback would
    /// deadlock against the scheduler thread).
    pub timer_generation: u64,
    pub processing: bool,
}

pub struct Entry<K: Key, V> {
    pub key: K,
    pub hash: u64,
    pub inner: Mutex<EntryInner<K, V>>,
    pub cond: Condvar,
}

impl<K: Key, V> Entry<K, V> {
    pub fn new(key: K, hash: u64) -> Arc<Self> {
        Arc::new(Self {
            key,
            hash,
            inner: Mutex::new(EntryInner {
                slot: Slot::Virgin,
                next_refresh_time: VIRGIN,
                last_modification_time: 0,
                timer_generation: 0,
                processing: false,
            }),
            cond: Condvar::new(),
        })
    }

    /// Blocks until no other operation is mid-flight on this entry, then
    /// marks it as claimed by the caller. Mirrors cache2k's
    /// `Entry.waitForProcessing()` + `startProcessing()` pair.
    pub fn begin_processing(&self) {
        let mut guard = self.inner.lock().unwrap();
        while guard.processing {
            guard = self.cond.wait(guard).unwrap();
        }
        guard.processing = true;
    }

    /// Releases the entry and wakes any caller parked in
    /// [`begin_processing`].
    pub fn end_processing(&self) {
        let mut guard = self.inner.lock().unwrap();
        #[cfg(feature = "strict_assertions")]
        assert!(guard.processing, "end_processing called without a matching begin_processing");
        guard.processing = false;
        drop(guard);
        self.cond.notify_all();
    }

    pub fn has_fresh_data(&self, now: i64) -> bool {
        let guard = self.inner.lock().unwrap();
        !guard.slot.is_virgin() && !is_expired_at(guard.next_refresh_time, now)
    }
}

impl<K: Key, V> std::fmt::Debug for Entry<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eternal_never_expires() {
        assert!(!is_expired_at(ETERNAL, i64::MAX));
    }

    #[test]
    fn plain_timestamp_expires_at_the_boundary() {
        assert!(!is_expired_at(1_000, 999));
        assert!(is_expired_at(1_000, 1_000));
    }

    #[test]
    fn sentinels_below_the_bound_read_as_expired_except_virgin_and_remove_pending() {
        assert!(is_expired_at(EXPIRED, 0));
        assert!(!is_expired(VIRGIN));
        assert!(!is_expired(REMOVE_PENDING));
        assert!(is_expired(EXPIRED));
        assert!(is_expired(EXPIRED_REFRESHED));
    }

    #[test]
    fn negative_encodes_sharp_expiry_at_the_absolute_value() {
        let next_refresh_time = -5_000;
        assert_eq!(sharp_expiry_deadline(next_refresh_time), Some(5_000));
        assert!(!is_expired_at(next_refresh_time, 4_999));
        assert!(is_expired_at(next_refresh_time, 5_000));
    }

    #[test]
    fn begin_processing_serializes_a_second_caller() {
        let entry: Arc<Entry<&'static str, i32>> = Entry::new("k", 0);
        entry.begin_processing();

        let waiter_entry = entry.clone();
        let handle = std::thread::spawn(move || {
            waiter_entry.begin_processing();
            waiter_entry.end_processing();
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!handle.is_finished(), "waiter should still be parked");
        entry.end_processing();
        handle.join().unwrap();
    }
}
