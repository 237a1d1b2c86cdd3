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

//! Read-only snapshots of an entry handed to collaborators and callers
//! (spec.md §6, §11): `CacheEntryView` is the `ExpiryPolicy`'s `oldEntry`
//! argument and the return type of `getEntry`/`peekEntry`.

use heapcache_common::Key;

use crate::error::ExceptionInfo;

/// What an entry held at the moment of the snapshot: either a value or a
/// recorded exception (spec.md §3's `Slot` tagged union, surfaced read-only).
#[derive(Debug, Clone)]
pub enum EntryState<K: Key, V> {
    Value(V),
    Exception(ExceptionInfo<K>),
}

/// A read-only snapshot of one entry, returned by `HeapCache::get_entry` /
/// `peek_entry` and passed to `ExpiryPolicy::calculate_expiry_time` as
/// `old_entry` (spec.md §11 "CacheEntryView shape").
#[derive(Debug, Clone)]
pub struct CacheEntryView<K: Key, V> {
    pub key: K,
    pub state: EntryState<K, V>,
    /// Wall-clock time the value/exception currently held was produced.
    pub last_modification_time: i64,
    /// Raw `nextRefreshTime` field as encoded on the entry (spec.md §3);
    /// exposed for callers that want the exact expiry/refresh semantics, not
    /// just a convenience boolean.
    pub next_refresh_time: i64,
}

impl<K: Key, V: Clone> CacheEntryView<K, V> {
    pub fn value(&self) -> Option<&V> {
        match &self.state {
            EntryState::Value(v) => Some(v),
            EntryState::Exception(_) => None,
        }
    }

    pub fn exception(&self) -> Option<&ExceptionInfo<K>> {
        match &self.state {
            EntryState::Value(_) => None,
            EntryState::Exception(info) => Some(info),
        }
    }

    pub fn is_expired(&self) -> bool {
        crate::entry::is_expired(self.next_refresh_time)
    }
}
