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

//! `invoke`/`invoke_all` entry processor support (spec.md §4.3's `invoke`
//! row: "atomic read-modify-write against a closure").
//!
//! cache2k's `EntryProcessor` is a named functional-interface object with a
//! `process(MutableCacheEntry)` method; the idiomatic Rust shape for the
//! same one-method contract is a plain closure, so `invoke` takes
//! `FnOnce(&mut MutableEntryView<K, V>) -> Result<R, BoxError>` instead of
//! introducing a processor trait with exactly one implementor pattern.

use heapcache_common::{Key, Value};

use crate::error::BoxError;

/// What the processor asked for when it returned, read by the action that
/// ran it to decide the entry's next state.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) enum ProcessorAction {
    #[default]
    Unchanged,
    SetValue,
    Remove,
}

/// The mutable view an `invoke` closure operates on. `set_value`/`remove`
/// record intent; the entry isn't actually touched until the closure
/// returns, keeping the whole read-modify-write atomic under the entry's
/// processing lock (spec.md §4.3).
pub struct MutableEntryView<K: Key, V: Value> {
    pub key: K,
    value: Option<V>,
    pub(crate) exists: bool,
    pub(crate) action: ProcessorAction,
}

impl<K: Key, V: Value> MutableEntryView<K, V> {
    pub(crate) fn new(key: K, value: Option<V>) -> Self {
        let exists = value.is_some();
        Self {
            key,
            value,
            exists,
            action: ProcessorAction::Unchanged,
        }
    }

    /// The value currently held, or `None` if the entry doesn't exist
    /// (spec.md's `computeIfAbsent`/`invoke` on a missing key).
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Set (or replace) the value; takes effect when the closure returns.
    pub fn set_value(&mut self, value: V) {
        self.value = Some(value);
        self.exists = true;
        self.action = ProcessorAction::SetValue;
    }

    /// Remove the mapping; takes effect when the closure returns.
    pub fn remove(&mut self) {
        self.value = None;
        self.exists = false;
        self.action = ProcessorAction::Remove;
    }

    pub(crate) fn into_value(self) -> Option<V> {
        self.value
    }
}

/// An entry processor: any closure matching this signature can be passed to
/// `invoke`/`invoke_all`.
pub trait EntryProcessor<K: Key, V: Value, R>: FnOnce(&mut MutableEntryView<K, V>) -> Result<R, BoxError> {}

impl<K, V, R, F> EntryProcessor<K, V, R> for F
where
    K: Key,
    V: Value,
    F: FnOnce(&mut MutableEntryView<K, V>) -> Result<R, BoxError>,
{
}
