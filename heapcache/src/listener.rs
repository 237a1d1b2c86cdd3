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

//! `Listener` collaborator (spec.md §6: notified on create/update/remove/
//! expire, "exceptions from listeners are collected, not swallowed").
//!
//! Shaped after `foyer-memory`'s `EventListener` (`event.rs`): a handful of
//! default no-op methods rather than one dispatch function, so an
//! implementation only has to override what it cares about.

use heapcache_common::{Key, Value};

use crate::error::BoxError;

/// What happened to an entry, passed to [`Listener::on_event`] in addition
/// to the specific callback — kept for listeners that want a single switch
/// statement rather than five methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    Created,
    Updated,
    Removed,
    Expired,
}

pub trait Listener<K: Key, V: Value>: Send + Sync {
    /// A new mapping was created (by `put`, a loader, or `computeIfAbsent`).
    fn on_created(&self, _key: &K, _value: &V) -> Result<(), BoxError> {
        Ok(())
    }

    /// An existing mapping's value changed.
    fn on_updated(&self, _key: &K, _old: &V, _new: &V) -> Result<(), BoxError> {
        Ok(())
    }

    /// A mapping was removed, either explicitly or by eviction.
    fn on_removed(&self, _key: &K, _value: &V) -> Result<(), BoxError> {
        Ok(())
    }

    /// A mapping expired (distinguished from `on_removed` since spec.md's
    /// state machine treats expiry-driven removal and caller-driven removal
    /// as different transitions, §4.2).
    fn on_expired(&self, _key: &K, _value: &V) -> Result<(), BoxError> {
        Ok(())
    }

    /// A single combined hook, called in addition to the specific one
    /// above for every event. Default no-op.
    fn on_event(&self, _event: CacheEvent, _key: &K) {}
}

/// Runs every registered listener for one event, collecting (not
/// short-circuiting on) failures, per spec.md §7.6 ("every listener runs;
/// the first exception is surfaced after all have run").
pub(crate) fn notify_created<K: Key, V: Value>(
    listeners: &[std::sync::Arc<dyn Listener<K, V>>],
    key: &K,
    value: &V,
) -> Option<BoxError> {
    let mut first_err = None;
    for listener in listeners {
        if let Err(e) = listener.on_created(key, value) {
            first_err.get_or_insert(e);
        }
        listener.on_event(CacheEvent::Created, key);
    }
    first_err
}

pub(crate) fn notify_updated<K: Key, V: Value>(
    listeners: &[std::sync::Arc<dyn Listener<K, V>>],
    key: &K,
    old: &V,
    new: &V,
) -> Option<BoxError> {
    let mut first_err = None;
    for listener in listeners {
        if let Err(e) = listener.on_updated(key, old, new) {
            first_err.get_or_insert(e);
        }
        listener.on_event(CacheEvent::Updated, key);
    }
    first_err
}

pub(crate) fn notify_removed<K: Key, V: Value>(
    listeners: &[std::sync::Arc<dyn Listener<K, V>>],
    key: &K,
    value: &V,
) -> Option<BoxError> {
    let mut first_err = None;
    for listener in listeners {
        if let Err(e) = listener.on_removed(key, value) {
            first_err.get_or_insert(e);
        }
        listener.on_event(CacheEvent::Removed, key);
    }
    first_err
}

pub(crate) fn notify_expired<K: Key, V: Value>(
    listeners: &[std::sync::Arc<dyn Listener<K, V>>],
    key: &K,
    value: &V,
) -> Option<BoxError> {
    let mut first_err = None;
    for listener in listeners {
        if let Err(e) = listener.on_expired(key, value) {
            first_err.get_or_insert(e);
        }
        listener.on_event(CacheEvent::Expired, key);
    }
    first_err
}
