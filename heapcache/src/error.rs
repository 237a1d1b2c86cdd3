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

//! Error kinds surfaced across the engine (spec.md §7).
//!
//! One `thiserror`-derived enum per cache instance, parameterised by the key
//! type so bulk operations can report `(K, CacheError<K>)` pairs without an
//! extra lookup. The pack's sibling application crates (`rusty-db`,
//! `caddy`) both build their library-facing error surface on `thiserror`;
//! that's the convention followed here rather than `anyhow`, which `foyer`
//! reserves for its top-level facade crate.

use std::fmt;
use std::sync::Arc;

use heapcache_common::Key;

/// A boxed, type-erased error from a loader, writer, expiry policy, or
/// listener. Cloneable so it can be cached on an entry and handed to every
/// reader that observes the exception before it expires.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An exception recorded on an entry: the original cause plus the bookkeeping
/// spec.md §3 requires ("original cause, load time, back-reference to entry,
/// `until` timestamp").
pub struct ExceptionInfo<K: Key> {
    pub key: K,
    pub cause: Arc<BoxError>,
    pub load_time: i64,
    pub until: i64,
}

impl<K: Key> fmt::Debug for ExceptionInfo<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionInfo")
            .field("key", &self.key)
            .field("cause", &self.cause.to_string())
            .field("load_time", &self.load_time)
            .field("until", &self.until)
            .finish()
    }
}

impl<K: Key> Clone for ExceptionInfo<K> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            cause: self.cause.clone(),
            load_time: self.load_time,
            until: self.until,
        }
    }
}

/// The engine's public error type (spec.md §7).
#[derive(thiserror::Error)]
pub enum CacheError<K: Key> {
    /// §7.7 — all operations fail fast once `close()` has run.
    #[error("cache is closed")]
    Closed,

    /// §7.1 — a loader failed and the exception is now the live value.
    #[error("loader failed for key {key:?}")]
    Loader { key: K, source: Arc<BoxError> },

    /// §7.3 — the expiry policy threw while computing a normal expiry;
    /// propagated unchanged, entry left as it was before the mutation.
    #[error("expiry policy failed for key {key:?}")]
    ExpiryPolicy { key: K, source: Arc<BoxError> },

    /// §7.4 — a second failure while trying to compute the expiry of a
    /// loader exception. Cached with expiry 0 (not cached) and surfaced.
    #[error("resilience policy double fault for key {key:?}")]
    Resilience { key: K, source: Arc<BoxError> },

    /// §7.5 — a writer failed; the mutation was aborted, entry unchanged.
    #[error("writer failed for key {key:?}")]
    Writer { key: K, source: Arc<BoxError> },

    /// §7.6 — the first captured listener exception, after every listener
    /// ran.
    #[error("listener failed for key {key:?}")]
    Listener { key: K, source: Arc<BoxError> },

    /// §7.8 — loader/processor produced no value while nulls are rejected.
    #[error("null value rejected for key {key:?}")]
    NullValue { key: K },

    /// §7.9 — a programmer-error invariant violation. Not meant to be
    /// pattern-matched on and recovered from; surfaced so it isn't silently
    /// swallowed.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl<K: Key> fmt::Debug for CacheError<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Loader { key, .. } => write!(f, "Loader({key:?})"),
            Self::ExpiryPolicy { key, .. } => write!(f, "ExpiryPolicy({key:?})"),
            Self::Resilience { key, .. } => write!(f, "Resilience({key:?})"),
            Self::Writer { key, .. } => write!(f, "Writer({key:?})"),
            Self::Listener { key, .. } => write!(f, "Listener({key:?})"),
            Self::NullValue { key } => write!(f, "NullValue({key:?})"),
            Self::Internal(msg) => write!(f, "Internal({msg})"),
        }
    }
}

/// Constructs `CacheError::Internal` with a `file:line` prefix, for the
/// handful of states spec.md §7.9 calls programmer errors (e.g. a duplicate
/// async-loader callback). Keeps call sites reading as "this is impossible",
/// not as a normal fallible branch.
macro_rules! bug {
    ($($arg:tt)*) => {
        $crate::error::CacheError::Internal(format!("{}:{}: {}", file!(), line!(), format!($($arg)*)))
    };
}

pub(crate) use bug;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bug_macro_carries_a_file_line_prefix() {
        let err: CacheError<&'static str> = bug!("unreachable: {}", 42);
        let CacheError::Internal(msg) = err else {
            panic!("expected Internal");
        };
        assert!(msg.contains("error.rs"));
        assert!(msg.contains("unreachable: 42"));
    }

    #[test]
    fn debug_does_not_require_the_source_error_to_implement_debug() {
        let info = ExceptionInfo {
            key: "k",
            cause: Arc::new("boom".into()),
            load_time: 0,
            until: 10,
        };
        let err: CacheError<&'static str> = CacheError::Loader {
            key: info.key,
            source: info.cause,
        };
        assert!(format!("{err:?}").contains("Loader"));
    }
}
