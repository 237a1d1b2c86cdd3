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

//! Collaborator contracts consumed by the core (spec.md §6): `Loader`,
//! `AsyncLoader`, `Writer`, `ExpiryPolicy`, `ResiliencePolicy`.
//!
//! Every contract returns a boxed `dyn Error` rather than an associated
//! error type so a `HeapCache<K, V>` can hold these behind `Arc<dyn Trait>`
//! without becoming generic over the collaborator's own error type — the
//! entry action only ever wraps the error, it never inspects it.

use std::future::Future;
use std::pin::Pin;

use heapcache_common::{Key, Value};

use crate::error::{BoxError, ExceptionInfo};
use crate::view::CacheEntryView;

/// Sentinel expiry times an `ExpiryPolicy` may return (spec.md §3, §6).
pub const ETERNAL: i64 = i64::MAX;
pub const NO_CACHE: i64 = 0;

/// `Loader.load(key, startTime, currentEntryOrNull) -> V` (spec.md §6).
///
/// May throw; may not return an override refresh time (cache2k's
/// `CacheLoaderException`-carried override `refreshTime` is not carried
/// forward, it is a storage-adapter interaction spec.md scopes out).
pub trait Loader<K: Key, V: Value>: Send + Sync {
    fn load(&self, key: &K, start_time: i64, current: Option<&V>) -> Result<V, BoxError>;
}

impl<K: Key, V: Value, F> Loader<K, V> for F
where
    F: Fn(&K, i64, Option<&V>) -> Result<V, BoxError> + Send + Sync,
{
    fn load(&self, key: &K, start_time: i64, current: Option<&V>) -> Result<V, BoxError> {
        self(key, start_time, current)
    }
}

/// Context handed to an [`AsyncLoader`], mirroring the Java contract's
/// `getKey`/`getLoadStartTime`/`getCurrentEntry` accessors. `getExecutor` is
/// not carried forward: the async loader already runs on the executor the
/// caller chose when registering it (`HeapCacheBuilder::async_loader`).
pub struct AsyncLoadContext<K: Key, V: Value> {
    pub key: K,
    pub load_start_time: i64,
    pub current: Option<V>,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `AsyncLoader.load(key, context, callback)`, reshaped into the idiomatic
/// Rust equivalent: the callback's exactly-one-call guarantee (spec.md §6)
/// becomes the future's exactly-one-resolution guarantee.
pub trait AsyncLoader<K: Key, V: Value>: Send + Sync {
    fn load(&self, ctx: AsyncLoadContext<K, V>) -> BoxFuture<'static, Result<V, BoxError>>;
}

/// `Writer.write(key, value)` / `Writer.delete(key)` (spec.md §6). Either may
/// throw to abort the mutation (spec.md §7.5).
pub trait Writer<K: Key, V: Value>: Send + Sync {
    fn write(&self, key: &K, value: &V) -> Result<(), BoxError>;
    fn delete(&self, key: &K) -> Result<(), BoxError>;
}

/// `ExpiryPolicy.calculateExpiryTime(key, value, loadTime, oldEntryOrNull) ->
/// long` (spec.md §6). Conventions: [`ETERNAL`], [`NO_CACHE`], negative means
/// sharp expiry at `-value`.
pub trait ExpiryPolicy<K: Key, V: Value>: Send + Sync {
    fn calculate_expiry_time(
        &self,
        key: &K,
        value: &V,
        load_time: i64,
        old_entry: Option<&CacheEntryView<K, V>>,
    ) -> Result<i64, BoxError>;
}

/// `ResiliencePolicy.suppressExceptionUntil` / `.retryLoadAfter` (spec.md
/// §6).
pub trait ResiliencePolicy<K: Key>: Send + Sync {
    /// Returns the time until which `info` should be suppressed (the
    /// previous value kept live) rather than surfaced. Comparing the result
    /// against the load's start time is the caller's job (spec.md §4.3 step
    /// 5).
    fn suppress_exception_until(&self, key: &K, info: &ExceptionInfo<K>) -> i64;

    /// Returns the expiry to give the exception itself when it is not
    /// suppressed (i.e. becomes the cached value).
    fn retry_load_after(&self, key: &K, info: &ExceptionInfo<K>) -> i64;
}

/// The default resilience policy used when none is configured: never
/// suppress, and cache the exception for a fixed backoff window. A cache
/// wired up without an explicit policy still needs *some* answer here, and
/// "surface immediately, retry soon" is the least surprising default (it
/// matches cache2k's own out-of-the-box resilience policy's shape, not its
/// exact constants, which are a storage/backoff-tuning detail out of this
/// engine's scope).
#[derive(Debug, Clone, Copy)]
pub struct NoResilience {
    pub retry_after_millis: i64,
}

impl Default for NoResilience {
    fn default() -> Self {
        Self {
            retry_after_millis: 1_000,
        }
    }
}

impl<K: Key> ResiliencePolicy<K> for NoResilience {
    fn suppress_exception_until(&self, _key: &K, info: &ExceptionInfo<K>) -> i64 {
        info.load_time
    }

    fn retry_load_after(&self, _key: &K, info: &ExceptionInfo<K>) -> i64 {
        info.load_time + self.retry_after_millis
    }
}
