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

//! Time source abstraction.
//!
//! The engine never calls `SystemTime::now()` directly; every timestamp
//! flows through a `Clock` so tests can drive expiry and refresh-ahead
//! deterministically instead of racing real sleeps (spec.md §6: "`Clock`:
//! `millis()`, `sleep(ms)`, optional job scheduler for virtualised time").

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A source of wall-clock milliseconds and sleep/scheduling primitives.
///
/// Implementations must be monotonic-enough for expiry comparisons: time
/// must never appear to go backwards from the perspective of a single
/// cache instance.
pub trait Clock: Send + Sync + std::fmt::Debug + 'static {
    /// Current time in milliseconds since the Unix epoch.
    fn millis(&self) -> i64;

    /// Block the calling thread for the given duration.
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// The default clock, backed by `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as i64
    }
}

/// A clock whose time is advanced explicitly by the caller.
///
/// Used by scenario tests (spec.md §8, scenarios C and F) that need to
/// observe sharp-expiry and probation boundaries without depending on real
/// sleeps for correctness.
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(start_millis)),
        }
    }

    /// Advance the clock by `delta` milliseconds, returning the new time.
    pub fn advance(&self, delta: i64) -> i64 {
        self.millis.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }

    fn sleep(&self, _duration: Duration) {
        // Tests advance the clock explicitly; sleeping here would just
        // stall without moving `millis`.
    }
}
