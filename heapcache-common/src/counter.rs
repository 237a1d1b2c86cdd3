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

//! Dirty counters: advisory, racy-by-design atomic counters.
//!
//! Mirrors `foyer-memory`'s `Metrics` struct (`generic.rs`: `self.state.metrics.hit
//! .fetch_add(1, Ordering::Relaxed)`) — relaxed `AtomicU64`s are enough because
//! spec.md's Non-goals explicitly give up "exact hit/miss counts under
//! contention (dirty counters are acceptable)". Every `Counters` struct
//! (spec.md §9/§11) packs several of these side by side and every shard
//! bumps one on nearly every operation, so each counter is cache-line
//! padded with `crossbeam`'s `CachePadded` to keep a hit counter's
//! cacheline from bouncing between cores alongside its neighboring miss
//! counter.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

#[derive(Debug, Default)]
pub struct Counter(CachePadded<AtomicU64>);

impl Counter {
    pub const fn new() -> Self {
        Self(CachePadded::new(AtomicU64::new(0)))
    }

    #[inline]
    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

impl Clone for Counter {
    fn clone(&self) -> Self {
        Self(CachePadded::new(AtomicU64::new(self.get())))
    }
}
