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

//! Bounds shared by every key and value type the engine stores.
//!
//! Mirrors the `Key`/`Value` marker traits `foyer-common` exposes to
//! `foyer-memory`: blanket impls so callers never have to name these traits
//! themselves, just satisfy the bounds.

use std::fmt::Debug;
use std::hash::Hash;

/// A type usable as a cache key.
///
/// `Clone` is required because the entry action needs an owned copy of the
/// key to hand to the loader, the writer, and listener events while the
/// table's copy stays put under the segment lock.
pub trait Key: Hash + Eq + Clone + Send + Sync + Debug + 'static {}
impl<T: Hash + Eq + Clone + Send + Sync + Debug + 'static> Key for T {}

/// A type usable as a cached value.
///
/// `PartialEq` is required for the compare-and-set operations
/// (`replaceIfEquals`/`removeIfEquals`); a value type that can't reasonably
/// support equality isn't a good fit for those calls anyway.
pub trait Value: Clone + PartialEq + Send + Sync + Debug + 'static {}
impl<T: Clone + PartialEq + Send + Sync + Debug + 'static> Value for T {}
