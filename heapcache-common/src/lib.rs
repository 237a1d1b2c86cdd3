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

//! Shared traits and primitives used by the `heapcache` engine crate.
//!
//! Split out the way `foyer-common` is split out of `foyer-memory`: anything
//! that doesn't depend on the entry/action/table machinery and could
//! plausibly be reused by a second engine crate lives here.

pub mod clock;
pub mod code;
pub mod counter;

pub use clock::{Clock, ManualClock, SystemClock};
pub use code::{Key, Value};
pub use counter::Counter;
