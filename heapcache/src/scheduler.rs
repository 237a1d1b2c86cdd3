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

//! Timer scheduling for sharp-expiry safety gaps, refresh-ahead kickoff, and
//! access-extended deadlines (spec.md §4.2, §5).
//!
//! spec.md §5 rules out "an implicit single-threaded event loop" as the
//! only way to run timers, but it doesn't mandate `tokio` either — tokio is
//! reserved here for the async loader/listener dispatch path a caller
//! explicitly opts into (`HeapCacheBuilder::async_loader`). Timers run on a
//! dedicated `std::thread` with a `BinaryHeap` of deadlines and a
//! `Condvar`, the same shape `slopos`'s timer wheel (`drivers/src/net/
//! timer.rs`) uses for cancellation: a deadline entry carries a generation
//! token, and firing checks the token is still current before running the
//! callback, rather than trying to splice the entry out of the heap.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use heapcache_common::Clock;

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Task {
    deadline: i64,
    seq: u64,
    callback: Callback,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for Task {}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the earliest deadline pops first.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Shared {
    heap: Mutex<BinaryHeap<Task>>,
    cond: Condvar,
    shutdown: Mutex<bool>,
    next_seq: Mutex<u64>,
}

/// A handle to the background timer thread. Dropping it signals shutdown
/// and joins the thread, so a `HeapCache::close()` that drops its scheduler
/// doesn't leak a parked thread.
pub struct Scheduler {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn start(clock: Arc<dyn Clock>) -> Self {
        let shared = Arc::new(Shared {
            heap: Mutex::new(BinaryHeap::new()),
            cond: Condvar::new(),
            shutdown: Mutex::new(false),
            next_seq: Mutex::new(0),
        });

        let worker_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("heapcache-scheduler".into())
            .spawn(move || run(worker_shared, clock))
            .expect("failed to spawn heapcache-scheduler thread");

        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Schedules `callback` to run at `deadline_millis`, returning a
    /// [`TimerHandle`] that can later be invalidated. Scheduling never
    /// blocks the caller on the timer thread.
    pub fn schedule(&self, deadline_millis: i64, callback: impl FnOnce() + Send + 'static) -> TimerHandle {
        let seq = {
            let mut next_seq = self.shared.next_seq.lock().unwrap();
            let seq = *next_seq;
            *next_seq += 1;
            seq
        };
        self.shared.heap.lock().unwrap().push(Task {
            deadline: deadline_millis,
            seq,
            callback: Box::new(callback),
        });
        self.shared.cond.notify_one();
        TimerHandle { seq }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        *self.shared.shutdown.lock().unwrap() = true;
        self.shared.cond.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// An opaque reference to a scheduled task. heapcache's own cancellation
/// model doesn't pull tasks back out of the heap (see module docs); the
/// entry's `timer_generation` counter, bumped whenever a new timer
/// supersedes an old one, is what a fired callback checks to decide whether
/// it's still relevant. `TimerHandle` exists so callers have something
/// concrete to stash alongside that generation number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    pub seq: u64,
}

fn run(shared: Arc<Shared>, clock: Arc<dyn Clock>) {
    loop {
        let mut heap = shared.heap.lock().unwrap();
        loop {
            if *shared.shutdown.lock().unwrap() {
                return;
            }
            match heap.peek() {
                None => {
                    heap = shared.cond.wait(heap).unwrap();
                }
                Some(task) => {
                    let now = clock.millis();
                    if task.deadline <= now {
                        break;
                    }
                    let wait_for = (task.deadline - now).max(1) as u64;
                    let (guard, _timeout) = shared
                        .cond
                        .wait_timeout(heap, std::time::Duration::from_millis(wait_for))
                        .unwrap();
                    heap = guard;
                }
            }
        }
        let task = heap.pop().expect("peeked Some above");
        drop(heap);
        (task.callback)();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapcache_common::SystemClock;
    use std::sync::mpsc;

    #[test]
    fn fires_in_deadline_order_regardless_of_schedule_order() {
        let scheduler = Scheduler::start(Arc::new(SystemClock));
        let (tx, rx) = mpsc::channel();
        let now = SystemClock.millis();

        let tx1 = tx.clone();
        scheduler.schedule(now + 60, move || tx1.send(1).unwrap());
        let tx2 = tx.clone();
        scheduler.schedule(now + 10, move || tx2.send(2).unwrap());
        let tx3 = tx.clone();
        scheduler.schedule(now + 30, move || tx3.send(3).unwrap());

        let order: Vec<i32> = (0..3)
            .map(|_| rx.recv_timeout(std::time::Duration::from_millis(500)).unwrap())
            .collect();
        assert_eq!(order, vec![2, 3, 1]);
    }
}
