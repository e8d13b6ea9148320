/*
 * This file is part of bookie-journal.
 *
 * bookie-journal is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * bookie-journal is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with bookie-journal. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! Callback executor contract
//!
//! The journal core only ever calls `submit_keyed(key, task)` / `submit(task)`.
//! [`OrderedThreadPoolExecutor`] is the bundled implementation: the same key always lands on
//! the same worker thread, so callbacks for a single ledger context are delivered in
//! submission order.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::mpsc,
    thread::JoinHandle,
};

pub type CallbackTask = Box<dyn FnOnce() + Send + 'static>;

pub trait CallbackExecutor: Send + Sync {
    /// Submit a task ordered relative to every other task submitted with the same key.
    fn submit_keyed(&self, key: u64, task: CallbackTask);
    /// Submit a task with no ordering requirement against other tasks.
    fn submit(&self, task: CallbackTask);
}

/// A fixed pool of worker threads, each draining its own FIFO channel. Keyed submissions
/// hash to a worker; unkeyed submissions round-robin.
pub struct OrderedThreadPoolExecutor {
    senders: Vec<mpsc::Sender<CallbackTask>>,
    handles: Vec<JoinHandle<()>>,
    rr: std::sync::atomic::AtomicUsize,
}

impl OrderedThreadPoolExecutor {
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let mut senders = Vec::with_capacity(num_threads);
        let mut handles = Vec::with_capacity(num_threads);
        for worker_id in 0..num_threads {
            let (tx, rx) = mpsc::channel::<CallbackTask>();
            let handle = std::thread::Builder::new()
                .name(format!("journal-callback-{worker_id}"))
                .spawn(move || {
                    for task in rx {
                        task();
                    }
                })
                .expect("failed to spawn callback worker thread");
            senders.push(tx);
            handles.push(handle);
        }
        Self {
            senders,
            handles,
            rr: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    fn worker_for_key(&self, key: u64) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.senders.len()
    }

    /// Drop all senders (causing worker threads to drain and exit) and join them.
    pub fn shutdown(mut self) {
        self.senders.clear();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl CallbackExecutor for OrderedThreadPoolExecutor {
    fn submit_keyed(&self, key: u64, task: CallbackTask) {
        let idx = self.worker_for_key(key);
        if self.senders[idx].send(task).is_err() {
            log::warn!("callback executor worker {idx} is gone; dropping callback");
        }
    }

    fn submit(&self, task: CallbackTask) {
        let idx = self.rr.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % self.senders.len();
        if self.senders[idx].send(task).is_err() {
            log::warn!("callback executor worker {idx} is gone; dropping callback");
        }
    }
}
