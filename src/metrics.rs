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

//! Metrics sink
//!
//! A handle is passed through construction (writer, force-writer, checkpoint API) rather
//! than touching a process-global registry, so the core stays testable without a real
//! metrics backend wired up.

use std::sync::atomic::{AtomicU64, Ordering};

/// Named counters and histograms the core reports against. Presence and units matter more
/// than the exact surface; a real deployment would fan these out to whatever the node's
/// observability stack expects.
pub trait MetricsSink: Send + Sync {
    fn queue_size(&self, _n: i64) {}
    fn force_write_queue_size(&self, _n: i64) {}
    fn bytes_written(&self, _n: u64) {}
    fn add_latency_nanos(&self, _n: u64) {}
    fn flush_latency_nanos(&self, _n: u64) {}
    fn flush_cause_max_wait(&self) {}
    fn flush_cause_max_outstanding_bytes(&self) {}
    fn flush_cause_empty_queue(&self) {}
    fn batch_entries(&self, _n: u64) {}
    fn batch_bytes(&self, _n: u64) {}
    fn group_force_count(&self, _n: u64) {}
    fn journal_creation_latency_nanos(&self, _n: u64) {}
}

/// Discards everything; used when the embedder doesn't care.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetrics;

impl MetricsSink for NullMetrics {}

/// An in-process atomic-counter sink, good enough for tests and small deployments that
/// just want to poll current values rather than stream them to a time-series backend.
#[derive(Debug, Default)]
pub struct LocalMetrics {
    queue_size: AtomicU64,
    force_write_queue_size: AtomicU64,
    bytes_written: AtomicU64,
    add_latency_nanos_total: AtomicU64,
    flush_latency_nanos_total: AtomicU64,
    flush_cause_max_wait: AtomicU64,
    flush_cause_max_outstanding_bytes: AtomicU64,
    flush_cause_empty_queue: AtomicU64,
    batch_entries_total: AtomicU64,
    batch_bytes_total: AtomicU64,
    group_force_count_total: AtomicU64,
    journal_creation_latency_nanos_total: AtomicU64,
}

impl LocalMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_written_total(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn batch_entries_total(&self) -> u64 {
        self.batch_entries_total.load(Ordering::Relaxed)
    }

    pub fn flush_cause_counts(&self) -> (u64, u64, u64) {
        (
            self.flush_cause_max_wait.load(Ordering::Relaxed),
            self.flush_cause_max_outstanding_bytes.load(Ordering::Relaxed),
            self.flush_cause_empty_queue.load(Ordering::Relaxed),
        )
    }

    pub fn group_force_count_total(&self) -> u64 {
        self.group_force_count_total.load(Ordering::Relaxed)
    }
}

impl MetricsSink for LocalMetrics {
    fn queue_size(&self, n: i64) {
        self.queue_size.store(n.max(0) as u64, Ordering::Relaxed);
    }
    fn force_write_queue_size(&self, n: i64) {
        self.force_write_queue_size
            .store(n.max(0) as u64, Ordering::Relaxed);
    }
    fn bytes_written(&self, n: u64) {
        self.bytes_written.fetch_add(n, Ordering::Relaxed);
    }
    fn add_latency_nanos(&self, n: u64) {
        self.add_latency_nanos_total.fetch_add(n, Ordering::Relaxed);
    }
    fn flush_latency_nanos(&self, n: u64) {
        self.flush_latency_nanos_total.fetch_add(n, Ordering::Relaxed);
    }
    fn flush_cause_max_wait(&self) {
        self.flush_cause_max_wait.fetch_add(1, Ordering::Relaxed);
    }
    fn flush_cause_max_outstanding_bytes(&self) {
        self.flush_cause_max_outstanding_bytes
            .fetch_add(1, Ordering::Relaxed);
    }
    fn flush_cause_empty_queue(&self) {
        self.flush_cause_empty_queue.fetch_add(1, Ordering::Relaxed);
    }
    fn batch_entries(&self, n: u64) {
        self.batch_entries_total.fetch_add(n, Ordering::Relaxed);
    }
    fn batch_bytes(&self, n: u64) {
        self.batch_bytes_total.fetch_add(n, Ordering::Relaxed);
    }
    fn group_force_count(&self, n: u64) {
        self.group_force_count_total.fetch_add(n, Ordering::Relaxed);
    }
    fn journal_creation_latency_nanos(&self, n: u64) {
        self.journal_creation_latency_nanos_total
            .fetch_add(n, Ordering::Relaxed);
    }
}
