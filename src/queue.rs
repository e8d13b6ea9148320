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

//! Ingest queue entries and force-write requests.
//!
//! `QueueEntry` is owned by the ingest queue until the writer moves it into an in-flight
//! batch; it then becomes part of a `ForceWriteRequest` until the force-writer dispatches
//! its callback.

use {
    crate::channel::JournalChannel,
    bytes::Bytes,
    parking_lot::Mutex,
    std::{sync::Arc, time::Instant},
};

/// Completion signal delivered to a producer once its entry's batch has been fsynced.
/// `rc == 0` is success; any other value is a failure code. Called exactly once.
pub type Callback = Box<dyn FnOnce(i32) + Send + 'static>;

/// An entry waiting to be (or having just been) written to the journal.
pub struct QueueEntry {
    pub payload: Bytes,
    pub ledger_id: i64,
    pub entry_id: i64,
    pub callback: Callback,
    /// Ordering key for the callback executor; entries sharing a context are delivered to
    /// producers in submission order. `None` means no ordering is required.
    pub ctx: Option<u64>,
    pub enqueued_at: Instant,
}

impl QueueEntry {
    pub fn new(
        payload: Bytes,
        ledger_id: i64,
        entry_id: i64,
        callback: Callback,
        ctx: Option<u64>,
    ) -> Self {
        Self {
            payload,
            ledger_id,
            entry_id,
            callback,
            ctx,
            enqueued_at: Instant::now(),
        }
    }

    /// Size this entry will occupy on the wire: a 4-byte length prefix plus the payload.
    pub fn framed_len(&self) -> u64 {
        4 + self.payload.len() as u64
    }
}

impl std::fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEntry")
            .field("ledger_id", &self.ledger_id)
            .field("entry_id", &self.entry_id)
            .field("len", &self.payload.len())
            .field("ctx", &self.ctx)
            .finish()
    }
}

/// A batch handed from the writer to the force-writer. A `marker` request carries no
/// waiters and no fsync work of its own; it exists only to reset the force-writer's
/// "should force on next real request" flag at the right point in the queue.
pub struct ForceWriteRequest {
    /// Absent for marker requests, which carry no fsync work of their own.
    pub channel: Option<Arc<Mutex<JournalChannel>>>,
    pub log_id: u64,
    /// `[start, end)` byte range within the journal file this batch flushed.
    pub flush_range: (u64, u64),
    pub waiters: Vec<QueueEntry>,
    pub should_close: bool,
    pub is_marker: bool,
}

impl ForceWriteRequest {
    pub fn marker(log_id: u64) -> Self {
        Self {
            channel: None,
            log_id,
            flush_range: (0, 0),
            waiters: Vec::new(),
            should_close: false,
            is_marker: true,
        }
    }

    pub fn batch(
        channel: Arc<Mutex<JournalChannel>>,
        log_id: u64,
        start: u64,
        end: u64,
        waiters: Vec<QueueEntry>,
        should_close: bool,
    ) -> Self {
        Self {
            channel: Some(channel),
            log_id,
            flush_range: (start, end),
            waiters,
            should_close,
            is_marker: false,
        }
    }
}
