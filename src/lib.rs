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

//! Write-ahead journal and durability pipeline for an append-only log storage node.
//!
//! An ingest queue feeds a single writer thread, which frames and buffers entries and
//! decides when to flush; flushed batches hand off to a single force-writer thread, which
//! fsyncs them, advances the durability mark, and dispatches completion callbacks. See
//! [`journal::Journal`] for the entry point.

#[cfg(all(not(target_env = "msvc"), not(miri)))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

pub mod callback;
pub mod channel;
pub mod checkpoint;
pub mod config;
pub mod directory;
pub mod error;
pub mod force_writer;
pub mod format;
pub mod journal;
pub mod mark;
pub mod metrics;
pub mod queue;
pub mod replay;
pub mod writer;

pub use {
    callback::{CallbackExecutor, OrderedThreadPoolExecutor},
    checkpoint::{Checkpoint, Checkpointer},
    config::JournalConfig,
    directory::{DirectoryManager, JournalDirectorySet, StaticDirectorySet},
    error::{Error, FormatError, JournalResult},
    journal::{recover, Journal},
    mark::{LastLogMark, LogMark},
    metrics::{LocalMetrics, MetricsSink, NullMetrics},
    queue::{Callback, QueueEntry},
    replay::{repair_journal, replay_journal, RepairResult, ScannedRecord},
};

/// Initialize `env_logger` with a sane default filter. Intended for standalone binaries
/// and integration tests; library consumers embedding the journal in a larger process are
/// expected to configure their own logger.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}
