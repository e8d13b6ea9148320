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

//! The public `Journal` handle: wires the ingest queue, writer thread, force-writer thread
//! and callback executor together behind `log_add`/`new_checkpoint`/`checkpoint_complete`.

use {
    crate::{
        callback::{CallbackExecutor, OrderedThreadPoolExecutor},
        checkpoint::{Checkpoint, Checkpointer},
        config::JournalConfig,
        directory::{DirectoryManager, JournalDirectorySet, StaticDirectorySet},
        error::{Error, JournalResult},
        force_writer::ForceWriterLoop,
        mark::{LastLogMark, LogMark},
        metrics::MetricsSink,
        queue::{Callback, QueueEntry},
        replay::{self, ScannedRecord},
        writer::WriterLoop,
    },
    bytes::Bytes,
    std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            mpsc, Arc,
        },
        thread::JoinHandle,
    },
};

/// Read every marker copy and replay every journal at or after it, handing each record to
/// `on_record`. Run this once at startup before [`Journal::open`]; the journal core does
/// not index entries itself, so recovering application state is the caller's job.
pub fn recover(
    config: &JournalConfig,
    on_record: impl FnMut(ScannedRecord<'_>) -> JournalResult<()>,
) -> JournalResult<LogMark> {
    let marker_dirs = StaticDirectorySet::new(config.effective_marker_dirs().to_vec());
    let journal_dirs = StaticDirectorySet::new(config.journal_dirs.clone());
    let mark = LastLogMark::read_log(&marker_dirs);
    replay::replay_journal(&journal_dirs.list_all_dirs(), mark, on_record)
}

/// A running write-ahead journal: an ingest queue feeding a writer thread, a force-writer
/// thread, and a callback executor, all spawned at [`Journal::open`] and torn down by
/// [`Journal::shutdown`].
pub struct Journal {
    config: JournalConfig,
    mark: Arc<LastLogMark>,
    ingest_tx: Option<mpsc::Sender<QueueEntry>>,
    shutdown: Arc<AtomicBool>,
    writer_handle: Option<JoinHandle<()>>,
    force_writer_handle: Option<JoinHandle<()>>,
    callbacks: Option<Arc<OrderedThreadPoolExecutor>>,
    checkpointer: Checkpointer,
}

impl Journal {
    /// Spawn the writer and force-writer threads. `initial_mark` should come from
    /// [`recover`] (or `LogMark::MIN` for a brand new deployment with nothing to replay).
    pub fn open(
        config: JournalConfig,
        metrics: Arc<dyn MetricsSink>,
        initial_mark: LogMark,
    ) -> JournalResult<Self> {
        config.validate()?;

        let configured_journal_dirs: Arc<dyn DirectoryManager> =
            Arc::new(StaticDirectorySet::new(config.journal_dirs.clone()));
        let dirs = Arc::new(JournalDirectorySet::new(configured_journal_dirs.list_writable_dirs()));
        let marker_dirs: Arc<dyn DirectoryManager> =
            Arc::new(StaticDirectorySet::new(config.effective_marker_dirs().to_vec()));
        let mark = Arc::new(LastLogMark::new(initial_mark));
        let shutdown = Arc::new(AtomicBool::new(false));
        let callbacks = Arc::new(OrderedThreadPoolExecutor::new(config.num_journal_callback_threads));

        let (ingest_tx, ingest_rx) = mpsc::channel();
        let (force_tx, force_rx) = mpsc::channel();

        let writer = WriterLoop::new(
            dirs.clone(),
            config.clone(),
            metrics.clone(),
            ingest_rx,
            force_tx.clone(),
            shutdown.clone(),
        );
        let writer_handle = std::thread::Builder::new()
            .name("journal-writer".into())
            .spawn(move || writer.run())
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        let force_writer = ForceWriterLoop::new(
            config.clone(),
            metrics,
            callbacks.clone() as Arc<dyn CallbackExecutor>,
            mark.clone(),
            force_rx,
            force_tx,
            shutdown.clone(),
        );
        let force_writer_handle = std::thread::Builder::new()
            .name("journal-force-writer".into())
            .spawn(move || force_writer.run())
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        let checkpointer = Checkpointer::new(
            mark.clone(),
            marker_dirs,
            dirs.clone() as Arc<dyn DirectoryManager>,
            config.max_backup_journals,
        );

        Ok(Self {
            config,
            mark,
            ingest_tx: Some(ingest_tx),
            shutdown,
            writer_handle: Some(writer_handle),
            force_writer_handle: Some(force_writer_handle),
            callbacks: Some(callbacks),
            checkpointer,
        })
    }

    /// Enqueue an entry for durable append. Non-blocking; `callback` fires with success
    /// code `0` once the entry's batch has been fsynced, or is dropped at shutdown.
    pub fn log_add(
        &self,
        payload: Bytes,
        ledger_id: i64,
        entry_id: i64,
        ctx: Option<u64>,
        callback: Callback,
    ) -> JournalResult<()> {
        let tx = self.ingest_tx.as_ref().ok_or(Error::ShutdownRequested)?;
        let entry = QueueEntry::new(payload, ledger_id, entry_id, callback, ctx);
        tx.send(entry).map_err(|_| Error::ShutdownRequested)
    }

    pub fn new_checkpoint(&self) -> Checkpoint {
        self.checkpointer.new_checkpoint()
    }

    pub fn checkpoint_complete(&self, ckpt: Checkpoint, compact: bool) -> JournalResult<()> {
        self.checkpointer.checkpoint_complete(ckpt, compact)
    }

    pub fn last_log_mark(&self) -> LogMark {
        self.mark.mark_log()
    }

    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Drop the ingest queue, join both threads, and shut the callback executor down.
    /// Entries still buffered in the writer at the moment of the call are lost, matching
    /// the durability contract: nothing un-acknowledged is guaranteed to survive.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.ingest_tx.take(); // disconnects the writer's blocking recv
        if let Some(h) = self.writer_handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.force_writer_handle.take() {
            let _ = h.join();
        }
        if let Some(callbacks) = self.callbacks.take() {
            match Arc::try_unwrap(callbacks) {
                Ok(executor) => executor.shutdown(),
                Err(_) => log::warn!("callback executor still referenced at shutdown"),
            }
        }
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.ingest_tx.take();
    }
}
