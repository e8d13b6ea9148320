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

//! The writer thread: dequeues entries, frames and buffers them, decides when to flush, and
//! hands fsync work off to the force-writer.

use {
    crate::{
        channel::JournalChannel,
        config::JournalConfig,
        directory::JournalDirectorySet,
        format::{self, HEADER_SIZE},
        metrics::MetricsSink,
        queue::{ForceWriteRequest, QueueEntry},
    },
    parking_lot::Mutex,
    std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            mpsc, Arc,
        },
        time::{Duration, Instant, SystemTime, UNIX_EPOCH},
    },
};

fn wall_clock_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Picks the next journal id: strictly greater than every existing id and than the wall
/// clock, so ids stay monotonic across restarts even if the clock goes backwards relative
/// to whatever was already on disk.
fn allocate_log_id(dirs: &JournalDirectorySet) -> u64 {
    let existing = JournalChannel::list_journal_ids(dirs.all_dirs());
    let highest = existing.into_iter().max().unwrap_or(0);
    highest.max(wall_clock_millis()) + 1
}

/// Single-threaded state machine driving the append path. `run` blocks until shutdown is
/// requested or the ingest queue's sender side is dropped.
pub struct WriterLoop {
    dirs: Arc<JournalDirectorySet>,
    config: JournalConfig,
    metrics: Arc<dyn MetricsSink>,
    ingest_rx: mpsc::Receiver<QueueEntry>,
    force_tx: mpsc::Sender<ForceWriteRequest>,
    shutdown: Arc<AtomicBool>,

    log_file: Option<Arc<Mutex<JournalChannel>>>,
    to_flush: Vec<QueueEntry>,
    last_flush_position: u64,
    group_when_timeout: bool,
}

impl WriterLoop {
    pub fn new(
        dirs: Arc<JournalDirectorySet>,
        config: JournalConfig,
        metrics: Arc<dyn MetricsSink>,
        ingest_rx: mpsc::Receiver<QueueEntry>,
        force_tx: mpsc::Sender<ForceWriteRequest>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            dirs,
            config,
            metrics,
            ingest_rx,
            force_tx,
            shutdown,
            log_file: None,
            to_flush: Vec::new(),
            last_flush_position: 0,
            group_when_timeout: false,
        }
    }

    pub fn run(mut self) {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                // no final flush of whatever is left in to_flush: those entries were never
                // acknowledged, so losing them on an unclean shutdown is not a regression.
                break;
            }
            if let Err(e) = self.step() {
                log::error!("writer loop stopping: {e}");
                break;
            }
        }
        log::info!("writer loop exited");
    }

    fn step(&mut self) -> crate::error::JournalResult<()> {
        if self.log_file.is_none() {
            self.rotate()?;
        }

        let empty_before = self.to_flush.is_empty();
        let qe = if empty_before {
            self.blocking_dequeue()
        } else {
            self.bounded_dequeue()
        };

        let should_flush = if empty_before {
            false
        } else {
            self.decide_should_flush(qe.as_ref())
        };

        if should_flush {
            self.flush_batch()?;
        }

        if self.shutdown.load(Ordering::Acquire) && qe.is_none() {
            return Ok(());
        }

        let qe = match qe {
            Some(qe) => qe,
            None => return Ok(()),
        };

        self.append(qe)?;
        Ok(())
    }

    fn rotate(&mut self) -> crate::error::JournalResult<()> {
        let log_id = allocate_log_id(&self.dirs);
        let dir = self.dirs.next_dir();
        let start = Instant::now();
        let chan = JournalChannel::create(
            &dir,
            log_id,
            self.config.prealloc_size_bytes(),
            self.config.write_buffer_size_bytes(),
            self.config.journal_format_version_to_write,
        )?;
        self.metrics
            .journal_creation_latency_nanos(start.elapsed().as_nanos() as u64);
        log::info!("opened journal {:x} in {}", log_id, dir.display());
        self.log_file = Some(Arc::new(Mutex::new(chan)));
        self.last_flush_position = HEADER_SIZE;
        self.group_when_timeout = false;
        Ok(())
    }

    fn blocking_dequeue(&mut self) -> Option<QueueEntry> {
        match self.ingest_rx.recv() {
            Ok(qe) => Some(qe),
            Err(_) => {
                self.shutdown.store(true, Ordering::Release);
                None
            }
        }
    }

    fn bounded_dequeue(&mut self) -> Option<QueueEntry> {
        let oldest = self.to_flush[0].enqueued_at;
        let max_wait = self.config.max_group_wait_nanos();
        let elapsed = oldest.elapsed().as_nanos() as u64;
        let remaining = max_wait.saturating_sub(elapsed);
        let wait = if self.config.journal_flush_when_queue_empty || remaining == 0 {
            0
        } else {
            remaining
        };
        let result = if wait == 0 {
            self.ingest_rx.try_recv().map_err(|e| e == mpsc::TryRecvError::Disconnected)
        } else {
            self.ingest_rx
                .recv_timeout(Duration::from_nanos(wait))
                .map_err(|e| e == mpsc::RecvTimeoutError::Disconnected)
        };
        match result {
            Ok(qe) => Some(qe),
            Err(true) => {
                self.shutdown.store(true, Ordering::Release);
                None
            }
            Err(false) => None,
        }
    }

    fn decide_should_flush(&mut self, qe: Option<&QueueEntry>) -> bool {
        let max_wait = self.config.max_group_wait_nanos();
        let oldest_elapsed = self.to_flush[0].enqueued_at.elapsed().as_nanos() as u64;

        if max_wait > 0 && !self.group_when_timeout && oldest_elapsed > max_wait {
            self.group_when_timeout = true;
            return false;
        }

        if self.group_when_timeout {
            if let Some(qe) = qe {
                if (qe.enqueued_at.elapsed().as_nanos() as u64) < max_wait {
                    self.group_when_timeout = false;
                    self.metrics.flush_cause_max_wait();
                    return true;
                }
            }
        }

        if let Some(_qe) = qe {
            let entries_threshold = self.config.journal_buffered_entries_threshold;
            let bytes_threshold = self.config.journal_buffered_writes_threshold;
            let position = self.log_file.as_ref().unwrap().lock().position();
            if (entries_threshold > 0 && self.to_flush.len() > entries_threshold)
                || position > self.last_flush_position + bytes_threshold
            {
                self.metrics.flush_cause_max_outstanding_bytes();
                return true;
            }
        }

        if qe.is_none() {
            self.metrics.flush_cause_empty_queue();
            return true;
        }

        false
    }

    fn flush_batch(&mut self) -> crate::error::JournalResult<()> {
        let chan_arc = self.log_file.clone().expect("log_file set before flush");
        let (prev_position, new_position, log_id) = {
            let mut chan = chan_arc.lock();
            if chan.format_version() >= format::MIN_PADDING_VERSION {
                let mut pad = Vec::new();
                format::encode_padding(chan.position(), self.config.journal_alignment_size, &mut pad);
                if !pad.is_empty() {
                    chan.write(&pad)?;
                }
            }
            let prev = self.last_flush_position;
            chan.flush(self.config.journal_remove_pages_from_cache)?;
            let new_position = chan.position();
            if !self.config.journal_adaptive_group_writes {
                chan.start_sync_range(prev, new_position - prev)?;
            }
            (prev, new_position, chan.log_id())
        };

        self.metrics.bytes_written(new_position - prev_position);
        self.metrics.batch_entries(self.to_flush.len() as u64);
        self.metrics.batch_bytes(new_position - prev_position);

        let should_close = new_position > self.config.max_journal_size_bytes();
        let waiters = std::mem::take(&mut self.to_flush);
        let request = ForceWriteRequest::batch(chan_arc, log_id, prev_position, new_position, waiters, should_close);
        if self.force_tx.send(request).is_err() {
            log::warn!("force-write queue is gone; batch for journal {log_id:x} dropped");
        }

        self.last_flush_position = new_position;
        if should_close {
            log::info!("journal {log_id:x} crossed max size at {new_position}, rotating");
            self.log_file = None;
        }
        Ok(())
    }

    fn append(&mut self, qe: QueueEntry) -> crate::error::JournalResult<()> {
        self.metrics
            .add_latency_nanos(qe.enqueued_at.elapsed().as_nanos() as u64);
        let chan_arc = self.log_file.clone().expect("log_file set before append");
        let mut framed = Vec::with_capacity(4 + qe.payload.len());
        format::encode_record(&qe.payload, &mut framed);
        {
            let mut chan = chan_arc.lock();
            chan.pre_alloc_if_needed(framed.len() as u64)?;
            chan.write(&framed)?;
        }
        self.to_flush.push(qe);
        self.metrics.queue_size(self.to_flush.len() as i64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_log_id_exceeds_existing_and_clock() {
        let tmp = tempfile::tempdir().unwrap();
        JournalChannel::create(tmp.path(), 999_999_999_999, 16, 16, crate::format::FORMAT_V5).unwrap();
        let dirs = JournalDirectorySet::new(vec![tmp.path().to_path_buf()]);
        let id = allocate_log_id(&dirs);
        assert!(id > 999_999_999_999);
    }

    #[test]
    fn allocate_log_id_falls_back_to_wall_clock_when_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = JournalDirectorySet::new(vec![tmp.path().to_path_buf()]);
        let before = wall_clock_millis();
        let id = allocate_log_id(&dirs);
        assert!(id > before);
    }
}
