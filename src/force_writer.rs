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

//! The force-writer thread: consumes flush batches in FIFO order, fsyncs them, advances
//! `LastLogMark`, and dispatches completion callbacks.

use {
    crate::{
        callback::CallbackExecutor,
        config::JournalConfig,
        mark::{LastLogMark, LogMark},
        metrics::MetricsSink,
        queue::ForceWriteRequest,
    },
    std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            mpsc, Arc,
        },
        time::Duration,
    },
};

/// How often the loop wakes up with no work just to check the shared shutdown flag. The
/// self-posted group-commit marker keeps the channel's sender count above zero for the
/// lifetime of the loop, so plain channel disconnection can never signal shutdown here.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct ForceWriterLoop {
    config: JournalConfig,
    metrics: Arc<dyn MetricsSink>,
    callbacks: Arc<dyn CallbackExecutor>,
    mark: Arc<LastLogMark>,
    force_rx: mpsc::Receiver<ForceWriteRequest>,
    /// Also the loop's own sender: used to self-post group-commit markers.
    force_tx: mpsc::Sender<ForceWriteRequest>,
    /// Shared with the writer: either side sets this to tear the pipeline down, and a fatal
    /// fsync error here sets it to stop the writer too.
    shutdown: Arc<AtomicBool>,

    should_force: bool,
    count_in_last_force: u64,
}

impl ForceWriterLoop {
    pub fn new(
        config: JournalConfig,
        metrics: Arc<dyn MetricsSink>,
        callbacks: Arc<dyn CallbackExecutor>,
        mark: Arc<LastLogMark>,
        force_rx: mpsc::Receiver<ForceWriteRequest>,
        force_tx: mpsc::Sender<ForceWriteRequest>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            metrics,
            callbacks,
            mark,
            force_rx,
            force_tx,
            shutdown,
            should_force: true,
            count_in_last_force: 0,
        }
    }

    pub fn run(mut self) {
        loop {
            match self.force_rx.recv_timeout(SHUTDOWN_POLL_INTERVAL) {
                Ok(request) => {
                    if let Err(e) = self.handle(request) {
                        log::error!("force-write failed, node must restart: {e}");
                        self.shutdown.store(true, Ordering::Release);
                        break;
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if self.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        log::info!("force-writer loop exited");
    }

    fn handle(&mut self, request: ForceWriteRequest) -> crate::error::JournalResult<()> {
        if request.is_marker {
            self.should_force = true;
            return Ok(());
        }

        let channel = request
            .channel
            .clone()
            .expect("non-marker force-write request must carry a channel");

        self.metrics.force_write_queue_size(request.waiters.len() as i64);

        if self.should_force {
            if self.config.journal_adaptive_group_writes {
                let _ = self.force_tx.send(ForceWriteRequest::marker(request.log_id));
            }
            self.metrics.group_force_count(self.count_in_last_force);
            self.count_in_last_force = 0;
            let fsync_start = std::time::Instant::now();
            {
                let mut chan = channel.lock();
                if self.config.journal_adaptive_group_writes {
                    chan.force_write(false)?;
                } else {
                    let (start, end) = request.flush_range;
                    chan.sync_range_or_force_write(start, end - start)?;
                }
            }
            self.metrics
                .flush_latency_nanos(fsync_start.elapsed().as_nanos() as u64);
        }

        self.mark
            .advance(LogMark::new(request.log_id, request.flush_range.1 as i64));

        let waiter_count = request.waiters.len() as u64;
        for waiter in request.waiters {
            let callback = waiter.callback;
            match waiter.ctx {
                Some(ctx) => self.callbacks.submit_keyed(ctx, Box::new(move || callback(0))),
                None => self.callbacks.submit(Box::new(move || callback(0))),
            }
        }
        self.count_in_last_force += waiter_count;

        if request.should_close {
            channel.lock().close(true)?;
        }

        self.should_force = !(self.config.journal_adaptive_group_writes && !request.should_close);
        Ok(())
    }
}
