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

//! `LogMark` and the process-wide `LastLogMark`.
//!
//! A mark is a `(log_id, offset)` pair naming a durability frontier. Marks are totally
//! ordered lexicographically and, once published through [`LastLogMark`], never regress.

use {
    crate::{
        directory::DirectoryManager,
        error::{Error, FormatError, JournalResult},
    },
    parking_lot::Mutex,
    std::path::Path,
};

pub const MARKER_FILE_NAME: &str = "lastMark";
const MARKER_FILE_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogMark {
    pub log_id: u64,
    pub offset: i64,
}

impl LogMark {
    pub const MIN: LogMark = LogMark { log_id: 0, offset: 0 };

    pub fn new(log_id: u64, offset: i64) -> Self {
        Self { log_id, offset }
    }

    pub fn encode(&self) -> [u8; MARKER_FILE_SIZE] {
        let mut buf = [0u8; MARKER_FILE_SIZE];
        buf[0..8].copy_from_slice(&self.log_id.to_be_bytes());
        buf[8..16].copy_from_slice(&self.offset.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8; MARKER_FILE_SIZE]) -> Self {
        Self {
            log_id: u64::from_be_bytes(buf[0..8].try_into().unwrap()),
            offset: i64::from_be_bytes(buf[8..16].try_into().unwrap()),
        }
    }
}

/// The process-wide durability frontier. Updated only by the force-write loop; read by the
/// writer at startup and by the checkpoint API from any thread.
#[derive(Debug)]
pub struct LastLogMark {
    inner: Mutex<LogMark>,
}

impl Default for LastLogMark {
    fn default() -> Self {
        Self::new(LogMark::MIN)
    }
}

impl LastLogMark {
    pub fn new(initial: LogMark) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }

    /// Snapshot the current mark.
    pub fn mark_log(&self) -> LogMark {
        *self.inner.lock()
    }

    /// Monotonically advance the mark. Panics on regression: the force-writer is the sole
    /// writer and a regression there indicates a logic bug, not a recoverable condition.
    pub fn advance(&self, new_mark: LogMark) {
        let mut guard = self.inner.lock();
        assert!(
            new_mark >= *guard,
            "LastLogMark regression: {:?} -> {:?}",
            *guard,
            new_mark
        );
        *guard = new_mark;
    }

    /// Persist `snapshot` to every directory `dirs` currently reports as writable, fsyncing
    /// each copy. Succeeds if at least one directory accepted the write; per-directory
    /// failures are logged and otherwise tolerated.
    pub fn roll_log(snapshot: LogMark, dirs: &dyn DirectoryManager) -> JournalResult<()> {
        let mut successes = 0usize;
        for dir in dirs.list_writable_dirs() {
            match write_marker_file(&dir, snapshot) {
                Ok(()) => successes += 1,
                Err(e) => {
                    log::warn!("failed to write marker file in {}: {e}", dir.display());
                }
            }
        }
        if successes == 0 {
            return Err(Error::Format(FormatError::MissingMarkerFile));
        }
        Ok(())
    }

    /// Read every marker copy across all directories `dirs` reports (writable and read-only)
    /// and take the maximum, tolerating missing or unreadable copies.
    pub fn read_log(dirs: &dyn DirectoryManager) -> LogMark {
        let mut max = LogMark::MIN;
        for dir in dirs.list_all_dirs() {
            if let Some(mark) = read_marker_file(&dir) {
                if mark > max {
                    max = mark;
                }
            }
        }
        max
    }
}

/// Writes the mark directly into the single `lastMark` file (no rename): a crash mid-write
/// can leave a partial or stale file behind, which [`LastLogMark::read_log`] tolerates by
/// ignoring malformed copies and taking the max across whatever directories are intact.
fn write_marker_file(dir: &Path, mark: LogMark) -> std::io::Result<()> {
    use std::io::Write;
    std::fs::create_dir_all(dir)?;
    let path = dir.join(MARKER_FILE_NAME);
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)?;
    f.write_all(&mark.encode())?;
    f.sync_all()?;
    Ok(())
}

fn read_marker_file(dir: &Path) -> Option<LogMark> {
    let path = dir.join(MARKER_FILE_NAME);
    let data = std::fs::read(path).ok()?;
    if data.len() != MARKER_FILE_SIZE {
        return None;
    }
    let mut buf = [0u8; MARKER_FILE_SIZE];
    buf.copy_from_slice(&data);
    Some(LogMark::decode(&buf))
}
