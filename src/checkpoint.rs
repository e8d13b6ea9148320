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

//! Checkpoint issuance and the garbage collection it triggers.
//!
//! Checkpoints are issued by external subsystems that have durably persisted their own
//! state up to some log position; `checkpoint_complete` is what lets the journal finally
//! forget journal files older than that position.

use {
    crate::{
        channel::JournalChannel,
        directory::DirectoryManager,
        error::JournalResult,
        mark::{LastLogMark, LogMark},
    },
    std::{path::PathBuf, sync::Arc},
};

/// An opaque handle naming a point the journal may eventually garbage-collect up to, once
/// the caller confirms it has durably persisted everything at or before this mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub mark: LogMark,
}

/// Snapshot `LastLogMark` into a new checkpoint handle.
pub fn new_checkpoint(mark: &LastLogMark) -> Checkpoint {
    Checkpoint { mark: mark.mark_log() }
}

/// Persist `ckpt.mark` to every writable marker directory and, if `compact`, delete journal
/// files strictly below it beyond the configured backlog. Idempotent: re-completing the
/// same checkpoint re-persists the same mark and re-applies the same retention policy.
pub fn checkpoint_complete(
    ckpt: Checkpoint,
    marker_dirs: &dyn DirectoryManager,
    journal_dirs: &dyn DirectoryManager,
    max_backup_journals: usize,
    compact: bool,
) -> JournalResult<()> {
    LastLogMark::roll_log(ckpt.mark, marker_dirs)?;
    if compact {
        garbage_collect(journal_dirs, ckpt.mark.log_id, max_backup_journals);
    }
    Ok(())
}

/// Delete journal files with id strictly below `current_log_id`, keeping the youngest
/// `max_backup_journals` of them. Never touches `current_log_id` or anything above it.
/// Per-file deletion failures are logged and otherwise tolerated.
fn garbage_collect(journal_dirs: &dyn DirectoryManager, current_log_id: u64, max_backup_journals: usize) {
    let dirs = journal_dirs.list_writable_dirs();
    let mut below: Vec<u64> = JournalChannel::list_journal_ids(&dirs)
        .into_iter()
        .filter(|&id| id < current_log_id)
        .collect();
    below.sort_unstable();
    if below.len() <= max_backup_journals {
        return;
    }
    let delete_count = below.len() - max_backup_journals;
    for id in &below[..delete_count] {
        delete_journal(&dirs, *id);
    }
}

fn delete_journal(journal_dirs: &[PathBuf], id: u64) {
    let name = JournalChannel::journal_file_name(id);
    for dir in journal_dirs {
        let path = dir.join(&name);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("failed to remove old journal {}: {e}", path.display());
            } else {
                log::info!("garbage collected journal {}", path.display());
            }
            return;
        }
    }
}

/// A small convenience wrapper bundling the directory/threshold configuration so callers
/// that issue checkpoints repeatedly don't need to thread them through every call.
pub struct Checkpointer {
    mark: Arc<LastLogMark>,
    marker_dirs: Arc<dyn DirectoryManager>,
    journal_dirs: Arc<dyn DirectoryManager>,
    max_backup_journals: usize,
}

impl Checkpointer {
    pub fn new(
        mark: Arc<LastLogMark>,
        marker_dirs: Arc<dyn DirectoryManager>,
        journal_dirs: Arc<dyn DirectoryManager>,
        max_backup_journals: usize,
    ) -> Self {
        Self {
            mark,
            marker_dirs,
            journal_dirs,
            max_backup_journals,
        }
    }

    pub fn new_checkpoint(&self) -> Checkpoint {
        new_checkpoint(&self.mark)
    }

    pub fn checkpoint_complete(&self, ckpt: Checkpoint, compact: bool) -> JournalResult<()> {
        checkpoint_complete(
            ckpt,
            self.marker_dirs.as_ref(),
            self.journal_dirs.as_ref(),
            self.max_backup_journals,
            compact,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{directory::StaticDirectorySet, format::FORMAT_V5};

    #[test]
    fn checkpoint_complete_persists_mark() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = StaticDirectorySet::new(vec![tmp.path().to_path_buf()]);
        let mark = LastLogMark::new(LogMark::new(5, 100));
        let ckpt = new_checkpoint(&mark);
        checkpoint_complete(ckpt, &dirs, &dirs, 5, false).unwrap();
        assert_eq!(LastLogMark::read_log(&dirs), LogMark::new(5, 100));
    }

    #[test]
    fn compacting_checkpoint_keeps_only_backup_window() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = StaticDirectorySet::new(vec![tmp.path().to_path_buf()]);
        for id in 1..=10u64 {
            JournalChannel::create(tmp.path(), id, 16, 16, FORMAT_V5).unwrap();
        }
        let mark = LastLogMark::new(LogMark::new(10, 0));
        let ckpt = new_checkpoint(&mark);
        checkpoint_complete(ckpt, &dirs, &dirs, 3, true).unwrap();

        let remaining = JournalChannel::list_journal_ids(&dirs.list_all_dirs());
        // ids < 10 are candidates for deletion; only the youngest 3 of those survive, plus
        // id 10 itself (never touched since it is not < current_log_id).
        assert_eq!(remaining, vec![7, 8, 9, 10]);
    }

    #[test]
    fn compacting_checkpoint_never_deletes_at_or_above_mark() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = StaticDirectorySet::new(vec![tmp.path().to_path_buf()]);
        for id in [5u64, 6, 7] {
            JournalChannel::create(tmp.path(), id, 16, 16, FORMAT_V5).unwrap();
        }
        let mark = LastLogMark::new(LogMark::new(5, 0));
        let ckpt = new_checkpoint(&mark);
        checkpoint_complete(ckpt, &dirs, &dirs, 0, true).unwrap();

        let remaining = JournalChannel::list_journal_ids(&dirs.list_all_dirs());
        assert_eq!(remaining, vec![5, 6, 7]);
    }
}
