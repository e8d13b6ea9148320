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

//! Directory manager contract
//!
//! A full directory manager also tracks disk usage and marks directories read-only under
//! pressure. The journal core only needs the two queries below.

use std::{
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
};

pub trait DirectoryManager: Send + Sync {
    /// Directories currently accepting new journal files / marker writes.
    fn list_writable_dirs(&self) -> Vec<PathBuf>;
    /// All known directories, writable or not, consulted during recovery so a mark copy on
    /// a now-read-only directory is not missed.
    fn list_all_dirs(&self) -> Vec<PathBuf>;
}

/// A fixed set of directories, all always writable. Sufficient for a single-directory
/// deployment and for tests; a real directory manager would additionally watch free space.
#[derive(Debug, Clone)]
pub struct StaticDirectorySet {
    dirs: Vec<PathBuf>,
}

impl StaticDirectorySet {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }
}

impl DirectoryManager for StaticDirectorySet {
    fn list_writable_dirs(&self) -> Vec<PathBuf> {
        self.dirs.clone()
    }

    fn list_all_dirs(&self) -> Vec<PathBuf> {
        self.dirs.clone()
    }
}

/// Picks the next directory a new journal file should be created in, striping journal files
/// across several directories for I/O parallelism; a single-directory config degenerates to
/// always returning that one directory.
pub struct JournalDirectorySet {
    dirs: Vec<PathBuf>,
    next: AtomicUsize,
}

impl JournalDirectorySet {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        assert!(!dirs.is_empty(), "journal directory set must not be empty");
        Self {
            dirs,
            next: AtomicUsize::new(0),
        }
    }

    /// Round-robin over the configured directories.
    pub fn next_dir(&self) -> PathBuf {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.dirs.len();
        self.dirs[idx].clone()
    }

    pub fn all_dirs(&self) -> &[PathBuf] {
        &self.dirs
    }
}

impl DirectoryManager for JournalDirectorySet {
    fn list_writable_dirs(&self) -> Vec<PathBuf> {
        self.dirs.clone()
    }

    fn list_all_dirs(&self) -> Vec<PathBuf> {
        self.dirs.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_set_reports_same_dirs_for_both_queries() {
        let set = StaticDirectorySet::new(vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(set.list_writable_dirs(), set.list_all_dirs());
    }

    #[test]
    fn journal_dir_set_round_robins() {
        let set = JournalDirectorySet::new(vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(set.next_dir(), PathBuf::from("/a"));
        assert_eq!(set.next_dir(), PathBuf::from("/b"));
        assert_eq!(set.next_dir(), PathBuf::from("/a"));
    }

    #[test]
    fn journal_dir_set_degenerates_to_single_dir() {
        let set = JournalDirectorySet::new(vec![PathBuf::from("/only")]);
        for _ in 0..3 {
            assert_eq!(set.next_dir(), PathBuf::from("/only"));
        }
    }
}
