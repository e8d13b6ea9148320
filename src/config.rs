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

//! Journal configuration
//!
//! The `journal_*` option table controlling framing, pre-allocation, and group-commit
//! behavior. Every field has a default so a caller's YAML file only needs to list the
//! options it wants to override.

use {crate::error::Error, serde::Deserialize, std::path::PathBuf};

fn default_max_journal_size_mb() -> u64 {
    2 * 1024
}
fn default_prealloc_size_mb() -> u64 {
    16
}
fn default_write_buffer_size_kb() -> u64 {
    64
}
fn default_alignment_size() -> u32 {
    512
}
fn default_format_version() -> u32 {
    crate::format::FORMAT_V5
}
fn default_true() -> bool {
    true
}
fn default_max_group_wait_ms() -> u64 {
    2
}
fn default_buffered_writes_threshold() -> u64 {
    512 * 1024
}
fn default_buffered_entries_threshold() -> usize {
    0
}
fn default_max_backup_journals() -> usize {
    5
}
fn default_callback_threads() -> usize {
    1
}

/// Recognized journal options.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Directories journals are written to; new journal files rotate across these round-robin.
    pub journal_dirs: Vec<PathBuf>,
    /// Directories the checkpoint marker file is written to. Defaults to `journal_dirs` when empty.
    pub marker_dirs: Vec<PathBuf>,
    #[serde(rename = "max_journal_size_mb")]
    pub max_journal_size_mb: u64,
    #[serde(rename = "journal_prealloc_size_mb")]
    pub journal_prealloc_size_mb: u64,
    #[serde(rename = "journal_write_buffer_size_kb")]
    pub journal_write_buffer_size_kb: u64,
    #[serde(rename = "journal_alignment_size")]
    pub journal_alignment_size: u32,
    #[serde(rename = "journal_format_version_to_write")]
    pub journal_format_version_to_write: u32,
    #[serde(rename = "journal_adaptive_group_writes")]
    pub journal_adaptive_group_writes: bool,
    #[serde(rename = "journal_max_group_wait_ms")]
    pub journal_max_group_wait_ms: u64,
    #[serde(rename = "journal_buffered_writes_threshold")]
    pub journal_buffered_writes_threshold: u64,
    #[serde(rename = "journal_buffered_entries_threshold")]
    pub journal_buffered_entries_threshold: usize,
    #[serde(rename = "journal_flush_when_queue_empty")]
    pub journal_flush_when_queue_empty: bool,
    #[serde(rename = "journal_remove_pages_from_cache")]
    pub journal_remove_pages_from_cache: bool,
    pub max_backup_journals: usize,
    pub num_journal_callback_threads: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            journal_dirs: Vec::new(),
            marker_dirs: Vec::new(),
            max_journal_size_mb: default_max_journal_size_mb(),
            journal_prealloc_size_mb: default_prealloc_size_mb(),
            journal_write_buffer_size_kb: default_write_buffer_size_kb(),
            journal_alignment_size: default_alignment_size(),
            journal_format_version_to_write: default_format_version(),
            journal_adaptive_group_writes: default_true(),
            journal_max_group_wait_ms: default_max_group_wait_ms(),
            journal_buffered_writes_threshold: default_buffered_writes_threshold(),
            journal_buffered_entries_threshold: default_buffered_entries_threshold(),
            journal_flush_when_queue_empty: default_true(),
            journal_remove_pages_from_cache: false,
            max_backup_journals: default_max_backup_journals(),
            num_journal_callback_threads: default_callback_threads(),
        }
    }
}

impl JournalConfig {
    /// Load a config from a YAML file, falling back to defaults for anything absent.
    pub fn load_yaml(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        Self::parse_yaml(&raw)
    }

    pub fn parse_yaml(raw: &str) -> Result<Self, Error> {
        serde_yaml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn max_journal_size_bytes(&self) -> u64 {
        self.max_journal_size_mb * 1024 * 1024
    }

    pub fn prealloc_size_bytes(&self) -> u64 {
        self.journal_prealloc_size_mb * 1024 * 1024
    }

    pub fn write_buffer_size_bytes(&self) -> usize {
        (self.journal_write_buffer_size_kb * 1024) as usize
    }

    pub fn max_group_wait_nanos(&self) -> u64 {
        self.journal_max_group_wait_ms * 1_000_000
    }

    /// Directories the marker file is durably copied to; falls back to the journal
    /// directories themselves when unset.
    pub fn effective_marker_dirs(&self) -> &[PathBuf] {
        if self.marker_dirs.is_empty() {
            &self.journal_dirs
        } else {
            &self.marker_dirs
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.journal_dirs.is_empty() {
            return Err(Error::Config("journal_dirs must not be empty".into()));
        }
        if self.journal_alignment_size == 0 || !self.journal_alignment_size.is_power_of_two() {
            return Err(Error::Config(
                "journal_alignment_size must be a power of two".into(),
            ));
        }
        if self.journal_format_version_to_write == 0
            || self.journal_format_version_to_write > crate::format::FORMAT_V5
        {
            return Err(Error::Config(format!(
                "unsupported journal_format_version_to_write {}",
                self.journal_format_version_to_write
            )));
        }
        Ok(())
    }
}
