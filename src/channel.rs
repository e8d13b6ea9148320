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

//! `JournalChannel`: the append-only file abstraction the writer and force-writer share.
//!
//! Layers a user-space write buffer over the OS file, supports pre-allocation so growth
//! never needs a metadata fsync, and exposes `force_write`/`sync_range` as the two
//! durability primitives the force-write loop chooses between.

use {
    crate::{
        error::JournalResult,
        format::{JournalHeader, HEADER_SIZE},
    },
    std::{
        fs::{File, OpenOptions},
        io::{Read, Seek, SeekFrom, Write},
        path::{Path, PathBuf},
        sync::atomic::{AtomicBool, Ordering},
    },
};

/// An append-only journal file: `<hex(log_id)>.txn` in some journal directory.
pub struct JournalChannel {
    path: PathBuf,
    file: File,
    log_id: u64,
    format_version: u32,
    /// next byte offset the user buffer will be flushed to
    position: u64,
    /// end of the region already extended via pre-allocation
    prealloc_end: u64,
    prealloc_size: u64,
    buf: Vec<u8>,
    buf_capacity: usize,
    closed: AtomicBool,
}

impl JournalChannel {
    pub fn journal_file_name(log_id: u64) -> String {
        format!("{log_id:x}.txn")
    }

    /// Parse the `<hex(log_id)>.txn` name back into a log id, or `None` for anything else
    /// found in a journal directory (stray files are ignored, not treated as corruption).
    pub fn parse_journal_id(file_name: &str) -> Option<u64> {
        let hex = file_name.strip_suffix(".txn")?;
        u64::from_str_radix(hex, 16).ok()
    }

    /// List every journal id present across `dirs`, deduplicated and ascending.
    pub fn list_journal_ids(dirs: &[PathBuf]) -> Vec<u64> {
        let mut ids: Vec<u64> = dirs
            .iter()
            .filter_map(|dir| std::fs::read_dir(dir).ok())
            .flatten()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| Self::parse_journal_id(&entry.file_name().to_string_lossy()))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Create a brand new journal file: writes and pre-allocates past the header.
    pub fn create(
        dir: &Path,
        log_id: u64,
        prealloc_size: u64,
        buf_capacity: usize,
        format_version: u32,
    ) -> JournalResult<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(Self::journal_file_name(log_id));
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let header = JournalHeader { format_version }.encode();
        file.write_all(&header)?;
        let prealloc_end = HEADER_SIZE + prealloc_size.max(1);
        platform::fallocate(&file, HEADER_SIZE, prealloc_end)?;
        Ok(Self {
            path,
            file,
            log_id,
            format_version,
            position: HEADER_SIZE,
            prealloc_end,
            prealloc_size,
            buf: Vec::with_capacity(buf_capacity),
            buf_capacity,
            closed: AtomicBool::new(false),
        })
    }

    /// Re-open an existing journal file for appending at `resume_at` (the writer's own
    /// open path after a restart, distinct from the read-only scanner used by replay).
    pub fn open_for_append(
        dir: &Path,
        log_id: u64,
        prealloc_size: u64,
        buf_capacity: usize,
        resume_at: u64,
    ) -> JournalResult<Self> {
        let path = dir.join(Self::journal_file_name(log_id));
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mut header_buf = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header_buf)?;
        let header = JournalHeader::decode(&header_buf)?;
        let len = file.metadata()?.len();
        file.seek(SeekFrom::Start(resume_at))?;
        Ok(Self {
            path,
            file,
            log_id,
            format_version: header.format_version,
            position: resume_at,
            prealloc_end: len,
            prealloc_size,
            buf: Vec::with_capacity(buf_capacity),
            buf_capacity,
            closed: AtomicBool::new(false),
        })
    }

    pub fn log_id(&self) -> u64 {
        self.log_id
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Position the next byte written to the OS will land at (header + flushed + buffered).
    pub fn position(&self) -> u64 {
        self.position + self.buf.len() as u64
    }

    /// Extend the file so that `position() + n` bytes fit inside the pre-allocated region,
    /// without needing a metadata-touching fsync on every growth.
    pub fn pre_alloc_if_needed(&mut self, n: u64) -> JournalResult<()> {
        let needed = self.position() + n;
        if needed <= self.prealloc_end {
            return Ok(());
        }
        let mut new_end = self.prealloc_end;
        while new_end < needed {
            new_end += self.prealloc_size.max(1);
        }
        platform::fallocate(&self.file, self.prealloc_end, new_end)?;
        self.prealloc_end = new_end;
        Ok(())
    }

    /// Append `data` to the user buffer, flushing to the OS first if it would overflow.
    pub fn write(&mut self, data: &[u8]) -> JournalResult<()> {
        if self.buf.len() + data.len() > self.buf_capacity && !self.buf.is_empty() {
            self.flush(false)?;
        }
        if data.len() >= self.buf_capacity {
            // larger than the whole buffer: bypass it entirely
            self.pre_alloc_if_needed(data.len() as u64)?;
            self.file.write_all(data)?;
            self.position += data.len() as u64;
        } else {
            self.buf.extend_from_slice(data);
        }
        Ok(())
    }

    /// Push the user buffer to the OS. Does not fsync.
    pub fn flush(&mut self, remove_pages_from_cache: bool) -> JournalResult<()> {
        if !self.buf.is_empty() {
            self.pre_alloc_if_needed(self.buf.len() as u64)?;
            self.file.write_all(&self.buf)?;
            self.position += self.buf.len() as u64;
            self.buf.clear();
        }
        if remove_pages_from_cache {
            platform::fadvise_dontneed(&self.file, 0, self.position);
        }
        Ok(())
    }

    /// fsync (or fdatasync when `metadata` is false and the platform distinguishes them).
    pub fn force_write(&self, metadata: bool) -> JournalResult<()> {
        platform::force_write(&self.file, metadata)?;
        Ok(())
    }

    /// Ask the OS to start writing back `[start, start+len)` without blocking for
    /// completion; platforms lacking range-sync fall back to a full `force_write`.
    pub fn start_sync_range(&self, start: u64, len: u64) -> JournalResult<()> {
        if !platform::sync_file_range(&self.file, start, len) {
            self.force_write(false)?;
        }
        Ok(())
    }

    /// Used by the force-writer when adaptive group commit is disabled: request a range
    /// sync, or fall back to a full force-write if unsupported.
    pub fn sync_range_or_force_write(&self, start: u64, len: u64) -> JournalResult<()> {
        self.start_sync_range(start, len)
    }

    /// Flush, optionally fsync, and release the OS handle. Idempotent.
    pub fn close(&mut self, sync: bool) -> JournalResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.flush(false)?;
        if sync {
            self.force_write(true)?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for JournalChannel {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(e) = self.close(false) {
                log::warn!("error closing journal channel for {}: {e}", self.path.display());
            }
        }
    }
}

#[cfg(unix)]
mod platform {
    use std::{fs::File, os::unix::io::AsRawFd};

    pub fn fallocate(file: &File, _old_len: u64, new_len: u64) -> std::io::Result<()> {
        let fd = file.as_raw_fd();
        let rc = unsafe { libc::posix_fallocate(fd, 0, new_len as libc::off_t) };
        if rc == 0 {
            return Ok(());
        }
        // ENOSYS / EOPNOTSUPP / EINVAL (some filesystems): fall back to a plain extend.
        file.set_len(new_len)
    }

    pub fn force_write(file: &File, metadata: bool) -> std::io::Result<()> {
        if metadata {
            file.sync_all()
        } else {
            file.sync_data()
        }
    }

    pub fn sync_file_range(file: &File, start: u64, len: u64) -> bool {
        #[cfg(target_os = "linux")]
        {
            let fd = file.as_raw_fd();
            let rc = unsafe {
                libc::sync_file_range(
                    fd,
                    start as libc::off64_t,
                    len as libc::off64_t,
                    libc::SYNC_FILE_RANGE_WRITE,
                )
            };
            return rc == 0;
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = (file, start, len);
            false
        }
    }

    pub fn fadvise_dontneed(file: &File, offset: u64, len: u64) {
        #[cfg(target_os = "linux")]
        {
            let fd = file.as_raw_fd();
            unsafe {
                libc::posix_fadvise(
                    fd,
                    offset as libc::off_t,
                    len as libc::off_t,
                    libc::POSIX_FADV_DONTNEED,
                );
            }
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = (file, offset, len);
        }
    }
}

#[cfg(windows)]
mod platform {
    use {
        std::{fs::File, os::windows::io::AsRawHandle},
        windows::Win32::{
            Foundation::HANDLE,
            Storage::FileSystem::{FileAllocationInfo, SetFileInformationByHandle, FILE_ALLOCATION_INFO},
        },
    };

    /// Extend the file via `SetFileInformationByHandle`, the native pre-allocation hint on
    /// Windows; fall back to a plain `set_len` if the volume rejects it (e.g. filesystems
    /// without sparse-allocation support).
    pub fn fallocate(file: &File, _old_len: u64, new_len: u64) -> std::io::Result<()> {
        let handle = HANDLE(file.as_raw_handle() as isize);
        let info = FILE_ALLOCATION_INFO {
            AllocationSize: new_len as i64,
        };
        let result = unsafe {
            SetFileInformationByHandle(
                handle,
                FileAllocationInfo,
                &info as *const _ as *const std::ffi::c_void,
                std::mem::size_of::<FILE_ALLOCATION_INFO>() as u32,
            )
        };
        if result.is_err() {
            file.set_len(new_len)?;
        }
        Ok(())
    }

    pub fn force_write(file: &File, _metadata: bool) -> std::io::Result<()> {
        file.sync_all()
    }

    pub fn sync_file_range(_file: &File, _start: u64, _len: u64) -> bool {
        // windows has no direct equivalent exposed here; caller falls back to force_write
        false
    }

    pub fn fadvise_dontneed(_file: &File, _offset: u64, _len: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FORMAT_V5;

    #[test]
    fn create_writes_header_and_preallocates() {
        let tmp = tempfile::tempdir().unwrap();
        let chan = JournalChannel::create(tmp.path(), 1, 4096, 8192, FORMAT_V5).unwrap();
        assert_eq!(chan.position(), HEADER_SIZE);
        let len = std::fs::metadata(chan.path()).unwrap().len();
        assert!(len >= 4096, "expected preallocation, got len={len}");
    }

    #[test]
    fn write_buffers_until_flush() {
        let tmp = tempfile::tempdir().unwrap();
        let mut chan = JournalChannel::create(tmp.path(), 1, 8192, 8192, FORMAT_V5).unwrap();
        chan.write(b"hello").unwrap();
        assert_eq!(chan.position(), HEADER_SIZE + 5);
        let on_disk_before = read_actual_bytes(&chan);
        // preallocated space is zero-filled until explicitly flushed
        assert_eq!(&on_disk_before[HEADER_SIZE as usize..HEADER_SIZE as usize + 5], &[0u8; 5]);
        chan.flush(false).unwrap();
        let on_disk_after = read_actual_bytes(&chan);
        assert_eq!(&on_disk_after[HEADER_SIZE as usize..HEADER_SIZE as usize + 5], b"hello");
    }

    #[test]
    fn write_larger_than_buffer_bypasses_buffer() {
        let tmp = tempfile::tempdir().unwrap();
        let mut chan = JournalChannel::create(tmp.path(), 1, 4096, 16, FORMAT_V5).unwrap();
        let payload = vec![0xABu8; 64];
        chan.write(&payload).unwrap();
        assert_eq!(chan.position(), HEADER_SIZE + 64);
    }

    #[test]
    fn pre_alloc_grows_in_steps() {
        let tmp = tempfile::tempdir().unwrap();
        let mut chan = JournalChannel::create(tmp.path(), 1, 1024, 8192, FORMAT_V5).unwrap();
        let initial_end = chan.prealloc_end;
        chan.pre_alloc_if_needed(10 * 1024).unwrap();
        assert!(chan.prealloc_end >= initial_end + 10 * 1024);
        assert_eq!((chan.prealloc_end - HEADER_SIZE) % 1024, 0);
    }

    #[test]
    fn close_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut chan = JournalChannel::create(tmp.path(), 1, 4096, 8192, FORMAT_V5).unwrap();
        chan.close(true).unwrap();
        chan.close(true).unwrap();
        assert!(chan.is_closed());
    }

    #[test]
    fn open_for_append_resumes_at_given_offset() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut chan = JournalChannel::create(tmp.path(), 2, 4096, 8192, FORMAT_V5).unwrap();
            chan.write(b"0123456789").unwrap();
            chan.flush(false).unwrap();
            chan.close(true).unwrap();
        }
        let resume_at = HEADER_SIZE + 10;
        let chan =
            JournalChannel::open_for_append(tmp.path(), 2, 4096, 8192, resume_at).unwrap();
        assert_eq!(chan.position(), resume_at);
        assert_eq!(chan.format_version(), FORMAT_V5);
    }

    fn read_actual_bytes(chan: &JournalChannel) -> Vec<u8> {
        std::fs::read(chan.path()).unwrap()
    }

    #[test]
    fn parse_journal_id_roundtrips() {
        assert_eq!(JournalChannel::parse_journal_id("ff.txn"), Some(0xff));
        assert_eq!(JournalChannel::parse_journal_id("not-a-journal"), None);
    }

    #[test]
    fn list_journal_ids_collects_and_sorts_across_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        JournalChannel::create(&a, 3, 16, 16, FORMAT_V5).unwrap();
        JournalChannel::create(&b, 1, 16, 16, FORMAT_V5).unwrap();
        JournalChannel::create(&b, 2, 16, 16, FORMAT_V5).unwrap();
        assert_eq!(JournalChannel::list_journal_ids(&[a, b]), vec![1, 2, 3]);
    }
}
