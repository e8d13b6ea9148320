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

//! Crash-recovery replay, and the separate best-effort repair/salvage scan.

use {
    crate::{
        channel::JournalChannel,
        error::{Error, FormatError, JournalResult},
        format::{JournalHeader, HEADER_SIZE, PADDING_MASK},
        mark::LogMark,
    },
    std::{
        fs::File,
        io::{Read, Seek, SeekFrom},
        path::{Path, PathBuf},
    },
};

/// A single record handed to the caller's scanner during replay.
pub struct ScannedRecord<'a> {
    pub format_version: u32,
    pub log_id: u64,
    /// File offset the record's payload starts at.
    pub offset: u64,
    pub payload: &'a [u8],
}

/// Replay every record from `mark` (exclusive of already-durable bytes) through the most
/// recent journal, calling `on_record` for each one in order. Returns the offset replay
/// stopped at in the final journal scanned, suitable for re-deriving `LastLogMark`.
pub fn replay_journal(
    dirs: &[PathBuf],
    mark: LogMark,
    mut on_record: impl FnMut(ScannedRecord<'_>) -> JournalResult<()>,
) -> JournalResult<LogMark> {
    let ids = JournalChannel::list_journal_ids(dirs);
    let ids: Vec<u64> = ids.into_iter().filter(|&id| id >= mark.log_id).collect();

    if mark.log_id > 0 {
        match ids.first() {
            Some(&first) if first == mark.log_id => {}
            _ => {
                return Err(Error::Format(FormatError::MissingLeadingJournal {
                    expected_log_id: mark.log_id,
                }))
            }
        }
    }

    let mut last_mark = mark;
    for id in ids {
        let path = find_journal(dirs, id).expect("id came from list_journal_ids over these dirs");
        let start_offset = if id == mark.log_id { mark.offset.max(0) as u64 } else { 0 };
        let end_offset = scan_file(&path, id, start_offset, &mut on_record)?;
        last_mark = LogMark::new(id, end_offset as i64);
    }
    Ok(last_mark)
}

/// Outcome of a repair/salvage scan: purely diagnostic, never mutates the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairResult {
    NoErrors,
    /// The scan stopped early at a corrupted or truncated record; this many bytes after
    /// the last valid record were not recovered.
    UnspecifiedLoss(u64),
}

/// Best-effort scan used by operator tooling: unlike [`replay_journal`], a corrupted or
/// truncated record is reported rather than propagated as an error.
pub fn repair_journal(
    dirs: &[PathBuf],
    log_id: u64,
    mut on_record: impl FnMut(ScannedRecord<'_>) -> JournalResult<()>,
) -> JournalResult<RepairResult> {
    let path = find_journal(dirs, log_id)
        .ok_or(Error::Format(FormatError::MissingLeadingJournal { expected_log_id: log_id }))?;
    let file_len = std::fs::metadata(&path)?.len();
    let recovered = scan_file_tolerant(&path, log_id, &mut on_record);
    let lost = file_len.saturating_sub(recovered);
    if lost == 0 {
        Ok(RepairResult::NoErrors)
    } else {
        Ok(RepairResult::UnspecifiedLoss(lost))
    }
}

fn find_journal(dirs: &[PathBuf], id: u64) -> Option<PathBuf> {
    let name = JournalChannel::journal_file_name(id);
    dirs.iter().map(|d| d.join(&name)).find(|p| p.exists())
}

/// Scan one file from `start_offset`, stopping at the first of: a truncated length read,
/// `len == 0` (EOF), an unexpected padding record on a pre-V5 file, or a truncated payload.
/// Returns the final valid offset.
fn scan_file(
    path: &Path,
    log_id: u64,
    start_offset: u64,
    on_record: &mut impl FnMut(ScannedRecord<'_>) -> JournalResult<()>,
) -> JournalResult<u64> {
    let mut file = File::open(path)?;
    let mut header_buf = [0u8; HEADER_SIZE as usize];
    file.read_exact(&mut header_buf)?;
    let header = JournalHeader::decode(&header_buf)?;

    let mut offset = start_offset.max(HEADER_SIZE);
    file.seek(SeekFrom::Start(offset))?;

    loop {
        let mut len_buf = [0u8; 4];
        match file.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(_) => break, // truncated length read: stop, this is the valid end
        };
        let len = i32::from_be_bytes(len_buf);

        if len == 0 {
            break; // logical EOF
        }

        if len == PADDING_MASK {
            if !header.supports_padding() {
                return Err(Error::Format(FormatError::UnexpectedPaddingRecord));
            }
            let mut pad_len_buf = [0u8; 4];
            if file.read_exact(&mut pad_len_buf).is_err() {
                return Err(Error::Format(FormatError::TruncatedPadding));
            }
            let pad_len = u32::from_be_bytes(pad_len_buf) as u64;
            file.seek(SeekFrom::Current(pad_len as i64))?;
            offset += 8 + pad_len;
            continue;
        }

        if len < 0 {
            return Err(Error::Format(FormatError::CorruptedRecordLength(len)));
        }

        let mut payload = vec![0u8; len as usize];
        if file.read_exact(&mut payload).is_err() {
            break; // truncated payload: stop, this is the valid end
        }
        let payload_offset = offset + 4;
        on_record(ScannedRecord {
            format_version: header.format_version,
            log_id,
            offset: payload_offset,
            payload: &payload,
        })?;
        offset += 4 + len as u64;
    }
    Ok(offset)
}

/// Like [`scan_file`] but swallows format errors and returns the offset reached instead of
/// propagating. Used only by [`repair_journal`] to report loss without aborting.
fn scan_file_tolerant(
    path: &Path,
    log_id: u64,
    on_record: &mut impl FnMut(ScannedRecord<'_>) -> JournalResult<()>,
) -> u64 {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return 0,
    };
    let mut header_buf = [0u8; HEADER_SIZE as usize];
    if file.read_exact(&mut header_buf).is_err() {
        return 0;
    }
    let header = match JournalHeader::decode(&header_buf) {
        Ok(h) => h,
        Err(_) => return 0,
    };

    let mut offset = HEADER_SIZE;
    loop {
        let mut len_buf = [0u8; 4];
        if file.read_exact(&mut len_buf).is_err() {
            break;
        }
        let len = i32::from_be_bytes(len_buf);
        if len == 0 {
            break;
        }
        if len == PADDING_MASK {
            if !header.supports_padding() {
                break;
            }
            let mut pad_len_buf = [0u8; 4];
            if file.read_exact(&mut pad_len_buf).is_err() {
                break;
            }
            let pad_len = u32::from_be_bytes(pad_len_buf) as u64;
            if file.seek(SeekFrom::Current(pad_len as i64)).is_err() {
                break;
            }
            offset += 8 + pad_len;
            continue;
        }
        if len < 0 {
            break;
        }
        let mut payload = vec![0u8; len as usize];
        if file.read_exact(&mut payload).is_err() {
            break;
        }
        let _ = on_record(ScannedRecord {
            format_version: header.format_version,
            log_id,
            offset: offset + 4,
            payload: &payload,
        });
        offset += 4 + len as u64;
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{encode_record, FORMAT_V1, FORMAT_V5};

    fn write_raw_journal(dir: &Path, id: u64, format_version: u32, records: &[&[u8]]) {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(JournalChannel::journal_file_name(id));
        let mut out = JournalHeader { format_version }.encode().to_vec();
        for r in records {
            encode_record(r, &mut out);
        }
        std::fs::write(path, out).unwrap();
    }

    #[test]
    fn replay_yields_records_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        write_raw_journal(tmp.path(), 1, FORMAT_V5, &[b"a", b"bb", b"ccc"]);
        let mut seen = Vec::new();
        let dirs = vec![tmp.path().to_path_buf()];
        replay_journal(&dirs, LogMark::MIN, |rec| {
            seen.push(rec.payload.to_vec());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()]);
    }

    #[test]
    fn replay_resumes_from_mark_offset() {
        let tmp = tempfile::tempdir().unwrap();
        write_raw_journal(tmp.path(), 1, FORMAT_V5, &[b"a", b"bb", b"ccc"]);
        let dirs = vec![tmp.path().to_path_buf()];
        // first record ends at HEADER_SIZE + 4 + 1
        let resume_at = HEADER_SIZE + 5;
        let mut seen = Vec::new();
        replay_journal(&dirs, LogMark::new(1, resume_at as i64), |rec| {
            seen.push(rec.payload.to_vec());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![b"bb".to_vec(), b"ccc".to_vec()]);
    }

    #[test]
    fn replay_fails_when_leading_journal_missing() {
        let tmp = tempfile::tempdir().unwrap();
        write_raw_journal(tmp.path(), 5, FORMAT_V5, &[b"x"]);
        let dirs = vec![tmp.path().to_path_buf()];
        let result = replay_journal(&dirs, LogMark::new(3, 0), |_| Ok(()));
        assert!(matches!(
            result,
            Err(Error::Format(FormatError::MissingLeadingJournal { expected_log_id: 3 }))
        ));
    }

    #[test]
    fn replay_stops_silently_at_truncated_tail() {
        let tmp = tempfile::tempdir().unwrap();
        let path_dir = tmp.path();
        std::fs::create_dir_all(path_dir).unwrap();
        let path = path_dir.join(JournalChannel::journal_file_name(1));
        let mut out = JournalHeader { format_version: FORMAT_V5 }.encode().to_vec();
        encode_record(b"whole", &mut out);
        out.extend_from_slice(&10i32.to_be_bytes());
        out.extend_from_slice(b"short"); // declares 10 bytes, only 5 present
        std::fs::write(&path, out).unwrap();

        let mut seen = Vec::new();
        let dirs = vec![path_dir.to_path_buf()];
        let result = replay_journal(&dirs, LogMark::MIN, |rec| {
            seen.push(rec.payload.to_vec());
            Ok(())
        });
        assert!(result.is_ok());
        assert_eq!(seen, vec![b"whole".to_vec()]);
    }

    #[test]
    fn replay_errors_on_padding_in_pre_v5_journal() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(JournalChannel::journal_file_name(1));
        std::fs::create_dir_all(tmp.path()).unwrap();
        let mut out = JournalHeader { format_version: FORMAT_V1 }.encode().to_vec();
        out.extend_from_slice(&PADDING_MASK.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        std::fs::write(&path, out).unwrap();

        let dirs = vec![tmp.path().to_path_buf()];
        let result = replay_journal(&dirs, LogMark::MIN, |_| Ok(()));
        assert!(matches!(
            result,
            Err(Error::Format(FormatError::UnexpectedPaddingRecord))
        ));
    }

    #[test]
    fn repair_reports_loss_on_corrupted_record() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(JournalChannel::journal_file_name(1));
        std::fs::create_dir_all(tmp.path()).unwrap();
        let mut out = JournalHeader { format_version: FORMAT_V5 }.encode().to_vec();
        encode_record(b"good", &mut out);
        out.extend_from_slice(&(-5i32).to_be_bytes()); // negative, non-padding length: corrupt
        std::fs::write(&path, out).unwrap();

        let dirs = vec![tmp.path().to_path_buf()];
        let mut seen = Vec::new();
        let result = repair_journal(&dirs, 1, |rec| {
            seen.push(rec.payload.to_vec());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![b"good".to_vec()]);
        assert!(matches!(result, RepairResult::UnspecifiedLoss(n) if n > 0));
    }

    #[test]
    fn repair_reports_no_errors_on_clean_file() {
        let tmp = tempfile::tempdir().unwrap();
        write_raw_journal(tmp.path(), 1, FORMAT_V5, &[b"a"]);
        let dirs = vec![tmp.path().to_path_buf()];
        let result = repair_journal(&dirs, 1, |_| Ok(())).unwrap();
        assert_eq!(result, RepairResult::NoErrors);
    }
}
