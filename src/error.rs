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

//! Crate-wide error type
//!
//! A single closed enum rather than `anyhow`/`Box<dyn Error>`: every fallible path in the
//! journal falls into one of a handful of kinds, and callers (the writer loop, the
//! force-write loop, recovery) need to match on the kind to decide whether a failure is
//! fatal or tolerable.

use core::fmt;

pub type JournalResult<T> = Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// A file-system level failure: open, write, fsync, seek, pre-allocation.
    Io(std::io::Error),
    /// The on-disk representation didn't match what the reader expected: a bad header,
    /// a corrupted framed record, a padding record where none was expected, a missing
    /// marker file, or a missing journal at the head of the recovery range.
    Format(FormatError),
    /// The journal is shutting down; producers and the writer loop observe this instead
    /// of making further progress.
    ShutdownRequested,
    /// A blocking wait was interrupted before it could complete.
    Interrupted,
    /// A `JournalConfig` value failed validation.
    Config(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    BadHeaderMagic,
    UnsupportedFormatVersion(u32),
    CorruptedRecordLength(i32),
    UnexpectedPaddingRecord,
    TruncatedPadding,
    MissingLeadingJournal { expected_log_id: u64 },
    MissingMarkerFile,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "io error: {e}"),
            Error::Format(e) => write!(f, "format error: {e}"),
            Error::ShutdownRequested => write!(f, "shutdown requested"),
            Error::Interrupted => write!(f, "operation interrupted"),
            Error::Config(msg) => write!(f, "bad configuration: {msg}"),
        }
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::BadHeaderMagic => write!(f, "bad journal header magic"),
            FormatError::UnsupportedFormatVersion(v) => {
                write!(f, "unsupported journal format version {v}")
            }
            FormatError::CorruptedRecordLength(len) => {
                write!(f, "corrupted record length {len}")
            }
            FormatError::UnexpectedPaddingRecord => {
                write!(f, "encountered a padding record in a pre-V5 journal")
            }
            FormatError::TruncatedPadding => write!(f, "padding record truncated"),
            FormatError::MissingLeadingJournal { expected_log_id } => write!(
                f,
                "recovery range must start at journal {expected_log_id:x} but it is missing"
            ),
            FormatError::MissingMarkerFile => {
                write!(f, "no directory produced a readable marker file")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<FormatError> for Error {
    fn from(e: FormatError) -> Self {
        Error::Format(e)
    }
}

impl Error {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}
