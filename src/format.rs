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

//! Journal file header and framed-record wire format.
//!
//! Record: `len: i32 BE | payload[len]`. `len == 0` is logical EOF. `len == PADDING_MASK`
//! introduces a padding record (`pad_len: i32 BE | pad_len zero bytes`), which only exists
//! from format V5 onward.

use crate::error::FormatError;

pub const HEADER_MAGIC: [u8; 4] = *b"BKJ1";
/// magic(4) + format_version(4) = 8 bytes, fixed regardless of version.
pub const HEADER_SIZE: u64 = 8;

pub const FORMAT_V1: u32 = 1;
pub const FORMAT_V5: u32 = 5;

/// Marks a padding record instead of a real payload. Chosen, like the reference journal,
/// so it can never collide with a legitimate payload length (negative as an i32, distinct
/// from the `0` EOF marker).
pub const PADDING_MASK: i32 = 0xFFFFFF00u32 as i32;

/// First format version that may emit padding records.
pub const MIN_PADDING_VERSION: u32 = FORMAT_V5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalHeader {
    pub format_version: u32,
}

impl JournalHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&HEADER_MAGIC);
        buf[4..8].copy_from_slice(&self.format_version.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8; HEADER_SIZE as usize]) -> Result<Self, FormatError> {
        if buf[0..4] != HEADER_MAGIC {
            return Err(FormatError::BadHeaderMagic);
        }
        let format_version = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        if format_version == 0 || format_version > FORMAT_V5 {
            return Err(FormatError::UnsupportedFormatVersion(format_version));
        }
        Ok(Self { format_version })
    }

    pub fn supports_padding(&self) -> bool {
        self.format_version >= MIN_PADDING_VERSION
    }
}

/// Encode a real record: 4-byte big-endian length prefix followed by the payload.
pub fn encode_record(payload: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&(payload.len() as i32).to_be_bytes());
    out.extend_from_slice(payload);
}

/// Compute the padding needed so that, after an 8-byte padding record header plus
/// `pad_len` zero bytes, the file position lands on a multiple of `align`.
///
/// `position` is the current file offset. Returns `None` if no padding is needed
/// (already aligned). The 8-byte header width (4-byte `PADDING_MASK` + 4-byte `pad_len`)
/// is part of this function's contract, matching the on-disk framing.
pub fn compute_padding(position: u64, align: u32) -> Option<u32> {
    if align <= 1 {
        return None;
    }
    let align = align as u64;
    let residual = position % align;
    if residual == 0 {
        return None;
    }
    let pad_len = if align - residual >= 8 {
        align - residual - 8
    } else {
        2 * align - residual - 8
    };
    Some(pad_len as u32)
}

/// Encode a padding record for the given file position, or nothing if already aligned.
pub fn encode_padding(position: u64, align: u32, out: &mut Vec<u8>) -> u64 {
    match compute_padding(position, align) {
        None => 0,
        Some(pad_len) => {
            out.extend_from_slice(&PADDING_MASK.to_be_bytes());
            out.extend_from_slice(&pad_len.to_be_bytes());
            out.resize(out.len() + pad_len as usize, 0);
            8 + pad_len as u64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let h = JournalHeader { format_version: FORMAT_V5 };
        let encoded = h.encode();
        let decoded = JournalHeader::decode(&encoded).unwrap();
        assert_eq!(h, decoded);
        assert!(decoded.supports_padding());
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[4..8].copy_from_slice(&FORMAT_V1.to_be_bytes());
        assert_eq!(JournalHeader::decode(&buf), Err(FormatError::BadHeaderMagic));
    }

    #[test]
    fn header_rejects_future_version() {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&HEADER_MAGIC);
        buf[4..8].copy_from_slice(&99u32.to_be_bytes());
        assert_eq!(
            JournalHeader::decode(&buf),
            Err(FormatError::UnsupportedFormatVersion(99))
        );
    }

    #[test]
    fn v1_does_not_support_padding() {
        let h = JournalHeader { format_version: FORMAT_V1 };
        assert!(!h.supports_padding());
    }

    #[test]
    fn no_padding_when_already_aligned() {
        assert_eq!(compute_padding(512, 512), None);
        assert_eq!(compute_padding(0, 512), None);
        assert_eq!(compute_padding(1024, 512), None);
    }

    #[test]
    fn padding_when_enough_room_for_header() {
        // residual = 500, align - residual = 12 >= 8 -> pad_len = 12 - 8 = 4
        assert_eq!(compute_padding(500, 512), Some(4));
    }

    #[test]
    fn padding_wraps_when_no_room_for_header() {
        // residual = 508, align - residual = 4 < 8 -> pad_len = 2*512 - 508 - 8 = 516
        assert_eq!(compute_padding(508, 512), Some(516));
    }

    #[test]
    fn every_padded_position_lands_on_alignment_boundary() {
        let align = 512u32;
        for position in 0u64..(4 * align as u64) {
            let pad_len = compute_padding(position, align);
            let next = match pad_len {
                None => position,
                Some(p) => position + 8 + p as u64,
            };
            assert_eq!(next % align as u64, 0, "position={position} pad={pad_len:?}");
        }
    }

    #[test]
    fn encode_padding_writes_expected_bytes() {
        let mut out = Vec::new();
        let written = encode_padding(500, 512, &mut out);
        assert_eq!(written, 8 + 4);
        assert_eq!(out.len(), 12);
        assert_eq!(&out[0..4], &PADDING_MASK.to_be_bytes());
        assert_eq!(&out[4..8], &4u32.to_be_bytes());
        assert!(out[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn encode_padding_noop_when_aligned() {
        let mut out = Vec::new();
        let written = encode_padding(1024, 512, &mut out);
        assert_eq!(written, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn encode_record_prefixes_be_length() {
        let mut out = Vec::new();
        encode_record(b"hello", &mut out);
        assert_eq!(&out[0..4], &5i32.to_be_bytes());
        assert_eq!(&out[4..], b"hello");
    }
}
