//! Layer 3: locate `kallsyms_markers`, a strictly increasing array of
//! name-block offsets ending (at its first element) at 0.
//!
//! Like the token index, markers have no length prefix. We only know where
//! the array *ends* (from the token-table offset, swept backward by the
//! caller to skip over `kallsyms_seqs_of_names` on kernels that have it), so
//! this scans backward from a candidate end and validates strict monotonicity
//! as it goes, the same backward-anchored style as `TokenTableFinder`.

use crate::buffer::{read_uword_at, Endianness};

#[derive(Debug, Clone)]
pub struct Markers {
    pub offset: usize,
    pub values: Vec<u64>,
}

/// Scans backward from `end_offset - marker_size`, one `marker_size`-byte
/// element at a time, looking for the leading zero that starts the array.
fn find_markers(
    rodata: &[u8],
    marker_size: usize,
    endian: Endianness,
    start_offset: usize,
) -> Option<Markers> {
    let mut offset = start_offset;
    let mut first = true;
    let mut values = Vec::new();
    loop {
        let marker = read_uword_at(rodata, offset, marker_size, endian)?;
        if first {
            first = false;
            if marker == 0 && marker_size == 4 {
                // Upper half of a padded 64-bit final element; skip it.
                offset = offset.checked_sub(marker_size)?;
                continue;
            }
        } else if let Some(&last) = values.last() {
            if marker >= last {
                return None;
            }
        }
        values.push(marker);
        if marker == 0 {
            break;
        }
        offset = offset.checked_sub(marker_size)?;
    }
    if marker_size == 4 && values.len() == 2 {
        // The apparent leading zero was padding above a single 8-byte marker.
        return None;
    }
    values.reverse();
    log::debug!("0x{offset:08x}: kallsyms_markers ({} entries)", values.len());
    Some(Markers { offset, values })
}

/// Given a candidate end offset for the markers array (the caller sweeps
/// this downward in 4-byte steps to account for `kallsyms_seqs_of_names`),
/// attempts both marker widths and yields any that validate.
pub fn find_markers_candidate(
    rodata: &[u8],
    markers_end_offset: usize,
    marker_size: usize,
    endian: Endianness,
) -> Option<Markers> {
    let start_offset = markers_end_offset.checked_sub(marker_size)?;
    find_markers(rodata, marker_size, endian, start_offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::init_logger;

    fn write_u32_le(buf: &mut [u8], off: usize, v: u32) {
        buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    #[test]
    fn finds_planted_markers_4byte() {
        init_logger();
        let mut buf = vec![0u8; 256];
        let values = [0u32, 4, 10, 20];
        let start = 64;
        for (i, v) in values.iter().enumerate() {
            write_u32_le(&mut buf, start + i * 4, *v);
        }
        let end = start + values.len() * 4;
        let found = find_markers_candidate(&buf, end, 4, Endianness::Little).unwrap();
        assert_eq!(found.offset, start);
        assert_eq!(found.values, vec![0, 4, 10, 20]);
    }

    #[test]
    fn rejects_non_monotonic() {
        let mut buf = vec![0u8; 256];
        let values = [0u32, 4, 3, 20];
        let start = 64;
        for (i, v) in values.iter().enumerate() {
            write_u32_le(&mut buf, start + i * 4, *v);
        }
        let end = start + values.len() * 4;
        assert!(find_markers_candidate(&buf, end, 4, Endianness::Little).is_none());
    }

    #[test]
    fn single_8byte_marker_is_not_degenerate() {
        // A real array of one 8-byte marker (value 0), read with marker_size=4:
        // the first (high) half is zero padding, the second (low) half is the
        // genuine leading zero. Only one element is ever recorded, so this must
        // not hit the len()==2 degenerate-reject rule.
        init_logger();
        let mut buf = vec![0u8; 256];
        let start = 64;
        write_u32_le(&mut buf, start, 0); // low half = 0
        write_u32_le(&mut buf, start + 4, 0); // high half = 0 (padding)
        let end = start + 8;
        let found = find_markers_candidate(&buf, end, 4, Endianness::Little).unwrap();
        assert_eq!(found.values, vec![0]);
    }

    #[test]
    fn rejects_degenerate_two_element_8byte_marker_array() {
        // Two real 8-byte markers [0, X] misread as 4-byte elements produce
        // exactly two entries [X, 0] during the backward scan - the signature
        // of an 8-byte array misinterpreted as 4-byte, which must be rejected.
        let mut buf = vec![0u8; 256];
        let start = 64;
        // First 8-byte marker: value 0 (low=0, high=0).
        write_u32_le(&mut buf, start, 0);
        write_u32_le(&mut buf, start + 4, 0);
        // Second 8-byte marker: value X (low=X, high=0), X small and nonzero.
        write_u32_le(&mut buf, start + 8, 7);
        write_u32_le(&mut buf, start + 12, 0);
        let end = start + 16;
        assert!(find_markers_candidate(&buf, end, 4, Endianness::Little).is_none());
    }
}
