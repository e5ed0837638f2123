//! Layer 4: recover `kallsyms_names` and `kallsyms_num_syms`.
//!
//! This is the one layer that cannot scan forward, because the entries are
//! variable-length and there is no index into them - only `markers_offset`
//! (the end of the region) is known going in. So we walk backward one byte
//! at a time and, at each candidate start `p`, ask "could a name entry begin
//! here, given that everything after it has already been validated?" A
//! `name_counts` table carries the answer (either "invalid" or "this many
//! entries follow"), indexed by distance from `markers_offset`, the same
//! bottom-up memoization style as a classic backward DP.

use crate::buffer::{read_u32_at, Endianness};

/// The kernel's `KSYM_NAME_LEN`: the maximum expanded symbol name length,
/// including the terminator the kernel itself would add.
const KSYM_NAME_LEN: usize = 512;

/// Offsets `kallsyms_num_syms` may be found at relative to the names start,
/// depending on how a particular kernel build aligned the struct.
const NUM_SYMS_PROBES: [usize; 4] = [4, 8, 12, 16];

fn is_name_ok(rodata: &[u8], token_lengths: &[usize], offset: usize) -> bool {
    let n_tokens = rodata[offset] as usize;
    if n_tokens == 0 || n_tokens >= KSYM_NAME_LEN {
        return false;
    }
    let mut name_length = 0usize;
    for k in 0..n_tokens {
        let token_id = rodata[offset + 1 + k] as usize;
        name_length += token_lengths[token_id];
        if name_length >= KSYM_NAME_LEN {
            return false;
        }
    }
    true
}

fn extract_name(rodata: &[u8], token_table: &[Vec<u8>], offset: usize) -> Vec<u8> {
    let n_tokens = rodata[offset] as usize;
    let mut name = Vec::new();
    for k in 0..n_tokens {
        let token_id = rodata[offset + 1 + k] as usize;
        name.extend_from_slice(&token_table[token_id]);
    }
    name
}

/// Locates `kallsyms_num_syms` and decodes the preceding `kallsyms_names`
/// region. Yields at most one reconstruction: `(num_syms_offset, names)`,
/// names in storage order with each entry already token-expanded.
pub fn find_num_syms(
    rodata: &[u8],
    endian: Endianness,
    token_table: &[Vec<u8>],
    markers_offset: usize,
) -> Option<(usize, Vec<Vec<u8>>)> {
    let token_lengths: Vec<usize> = token_table.iter().map(|t| t.len()).collect();
    let mut name_counts: Vec<Option<u32>> = vec![Some(0)];
    let mut trailing_zeroes = true;
    let mut offset = markers_offset;
    let mut found: Option<(usize, usize, u32)> = None;

    while offset >= 9 {
        offset -= 1;
        let current_byte = rodata[offset];
        if current_byte != 0 {
            trailing_zeroes = false;
        }
        let next_name_offset = offset + current_byte as usize + 1;
        if next_name_offset > markers_offset {
            name_counts.push(if trailing_zeroes { Some(0) } else { None });
            continue;
        }
        let next_name_count = match name_counts[markers_offset - next_name_offset] {
            Some(c) => c,
            None => {
                name_counts.push(None);
                continue;
            }
        };
        if !is_name_ok(rodata, &token_lengths, offset) {
            name_counts.push(if trailing_zeroes { Some(0) } else { None });
            continue;
        }
        let count = next_name_count + 1;
        name_counts.push(Some(count));

        let mut num_syms_offset = None;
        for delta in NUM_SYMS_PROBES {
            if offset < delta {
                break;
            }
            let probe = offset - delta;
            let num_syms = match read_u32_at(rodata, probe, endian) {
                Some(v) => v,
                None => break,
            };
            if count == num_syms {
                num_syms_offset = Some(probe);
                break;
            }
            if num_syms != 0 {
                // The count can't precede a nonzero-but-wrong field.
                break;
            }
        }
        if let Some(nso) = num_syms_offset {
            found = Some((offset, nso, count));
            break;
        }
    }

    let (names_start, num_syms_offset, count) = found?;
    let mut names = Vec::with_capacity(count as usize);
    let mut p = names_start;
    for _ in 0..count {
        names.push(extract_name(rodata, token_table, p));
        p += rodata[p] as usize + 1;
    }
    log::debug!(
        "0x{num_syms_offset:08x}: kallsyms_num_syms={count} (names start 0x{names_start:08x})"
    );
    Some((num_syms_offset, names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{build_names_region, init_logger};

    #[test]
    fn recovers_planted_names_and_num_syms() {
        init_logger();
        let tokens: Vec<Vec<u8>> = (0u8..=255).map(|i| vec![b'a' + (i % 26)]).collect();
        let names: Vec<Vec<u8>> = vec![vec![0u8], vec![1u8], vec![2u8]]
            .into_iter()
            .map(|ids| ids.iter().map(|&id| tokens[id as usize][0]).collect())
            .collect();
        let name_entries: Vec<Vec<u8>> = vec![vec![0u8], vec![1u8], vec![2u8]];
        let (buf, num_syms_offset, markers_offset) =
            build_names_region(&name_entries, Endianness::Little, 4);
        let found = find_num_syms(&buf, Endianness::Little, &tokens, markers_offset)
            .expect("names region must be found");
        assert_eq!(found.0, num_syms_offset);
        assert_eq!(found.1, names);
    }

    #[test]
    fn rejects_oversized_name_entry() {
        let tokens: Vec<Vec<u8>> = vec![vec![b'x'; 511]];
        let markers_offset = 64;
        let mut buf = vec![0u8; 128];
        buf[16] = 1; // n_tokens = 1
        buf[17] = 0; // token id 0 -> 511 bytes, right at the boundary (ok)
        assert!(is_name_ok(&buf, &[511], 16));
        let mut buf2 = vec![0u8; 128];
        buf2[16] = 1;
        buf2[17] = 0;
        let token_lengths = [512usize];
        assert!(!is_name_ok(&buf2, &token_lengths, 16));
        let _ = markers_offset;
    }
}
