//! Layer 1: locate `kallsyms_token_index` candidates.
//!
//! `kallsyms_token_index` immediately follows `kallsyms_token_table`, a run of
//! null-terminated strings. Its first element is always 0, so the byte just before
//! the index and the two bytes of that first `u16` element are all null — three
//! consecutive zero bytes. There is no magic number here, only that structural
//! coincidence, the same kind of reasoning `vmsh::kernel::find_ksymtab_strings_section`
//! uses to locate `__ksymtab_strings` from printable/non-printable byte runs alone.

use crate::buffer::{read_u16_at, Endianness};

/// A candidate `kallsyms_token_index`: 256 strictly increasing `u16` offsets.
#[derive(Debug, Clone)]
pub struct TokenIndex {
    pub offset: usize,
    pub values: [u16; 256],
}

fn try_parse(rodata: &[u8], endian: Endianness, offset: usize) -> Option<[u16; 256]> {
    let mut values = [0u16; 256];
    values[0] = read_u16_at(rodata, offset, endian)?;
    if values[0] != 0 {
        return None;
    }
    for i in 1..256 {
        let v = read_u16_at(rodata, offset + i * 2, endian)?;
        if v <= values[i - 1] {
            return None;
        }
        values[i] = v;
    }
    Some(values)
}

/// Scans `rodata` for every structurally valid `kallsyms_token_index`, in
/// increasing offset order.
pub fn find_token_indices(rodata: &[u8], endian: Endianness) -> impl Iterator<Item = TokenIndex> + '_ {
    let mut search_from = 0usize;
    std::iter::from_fn(move || loop {
        if search_from + 3 > rodata.len() {
            return None;
        }
        let triple = (search_from..rodata.len() - 2)
            .find(|&i| rodata[i] == 0 && rodata[i + 1] == 0 && rodata[i + 2] == 0)?;
        let candidate_offset = triple + 1;
        search_from = candidate_offset;
        if candidate_offset + 512 > rodata.len() {
            return None;
        }
        if let Some(values) = try_parse(rodata, endian, candidate_offset) {
            log::debug!(
                "0x{candidate_offset:08x}: kallsyms_token_index (last={})",
                values[255]
            );
            return Some(TokenIndex {
                offset: candidate_offset,
                values,
            });
        }
    })
}
