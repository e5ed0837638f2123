//! Layer 2: locate `kallsyms_token_table`, the run of 256 null-terminated
//! byte strings that `kallsyms_token_index` (layer 1) indexes into.
//!
//! The table has no header of its own. What anchors it is the *last* token
//! index entry: it gives the byte offset of the last token relative to the
//! table's start, so walking backward from the token index to the nearest
//! preceding null gives us the last token, and subtracting `token_index[255]`
//! gives the table's origin unambiguously.

use crate::buffer::Endianness;
use crate::token_index::TokenIndex;

/// A candidate `kallsyms_token_table`: 256 distinct, null-stripped byte
/// strings, in token-id order.
#[derive(Debug, Clone)]
pub struct TokenTable {
    pub offset: usize,
    pub tokens: Vec<Vec<u8>>,
}

fn token_table_end(rodata: &[u8], token_index_offset: usize) -> Option<usize> {
    let mut end = token_index_offset;
    while end >= 2 && rodata[end - 2] == 0 {
        end -= 1;
    }
    Some(end)
}

fn last_token_offset(rodata: &[u8], before: usize) -> Option<usize> {
    // before == token_table_end - 1: the position of the table's final
    // null terminator. Search strictly before it for the preceding null.
    if before == 0 {
        return None;
    }
    (0..before).rev().find(|&i| rodata[i] == 0).map(|i| i + 1)
}

fn try_parse_token_table(
    rodata: &[u8],
    token_index: &TokenIndex,
    start_offset: usize,
    end_offset: usize,
) -> Option<Vec<Vec<u8>>> {
    let mut tokens: Vec<Vec<u8>> = Vec::with_capacity(256);
    for i in 0..256 {
        let token_start = start_offset.checked_add(token_index.values[i] as usize)?;
        let token_end = if i == 255 {
            end_offset
        } else {
            start_offset.checked_add(token_index.values[i + 1] as usize)?
        };
        if token_start >= token_end || token_end > rodata.len() {
            return None;
        }
        let token = &rodata[token_start..token_end];
        let (body, last) = token.split_at(token.len() - 1);
        if last != [0] || body.contains(&0) {
            return None;
        }
        if tokens.iter().any(|t: &Vec<u8>| t.as_slice() == body) {
            return None;
        }
        tokens.push(body.to_vec());
    }
    Some(tokens)
}

/// Given a `kallsyms_token_index` candidate, yields every structurally valid
/// `kallsyms_token_table` that immediately precedes it.
pub fn find_token_tables(rodata: &[u8], token_index: &TokenIndex) -> Option<TokenTable> {
    let end = token_table_end(rodata, token_index.offset)?;
    if end == 0 {
        return None;
    }
    let last_start = last_token_offset(rodata, end - 1)?;
    let offset = last_start.checked_sub(token_index.values[255] as usize)?;
    let tokens = try_parse_token_table(rodata, token_index, offset, end)?;
    log::debug!("0x{offset:08x}: kallsyms_token_table ({} tokens)", tokens.len());
    Some(TokenTable { offset, tokens })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{build_token_tables, init_logger};

    #[test]
    fn recovers_planted_token_table() {
        init_logger();
        let (buf, token_index_offset, token_table_offset, tokens) =
            build_token_tables(Endianness::Little);
        let token_index = crate::token_index::find_token_indices(&buf, Endianness::Little)
            .find(|c| c.offset == token_index_offset)
            .expect("token index must be found first");
        let found = find_token_tables(&buf, &token_index).expect("token table must be found");
        assert_eq!(found.offset, token_table_offset);
        assert_eq!(found.tokens, tokens);
    }

    #[test]
    fn rejects_duplicate_tokens() {
        let (mut buf, token_index_offset, token_table_offset, _tokens) =
            build_token_tables(Endianness::Little);
        // Overwrite token 1 so it duplicates token 0's bytes.
        let t0_len = {
            let start = token_table_offset;
            buf[start..].iter().position(|&b| b == 0).unwrap()
        };
        let t1_start = token_table_offset + t0_len + 1;
        for k in 0..t0_len {
            buf[t1_start + k] = buf[token_table_offset + k];
        }
        buf[t1_start + t0_len] = 0;
        let token_index = crate::token_index::find_token_indices(&buf, Endianness::Little)
            .find(|c| c.offset == token_index_offset);
        if let Some(token_index) = token_index {
            assert!(find_token_tables(&buf, &token_index).is_none());
        }
    }
}
