//! Shared fixture builders for the `#[cfg(test)]` modules throughout this
//! crate. Each builder hand-assembles the minimal byte layout a given layer
//! (or the whole pipeline) needs, mirroring how `vmsh`'s own tests build
//! small structures by hand (see `src/guest_mem.rs`, `src/page_table.rs`)
//! rather than reaching for a property-testing or mocking crate.

use crate::buffer::{align_up, Endianness, Word};
use crate::search::{addresses_first_absolute_offset, addresses_first_base_relative_offset};

/// Registers `env_logger` as the `log` facade's backend for the current test
/// binary, the same way `examples/test_ioctls.rs`'s `main()` does for the
/// integration tests, so `cargo test -- --nocapture` actually surfaces the
/// `debug!`/`trace!` lines each finder emits instead of discarding them for
/// want of a registered logger. `try_init` tolerates being called from every
/// test in the binary, not just the first.
pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("trace"))
        .is_test(true)
        .try_init();
}

fn write_u16(buf: &mut Vec<u8>, offset: usize, value: u16, endian: Endianness) {
    ensure_len(buf, offset + 2);
    let bytes = match endian {
        Endianness::Little => value.to_le_bytes(),
        Endianness::Big => value.to_be_bytes(),
    };
    buf[offset..offset + 2].copy_from_slice(&bytes);
}

fn write_u32(buf: &mut Vec<u8>, offset: usize, value: u32, endian: Endianness) {
    ensure_len(buf, offset + 4);
    let bytes = match endian {
        Endianness::Little => value.to_le_bytes(),
        Endianness::Big => value.to_be_bytes(),
    };
    buf[offset..offset + 4].copy_from_slice(&bytes);
}

fn write_i32(buf: &mut Vec<u8>, offset: usize, value: i32, endian: Endianness) {
    write_u32(buf, offset, value as u32, endian);
}

fn write_uword(buf: &mut Vec<u8>, offset: usize, size: usize, value: u64, endian: Endianness) {
    ensure_len(buf, offset + size);
    match size {
        4 => write_u32(buf, offset, value as u32, endian),
        8 => {
            let bytes = match endian {
                Endianness::Little => value.to_le_bytes(),
                Endianness::Big => value.to_be_bytes(),
            };
            buf[offset..offset + 8].copy_from_slice(&bytes);
        }
        _ => unreachable!("marker/word size is always 4 or 8"),
    }
}

fn ensure_len(buf: &mut Vec<u8>, len: usize) {
    if buf.len() < len {
        buf.resize(len, 0);
    }
}

/// Builds a buffer containing a single planted `kallsyms_token_table` +
/// `kallsyms_token_index` pair: 256 distinct, three-digit-decimal tokens.
/// Returns `(buffer, token_index_offset, token_table_offset, tokens)`.
pub fn build_token_tables(endian: Endianness) -> (Vec<u8>, usize, usize, Vec<Vec<u8>>) {
    let token_table_offset = 8usize;
    let tokens: Vec<Vec<u8>> = (0..256u32).map(|i| format!("{i:03}").into_bytes()).collect();

    let mut buf = vec![0u8; token_table_offset];
    let mut index = [0u16; 256];
    let mut pos = 0u16;
    for (i, t) in tokens.iter().enumerate() {
        index[i] = pos;
        buf.extend_from_slice(t);
        buf.push(0);
        pos += t.len() as u16 + 1;
    }
    let token_index_offset = buf.len();
    for v in index.iter() {
        let bytes = match endian {
            Endianness::Little => v.to_le_bytes(),
            Endianness::Big => v.to_be_bytes(),
        };
        buf.extend_from_slice(&bytes);
    }
    while buf.len() < 1024 {
        buf.push(0);
    }
    (buf, token_index_offset, token_table_offset, tokens)
}

/// Builds a buffer containing just a `kallsyms_names` + `kallsyms_num_syms`
/// region (no markers/tokens/addresses). `entries` are token-id lists (one
/// per name). Returns `(buffer, num_syms_offset, markers_offset)`.
pub fn build_names_region(
    entries: &[Vec<u8>],
    endian: Endianness,
    probe_delta: usize,
) -> (Vec<u8>, usize, usize) {
    let names_start = 64usize;
    let mut buf = vec![0u8; names_start + 256];
    let mut pos = names_start;
    for e in entries {
        buf[pos] = e.len() as u8;
        for (k, &id) in e.iter().enumerate() {
            buf[pos + 1 + k] = id;
        }
        pos += 1 + e.len();
    }
    let markers_offset = pos;
    let num_syms_offset = names_start - probe_delta;
    write_u32(&mut buf, num_syms_offset, entries.len() as u32, endian);
    (buf, num_syms_offset, markers_offset)
}

/// The configuration axes that change the on-disk layout; pairs with
/// [`build_full_image`] to produce a buffer [`crate::search::recover`]
/// should reconstruct exactly.
pub struct ImageConfig {
    pub endian: Endianness,
    pub word: Word,
    pub base_relative: bool,
    pub addresses_first: bool,
}

/// Assembles a complete, self-consistent kallsyms image: token table/index,
/// names/num_syms, markers, and an address array laid out exactly the way
/// [`crate::search::recover`] expects to find it for the given `cfg`.
///
/// `names` and `addresses` must be the same length and already sorted by
/// address (as the kernel itself stores them).
pub fn build_full_image(cfg: &ImageConfig, names: &[Vec<u8>], addresses: &[u64]) -> Vec<u8> {
    assert_eq!(names.len(), addresses.len());
    let n = names.len();

    // Token table: token i is names[i] itself (so each name is a single-
    // token entry); pad out to 256 distinct filler tokens.
    let mut tokens: Vec<Vec<u8>> = names.to_vec();
    let mut filler = 0u32;
    while tokens.len() < 256 {
        let candidate = format!("_f{filler}").into_bytes();
        filler += 1;
        if !tokens.contains(&candidate) {
            tokens.push(candidate);
        }
    }

    const BASE: usize = 4096;
    let names_start = BASE;
    let num_syms_offset = names_start - 4;

    let mut names_bytes = Vec::new();
    for i in 0..n {
        names_bytes.push(1u8);
        names_bytes.push(i as u8);
    }
    let markers_offset = names_start + names_bytes.len();

    let marker_size = 8usize;
    let markers_values = [0u64, n as u64];
    let token_table_offset = markers_offset + marker_size * markers_values.len();

    let mut token_table_bytes = Vec::new();
    let mut token_index_values = [0u16; 256];
    let mut pos = 0u16;
    for (i, t) in tokens.iter().enumerate() {
        token_index_values[i] = pos;
        token_table_bytes.extend_from_slice(t);
        token_table_bytes.push(0);
        pos += t.len() as u16 + 1;
    }
    let token_index_offset = token_table_offset + token_table_bytes.len();
    let tail_start = token_index_offset + 512;

    let mut buf = vec![0u8; tail_start + 4096];

    for (i, &b) in names_bytes.iter().enumerate() {
        buf[names_start + i] = b;
    }
    write_u32(&mut buf, num_syms_offset, n as u32, cfg.endian);
    for (i, &v) in markers_values.iter().enumerate() {
        write_uword(&mut buf, markers_offset + i * marker_size, marker_size, v, cfg.endian);
    }
    buf[token_table_offset..token_table_offset + token_table_bytes.len()]
        .copy_from_slice(&token_table_bytes);
    for (i, &v) in token_index_values.iter().enumerate() {
        write_u16(&mut buf, token_index_offset + i * 2, v, cfg.endian);
    }

    // Every configuration the driver tries before `cfg`, in its actual
    // enumeration order, reads some computed offset even when nothing real
    // was planted there; left as zero bytes that region trivially decodes
    // as a flat, non-decreasing (and therefore spuriously "valid") address
    // array of the right length. Poison each earlier offset with a clearly
    // decreasing two-element pattern so those candidates get rejected and
    // the search actually reaches `cfg`.
    let enumeration_order = {
        let mut v = Vec::new();
        for &w in &[Word::W64, Word::W32] {
            for &br in &[false, true] {
                for &af in &[true, false] {
                    v.push((w, br, af));
                }
            }
        }
        v
    };
    for &(w, br, af) in &enumeration_order {
        if (w, br, af) == (cfg.word, cfg.base_relative, cfg.addresses_first) {
            break;
        }
        let decoy_offset: Option<(usize, usize)> = if !br {
            let raw = if af {
                addresses_first_absolute_offset(num_syms_offset, n, w)
            } else {
                Some((token_index_offset + 512) as i64)
            };
            raw.filter(|&v| v >= 0).map(|v| {
                let raw = v as usize;
                let effective = if w.size() == 8 && raw % 8 != 0 {
                    raw - 4
                } else {
                    raw
                };
                (effective, w.size())
            })
        } else {
            let raw: i64 = if af {
                addresses_first_base_relative_offset(num_syms_offset, n, w)
            } else {
                align_up(token_index_offset + 512, w.size()) as i64
            };
            Some(raw).filter(|&v| v >= 0).map(|v| (v as usize, 4usize))
        };
        if let Some((offset, elem_size)) = decoy_offset {
            let write_end = offset + 2 * elem_size;
            // Never let a decoy write clobber the real, contiguous
            // names/markers/token-table/token-index block.
            let overlaps_real_structures = offset < tail_start && write_end > names_start;
            if write_end <= buf.len() && !overlaps_real_structures {
                if br {
                    // Both non-negative, so both the non-percpu and percpu
                    // decodings see addr[0] > addr[1] independent of
                    // whatever `kallsyms_relative_base` garbage follows.
                    write_i32(&mut buf, offset, 1, cfg.endian);
                    write_i32(&mut buf, offset + elem_size, 0, cfg.endian);
                } else {
                    write_uword(&mut buf, offset, elem_size, u64::MAX, cfg.endian);
                    write_uword(&mut buf, offset + elem_size, elem_size, 0, cfg.endian);
                }
            }
        }
    }

    match (cfg.base_relative, cfg.addresses_first) {
        (false, true) => {
            let raw_offset = addresses_first_absolute_offset(num_syms_offset, n, cfg.word)
                .expect("addresses-first absolute offset must exist for a planted image");
            let effective_offset = if cfg.word.size() == 8 && raw_offset % 8 != 0 {
                raw_offset - 4
            } else {
                raw_offset
            };
            let effective_offset = effective_offset as usize;
            for (i, &addr) in addresses.iter().enumerate() {
                write_uword(
                    &mut buf,
                    effective_offset + i * cfg.word.size(),
                    cfg.word.size(),
                    addr,
                    cfg.endian,
                );
            }
        }
        (false, false) => {
            let addr_offset = token_index_offset + 512;
            let effective_offset = if cfg.word.size() == 8 && addr_offset % 8 != 0 {
                addr_offset - 4
            } else {
                addr_offset
            };
            for (i, &addr) in addresses.iter().enumerate() {
                write_uword(
                    &mut buf,
                    effective_offset + i * cfg.word.size(),
                    cfg.word.size(),
                    addr,
                    cfg.endian,
                );
            }
        }
        (true, true) => {
            let addr_offset = addresses_first_base_relative_offset(num_syms_offset, n, cfg.word);
            assert!(addr_offset >= 0, "base-relative offset went negative; grow BASE");
            write_base_relative(&mut buf, addr_offset as usize, addresses, cfg.word, cfg.endian);
        }
        (true, false) => {
            let addr_offset = align_up(token_index_offset + 512, cfg.word.size());
            write_base_relative(&mut buf, addr_offset, addresses, cfg.word, cfg.endian);
        }
    }

    buf
}

/// Writes `addresses` as a base-relative (non-percpu) array: `num_syms`
/// signed 32-bit offsets from `addresses[0]`, followed by the relative
/// base word itself.
fn write_base_relative(buf: &mut Vec<u8>, offset: usize, addresses: &[u64], word: Word, endian: Endianness) {
    let relative_base = addresses[0];
    for (i, &addr) in addresses.iter().enumerate() {
        let raw = addr.wrapping_sub(relative_base) as u32 as i32;
        write_i32(buf, offset + i * 4, raw, endian);
    }
    let relative_base_offset = align_up(offset + addresses.len() * 4, word.size());
    write_uword(buf, relative_base_offset, word.size(), relative_base, endian);
}
