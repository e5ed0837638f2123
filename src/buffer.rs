//! Endianness/word-size polymorphism and bounds-checked primitive reads.
//!
//! Every finder in this crate reads multi-byte integers out of attacker-controlled
//! offsets into an opaque buffer. Centralizing the reads here means every call site
//! gets the same "reject instead of panic" behavior for free, mirroring `vmsh`'s own
//! posture of chaining `checked_add`/`Option` around offsets derived from untrusted
//! input rather than indexing and risking a panic.

/// Byte order of the multi-byte integers packed into the kallsyms tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// Native integer width used for addresses and (optionally) markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Word {
    W32,
    W64,
}

impl Word {
    pub fn size(self) -> usize {
        match self {
            Word::W32 => 4,
            Word::W64 => 8,
        }
    }

    pub fn ctype(self) -> &'static str {
        match self {
            Word::W32 => "u32",
            Word::W64 => "u64",
        }
    }
}

/// Rounds `p` down to the nearest multiple of `a` (`a` a power of two).
pub fn align_down(p: usize, a: usize) -> usize {
    p & !(a - 1)
}

/// Rounds `p` up to the nearest multiple of `a` (`a` a power of two).
pub fn align_up(p: usize, a: usize) -> usize {
    (p + (a - 1)) & !(a - 1)
}

pub fn read_u16_at(buf: &[u8], offset: usize, endian: Endianness) -> Option<u16> {
    let bytes: [u8; 2] = buf.get(offset..offset + 2)?.try_into().ok()?;
    Some(match endian {
        Endianness::Little => u16::from_le_bytes(bytes),
        Endianness::Big => u16::from_be_bytes(bytes),
    })
}

pub fn read_u32_at(buf: &[u8], offset: usize, endian: Endianness) -> Option<u32> {
    let bytes: [u8; 4] = buf.get(offset..offset + 4)?.try_into().ok()?;
    Some(match endian {
        Endianness::Little => u32::from_le_bytes(bytes),
        Endianness::Big => u32::from_be_bytes(bytes),
    })
}

pub fn read_i32_at(buf: &[u8], offset: usize, endian: Endianness) -> Option<i32> {
    read_u32_at(buf, offset, endian).map(|v| v as i32)
}

pub fn read_u64_at(buf: &[u8], offset: usize, endian: Endianness) -> Option<u64> {
    let bytes: [u8; 8] = buf.get(offset..offset + 8)?.try_into().ok()?;
    Some(match endian {
        Endianness::Little => u64::from_le_bytes(bytes),
        Endianness::Big => u64::from_be_bytes(bytes),
    })
}

/// Reads an unsigned integer of the given byte width, widened to `u64`.
pub fn read_uword_at(buf: &[u8], offset: usize, size: usize, endian: Endianness) -> Option<u64> {
    match size {
        4 => read_u32_at(buf, offset, endian).map(u64::from),
        8 => read_u64_at(buf, offset, endian),
        _ => None,
    }
}
