//! b250 — the variable-length encoding for dictionary references.
//!
//! Every per-row reference into a context's dictionary is stored in this
//! base-250 form: one byte for the 250 most common words, up to five bytes
//! for the full 31-bit index range.  Values 250–255 of the first byte are
//! reserved escape codes.
//!
//! # Byte layout (all reserved codes in one place)
//!
//! ```text
//! First byte   Meaning
//! 0x00..=0xF9  literal word index 0–249
//! 0xFA         ONE_UP      — previous word index + 1
//! 0xFB         EMPTY_SF    — subfield present but empty
//! 0xFC         MISSING_SF  — subfield absent from this row
//! 0xFD         word index in the following 2 bytes, little-endian
//! 0xFE         word index in the following 3 bytes, little-endian
//! 0xFF         word index in the following 4 bytes, little-endian
//! ```
//!
//! EMPTY_SF and MISSING_SF are distinct on purpose: "AC=" round-trips to an
//! empty value while an absent "AC" consumes nothing.
//!
//! The 4-byte form covers indices up to [`MAX_WORD`]; a context that would
//! exceed it has more than 2^31 distinct values, which is treated as fatal
//! upstream.

use crate::error::{BiozError, Result};

pub const CODE_ONE_UP:  u8 = 0xFA;
pub const CODE_EMPTY:   u8 = 0xFB;
pub const CODE_MISSING: u8 = 0xFC;
pub const CODE_U16:     u8 = 0xFD;
pub const CODE_U24:     u8 = 0xFE;
pub const CODE_U32:     u8 = 0xFF;

/// Largest encodable word index.
pub const MAX_WORD: u32 = (1 << 31) - 1;

/// One decoded b250 value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum B250 {
    Word(u32),
    OneUp,
    Empty,
    Missing,
}

/// Append the encoding of `code` to `out`.
///
/// The caller decides when ONE_UP applies; this function only knows the
/// byte layout.  Returns `B250Overflow` for indices past [`MAX_WORD`].
pub fn encode(out: &mut Vec<u8>, code: B250, ctx_name: &str) -> Result<()> {
    match code {
        B250::OneUp   => out.push(CODE_ONE_UP),
        B250::Empty   => out.push(CODE_EMPTY),
        B250::Missing => out.push(CODE_MISSING),
        B250::Word(w) => {
            if w < 250 {
                out.push(w as u8);
            } else if w < 1 << 16 {
                out.push(CODE_U16);
                out.extend_from_slice(&(w as u16).to_le_bytes());
            } else if w < 1 << 24 {
                out.push(CODE_U24);
                out.extend_from_slice(&w.to_le_bytes()[..3]);
            } else if w <= MAX_WORD {
                out.push(CODE_U32);
                out.extend_from_slice(&w.to_le_bytes());
            } else {
                return Err(BiozError::B250Overflow { ctx: ctx_name.to_owned() });
            }
        }
    }
    Ok(())
}

/// Decode one reference at `*pos`, resolving ONE_UP against `*prev`.
/// Cursor state is caller-owned so per-context decode cursors can live
/// inside block scratch.
pub fn decode_at(
    buf:      &[u8],
    pos:      &mut usize,
    prev:     &mut Option<u32>,
    ctx_name: &str,
) -> Result<B250> {
    fn take<'b>(buf: &'b [u8], pos: &mut usize, n: usize, ctx_name: &str) -> Result<&'b [u8]> {
        if *pos + n > buf.len() {
            return Err(BiozError::Corrupt(format!(
                "b250 overrun in context {ctx_name} at offset {pos}"
            )));
        }
        let s = &buf[*pos..*pos + n];
        *pos += n;
        Ok(s)
    }

    let b = take(buf, pos, 1, ctx_name)?[0];
    let code = match b {
        0x00..=0xF9  => B250::Word(b as u32),
        CODE_ONE_UP  => {
            let p = prev.ok_or_else(|| BiozError::Corrupt(format!(
                "b250 ONE_UP with no previous word in context {ctx_name}"
            )))?;
            B250::Word(p + 1)
        }
        CODE_EMPTY   => B250::Empty,
        CODE_MISSING => B250::Missing,
        CODE_U16     => {
            let s = take(buf, pos, 2, ctx_name)?;
            B250::Word(u16::from_le_bytes([s[0], s[1]]) as u32)
        }
        CODE_U24     => {
            let s = take(buf, pos, 3, ctx_name)?;
            B250::Word(u32::from_le_bytes([s[0], s[1], s[2], 0]))
        }
        CODE_U32     => {
            let s = take(buf, pos, 4, ctx_name)?;
            B250::Word(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
        }
    };
    if let B250::Word(w) = code {
        if w > MAX_WORD {
            return Err(BiozError::B250Overflow { ctx: ctx_name.to_owned() });
        }
        *prev = Some(w);
    }
    Ok(code)
}

/// Sequential reader over a b250 stream.  ONE_UP is resolved here so that
/// callers always see concrete word indices.
pub struct B250Reader<'a> {
    buf:  &'a [u8],
    pos:  usize,
    prev: Option<u32>,
}

impl<'a> B250Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        B250Reader { buf, pos: 0, prev: None }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn next(&mut self, ctx_name: &str) -> Result<B250> {
        decode_at(self.buf, &mut self.pos, &mut self.prev, ctx_name)
    }
}

/// Serialize a sequence of resolved references, applying the ONE_UP
/// shortcut where `one_up_allowed` permits.
///
/// ONE_UP is disabled for genotype-data contexts: their stream is
/// re-partitioned per sample at decode time and cannot be read strictly
/// sequentially, so a "previous + 1" reference would have no stable
/// antecedent.
pub fn serialize(refs: &[B250], one_up_allowed: bool, ctx_name: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(refs.len());
    let mut prev: Option<u32> = None;
    for &r in refs {
        match r {
            B250::Word(w) => {
                if one_up_allowed && prev == Some(w.wrapping_sub(1)) && w > 0 {
                    out.push(CODE_ONE_UP);
                } else {
                    encode(&mut out, B250::Word(w), ctx_name)?;
                }
                prev = Some(w);
            }
            other => encode(&mut out, other, ctx_name)?,
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roundtrip(refs: &[B250], one_up: bool) -> Vec<B250> {
        let bytes = serialize(refs, one_up, "TEST").unwrap();
        let mut r = B250Reader::new(&bytes);
        let mut out = Vec::new();
        while !r.is_empty() {
            out.push(r.next("TEST").unwrap());
        }
        out
    }

    #[test]
    fn widths() {
        let refs = [B250::Word(0), B250::Word(249), B250::Word(250),
                    B250::Word(65535), B250::Word(65536), B250::Word(1 << 24)];
        assert_eq!(roundtrip(&refs, false), refs);
        let bytes = serialize(&refs, false, "TEST").unwrap();
        assert_eq!(bytes.len(), 1 + 1 + 3 + 3 + 4 + 5);
    }

    #[test]
    fn one_up_applies_only_when_allowed() {
        let refs = [B250::Word(7), B250::Word(8), B250::Word(9)];
        let with = serialize(&refs, true, "TEST").unwrap();
        let without = serialize(&refs, false, "TEST").unwrap();
        assert_eq!(with, vec![7, CODE_ONE_UP, CODE_ONE_UP]);
        assert_eq!(without, vec![7, 8, 9]);
        assert_eq!(roundtrip(&refs, true), refs);
    }

    #[test]
    fn empty_and_missing_are_distinct() {
        let refs = [B250::Word(1), B250::Empty, B250::Missing, B250::Word(2)];
        assert_eq!(roundtrip(&refs, true), refs);
    }

    #[test]
    fn empty_does_not_disturb_one_up_chain() {
        let refs = [B250::Word(4), B250::Empty, B250::Word(5)];
        let bytes = serialize(&refs, true, "TEST").unwrap();
        assert_eq!(bytes, vec![4, CODE_EMPTY, CODE_ONE_UP]);
        assert_eq!(roundtrip(&refs, true), refs);
    }

    #[test]
    fn overflow_is_fatal() {
        let mut out = Vec::new();
        assert!(encode(&mut out, B250::Word(MAX_WORD), "TEST").is_ok());
        assert!(encode(&mut out, B250::Word(MAX_WORD + 1), "TEST").is_err());
    }

    proptest! {
        #[test]
        fn prop_roundtrip(words in proptest::collection::vec(0u32..MAX_WORD, 0..200),
                          one_up in any::<bool>()) {
            let refs: Vec<B250> = words.into_iter().map(B250::Word).collect();
            prop_assert_eq!(roundtrip(&refs, one_up), refs);
        }
    }
}
