//! Shared segmentation primitives.
//!
//! Each data type's row parser is built from these: one-field evaluation,
//! numeric deltas, compound identifiers, self-describing info fields,
//! positions feeding the random-access index, and sequence payloads
//! routed to local streams.  The encode/decode contract for stored
//! numeric state is symmetric by construction: *a value that parses as a
//! canonical integer updates the context's last value; anything else
//! leaves it unchanged* — both the segmenter here and the reconstructor
//! follow that one rule.

use crate::context::{
    BlockContext, ContextInit, ContextSet, SNIP_CONTAINER, SNIP_COPY, SNIP_DELTA, SNIP_LOOKUP,
    SNIP_OTHER_DELTA,
};
use crate::error::Result;
use crate::fingerprint::{Category, FieldId};
use crate::vblock::{Eol, VBlock};

/// Container kinds (second byte of a SNIP_CONTAINER snip).
pub const CONTAINER_COMPOUND: u8 = b'C';
pub const CONTAINER_INFO:     u8 = b'I';
/// Placeholder byte inside a container template marking a value slot.
pub const PLACEHOLDER: u8 = 0x01;

pub const EOL_ID_NAME: &str = "EOL";

// ── Numeric helpers ──────────────────────────────────────────────────────────

/// Strict canonical integer parse: optional `-`, no leading zeros (except
/// `0` itself), no `+`.  Only canonical values may be delta-encoded,
/// because reconstruction re-renders them with `to_string`.
pub fn ascii_i64(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() || bytes.len() > 19 {
        return None;
    }
    let (neg, digits) = match bytes[0] {
        b'-' => (true, &bytes[1..]),
        _    => (false, bytes),
    };
    if digits.is_empty() || (digits.len() > 1 && digits[0] == b'0') {
        return None;
    }
    let mut v: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        v = v.checked_mul(10)?.checked_add((b - b'0') as i64)?;
    }
    Some(if neg { -v } else { v })
}

/// Record a just-handled value in the context scratch, per the symmetric
/// update rule.  Short values also keep their text for SNIP_COPY.
pub fn note_value(ctx: &mut BlockContext, bytes: &[u8], line_i: u32) {
    if let Some(v) = ascii_i64(bytes) {
        ctx.last_value = Some(v);
    }
    if bytes.len() <= 64 {
        ctx.last_txt.clear();
        ctx.last_txt.extend_from_slice(bytes);
    }
    ctx.last_line = line_i;
}

// ── Snip builders ────────────────────────────────────────────────────────────

/// Encode a context reference inside a snip: category tag, name length,
/// name bytes.  Free of 0x00 so the dictionary sentinel stays unique.
pub fn push_target_ref(out: &mut Vec<u8>, id: FieldId) {
    let name = id.name();
    out.push(id.category().tag());
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
}

/// Parse a reference written by [`push_target_ref`]; returns the id and
/// the number of bytes consumed.
pub fn parse_target_ref(bytes: &[u8]) -> Option<(FieldId, usize)> {
    let cat = Category::from_tag(*bytes.first()?);
    let len = *bytes.get(1)? as usize;
    let name = bytes.get(2..2 + len)?;
    let id = FieldId::new(std::str::from_utf8(name).ok()?, cat);
    Some((id, 2 + len))
}

// ── One-field primitives ─────────────────────────────────────────────────────

/// Evaluate one value into a named context and record the reference.
pub fn seg_one(
    vb:    &mut VBlock,
    zset:  &ContextSet,
    id:    FieldId,
    name:  &str,
    init:  ContextInit,
    bytes: &[u8],
    line_i: u32,
) -> Result<()> {
    let i = vb.ctx_idx(zset, id, name, init);
    let ctx = &mut vb.ctxs[i];
    ctx.seg(zset, bytes)?;
    note_value(ctx, bytes, line_i);
    Ok(())
}

/// Per-line EOL context: `\n`, `\r\n`, or nothing on an unterminated
/// final line — preserved exactly on round trip.
pub fn seg_eol(vb: &mut VBlock, zset: &ContextSet, eol: Eol, line_i: u32) -> Result<()> {
    seg_one(
        vb,
        zset,
        FieldId::new(EOL_ID_NAME, Category::Primary),
        EOL_ID_NAME,
        ContextInit::stable_dict(),
        eol.bytes(),
        line_i,
    )
}

/// Delta-encode a numeric value against the same context's previous
/// value; falls back to a literal snip for the first value of a block or
/// anything non-canonical.
pub fn seg_maybe_delta(
    vb:    &mut VBlock,
    zset:  &ContextSet,
    id:    FieldId,
    name:  &str,
    bytes: &[u8],
    line_i: u32,
) -> Result<Option<i64>> {
    let i = vb.ctx_idx(zset, id, name, ContextInit::numeric());
    let ctx = &mut vb.ctxs[i];
    let parsed = ascii_i64(bytes);
    match (parsed, ctx.last_value) {
        (Some(v), Some(last)) if ctx.store_value => {
            if let Some(delta) = v.checked_sub(last) {
                let mut snip = vec![SNIP_DELTA];
                snip.extend_from_slice(delta.to_string().as_bytes());
                ctx.seg(zset, &snip)?;
            } else {
                ctx.seg(zset, bytes)?;
            }
        }
        _ => {
            ctx.seg(zset, bytes)?;
        }
    }
    note_value(ctx, bytes, line_i);
    Ok(parsed)
}

/// Delta against *another* context's stored value (PNEXT vs POS, END vs
/// START).  Literal fallback when either side is non-numeric.
pub fn seg_other_delta(
    vb:     &mut VBlock,
    zset:   &ContextSet,
    id:     FieldId,
    name:   &str,
    other:  FieldId,
    bytes:  &[u8],
    line_i: u32,
) -> Result<Option<i64>> {
    let base = vb.ctx_of(other).and_then(|c| c.last_value);
    let i = vb.ctx_idx(zset, id, name, ContextInit::numeric());
    let ctx = &mut vb.ctxs[i];
    let parsed = ascii_i64(bytes);
    match (parsed, base) {
        (Some(v), Some(b)) if v.checked_sub(b).is_some() => {
            let mut snip = vec![SNIP_OTHER_DELTA];
            push_target_ref(&mut snip, other);
            snip.extend_from_slice((v - b).to_string().as_bytes());
            ctx.seg(zset, &snip)?;
        }
        _ => {
            ctx.seg(zset, bytes)?;
        }
    }
    note_value(ctx, bytes, line_i);
    Ok(parsed)
}

/// Copy-from-context when the value equals the target's most recent
/// value; literal otherwise.
pub fn seg_maybe_copy(
    vb:     &mut VBlock,
    zset:   &ContextSet,
    id:     FieldId,
    name:   &str,
    other:  FieldId,
    bytes:  &[u8],
    line_i: u32,
) -> Result<()> {
    let same = vb
        .ctx_of(other)
        .map(|c| !c.last_txt.is_empty() && c.last_txt == bytes)
        .unwrap_or(false);
    let i = vb.ctx_idx(zset, id, name, ContextInit::dict());
    let ctx = &mut vb.ctxs[i];
    if same {
        let mut snip = vec![SNIP_COPY];
        push_target_ref(&mut snip, other);
        ctx.seg(zset, &snip)?;
    } else {
        ctx.seg(zset, bytes)?;
    }
    note_value(ctx, bytes, line_i);
    Ok(())
}

/// Position field: delta-encoded like any numeric, and additionally feeds
/// the block's random-access accumulation for the current chromosome.
pub fn seg_pos(
    vb:         &mut VBlock,
    zset:       &ContextSet,
    id:         FieldId,
    name:       &str,
    chrom_word: Option<u32>,
    bytes:      &[u8],
    line_i:     u32,
) -> Result<Option<u64>> {
    let parsed = seg_maybe_delta(vb, zset, id, name, bytes, line_i)?;
    let pos = parsed.filter(|&v| v >= 0).map(|v| v as u64);
    if let (Some(w), Some(p)) = (chrom_word, pos) {
        let vblock_i = vb.vblock_i;
        vb.ra.observe(w, p, vblock_i);
    }
    Ok(pos)
}

/// Sequence-like payload: bytes go raw into the local stream; the b250
/// reference is a lookup snip carrying only the length.
pub fn seg_seq(
    vb:    &mut VBlock,
    zset:  &ContextSet,
    id:    FieldId,
    name:  &str,
    bytes: &[u8],
) -> Result<()> {
    let i = vb.ctx_idx(zset, id, name, ContextInit::seq());
    let ctx = &mut vb.ctxs[i];
    ctx.push_local_seq(bytes);
    let mut snip = vec![SNIP_LOOKUP];
    snip.extend_from_slice(bytes.len().to_string().as_bytes());
    ctx.seg(zset, &snip)?;
    Ok(())
}

// ── Compound fields ──────────────────────────────────────────────────────────

/// Split a structured identifier on `seps` into (at most 9) items and a
/// positional template; each item goes to a positional subcontext, where
/// numeric items delta-encode (read names count up).
pub fn seg_compound(
    vb:     &mut VBlock,
    zset:   &ContextSet,
    id:     FieldId,
    name:   &str,
    bytes:  &[u8],
    seps:   &[u8],
    line_i: u32,
) -> Result<()> {
    let mut template = vec![SNIP_CONTAINER, CONTAINER_COMPOUND];
    let mut items: Vec<&[u8]> = Vec::new();

    let mut start = 0usize;
    for (i, &b) in bytes.iter().enumerate() {
        if seps.contains(&b) && items.len() < 8 {
            items.push(&bytes[start..i]);
            template.push(PLACEHOLDER);
            template.push(b);
            start = i + 1;
        }
    }
    items.push(&bytes[start..]);
    template.push(PLACEHOLDER);

    for (k, item) in items.iter().enumerate() {
        let sub = id.compound_item(k);
        let sub_name = sub.name();
        if item.is_empty() {
            let ci = vb.ctx_idx(zset, sub, &sub_name, ContextInit::numeric());
            vb.ctxs[ci].seg_empty();
        } else {
            seg_maybe_delta(vb, zset, sub, &sub_name, item, line_i)?;
        }
    }

    let i = vb.ctx_idx(zset, id, name, ContextInit::stable_dict());
    vb.ctxs[i].seg(zset, &template)?;
    Ok(())
}

// ── Info-style fields ────────────────────────────────────────────────────────

/// One `name=value` (or bare-flag) item of an info-style field.
pub struct InfoItem<'a> {
    pub name:  &'a [u8],
    /// `None` for flag items ("DB"); `Some(b"")` for present-but-empty
    /// values ("AC=") — the two round-trip differently.
    pub value: Option<&'a [u8]>,
}

/// Segment a self-describing field: the ordered name list becomes one
/// template snip in the parent context, each value goes to its name-keyed
/// subcontext.
pub fn seg_info(
    vb:       &mut VBlock,
    zset:     &ContextSet,
    id:       FieldId,
    name:     &str,
    items:    &[InfoItem],
    item_sep: u8,
    kv_sep:   u8,
    sub_cat:  Category,
    line_i:   u32,
) -> Result<()> {
    let mut template = vec![SNIP_CONTAINER, CONTAINER_INFO, sub_cat.tag(), item_sep, kv_sep];
    for (k, item) in items.iter().enumerate() {
        if k > 0 {
            template.push(item_sep);
        }
        template.extend_from_slice(item.name);
        if item.value.is_some() {
            template.push(kv_sep);
            template.push(PLACEHOLDER);
        }
    }

    for item in items {
        let Some(value) = item.value else { continue };
        let sub_name = String::from_utf8_lossy(item.name).into_owned();
        let sub = FieldId::new(&sub_name, sub_cat);
        if value.is_empty() {
            let ci = vb.ctx_idx(zset, sub, &sub_name, ContextInit::numeric());
            vb.ctxs[ci].seg_empty();
        } else {
            seg_maybe_delta(vb, zset, sub, &sub_name, value, line_i)?;
        }
    }

    let i = vb.ctx_idx(zset, id, name, ContextInit::stable_dict());
    vb.ctxs[i].seg(zset, &template)?;
    Ok(())
}

// ── Opt-in numeric rounding ──────────────────────────────────────────────────

/// Deterministic two-significant-digit form of a numeric field, used by
/// the opt-in rounding transform on whitelisted fields.  Returns `None`
/// when the bytes are not a finite number (the field is left alone).
pub fn round_sig2(bytes: &[u8]) -> Option<Vec<u8>> {
    let s = std::str::from_utf8(bytes).ok()?;
    let f: f64 = s.parse().ok()?;
    if !f.is_finite() {
        return None;
    }
    if f == 0.0 {
        return Some(b"0".to_vec());
    }
    // Round to two significant digits via the exponent form, then render
    // with f64's shortest-roundtrip display (deterministic).
    let rounded: f64 = format!("{f:.1e}").parse().ok()?;
    let abs = rounded.abs();
    let out = if (0.0001..1e7).contains(&abs) {
        format!("{rounded}")
    } else {
        format!("{rounded:e}")
    };
    Some(out.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_i64_is_strict() {
        assert_eq!(ascii_i64(b"0"), Some(0));
        assert_eq!(ascii_i64(b"12345"), Some(12345));
        assert_eq!(ascii_i64(b"-7"), Some(-7));
        assert_eq!(ascii_i64(b"007"), None);
        assert_eq!(ascii_i64(b"+7"), None);
        assert_eq!(ascii_i64(b""), None);
        assert_eq!(ascii_i64(b"1.5"), None);
        assert_eq!(ascii_i64(b"99999999999999999999999"), None);
    }

    #[test]
    fn target_ref_roundtrip() {
        let id = FieldId::new("RNAME", Category::Primary);
        let mut buf = Vec::new();
        push_target_ref(&mut buf, id);
        let (back, used) = parse_target_ref(&buf).unwrap();
        assert_eq!(back, id);
        assert_eq!(used, buf.len());
        assert!(!buf.contains(&0u8));
    }

    #[test]
    fn rounding_is_deterministic_and_two_digits() {
        assert_eq!(round_sig2(b"0.12345").unwrap(), b"0.12");
        assert_eq!(round_sig2(b"1234.5").unwrap(), b"1200");
        assert_eq!(round_sig2(b"29.4").unwrap(), b"29");
        assert_eq!(round_sig2(b"0").unwrap(), b"0");
        assert_eq!(round_sig2(b"."), None);
        // Idempotent on its own output.
        let once = round_sig2(b"3.14159").unwrap();
        assert_eq!(round_sig2(&once).unwrap(), once);
    }

    #[test]
    fn delta_snips_dedupe_across_rows() {
        use crate::vblock::VBlock;
        let zset = ContextSet::new();
        let mut vb = VBlock::new();
        vb.prepare(0, 0);
        let id = FieldId::new("POS", Category::Primary);
        for (i, pos) in [b"100".as_ref(), b"101", b"102", b"103"].iter().enumerate() {
            seg_maybe_delta(&mut vb, &zset, id, "POS", pos, i as u32).unwrap();
        }
        let ctx = vb.ctx_of(id).unwrap();
        // literal "100" + three identical "+1" delta snips = 2 local words.
        assert_eq!(ctx.refs.len(), 4);
        assert_eq!(ctx.last_value, Some(103));
    }
}
