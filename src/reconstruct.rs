//! Reconstruction — contexts back to original text.
//!
//! The reconstructor interprets snips: literal dictionary strings append
//! verbatim, control prefixes delegate (local-stream lookup, deltas,
//! copy-from-context, data-type special handlers, container templates).
//! Reconstruction is in-place into the block's output buffer; a row that
//! a region or grep filter excludes is rolled back by truncating the
//! buffer to the row start.
//!
//! Scratch updates follow the same symmetric rule as segmentation: every
//! reconstructed value that parses as a canonical integer becomes the
//! context's last value.

use crate::context::{
    DictSet, LocalType, SNIP_CONTAINER, SNIP_COPY, SNIP_DELTA, SNIP_LOOKUP, SNIP_OTHER_DELTA,
    SNIP_SPECIAL,
};
use crate::b250::B250;
use crate::datatype::DataTypeOps;
use crate::error::{BiozError, Result};
use crate::fingerprint::FieldId;
use crate::random_access::ResolvedRegions;
use crate::segment::{
    ascii_i64, parse_target_ref, CONTAINER_COMPOUND, CONTAINER_INFO, PLACEHOLDER,
};
use crate::vblock::VBlock;

/// Decode-time options that shape reconstruction.
#[derive(Default)]
pub struct ReconOpts {
    pub regions:           ResolvedRegions,
    pub grep:              Option<Vec<u8>>,
    /// FASTA: join wrapped sequence lines into one line per sequence.
    pub fasta_single_line: bool,
}

impl ReconOpts {
    pub fn is_filtering(&self) -> bool {
        !self.regions.is_empty() || self.grep.is_some()
    }
}

/// What a top-level field reference resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A value (possibly zero bytes) was written.
    Emitted,
    /// EMPTY_SF: subfield present but empty; nothing written.
    Empty,
    /// MISSING_SF: subfield absent; nothing written, nothing consumed
    /// downstream.
    Missing,
}

/// Per-line metadata the row driver uses for filtering.
#[derive(Debug, Default, Clone)]
pub struct LineMeta {
    pub chrom_word:   Option<u32>,
    pub pos_range:    Option<(u64, u64)>,
    /// This line opens a record and carries the identifier the grep
    /// filter applies to.
    pub id_line:      bool,
    /// The row driver should withhold this line's EOL (FASTA join mode).
    pub suppress_eol: bool,
}

pub struct Reconstructor<'a> {
    pub vb:     &'a mut VBlock,
    pub dicts:  &'a DictSet,
    pub out:    &'a mut Vec<u8>,
    pub opts:   &'a ReconOpts,
    pub line_i: u32,

    /// VCF: sample-column count from the component's text header.
    pub sample_count: usize,
    /// FASTA join mode: EOL bytes withheld from the previous sequence line.
    pub pending_eol: Vec<u8>,
    /// Filled by special handlers during `recon_line` (grep gate, EOL
    /// suppression); the row driver reads it after each line.
    pub line_meta: LineMeta,
}

impl<'a> Reconstructor<'a> {
    pub fn new(
        vb:    &'a mut VBlock,
        dicts: &'a DictSet,
        out:   &'a mut Vec<u8>,
        opts:  &'a ReconOpts,
        sample_count: usize,
    ) -> Self {
        Reconstructor {
            vb,
            dicts,
            out,
            opts,
            line_i: 0,
            sample_count,
            pending_eol: Vec::new(),
            line_meta: LineMeta::default(),
        }
    }

    fn ctx_i(&self, id: FieldId) -> Result<usize> {
        self.vb.ctx_handle(id).ok_or_else(|| {
            BiozError::Corrupt(format!(
                "block {}: context {} has neither b250 nor local data",
                self.vb.vblock_i,
                id.name()
            ))
        })
    }

    /// Reconstruct the next value of `id` into the output buffer.
    pub fn recon_field(&mut self, dt: &dyn DataTypeOps, id: FieldId) -> Result<Outcome> {
        let ctx_i = self.ctx_i(id)?;
        self.recon_ctx(dt, ctx_i)
    }

    /// Most recent word index consumed from `id` (the chromosome word for
    /// RA filtering).
    pub fn last_word(&mut self, id: FieldId) -> Option<u32> {
        self.vb.ctx_of(id).and_then(|c| c.last_word)
    }

    /// Stored numeric value of `id` if it was set on this very line.
    pub fn line_value(&mut self, id: FieldId, line_i: u32) -> Option<i64> {
        self.vb
            .ctx_of(id)
            .filter(|c| c.last_line == line_i)
            .and_then(|c| c.last_value)
    }

    pub fn recon_ctx(&mut self, dt: &dyn DataTypeOps, ctx_i: usize) -> Result<Outcome> {
        match self.vb.ctxs[ctx_i].next_b250()? {
            B250::Empty   => Ok(Outcome::Empty),
            B250::Missing => Ok(Outcome::Missing),
            B250::OneUp   => unreachable!("decode_at resolves ONE_UP"),
            B250::Word(w) => {
                let id = self.vb.ctxs[ctx_i].id;
                let name = self.vb.ctxs[ctx_i].name.clone();
                let snip = self.dicts.word(id, w, &name)?.to_vec();
                self.recon_snip(dt, ctx_i, &snip)?;
                Ok(Outcome::Emitted)
            }
        }
    }

    fn corrupt(&self, ctx_i: usize, what: &str) -> BiozError {
        BiozError::Corrupt(format!(
            "block {} context {}: {what}",
            self.vb.vblock_i, self.vb.ctxs[ctx_i].name
        ))
    }

    /// Interpret one snip, writing its expansion to the output buffer and
    /// updating the context scratch.
    pub fn recon_snip(&mut self, dt: &dyn DataTypeOps, ctx_i: usize, snip: &[u8]) -> Result<()> {
        let start = self.out.len();
        match snip.first().copied() {
            Some(SNIP_LOOKUP) if snip.len() > 1 => {
                // Explicit length after the prefix: raw bytes from the
                // local stream (sequence-like payloads).  Length zero is
                // valid and consumes nothing, so an all-empty context with
                // no local section still reconstructs.
                let len = ascii_i64(&snip[1..])
                    .filter(|&v| v >= 0)
                    .ok_or_else(|| self.corrupt(ctx_i, "bad lookup length"))?;
                let ctx = &mut self.vb.ctxs[ctx_i];
                ctx.copy_local_seq(len as usize, self.out)?;
            }
            Some(SNIP_LOOKUP) => {
                let ltype = self.vb.ctxs[ctx_i].ltype;
                match ltype {
                    LocalType::U32 => {
                        let v = self.vb.ctxs[ctx_i].next_local_u32()?;
                        self.out.extend_from_slice(v.to_string().as_bytes());
                    }
                    LocalType::I32 => {
                        let v = self.vb.ctxs[ctx_i].next_local_i32()?;
                        self.out.extend_from_slice(v.to_string().as_bytes());
                    }
                    LocalType::Text | LocalType::Seq => {
                        // Local text entries are themselves snips (an
                        // externalized singleton is usually literal, but a
                        // degraded context can hold anything).
                        let (s, e) = self.vb.ctxs[ctx_i].next_local_text_range()?;
                        let bytes = self.vb.ctxs[ctx_i].local.as_slice()[s..e].to_vec();
                        self.recon_snip(dt, ctx_i, &bytes)?;
                        return Ok(()); // inner call updated the scratch
                    }
                }
            }
            Some(SNIP_DELTA) => {
                let delta = ascii_i64(&snip[1..])
                    .ok_or_else(|| self.corrupt(ctx_i, "bad delta snip"))?;
                let base = self.vb.ctxs[ctx_i]
                    .last_value
                    .ok_or_else(|| self.corrupt(ctx_i, "delta with no stored value"))?;
                let v = base
                    .checked_add(delta)
                    .ok_or_else(|| self.corrupt(ctx_i, "delta overflow"))?;
                self.out.extend_from_slice(v.to_string().as_bytes());
            }
            Some(SNIP_OTHER_DELTA) => {
                let (target, used) = parse_target_ref(&snip[1..])
                    .ok_or_else(|| self.corrupt(ctx_i, "bad target ref"))?;
                let delta = ascii_i64(&snip[1 + used..])
                    .ok_or_else(|| self.corrupt(ctx_i, "bad delta snip"))?;
                let base = self
                    .vb
                    .ctx_of(target)
                    .and_then(|c| c.last_value)
                    .ok_or_else(|| self.corrupt(ctx_i, "delta target has no stored value"))?;
                let v = base
                    .checked_add(delta)
                    .ok_or_else(|| self.corrupt(ctx_i, "delta overflow"))?;
                self.out.extend_from_slice(v.to_string().as_bytes());
            }
            Some(SNIP_COPY) => {
                let (target, _) = parse_target_ref(&snip[1..])
                    .ok_or_else(|| self.corrupt(ctx_i, "bad target ref"))?;
                let bytes = self
                    .vb
                    .ctx_of(target)
                    .map(|c| c.last_txt.clone())
                    .ok_or_else(|| self.corrupt(ctx_i, "copy target never reconstructed"))?;
                self.out.extend_from_slice(&bytes);
            }
            Some(SNIP_SPECIAL) => {
                let handler = *snip
                    .get(1)
                    .ok_or_else(|| self.corrupt(ctx_i, "truncated special snip"))?;
                dt.special(self, handler, &snip[2..])?;
            }
            Some(SNIP_CONTAINER) => {
                self.recon_container(dt, ctx_i, &snip[1..])?;
            }
            _ => {
                // Literal dictionary string (possibly empty).
                self.out.extend_from_slice(snip);
            }
        }

        // Symmetric scratch update over the produced span.
        let produced_len = self.out.len() - start;
        let parsed = ascii_i64(&self.out[start..]);
        let ctx = &mut self.vb.ctxs[ctx_i];
        if let Some(v) = parsed {
            ctx.last_value = Some(v);
        }
        if produced_len <= 64 {
            let span = &self.out[start..];
            let ctx = &mut self.vb.ctxs[ctx_i];
            ctx.last_txt.clear();
            ctx.last_txt.extend_from_slice(span);
        }
        self.vb.ctxs[ctx_i].last_line = self.line_i;
        Ok(())
    }

    // ── Containers ──────────────────────────────────────────────────────────

    fn recon_container(&mut self, dt: &dyn DataTypeOps, ctx_i: usize, body: &[u8]) -> Result<()> {
        match body.first().copied() {
            Some(CONTAINER_COMPOUND) => self.recon_compound(dt, ctx_i, &body[1..]),
            Some(CONTAINER_INFO)     => self.recon_info(dt, ctx_i, &body[1..]),
            _ => Err(self.corrupt(ctx_i, "unknown container kind")),
        }
    }

    /// Positional template: 0x01 slots expand the k-th compound
    /// subcontext; everything else is a literal separator byte.
    fn recon_compound(&mut self, dt: &dyn DataTypeOps, ctx_i: usize, template: &[u8]) -> Result<()> {
        let base = self.vb.ctxs[ctx_i].id;
        let mut k = 0usize;
        for &b in template {
            if b == PLACEHOLDER {
                let sub = base.compound_item(k);
                k += 1;
                let sub_i = self.ctx_i(sub)?;
                self.recon_ctx(dt, sub_i)?;
            } else {
                self.out.push(b);
            }
        }
        Ok(())
    }

    /// Info template: `cat | item_sep | kv_sep | items…` where each item
    /// is either a literal flag name or `name kv_sep 0x01`.
    fn recon_info(&mut self, dt: &dyn DataTypeOps, ctx_i: usize, body: &[u8]) -> Result<()> {
        if body.len() < 3 {
            return Err(self.corrupt(ctx_i, "truncated info template"));
        }
        let sub_cat = crate::fingerprint::Category::from_tag(body[0]);
        let item_sep = body[1];
        let kv_sep = body[2];
        let template = &body[3..];

        let mut first = true;
        for item in template.split(|&b| b == item_sep) {
            if !first {
                self.out.push(item_sep);
            }
            first = false;
            if item.len() >= 2 && item[item.len() - 1] == PLACEHOLDER && item[item.len() - 2] == kv_sep
            {
                let name = &item[..item.len() - 2];
                self.out.extend_from_slice(name);
                self.out.push(kv_sep);
                let sub_name = String::from_utf8_lossy(name).into_owned();
                let sub = FieldId::new(&sub_name, sub_cat);
                let sub_i = self.ctx_i(sub)?;
                self.recon_ctx(dt, sub_i)?;
            } else {
                self.out.extend_from_slice(item);
            }
        }
        Ok(())
    }
}
