//! Reference sequences.
//!
//! Three line kinds — `>` descriptions, `;` comments, sequence lines —
//! discriminated per line by a selector context whose snips invoke the
//! format's special handlers: the description handler is the grep gate
//! (records span description to description), and the sequence handler
//! reconstructs either the original line wrapping or, under the
//! single-line decode flag, one joined line per sequence from the same
//! archive.

use crate::context::{ContextInit, SNIP_SPECIAL};
use crate::datatype::{DataType, DataTypeOps, SegEnv};
use crate::error::{BiozError, Result};
use crate::fingerprint::{Category, FieldId};
use crate::reconstruct::{LineMeta, Reconstructor};
use crate::segment::{seg_compound, seg_one, seg_seq};
use crate::vblock::VBlock;

fn fid(name: &str) -> FieldId {
    FieldId::new(name, Category::Primary)
}

const DESC_SEPS: &[u8] = b" |:=_";

/// Special handlers.
const SP_DESC:    u8 = 0;
const SP_SEQ:     u8 = 1;
const SP_COMMENT: u8 = 2;

pub struct FastaOps;

impl DataTypeOps for FastaOps {
    fn data_type(&self) -> DataType {
        DataType::Fasta
    }

    fn greppable(&self) -> bool {
        true
    }

    fn txt_header_len(&self, _txt: &[u8]) -> usize {
        0
    }

    fn seg_line(
        &self,
        vb:     &mut VBlock,
        zset:   &crate::context::ContextSet,
        line:   &[u8],
        line_i: u32,
        _env:   &SegEnv,
    ) -> Result<()> {
        let line_ctx = vb.ctx_idx(zset, fid("LINE"), "LINE", ContextInit::stable_dict());
        match line.first() {
            Some(b'>') => {
                vb.ctxs[line_ctx].seg(zset, &[SNIP_SPECIAL, SP_DESC])?;
                seg_compound(vb, zset, fid("DESC"), "DESC", line, DESC_SEPS, line_i)
            }
            Some(b';') => {
                vb.ctxs[line_ctx].seg(zset, &[SNIP_SPECIAL, SP_COMMENT])?;
                seg_one(vb, zset, fid("COMMENT"), "COMMENT", ContextInit::dict(), line, line_i)
            }
            _ => {
                vb.ctxs[line_ctx].seg(zset, &[SNIP_SPECIAL, SP_SEQ])?;
                seg_seq(vb, zset, fid("SEQ"), "SEQ", line)
            }
        }
    }

    fn recon_line(&self, r: &mut Reconstructor, _line_i: u32) -> Result<LineMeta> {
        r.line_meta = LineMeta::default();
        r.recon_field(self, fid("LINE"))?;
        Ok(std::mem::take(&mut r.line_meta))
    }

    fn special(&self, r: &mut Reconstructor, id: u8, _arg: &[u8]) -> Result<()> {
        match id {
            SP_DESC => {
                r.recon_field(self, fid("DESC"))?;
                r.line_meta.id_line = true;
            }
            SP_SEQ => {
                r.recon_field(self, fid("SEQ"))?;
                if r.opts.fasta_single_line {
                    r.line_meta.suppress_eol = true;
                }
            }
            SP_COMMENT => {
                r.recon_field(self, fid("COMMENT"))?;
            }
            _ => {
                return Err(BiozError::Corrupt(format!("FASTA: unknown special handler {id}")))
            }
        }
        Ok(())
    }
}
