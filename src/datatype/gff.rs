//! Genomic-feature tables (GFF3 / GVF).
//!
//! Nine tab-separated columns; SEQID/START key the random-access index,
//! END delta-encodes against START and widens the RA range, and the
//! attributes column is info-style (`ID=x;Name=y`).  Mid-file `#`
//! comment lines are carried through a per-line selector, like FASTA's.

use crate::context::{ContextInit, SNIP_SPECIAL};
use crate::datatype::{DataType, DataTypeOps, SegEnv};
use crate::error::{BiozError, Result};
use crate::fingerprint::{Category, FieldId};
use crate::reconstruct::{LineMeta, Reconstructor};
use crate::segment::{
    note_value, round_sig2, seg_info, seg_one, seg_other_delta, seg_pos, InfoItem,
};
use crate::vblock::VBlock;

fn fid(name: &str) -> FieldId {
    FieldId::new(name, Category::Primary)
}

const SP_RECORD:  u8 = 0;
const SP_COMMENT: u8 = 1;

pub struct GffOps;

impl DataTypeOps for GffOps {
    fn data_type(&self) -> DataType {
        DataType::Gff
    }

    fn chrom_id(&self) -> Option<FieldId> {
        Some(fid("SEQID"))
    }

    fn txt_header_len(&self, txt: &[u8]) -> usize {
        let mut pos = 0;
        while pos < txt.len() && txt[pos] == b'#' {
            match txt[pos..].iter().position(|&b| b == b'\n') {
                Some(n) => pos += n + 1,
                None    => return txt.len(),
            }
        }
        pos
    }

    fn round_block(&self, txt: &[u8]) -> Option<Vec<u8>> {
        // Whitelisted numeric field: the score column (index 5).
        let mut out = Vec::with_capacity(txt.len());
        let mut pos = 0;
        while pos < txt.len() {
            let end = txt[pos..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|n| pos + n + 1)
                .unwrap_or(txt.len());
            let raw = &txt[pos..end];
            let (line, eol) = match raw {
                l if l.ends_with(b"\r\n") => (&l[..l.len() - 2], &b"\r\n"[..]),
                l if l.ends_with(b"\n")   => (&l[..l.len() - 1], &b"\n"[..]),
                l                         => (l, &b""[..]),
            };
            let fields: Vec<&[u8]> = line.split(|&b| b == b'\t').collect();
            if fields.len() == 9 && !line.starts_with(b"#") {
                for (i, f) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push(b'\t');
                    }
                    match (i, round_sig2(f)) {
                        (5, Some(r)) => out.extend_from_slice(&r),
                        _            => out.extend_from_slice(f),
                    }
                }
            } else {
                out.extend_from_slice(line);
            }
            out.extend_from_slice(eol);
            pos = end;
        }
        Some(out)
    }

    fn seg_line(
        &self,
        vb:     &mut VBlock,
        zset:   &crate::context::ContextSet,
        line:   &[u8],
        line_i: u32,
        env:    &SegEnv,
    ) -> Result<()> {
        let line_ctx = vb.ctx_idx(zset, fid("LINE"), "LINE", ContextInit::stable_dict());
        if line.starts_with(b"#") {
            vb.ctxs[line_ctx].seg(zset, &[SNIP_SPECIAL, SP_COMMENT])?;
            return seg_one(vb, zset, fid("COMMENT"), "COMMENT", ContextInit::dict(), line, line_i);
        }
        vb.ctxs[line_ctx].seg(zset, &[SNIP_SPECIAL, SP_RECORD])?;

        let fields: Vec<&[u8]> = line.split(|&b| b == b'\t').collect();
        if fields.len() != 9 {
            return Err(BiozError::malformed(
                env.path, vb.vblock_i, line_i,
                format!("expected 9 columns, found {}", fields.len()),
            ));
        }

        let seqid_i = vb.ctx_idx(zset, fid("SEQID"), "SEQID", ContextInit::stable_dict());
        let chrom_word = vb.ctxs[seqid_i].seg(zset, fields[0])?;
        note_value(&mut vb.ctxs[seqid_i], fields[0], line_i);

        seg_one(vb, zset, fid("SOURCE"), "SOURCE", ContextInit::dict(), fields[1], line_i)?;
        seg_one(vb, zset, fid("TYPE"), "TYPE", ContextInit::dict(), fields[2], line_i)?;
        seg_pos(vb, zset, fid("START"), "START", Some(chrom_word), fields[3], line_i)?;
        let end = seg_other_delta(vb, zset, fid("END"), "END", fid("START"), fields[4], line_i)?;
        if let Some(e) = end.filter(|&e| e >= 0) {
            vb.ra.extend_max(e as u64);
        }
        seg_one(vb, zset, fid("SCORE"), "SCORE", ContextInit::dict(), fields[5], line_i)?;
        seg_one(vb, zset, fid("STRAND"), "STRAND", ContextInit::dict(), fields[6], line_i)?;
        seg_one(vb, zset, fid("PHASE"), "PHASE", ContextInit::dict(), fields[7], line_i)?;

        if fields[8] == b"." {
            seg_one(vb, zset, fid("ATTRS"), "ATTRS", ContextInit::stable_dict(), b".", line_i)?;
        } else {
            let mut items = Vec::new();
            for item in fields[8].split(|&b| b == b';') {
                match item.iter().position(|&b| b == b'=') {
                    Some(p) => items.push(InfoItem {
                        name:  &item[..p],
                        value: Some(&item[p + 1..]),
                    }),
                    None => items.push(InfoItem { name: item, value: None }),
                }
            }
            seg_info(
                vb, zset, fid("ATTRS"), "ATTRS", &items, b';', b'=', Category::Info, line_i,
            )?;
        }
        Ok(())
    }

    fn recon_line(&self, r: &mut Reconstructor, _line_i: u32) -> Result<LineMeta> {
        r.line_meta = LineMeta::default();
        r.recon_field(self, fid("LINE"))?;
        Ok(std::mem::take(&mut r.line_meta))
    }

    fn special(&self, r: &mut Reconstructor, id: u8, _arg: &[u8]) -> Result<()> {
        match id {
            SP_COMMENT => {
                r.recon_field(self, fid("COMMENT"))?;
                Ok(())
            }
            SP_RECORD => {
                let line_i = r.line_i;
                r.recon_field(self, fid("SEQID"))?;
                r.line_meta.chrom_word = r.last_word(fid("SEQID"));
                for name in ["SOURCE", "TYPE", "START", "END", "SCORE", "STRAND", "PHASE", "ATTRS"] {
                    r.out.push(b'\t');
                    r.recon_field(self, fid(name))?;
                }
                let start = r.line_value(fid("START"), line_i).filter(|&v| v >= 0);
                let end = r.line_value(fid("END"), line_i).filter(|&v| v >= 0);
                if let Some(s) = start {
                    let s = s as u64;
                    let e = end.map(|e| e as u64).unwrap_or(s).max(s);
                    r.line_meta.pos_range = Some((s, e));
                }
                Ok(())
            }
            _ => Err(BiozError::Corrupt(format!("GFF: unknown special handler {id}"))),
        }
    }
}
