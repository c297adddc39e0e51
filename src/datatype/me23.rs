//! Personal-genotype exports (rsid / chromosome / position / genotype).
//!
//! Identifiers are a short alpha prefix plus a number ("rs4477212",
//! "i713426"); the prefix rides in a special snip and the number
//! delta-encodes, since exports are roughly sorted by identifier.

use crate::context::{ContextInit, SNIP_SPECIAL};
use crate::datatype::{DataType, DataTypeOps, SegEnv};
use crate::error::{BiozError, Result};
use crate::fingerprint::{Category, FieldId};
use crate::reconstruct::{LineMeta, Reconstructor};
use crate::segment::{ascii_i64, note_value, seg_maybe_delta, seg_one, seg_pos};
use crate::vblock::VBlock;

fn fid(name: &str) -> FieldId {
    FieldId::new(name, Category::Primary)
}

const SP_RSID: u8 = 0;

pub struct Me23Ops;

impl DataTypeOps for Me23Ops {
    fn data_type(&self) -> DataType {
        DataType::Me23
    }

    fn chrom_id(&self) -> Option<FieldId> {
        Some(fid("CHROM"))
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

    fn seg_line(
        &self,
        vb:     &mut VBlock,
        zset:   &crate::context::ContextSet,
        line:   &[u8],
        line_i: u32,
        env:    &SegEnv,
    ) -> Result<()> {
        let fields: Vec<&[u8]> = line.split(|&b| b == b'\t').collect();
        if fields.len() != 4 {
            return Err(BiozError::malformed(
                env.path, vb.vblock_i, line_i,
                format!("expected 4 columns, found {}", fields.len()),
            ));
        }

        // rsid: alpha prefix + number where possible.
        let rsid = fields[0];
        let digits_at = rsid
            .iter()
            .position(|b| b.is_ascii_digit())
            .unwrap_or(rsid.len());
        let (prefix, number) = rsid.split_at(digits_at);
        let rsid_i = vb.ctx_idx(zset, fid("RSID"), "RSID", ContextInit::stable_dict());
        if !prefix.is_empty() && ascii_i64(number).is_some() {
            let mut snip = vec![SNIP_SPECIAL, SP_RSID];
            snip.extend_from_slice(prefix);
            vb.ctxs[rsid_i].seg(zset, &snip)?;
            seg_maybe_delta(vb, zset, fid("RSNUM"), "RSNUM", number, line_i)?;
        } else {
            vb.ctxs[rsid_i].seg(zset, rsid)?;
            note_value(&mut vb.ctxs[rsid_i], rsid, line_i);
        }

        let chrom_i = vb.ctx_idx(zset, fid("CHROM"), "CHROM", ContextInit::stable_dict());
        let chrom_word = vb.ctxs[chrom_i].seg(zset, fields[1])?;
        note_value(&mut vb.ctxs[chrom_i], fields[1], line_i);

        seg_pos(vb, zset, fid("POS"), "POS", Some(chrom_word), fields[2], line_i)?;
        seg_one(vb, zset, fid("GENO"), "GENO", ContextInit::dict(), fields[3], line_i)?;
        Ok(())
    }

    fn recon_line(&self, r: &mut Reconstructor, line_i: u32) -> Result<LineMeta> {
        let mut meta = LineMeta::default();
        r.recon_field(self, fid("RSID"))?;
        r.out.push(b'\t');
        r.recon_field(self, fid("CHROM"))?;
        meta.chrom_word = r.last_word(fid("CHROM"));
        r.out.push(b'\t');
        r.recon_field(self, fid("POS"))?;
        if let Some(pos) = r.line_value(fid("POS"), line_i).filter(|&v| v >= 0) {
            meta.pos_range = Some((pos as u64, pos as u64));
        }
        r.out.push(b'\t');
        r.recon_field(self, fid("GENO"))?;
        Ok(meta)
    }

    fn special(&self, r: &mut Reconstructor, id: u8, arg: &[u8]) -> Result<()> {
        match id {
            SP_RSID => {
                r.out.extend_from_slice(arg);
                r.recon_field(self, fid("RSNUM"))?;
                Ok(())
            }
            _ => Err(BiozError::Corrupt(format!("23ANDME: unknown special handler {id}"))),
        }
    }
}
