//! Aligned reads.
//!
//! Eleven fixed columns (QNAME FLAG RNAME POS MAPQ CIGAR RNEXT PNEXT TLEN
//! SEQ QUAL) plus optional TAG:TYPE:VALUE fields.  QNAME is a compound
//! identifier; RNAME/POS key the random-access index; RNEXT copies RNAME
//! when equal; PNEXT delta-encodes against POS; SEQ and QUAL are
//! sequence-like local payloads; optional fields are info-style with the
//! `TAG:TYPE` pair as the subcontext name.

use crate::context::ContextInit;
use crate::datatype::{DataType, DataTypeOps, SegEnv};
use crate::error::{BiozError, Result};
use crate::fingerprint::{Category, FieldId};
use crate::reconstruct::{LineMeta, Outcome, Reconstructor};
use crate::segment::{
    note_value, seg_compound, seg_info, seg_maybe_copy, seg_maybe_delta, seg_one,
    seg_other_delta, seg_pos, seg_seq, InfoItem,
};
use crate::vblock::VBlock;

fn fid(name: &str) -> FieldId {
    FieldId::new(name, Category::Primary)
}

const QNAME_SEPS: &[u8] = b":/_.";

pub struct SamOps;

impl DataTypeOps for SamOps {
    fn data_type(&self) -> DataType {
        DataType::Sam
    }

    fn chrom_id(&self) -> Option<FieldId> {
        Some(fid("RNAME"))
    }

    fn txt_header_len(&self, txt: &[u8]) -> usize {
        let mut pos = 0;
        while pos < txt.len() && txt[pos] == b'@' {
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
        if fields.len() < 11 {
            return Err(BiozError::malformed(
                env.path, vb.vblock_i, line_i,
                format!("expected at least 11 columns, found {}", fields.len()),
            ));
        }

        seg_compound(vb, zset, fid("QNAME"), "QNAME", fields[0], QNAME_SEPS, line_i)?;
        seg_one(vb, zset, fid("FLAG"), "FLAG", ContextInit::dict(), fields[1], line_i)?;

        let rname_i = vb.ctx_idx(zset, fid("RNAME"), "RNAME", ContextInit::stable_dict());
        let chrom_word = vb.ctxs[rname_i].seg(zset, fields[2])?;
        note_value(&mut vb.ctxs[rname_i], fields[2], line_i);

        // Unmapped reads (RNAME "*" / POS 0) stay out of the RA index.
        let mapped = fields[2] != b"*";
        seg_pos(
            vb, zset, fid("POS"), "POS",
            mapped.then_some(chrom_word),
            fields[3], line_i,
        )?;

        seg_one(vb, zset, fid("MAPQ"), "MAPQ", ContextInit::dict(), fields[4], line_i)?;
        seg_one(vb, zset, fid("CIGAR"), "CIGAR", ContextInit::dict(), fields[5], line_i)?;
        seg_maybe_copy(vb, zset, fid("RNEXT"), "RNEXT", fid("RNAME"), fields[6], line_i)?;
        seg_other_delta(vb, zset, fid("PNEXT"), "PNEXT", fid("POS"), fields[7], line_i)?;
        seg_maybe_delta(vb, zset, fid("TLEN"), "TLEN", fields[8], line_i)?;
        seg_seq(vb, zset, fid("SEQ"), "SEQ", fields[9])?;
        seg_seq(vb, zset, fid("QUAL"), "QUAL", fields[10])?;

        // Optional fields: the OPT context always gets a reference so rows
        // with and without them stay aligned.
        let opt_i = vb.ctx_idx(zset, fid("OPT"), "OPT", ContextInit::stable_dict());
        if fields.len() > 11 {
            let mut items = Vec::new();
            for field in &fields[11..] {
                // TAG:TYPE:VALUE — the subcontext name is "TAG:TYPE".
                let mut colons = field.iter().enumerate().filter(|&(_, &b)| b == b':');
                let (_first, second) = (colons.next(), colons.next());
                match second {
                    Some((p, _)) => items.push(InfoItem {
                        name:  &field[..p],
                        value: Some(&field[p + 1..]),
                    }),
                    None => {
                        return Err(BiozError::malformed(
                            env.path, vb.vblock_i, line_i,
                            "optional field is not TAG:TYPE:VALUE",
                        ))
                    }
                }
            }
            seg_info(
                vb, zset, fid("OPT"), "OPT", &items, b'\t', b':', Category::Info, line_i,
            )?;
        } else {
            vb.ctxs[opt_i].seg_missing();
        }
        Ok(())
    }

    fn recon_line(&self, r: &mut Reconstructor, line_i: u32) -> Result<LineMeta> {
        let mut meta = LineMeta::default();

        r.recon_field(self, fid("QNAME"))?;
        for name in ["FLAG", "RNAME", "POS", "MAPQ", "CIGAR", "RNEXT", "PNEXT", "TLEN", "SEQ", "QUAL"]
        {
            r.out.push(b'\t');
            r.recon_field(self, fid(name))?;
        }
        meta.chrom_word = r.last_word(fid("RNAME"));
        if let Some(pos) = r.line_value(fid("POS"), line_i).filter(|&v| v > 0) {
            meta.pos_range = Some((pos as u64, pos as u64));
        } else {
            meta.chrom_word = None;
        }

        let tab_pos = r.out.len();
        r.out.push(b'\t');
        if r.recon_field(self, fid("OPT"))? == Outcome::Missing {
            r.out.truncate(tab_pos);
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_len_is_at_lines() {
        let txt = b"@HD\tVN:1.6\n@SQ\tSN:chr1\tLN:1000\nr1\t0\tchr1\t100\t60\t4M\t*\t0\t0\tACGT\tIIII\n";
        let n = SamOps.txt_header_len(txt);
        assert!(txt[n..].starts_with(b"r1\t"));
    }
}
