//! Variant-call data.
//!
//! Columns: CHROM POS ID REF ALT QUAL FILTER INFO [FORMAT sample…].
//! CHROM/POS feed the random-access index; INFO is split so its ordered
//! name list becomes one template snip and each value lands in a
//! name-keyed type-1 subcontext (an `END=` value widens the block's RA
//! range); FORMAT values land in per-key type-2 subcontexts, one
//! reference per sample per key.

use crate::context::ContextInit;
use crate::datatype::{DataType, DataTypeOps, SegEnv};
use crate::error::{BiozError, Result};
use crate::fingerprint::{Category, FieldId};
use crate::reconstruct::{LineMeta, Outcome, Reconstructor};
use crate::segment::{
    ascii_i64, note_value, round_sig2, seg_info, seg_one, seg_pos, InfoItem,
};
use crate::vblock::VBlock;

fn fid(name: &str) -> FieldId {
    FieldId::new(name, Category::Primary)
}

/// INFO keys eligible for the opt-in two-significant-digit rounding.
const ROUND_KEYS: [&[u8]; 5] = [b"AF", b"MQ", b"QD", b"SB", b"BQ"];

pub struct VcfOps;

impl VcfOps {
    fn header_line<'a>(header: &'a [u8], tag: &[u8]) -> Option<&'a [u8]> {
        header
            .split(|&b| b == b'\n')
            .find(|l| l.starts_with(tag))
    }
}

impl DataTypeOps for VcfOps {
    fn data_type(&self) -> DataType {
        DataType::Vcf
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

    fn check_concat(&self, path: &str, first: &[u8], other: &[u8]) -> Result<()> {
        let a = Self::header_line(first, b"#CHROM");
        let b = Self::header_line(other, b"#CHROM");
        if a != b {
            return Err(BiozError::ConcatMismatch {
                path: path.to_owned(),
                why:  "sample column header differs from the first input".into(),
            });
        }
        Ok(())
    }

    fn sample_count(&self, txt_header: &[u8]) -> usize {
        Self::header_line(txt_header, b"#CHROM")
            .map(|l| {
                let cols = l.split(|&b| b == b'\t').count();
                cols.saturating_sub(9)
            })
            .unwrap_or(0)
    }

    fn round_block(&self, txt: &[u8]) -> Option<Vec<u8>> {
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
            round_vcf_line(line, &mut out);
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
        let fields: Vec<&[u8]> = line.split(|&b| b == b'\t').collect();
        if fields.len() < 8 {
            return Err(BiozError::malformed(
                env.path, vb.vblock_i, line_i,
                format!("expected at least 8 columns, found {}", fields.len()),
            ));
        }
        let expected = if env.samples == 0 { 8 } else { 9 + env.samples };
        if fields.len() != expected {
            return Err(BiozError::malformed(
                env.path, vb.vblock_i, line_i,
                format!("expected {expected} columns per the header, found {}", fields.len()),
            ));
        }

        // CHROM — the random-access key.
        let chrom_i = vb.ctx_idx(zset, fid("CHROM"), "CHROM", ContextInit::stable_dict());
        let chrom_word = vb.ctxs[chrom_i].seg(zset, fields[0])?;
        note_value(&mut vb.ctxs[chrom_i], fields[0], line_i);

        seg_pos(vb, zset, fid("POS"), "POS", Some(chrom_word), fields[1], line_i)?;

        seg_one(vb, zset, fid("ID"), "ID", ContextInit::dict(), fields[2], line_i)?;
        seg_one(vb, zset, fid("REF"), "REF", ContextInit::dict(), fields[3], line_i)?;
        seg_one(vb, zset, fid("ALT"), "ALT", ContextInit::dict(), fields[4], line_i)?;
        seg_one(vb, zset, fid("QUAL"), "QUAL", ContextInit::dict(), fields[5], line_i)?;
        seg_one(vb, zset, fid("FILTER"), "FILTER", ContextInit::dict(), fields[6], line_i)?;

        // INFO — self-describing name=value list.
        if fields[7] == b"." {
            seg_one(vb, zset, fid("INFO"), "INFO", ContextInit::stable_dict(), b".", line_i)?;
        } else {
            let mut items = Vec::new();
            let mut end_val: Option<i64> = None;
            for item in fields[7].split(|&b| b == b';') {
                match item.iter().position(|&b| b == b'=') {
                    Some(p) => {
                        let (name, value) = (&item[..p], &item[p + 1..]);
                        if name == b"END" {
                            end_val = ascii_i64(value);
                        }
                        items.push(InfoItem { name, value: Some(value) });
                    }
                    None => items.push(InfoItem { name: item, value: None }),
                }
            }
            seg_info(
                vb, zset, fid("INFO"), "INFO", &items, b';', b'=', Category::Info, line_i,
            )?;
            if let Some(e) = end_val.filter(|&e| e >= 0) {
                vb.ra.extend_max(e as u64);
            }
        }

        // FORMAT + samples.  The FORMAT context always gets a reference so
        // rows stay aligned even in sites-only files.
        let fmt_i = vb.ctx_idx(zset, fid("FORMAT"), "FORMAT", ContextInit::stable_dict());
        if fields.len() > 8 {
            let fmt = fields[8];
            vb.ctxs[fmt_i].seg(zset, fmt)?;
            note_value(&mut vb.ctxs[fmt_i], fmt, line_i);

            let keys: Vec<&[u8]> = fmt.split(|&b| b == b':').collect();
            for sample in &fields[9..] {
                let pieces: Vec<&[u8]> = sample.split(|&b| b == b':').collect();
                for (k, key) in keys.iter().enumerate() {
                    let key_name = String::from_utf8_lossy(key).into_owned();
                    let sub = FieldId::new(&key_name, Category::Format);
                    let ci = vb.ctx_idx(zset, sub, &key_name, ContextInit::dict());
                    match pieces.get(k) {
                        Some(p) if p.is_empty() => vb.ctxs[ci].seg_empty(),
                        Some(p) => {
                            vb.ctxs[ci].seg(zset, p)?;
                        }
                        None => vb.ctxs[ci].seg_missing(),
                    }
                }
            }
        } else {
            vb.ctxs[fmt_i].seg_missing();
        }
        Ok(())
    }

    fn recon_line(&self, r: &mut Reconstructor, line_i: u32) -> Result<LineMeta> {
        let mut meta = LineMeta::default();

        r.recon_field(self, fid("CHROM"))?;
        meta.chrom_word = r.last_word(fid("CHROM"));

        r.out.push(b'\t');
        r.recon_field(self, fid("POS"))?;
        let pos = r.line_value(fid("POS"), line_i).filter(|&v| v >= 0).map(|v| v as u64);

        for name in ["ID", "REF", "ALT", "QUAL", "FILTER", "INFO"] {
            r.out.push(b'\t');
            r.recon_field(self, fid(name))?;
        }
        let end = r
            .line_value(FieldId::new("END", Category::Info), line_i)
            .filter(|&v| v >= 0)
            .map(|v| v as u64);

        // FORMAT + samples.
        let tab_pos = r.out.len();
        r.out.push(b'\t');
        let fmt_start = r.out.len();
        match r.recon_field(self, fid("FORMAT"))? {
            Outcome::Missing => r.out.truncate(tab_pos),
            _ => {
                let fmt = r.out[fmt_start..].to_vec();
                let keys: Vec<Vec<u8>> =
                    fmt.split(|&b| b == b':').map(|k| k.to_vec()).collect();
                for _ in 0..r.sample_count {
                    r.out.push(b'\t');
                    for (k, key) in keys.iter().enumerate() {
                        let sep_pos = r.out.len();
                        if k > 0 {
                            r.out.push(b':');
                        }
                        let key_name = String::from_utf8_lossy(key).into_owned();
                        let sub = FieldId::new(&key_name, Category::Format);
                        if r.recon_field(self, sub)? == Outcome::Missing {
                            r.out.truncate(sep_pos);
                            break;
                        }
                    }
                }
            }
        }

        if let Some(p) = pos {
            meta.pos_range = Some((p, end.unwrap_or(p).max(p)));
        }
        Ok(meta)
    }
}

/// Rewrite one record line with the rounding whitelist applied: QUAL and
/// the whitelisted INFO values become two-significant-digit forms.
fn round_vcf_line(line: &[u8], out: &mut Vec<u8>) {
    let fields: Vec<&[u8]> = line.split(|&b| b == b'\t').collect();
    if fields.len() < 8 || line.starts_with(b"#") {
        out.extend_from_slice(line);
        return;
    }
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(b'\t');
        }
        match i {
            5 => match round_sig2(field) {
                Some(r) => out.extend_from_slice(&r),
                None    => out.extend_from_slice(field),
            },
            7 => {
                for (j, item) in field.split(|&b| b == b';').enumerate() {
                    if j > 0 {
                        out.push(b';');
                    }
                    match item.iter().position(|&b| b == b'=') {
                        Some(p) if ROUND_KEYS.contains(&&item[..p]) => {
                            out.extend_from_slice(&item[..=p]);
                            match round_sig2(&item[p + 1..]) {
                                Some(r) => out.extend_from_slice(&r),
                                None    => out.extend_from_slice(&item[p + 1..]),
                            }
                        }
                        _ => out.extend_from_slice(item),
                    }
                }
            }
            _ => out.extend_from_slice(field),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_len_covers_meta_and_column_line() {
        let txt = b"##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\nchr1\t100\t.\tA\tG\t.\tPASS\tAC=1\n";
        let n = VcfOps.txt_header_len(txt);
        assert!(txt[..n].ends_with(b"INFO\n"));
        assert!(txt[n..].starts_with(b"chr1"));
    }

    #[test]
    fn sample_count_from_chrom_line() {
        let h = b"##x\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\tS2\n";
        assert_eq!(VcfOps.sample_count(h), 2);
        let sites_only = b"#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n";
        assert_eq!(VcfOps.sample_count(sites_only), 0);
    }

    #[test]
    fn rounding_touches_only_whitelisted_fields() {
        let line = b"chr1\t100\trs1\tA\tG\t29.4371\tPASS\tAF=0.12345;DP=100";
        let mut out = Vec::new();
        round_vcf_line(line, &mut out);
        assert_eq!(out, b"chr1\t100\trs1\tA\tG\t29\tPASS\tAF=0.12;DP=100");
    }
}
