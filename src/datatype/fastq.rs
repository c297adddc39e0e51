//! Sequence reads — four physical lines per record.
//!
//! Line roles cycle: description, bases, separator ("+", possibly with a
//! repeated description), quality.  Blocks always start on a record
//! boundary (`unconsumed` carries partial records forward), so the role
//! is the line index modulo four.  The description line is the grep gate
//! for record-granular filtering.

use crate::context::ContextInit;
use crate::datatype::{DataType, DataTypeOps, SegEnv};
use crate::error::Result;

use crate::fingerprint::{Category, FieldId};
use crate::reconstruct::{LineMeta, Reconstructor};
use crate::segment::{seg_compound, seg_one, seg_seq};
use crate::vblock::VBlock;

fn fid(name: &str) -> FieldId {
    FieldId::new(name, Category::Primary)
}

const DESC_SEPS: &[u8] = b" :/=_";

pub struct FastqOps;

impl DataTypeOps for FastqOps {
    fn data_type(&self) -> DataType {
        DataType::Fastq
    }

    fn greppable(&self) -> bool {
        true
    }

    fn txt_header_len(&self, _txt: &[u8]) -> usize {
        0
    }

    fn unconsumed(&self, txt: &[u8]) -> usize {
        // Partial last line, then whole lines beyond the last complete
        // 4-line record.
        let tail = match txt.iter().rposition(|&b| b == b'\n') {
            Some(n) => txt.len() - n - 1,
            None    => return txt.len(),
        };
        let complete = &txt[..txt.len() - tail];
        let lines = complete.iter().filter(|&&b| b == b'\n').count();
        let carry_lines = lines % 4;
        let mut carry = tail;
        let mut pos = complete.len();
        for _ in 0..carry_lines {
            let start = complete[..pos - 1]
                .iter()
                .rposition(|&b| b == b'\n')
                .map(|n| n + 1)
                .unwrap_or(0);
            carry += pos - start;
            pos = start;
        }
        carry
    }

    fn seg_line(
        &self,
        vb:     &mut VBlock,
        zset:   &crate::context::ContextSet,
        line:   &[u8],
        line_i: u32,
        _env:   &SegEnv,
    ) -> Result<()> {
        match line_i % 4 {
            0 => seg_compound(vb, zset, fid("DESC"), "DESC", line, DESC_SEPS, line_i),
            1 => seg_seq(vb, zset, fid("SEQ"), "SEQ", line),
            2 => seg_one(vb, zset, fid("PLUS"), "PLUS", ContextInit::dict(), line, line_i),
            _ => seg_seq(vb, zset, fid("QUAL"), "QUAL", line),
        }
    }

    fn recon_line(&self, r: &mut Reconstructor, line_i: u32) -> Result<LineMeta> {
        let mut meta = LineMeta::default();
        match line_i % 4 {
            0 => {
                r.recon_field(self, fid("DESC"))?;
                meta.id_line = true;
            }
            1 => {
                r.recon_field(self, fid("SEQ"))?;
            }
            2 => {
                r.recon_field(self, fid("PLUS"))?;
            }
            _ => {
                r.recon_field(self, fid("QUAL"))?;
            }
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconsumed_carries_partial_records() {
        let two_records =
            b"@r1\nACGT\n+\nIIII\n@r2\nACGT\n+\nIIII\n";
        assert_eq!(FastqOps.unconsumed(two_records), 0);

        // One full record plus 2.5 lines of the next.
        let partial = b"@r1\nACGT\n+\nIIII\n@r2\nACGT\n+\nII";
        assert_eq!(FastqOps.unconsumed(partial), b"@r2\nACGT\n+\nII".len());

        // Nothing complete at all.
        assert_eq!(FastqOps.unconsumed(b"@r1\nAC"), b"@r1\nAC".len());
    }
}
