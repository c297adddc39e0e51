//! Data types — one segmenter/reconstructor capability set per supported
//! format.
//!
//! Dispatch is a table lookup on [`DataType`], not inheritance: every
//! format implements [`DataTypeOps`] and the registry hands out a static
//! reference.  The capabilities mirror what the pipeline needs from a
//! format: header extraction, block-boundary resynchronization, row
//! segmentation, row reconstruction, and the format's special snip
//! handlers.

use std::path::Path;

use crate::context::ContextSet;
use crate::error::{BiozError, Result};
use crate::fingerprint::FieldId;
use crate::reconstruct::{LineMeta, Reconstructor};
use crate::vblock::VBlock;

pub mod fasta;
pub mod fastq;
pub mod gff;
pub mod me23;
pub mod sam;
pub mod vcf;

// ── DataType ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataType {
    Vcf   = 0,
    Sam   = 1,
    Fastq = 2,
    Fasta = 3,
    Gff   = 4,
    Me23  = 5,
}

impl DataType {
    pub fn from_u8(v: u8) -> Option<DataType> {
        match v {
            0 => Some(DataType::Vcf),
            1 => Some(DataType::Sam),
            2 => Some(DataType::Fastq),
            3 => Some(DataType::Fasta),
            4 => Some(DataType::Gff),
            5 => Some(DataType::Me23),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Vcf   => "VCF",
            DataType::Sam   => "SAM",
            DataType::Fastq => "FASTQ",
            DataType::Fasta => "FASTA",
            DataType::Gff   => "GFF",
            DataType::Me23  => "23ANDME",
        }
    }
}

/// Per-call segmentation environment (error context, component facts).
pub struct SegEnv<'a> {
    pub path: &'a str,
    /// VCF: sample-column count declared by the component's text header.
    pub samples: usize,
}

// ── Capability trait ─────────────────────────────────────────────────────────

pub trait DataTypeOps: Send + Sync {
    fn data_type(&self) -> DataType;

    /// The field whose word indices key the random-access index, if this
    /// format has genomic coordinates.
    fn chrom_id(&self) -> Option<FieldId> {
        None
    }

    /// Whether the grep filter (identifier substring, record-granular)
    /// applies to this format.
    fn greppable(&self) -> bool {
        false
    }

    /// Byte length of the leading text header (always a whole number of
    /// lines; 0 for headerless formats).
    fn txt_header_len(&self, txt: &[u8]) -> usize;

    /// Concatenation-mode compatibility between the first component's
    /// header and a later one's.
    fn check_concat(&self, _path: &str, _first: &[u8], _other: &[u8]) -> Result<()> {
        Ok(())
    }

    /// How many trailing bytes of a block do not form complete records
    /// and must carry over into the next block.
    fn unconsumed(&self, txt: &[u8]) -> usize {
        // Default: a partial final line.
        match txt.iter().rposition(|&b| b == b'\n') {
            Some(n) => txt.len() - n - 1,
            None    => txt.len(),
        }
    }

    /// Opt-in numeric rounding pre-pass over one block's text.  Returns
    /// the rewritten text, or `None` when the format has no whitelisted
    /// fields.  Runs before the digest sees the block.
    fn round_block(&self, _txt: &[u8]) -> Option<Vec<u8>> {
        None
    }

    /// VCF: number of per-sample columns declared by the text header.
    fn sample_count(&self, _txt_header: &[u8]) -> usize {
        0
    }

    /// Parse one line (terminator already stripped) into contexts.
    fn seg_line(
        &self,
        vb:     &mut VBlock,
        zset:   &ContextSet,
        line:   &[u8],
        line_i: u32,
        env:    &SegEnv,
    ) -> Result<()>;

    /// Reconstruct one line (without terminator) into the output buffer.
    fn recon_line(&self, r: &mut Reconstructor, line_i: u32) -> Result<LineMeta>;

    /// Data-type-specific special snip handler.
    fn special(&self, _r: &mut Reconstructor, id: u8, _arg: &[u8]) -> Result<()> {
        Err(BiozError::Corrupt(format!(
            "{}: unknown special handler {id}",
            self.data_type().name()
        )))
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

pub fn ops(dt: DataType) -> &'static dyn DataTypeOps {
    match dt {
        DataType::Vcf   => &vcf::VcfOps,
        DataType::Sam   => &sam::SamOps,
        DataType::Fastq => &fastq::FastqOps,
        DataType::Fasta => &fasta::FastaOps,
        DataType::Gff   => &gff::GffOps,
        DataType::Me23  => &me23::Me23Ops,
    }
}

// ── Detection ────────────────────────────────────────────────────────────────

/// Identify the data type of an input: content sniff first, extension
/// second.  `None` means the input is unsupported (skipped with a warning
/// in multi-file mode).
pub fn detect(path: &Path, head: &[u8]) -> Option<DataType> {
    if head.starts_with(b"##fileformat=VCF") {
        return Some(DataType::Vcf);
    }
    if head.starts_with(b"##gff-version") {
        return Some(DataType::Gff);
    }
    for tag in [b"@HD\t".as_ref(), b"@SQ\t", b"@RG\t", b"@PG\t", b"@CO\t"] {
        if head.starts_with(tag) {
            return Some(DataType::Sam);
        }
    }
    if head.starts_with(b"#") {
        let first_line = &head[..head.iter().position(|&b| b == b'\n').unwrap_or(head.len())];
        if first_line.windows(4).any(|w| w == b"rsid")
            || first_line.windows(7).any(|w| w == b"23andMe")
        {
            return Some(DataType::Me23);
        }
    }
    if head.starts_with(b">") || head.starts_with(b";") {
        return Some(DataType::Fasta);
    }
    if head.starts_with(b"@") {
        return Some(DataType::Fastq);
    }

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "vcf"                  => Some(DataType::Vcf),
        "sam"                  => Some(DataType::Sam),
        "fastq" | "fq"         => Some(DataType::Fastq),
        "fasta" | "fa" | "fna" => Some(DataType::Fasta),
        "gff" | "gff3" | "gvf" => Some(DataType::Gff),
        _                      => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_prefers_content() {
        let p = Path::new("odd.txt");
        assert_eq!(detect(p, b"##fileformat=VCFv4.2\n"), Some(DataType::Vcf));
        assert_eq!(detect(p, b"@HD\tVN:1.6\n"), Some(DataType::Sam));
        assert_eq!(detect(p, b"@r1\nACGT\n+\nIIII\n"), Some(DataType::Fastq));
        assert_eq!(detect(p, b">seq1\nACGT\n"), Some(DataType::Fasta));
        assert_eq!(detect(p, b"##gff-version 3\n"), Some(DataType::Gff));
        assert_eq!(detect(p, b"# rsid\tchromosome\tposition\tgenotype\n"), Some(DataType::Me23));
        assert_eq!(detect(p, b"random bytes"), None);
    }

    #[test]
    fn detection_falls_back_to_extension() {
        assert_eq!(detect(Path::new("x.vcf"), b"chr1\t1\n"), Some(DataType::Vcf));
        assert_eq!(detect(Path::new("x.fq"), b""), Some(DataType::Fastq));
        assert_eq!(detect(Path::new("x.bin"), b"\x00\x01"), None);
    }
}
