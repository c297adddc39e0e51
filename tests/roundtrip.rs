//! End-to-end round trips through the full pipeline: zip to a real file,
//! reopen, unzip, compare bytes.

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use biozip::random_access::RaEntry;
use biozip::reader::{unzip_to_file, unzip_to_vec, ArchiveReader, UnzipOptions};
use biozip::writer::{zip_files, ZipOptions};
use biozip::BiozError;

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Fixture {
        Fixture { dir: TempDir::new().unwrap() }
    }

    fn input(&self, name: &str, content: &[u8]) -> PathBuf {
        let p = self.dir.path().join(name);
        fs::write(&p, content).unwrap();
        p
    }

    fn archive(&self) -> PathBuf {
        self.dir.path().join("out.bioz")
    }
}

fn roundtrip(name: &str, content: &[u8]) -> Vec<u8> {
    roundtrip_with(name, content, ZipOptions::default(), &UnzipOptions::default())
}

fn roundtrip_with(
    name: &str,
    content: &[u8],
    zopts: ZipOptions,
    uopts: &UnzipOptions,
) -> Vec<u8> {
    let fx = Fixture::new();
    let input = fx.input(name, content);
    zip_files(&[input], &fx.archive(), zopts).unwrap();
    let (out, _) = unzip_to_vec(&fx.archive(), uopts).unwrap();
    out
}

// ── Scenario 1: two-line VCF, identity + RA entry ────────────────────────────

#[test]
fn vcf_two_lines_roundtrip_and_ra_entry() {
    let content = b"chr1\t100\t.\tA\tG\t.\tPASS\tAC=1\nchr1\t101\t.\tC\tT\t.\tPASS\tAC=2\n";
    let fx = Fixture::new();
    let input = fx.input("two.vcf", content);
    zip_files(&[input], &fx.archive(), ZipOptions::default()).unwrap();

    let reader = ArchiveReader::open(&fx.archive(), None).unwrap();
    assert_eq!(
        reader.ra.entries,
        vec![RaEntry { chrom_word: 0, vblock_i: 0, min_pos: 100, max_pos: 101 }]
    );

    let (out, stats) = unzip_to_vec(&fx.archive(), &UnzipOptions::default()).unwrap();
    assert_eq!(out, content);
    assert!(stats.verified);
}

// ── Scenario 2: FASTQ grep on the identifier line ────────────────────────────

#[test]
fn fastq_grep_is_record_granular() {
    let content = b"@r1 len=10\nACGTACGTAC\n+\nIIIIIIIIII\n";
    let fx = Fixture::new();
    let input = fx.input("reads.fastq", content);
    zip_files(&[input], &fx.archive(), ZipOptions::default()).unwrap();

    let hit = UnzipOptions { grep: Some("r1".into()), ..Default::default() };
    let (out, _) = unzip_to_vec(&fx.archive(), &hit).unwrap();
    assert_eq!(out, content, "matching substring keeps all four lines");

    let miss = UnzipOptions { grep: Some("r2".into()), ..Default::default() };
    let (out, _) = unzip_to_vec(&fx.archive(), &miss).unwrap();
    assert_eq!(out, b"", "no match yields empty output, no record separator");
}

// ── Scenario 3: FASTA line wrapping, both decode modes from one archive ──────

#[test]
fn fasta_wrap_and_single_line_modes() {
    let content = b">s1 descr\nAAAAAAAAAAAAAAAAAAAA\nCCCCCCCCCCCCCCCCCCCC\n";
    let fx = Fixture::new();
    let input = fx.input("ref.fasta", content);
    zip_files(&[input], &fx.archive(), ZipOptions::default()).unwrap();

    let (wrapped, _) = unzip_to_vec(&fx.archive(), &UnzipOptions::default()).unwrap();
    assert_eq!(wrapped, content, "default decode preserves the 20-20 split");

    let joined_opts = UnzipOptions { fasta_single_line: true, ..Default::default() };
    let (joined, _) = unzip_to_vec(&fx.archive(), &joined_opts).unwrap();
    assert_eq!(
        joined,
        b">s1 descr\nAAAAAAAAAAAAAAAAAAAACCCCCCCCCCCCCCCCCCCC\n".to_vec(),
        "single-line mode joins to one 40-char line"
    );

    // Toggling back on a second decode of the same archive restores the
    // original wrapping.
    let (wrapped_again, _) = unzip_to_vec(&fx.archive(), &UnzipOptions::default()).unwrap();
    assert_eq!(wrapped_again, content);
}

// ── Scenario 4: concatenation of two VCF components ──────────────────────────

#[test]
fn vcf_concatenation_two_components() {
    let header = b"##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n";
    let body1 = b"chr1\t100\t.\tA\tG\t.\tPASS\tAC=1\n";
    let body2 = b"chr2\t500\t.\tC\tT\t.\tPASS\tAC=2\n";
    let mut in1 = header.to_vec();
    in1.extend_from_slice(body1);
    let mut in2 = header.to_vec();
    in2.extend_from_slice(body2);

    let fx = Fixture::new();
    let a = fx.input("a.vcf", &in1);
    let b = fx.input("b.vcf", &in2);
    let stats = zip_files(&[a, b], &fx.archive(), ZipOptions::default()).unwrap();
    assert_eq!(stats.components, 2);

    let (out, st) = unzip_to_vec(&fx.archive(), &UnzipOptions::default()).unwrap();
    let mut expected = in1.clone();
    expected.extend_from_slice(&in2);
    assert_eq!(out, expected, "decode equals the byte-concatenation of inputs");
    assert!(st.verified, "whole-archive digest equals the concatenation digest");
}

#[test]
fn vcf_concatenation_rejects_different_sample_headers() {
    let in1 = b"##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\nchr1\t1\t.\tA\tG\t.\t.\t.\tGT\t0/1\n";
    let in2 = b"##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS2\nchr1\t2\t.\tA\tG\t.\t.\t.\tGT\t1/1\n";
    let fx = Fixture::new();
    let a = fx.input("a.vcf", in1);
    let b = fx.input("b.vcf", in2);
    let err = zip_files(&[a, b], &fx.archive(), ZipOptions::default()).unwrap_err();
    assert!(matches!(err, BiozError::ConcatMismatch { .. }));
    assert!(!fx.archive().exists(), "no partial archive is left behind");
}

// ── Scenario 5: INFO END extends the row into the region ─────────────────────

#[test]
fn vcf_end_extends_region_overlap() {
    let content = b"chr1\t150\t.\tA\t<DEL>\t.\tPASS\tEND=200\n";
    let fx = Fixture::new();
    let input = fx.input("sv.vcf", content);
    zip_files(&[input], &fx.archive(), ZipOptions::default()).unwrap();

    let filt = UnzipOptions { regions: vec!["chr1:195-205".into()], ..Default::default() };
    let (out, _) = unzip_to_vec(&fx.archive(), &filt).unwrap();
    assert_eq!(out, content, "END=200 reaches into [195,205]");

    let before = UnzipOptions { regions: vec!["chr1:100-140".into()], ..Default::default() };
    let (out, _) = unzip_to_vec(&fx.archive(), &before).unwrap();
    assert_eq!(out, b"", "the record starts after the region");

    let (out, _) = unzip_to_vec(&fx.archive(), &UnzipOptions::default()).unwrap();
    assert_eq!(out, content, "no filter includes it unconditionally");
}

// ── Scenario 6: encryption and wrong password ────────────────────────────────

#[test]
fn encrypted_roundtrip_and_wrong_password() {
    let content = b"chr1\t100\t.\tA\tG\t.\tPASS\tAC=1\n";
    let fx = Fixture::new();
    let input = fx.input("enc.vcf", content);
    let zopts = ZipOptions { password: Some("hunter2".into()), ..Default::default() };
    zip_files(&[input], &fx.archive(), zopts).unwrap();

    let good = UnzipOptions { password: Some("hunter2".into()), ..Default::default() };
    let (out, st) = unzip_to_vec(&fx.archive(), &good).unwrap();
    assert_eq!(out, content);
    assert!(st.verified);

    // No password at all.
    let none = UnzipOptions::default();
    assert!(matches!(
        unzip_to_vec(&fx.archive(), &none).unwrap_err(),
        BiozError::PasswordRequired
    ));

    // Wrong password: the first-section decrypt self-test fails, and no
    // output file is left on disk.
    let bad = UnzipOptions { password: Some("hunter3".into()), ..Default::default() };
    let out_path = fx.dir.path().join("plain.vcf");
    let err = unzip_to_file(&fx.archive(), &out_path, &bad).unwrap_err();
    assert!(matches!(err, BiozError::WrongPassword));
    assert!(!out_path.exists());
}

// ── Boundary behaviors ───────────────────────────────────────────────────────

#[test]
fn single_line_without_terminator() {
    let content = b"chr1\t100\t.\tA\tG\t.\tPASS\tAC=1";
    assert_eq!(roundtrip("one.vcf", content), content);
}

#[test]
fn windows_line_endings_preserved_exactly() {
    let content = b"chr1\t100\t.\tA\tG\t.\tPASS\tAC=1\r\nchr1\t101\t.\tC\tT\t.\tPASS\tAC=2\n";
    assert_eq!(roundtrip("crlf.vcf", content), content);
}

#[test]
fn empty_info_value_differs_from_flag() {
    let content = b"chr1\t100\t.\tA\tG\t.\tPASS\tAC=;DB\nchr1\t101\t.\tC\tT\t.\tPASS\tDB\n";
    assert_eq!(roundtrip("empty.vcf", content), content);
}

#[test]
fn fastq_records_span_block_boundaries() {
    // Tiny blocks force records across read boundaries; the carried-over
    // bytes must feed the next block.
    let mut content = Vec::new();
    for i in 0..200 {
        content.extend_from_slice(format!("@read{i} len=8\nACGTACGT\n+\nIIIIJJJJ\n").as_bytes());
    }
    let zopts = ZipOptions { block_size: 64, ..Default::default() };
    let out = roundtrip_with("many.fastq", &content, zopts.clone(), &UnzipOptions::default());
    assert_eq!(out, content);

    // And grep still works across blocks with record granularity.
    let fx = Fixture::new();
    let input = fx.input("many.fastq", &content);
    zip_files(&[input], &fx.archive(), zopts).unwrap();
    let filt = UnzipOptions { grep: Some("read19 ".into()), ..Default::default() };
    let (out, _) = unzip_to_vec(&fx.archive(), &filt).unwrap();
    assert_eq!(out, b"@read19 len=8\nACGTACGT\n+\nIIIIJJJJ\n".to_vec());
}

#[test]
fn region_filter_is_exactly_the_overlapping_rows() {
    let mut content = Vec::new();
    for i in 0..20 {
        content.extend_from_slice(
            format!("chr1\t{}\t.\tA\tG\t.\tPASS\tAC=1\n", 100 + i).as_bytes(),
        );
    }
    for i in 0..20 {
        content.extend_from_slice(
            format!("chr2\t{}\t.\tC\tT\t.\tPASS\tAC=2\n", 200 + i).as_bytes(),
        );
    }
    let fx = Fixture::new();
    let input = fx.input("multi.vcf", &content);
    // Small blocks: chr1 spans several blocks, chr2 likewise.
    let zopts = ZipOptions { block_size: 96, ..Default::default() };
    zip_files(&[input], &fx.archive(), zopts).unwrap();

    let reader = ArchiveReader::open(&fx.archive(), None).unwrap();
    assert!(reader.ra.entries.len() > 2, "several blocks, several RA entries");

    let filt = UnzipOptions { regions: vec!["chr2:205-210".into()], ..Default::default() };
    let (out, _) = unzip_to_vec(&fx.archive(), &filt).unwrap();
    let expected: Vec<u8> = (205..=210)
        .flat_map(|p| format!("chr2\t{p}\t.\tC\tT\t.\tPASS\tAC=2\n").into_bytes())
        .collect();
    assert_eq!(out, expected, "filtered output is exactly the in-range rows, in order");

    // A region on an unknown chromosome matches nothing and is not an error.
    let nohit = UnzipOptions { regions: vec!["chrZ:1-2".into()], ..Default::default() };
    let (out, _) = unzip_to_vec(&fx.archive(), &nohit).unwrap();
    assert_eq!(out, b"");
}

// ── Per-format round trips ───────────────────────────────────────────────────

#[test]
fn sam_roundtrip_with_optional_fields() {
    let content = b"@HD\tVN:1.6\n@SQ\tSN:chr1\tLN:10000\n\
r1\t0\tchr1\t100\t60\t4M\t=\t150\t54\tACGT\tIIII\tNM:i:0\tMD:Z:4\n\
r2\t16\tchr1\t150\t60\t4M\tchr1\t100\t-54\tGGCA\tJJJJ\tNM:i:1\n\
r3\t4\t*\t0\t0\t*\t*\t0\t0\t*\t*\n";
    assert_eq!(roundtrip("reads.sam", content), content.to_vec());
}

#[test]
fn vcf_with_samples_roundtrip() {
    let content = b"##fileformat=VCFv4.2\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\tS2\n\
chr1\t100\trs1\tA\tG\t29.4\tPASS\tAC=1;DP=20\tGT:DP\t0|1:13\t1|1\n\
chr1\t101\trs2\tC\tT\t3.2\tq10\tAC=2\tGT:DP\t0|0:7\t0|1:9\n";
    assert_eq!(roundtrip("samples.vcf", content), content.to_vec());
}

#[test]
fn gff_roundtrip_with_interior_comments() {
    let content = b"##gff-version 3\n\
chr1\ttest\tgene\t100\t200\t.\t+\t.\tID=gene1;Name=abc\n\
# interior comment line\n\
chr1\ttest\texon\t150\t180\t5.5\t+\t0\tID=exon1;Parent=gene1\n";
    assert_eq!(roundtrip("feat.gff3", content), content.to_vec());
}

#[test]
fn gff_region_filter_drops_comments() {
    let content = b"##gff-version 3\n\
chr1\ttest\tgene\t100\t200\t.\t+\t.\tID=g1\n\
# interior comment line\n\
chr1\ttest\tgene\t500\t600\t.\t+\t.\tID=g2\n";
    let fx = Fixture::new();
    let input = fx.input("feat.gff3", content);
    zip_files(&[input], &fx.archive(), ZipOptions::default()).unwrap();
    let filt = UnzipOptions { regions: vec!["chr1:550-560".into()], ..Default::default() };
    let (out, _) = unzip_to_vec(&fx.archive(), &filt).unwrap();
    assert_eq!(
        out,
        b"##gff-version 3\nchr1\ttest\tgene\t500\t600\t.\t+\t.\tID=g2\n".to_vec()
    );
}

#[test]
fn me23_roundtrip() {
    let content = b"# This data file generated by 23andMe\n\
# rsid\tchromosome\tposition\tgenotype\n\
rs4477212\t1\t82154\tAA\n\
rs3094315\t1\t752566\tAG\n\
i713426\t1\t891945\t--\n";
    assert_eq!(roundtrip("genome.txt", content), content.to_vec());
}

#[test]
fn fasta_grep_selects_description_spans() {
    let content = b">alpha\nAAAA\nCCCC\n>beta\nGGGG\n>gamma\nTTTT\nTTTT\n";
    let fx = Fixture::new();
    let input = fx.input("ref.fasta", content);
    zip_files(&[input], &fx.archive(), ZipOptions::default()).unwrap();

    let filt = UnzipOptions { grep: Some("beta".into()), ..Default::default() };
    let (out, _) = unzip_to_vec(&fx.archive(), &filt).unwrap();
    assert_eq!(out, b">beta\nGGGG\n".to_vec());
}

// ── Opt-in rounding ──────────────────────────────────────────────────────────

#[test]
fn rounding_is_applied_before_digest_and_verifies() {
    let content = b"chr1\t100\trs1\tA\tG\t29.4371\tPASS\tAF=0.12345;DP=100\n";
    let fx = Fixture::new();
    let input = fx.input("round.vcf", content);
    let zopts = ZipOptions { round: true, ..Default::default() };
    zip_files(&[input], &fx.archive(), zopts).unwrap();

    let (out, st) = unzip_to_vec(&fx.archive(), &UnzipOptions::default()).unwrap();
    assert_eq!(out, b"chr1\t100\trs1\tA\tG\t29\tPASS\tAF=0.12;DP=100\n".to_vec());
    assert!(st.verified, "digest covers the rounded bytes");
}

// ── Large multi-block VCF with per-block POS deltas ──────────────────────────

#[test]
fn vcf_chromosome_spanning_many_blocks() {
    let mut content = Vec::new();
    for i in 0..5000u64 {
        content.extend_from_slice(
            format!("chr1\t{}\trs{}\tA\tG\t.\tPASS\tDP={}\n", 1000 + 3 * i, i, i % 97).as_bytes(),
        );
    }
    let zopts = ZipOptions { block_size: 4096, ..Default::default() };
    let out = roundtrip_with("big.vcf", &content, zopts, &UnzipOptions::default());
    assert_eq!(out, content);
}

// ── Unsupported inputs ───────────────────────────────────────────────────────

#[test]
fn unsupported_single_input_fails_multi_skips() {
    let fx = Fixture::new();
    let bad = fx.input("blob.bin", b"\x00\x01\x02\x03");
    let err = zip_files(&[bad.clone()], &fx.archive(), ZipOptions::default()).unwrap_err();
    assert!(matches!(err, BiozError::SkippedInput { .. }));
    assert!(!fx.archive().exists());

    let good = fx.input("ok.vcf", b"chr1\t100\t.\tA\tG\t.\tPASS\tAC=1\n");
    let stats = zip_files(&[bad, good], &fx.archive(), ZipOptions::default()).unwrap();
    assert_eq!(stats.components, 1);
    assert_eq!(stats.skipped, 1);
}
