//! Compress session — the archive manager's write side.
//!
//! State machine: `Idle → OpenedOutput → WroteFileHeader → [per input]
//! WroteComponentHeader → WroteBlocks → WroteComponentDicts →
//! WroteFooter → Closed`.  All archive bytes flow through the I/O
//! thread; workers produce framed sections and nothing else.  On any
//! fatal error the partial archive is removed — no half-written `.bioz`
//! is ever left behind.

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use crate::archive::{ComponentEnt, FileHeader, Footer, SectionEnt};
use crate::codec::CodecId;
use crate::context::{ContextSet, LocalType};
use crate::crypto;
use crate::datatype::{self, DataType, DataTypeOps, SegEnv};
use crate::digest::RunningDigest;
use crate::dispatch::{self, run_pipeline};
use crate::error::{BiozError, Result};
use crate::random_access::{RaEntry, RaIndex};
use crate::section::{build_section, build_section_parts, SectionBuf, SubHeader, VB_NONE};
use crate::segment::seg_eol;
use crate::vblock::{VBlock, DEFAULT_VBLOCK_SIZE};

/// Default compression level (zstd scale; brotli clamps it to quality).
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

// ── Options & stats ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ZipOptions {
    pub block_size: usize,
    /// Worker threads; 0 = all available cores.
    pub threads:    usize,
    pub level:      i32,
    pub password:   Option<String>,
    /// Opt-in two-significant-digit rounding of whitelisted fields.
    pub round:      bool,
    /// Override data-type detection.
    pub input_type: Option<DataType>,
}

impl Default for ZipOptions {
    fn default() -> Self {
        ZipOptions {
            block_size: DEFAULT_VBLOCK_SIZE,
            threads:    0,
            level:      DEFAULT_COMPRESSION_LEVEL,
            password:   None,
            round:      false,
            input_type: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ZipStats {
    pub components: usize,
    pub skipped:    usize,
    pub txt_bytes:  u64,
    pub out_bytes:  u64,
}

// ── Session state machine ────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum ZipState {
    WroteFileHeader,
    WroteFooter,
}

pub struct ZipWriter {
    out:      File,
    out_path: PathBuf,
    opts:     ZipOptions,
    key:      Option<[u8; 32]>,
    header:   FileHeader,

    zset:       ContextSet,
    digest:     RunningDigest,
    sections:   Vec<SectionEnt>,
    components: Vec<ComponentEnt>,
    ra:         Vec<RaEntry>,

    next_vb:      u32,
    dict_sec_i:   u16,
    first_header: Option<Vec<u8>>,
    archive_dt:   Option<DataType>,

    state: ZipState,
}

impl ZipWriter {
    /// Idle → OpenedOutput → WroteFileHeader.
    pub fn create(out_path: &Path, opts: ZipOptions) -> Result<ZipWriter> {
        let mut out = File::create(out_path)?;
        let header = FileHeader::new(opts.block_size as u32, opts.password.is_some());
        header.write(&mut out)?;

        let key = match &opts.password {
            Some(pwd) => Some(crypto::derive_key(pwd, header.archive_uuid.as_bytes())?),
            None      => None,
        };

        Ok(ZipWriter {
            out,
            out_path: out_path.to_owned(),
            opts,
            key,
            header,
            zset: ContextSet::new(),
            digest: RunningDigest::new(),
            sections: Vec::new(),
            components: Vec::new(),
            ra: Vec::new(),
            next_vb: 0,
            dict_sec_i: 0,
            first_header: None,
            archive_dt: None,
            state: ZipState::WroteFileHeader,
        })
    }

    pub fn uuid(&self) -> uuid::Uuid {
        self.header.archive_uuid
    }

    fn append_section(
        out:      &mut File,
        sections: &mut Vec<SectionEnt>,
        sec:      &SectionBuf,
        vblock_i: u32,
    ) -> Result<u64> {
        let offset = out.stream_position()?;
        out.write_all(&sec.bytes)?;
        sections.push(SectionEnt {
            section_type: sec.section_type,
            vblock_i,
            offset,
            len: sec.bytes.len() as u64,
            field_id: sec.field_id.unwrap_or(crate::fingerprint::FieldId::NONE),
        });
        Ok(sec.bytes.len() as u64)
    }

    /// WroteComponentHeader → WroteBlocks → WroteComponentDicts for one
    /// input file.
    pub fn add_component(&mut self, path: &Path) -> Result<()> {
        debug_assert_eq!(self.state, ZipState::WroteFileHeader);
        let path_str = path.display().to_string();
        let mut file = File::open(path)?;

        // Read the first block's worth to detect the type and carve off
        // the text header (which must fit in one block).
        let mut head = vec![0u8; self.opts.block_size.max(64 * 1024)];
        let mut head_len = 0usize;
        loop {
            let n = file.read(&mut head[head_len..])?;
            if n == 0 {
                break;
            }
            head_len += n;
            if head_len == head.len() {
                break;
            }
        }
        head.truncate(head_len);
        let head_eof = head_len < self.opts.block_size.max(64 * 1024);

        let dt = self
            .opts
            .input_type
            .or_else(|| datatype::detect(path, &head))
            .ok_or(BiozError::SkippedInput { path: path_str.clone() })?;
        match self.archive_dt {
            None => self.archive_dt = Some(dt),
            Some(first) if first != dt => {
                return Err(BiozError::ConcatMismatch {
                    path: path_str,
                    why:  format!("data type {} differs from first input ({})", dt.name(), first.name()),
                })
            }
            _ => {}
        }
        let ops = datatype::ops(dt);

        let header_len = ops.txt_header_len(&head);
        if header_len == head.len() && !head_eof {
            return Err(BiozError::malformed(
                &path_str, 0, 0, "text header exceeds one block",
            ));
        }
        let txt_header = head[..header_len].to_vec();
        match &self.first_header {
            None    => self.first_header = Some(txt_header.clone()),
            Some(f) => ops.check_concat(&path_str, f, &txt_header)?,
        }
        let samples = ops.sample_count(&txt_header);

        // Component header section.
        let component_i = self.components.len() as u32;
        let sec = build_section(
            &SubHeader::TxtHeader { data_type: dt as u8 },
            &txt_header,
            CodecId::Zstd,
            self.opts.level,
            component_i,
            0,
            self.key.as_ref(),
        )?;
        Self::append_section(&mut self.out, &mut self.sections, &sec, component_i)?;
        self.digest.update(&txt_header);

        // ── Block pipeline ───────────────────────────────────────────────
        let first_vb = self.next_vb;
        let block_size = self.opts.block_size;
        let level = self.opts.level;
        let round = self.opts.round;
        let key = self.key;
        let mut comp_txt_len = txt_header.len() as u64;

        let digest = &mut self.digest;
        let next_vb = &mut self.next_vb;
        let out = &mut self.out;
        let sections = &mut self.sections;
        let ra = &mut self.ra;
        let zset = &self.zset;

        let mut carry: Vec<u8> = head[header_len..].to_vec();
        let mut eof = head_eof;
        let mut chunk = vec![0u8; 256 * 1024];
        let path_for_workers = path_str.clone();

        run_pipeline(
            dispatch::worker_count(self.opts.threads),
            // read one more block
            &mut |vb: &mut VBlock| {
                if carry.is_empty() && eof {
                    return Ok(false);
                }
                let take = carry.len().min(block_size);
                vb.txt.extend_from_slice(&carry[..take]);
                carry.drain(..take);
                while vb.txt.len() < block_size && !eof {
                    let n = file.read(&mut chunk)?;
                    if n == 0 {
                        eof = true;
                    } else {
                        vb.txt.extend_from_slice(&chunk[..n]);
                    }
                }
                // While more input follows, the block must end on a record
                // boundary; the trailing partial record feeds the next
                // block.
                let has_more = !eof || !carry.is_empty();
                if has_more {
                    let un = ops.unconsumed(vb.txt.as_slice());
                    if un == vb.txt.len() {
                        return Err(BiozError::malformed(
                            &path_str, *next_vb, 0,
                            "a single record exceeds the block size",
                        ));
                    }
                    if un > 0 {
                        let keep = vb.txt.len() - un;
                        let mut tail = vb.txt.as_slice()[keep..].to_vec();
                        tail.extend_from_slice(&carry);
                        carry = tail;
                        vb.txt.truncate(keep);
                    }
                }
                if vb.txt.is_empty() {
                    return Ok(false);
                }
                if round {
                    if let Some(rounded) = ops.round_block(vb.txt.as_slice()) {
                        vb.txt.set(rounded);
                    }
                }
                digest.update(vb.txt.as_slice());
                comp_txt_len += vb.txt.len() as u64;
                vb.prepare(*next_vb, component_i);
                *next_vb += 1;
                Ok(true)
            },
            // worker: segment → merge → compress
            &|vb: &mut VBlock| {
                process_block(vb, zset, ops, &path_for_workers, samples, level, key.as_ref())
            },
            // ordered write
            &mut |vb: &mut VBlock| {
                for sec in std::mem::take(&mut vb.sections) {
                    Self::append_section(out, sections, &sec, vb.vblock_i)?;
                }
                ra.extend(vb.ra.finish());
                Ok(())
            },
        )?;

        // ── Component dictionaries ───────────────────────────────────────
        for ctx_arc in self.zset.snapshot() {
            let mut ctx = ctx_arc.write().unwrap();
            let (parts, num_words) = ctx.fragment();
            if num_words == 0 {
                continue;
            }
            let uncomp: usize = parts.iter().map(|p| p.len()).sum();
            let sec = build_section_parts(
                &SubHeader::Dict { field_id: ctx.id, num_words: num_words as u32 },
                &mut parts.into_iter(),
                uncomp,
                CodecId::Zstd,
                self.opts.level,
                VB_NONE,
                self.dict_sec_i,
                self.key.as_ref(),
            )?;
            ctx.mark_flushed();
            drop(ctx);
            Self::append_section(&mut self.out, &mut self.sections, &sec, VB_NONE)?;
            self.dict_sec_i = self.dict_sec_i.wrapping_add(1);
        }

        self.components.push(ComponentEnt {
            data_type: dt,
            first_vb,
            num_vbs: self.next_vb - first_vb,
            txt_len: comp_txt_len,
            digest: self.digest.finish_component(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(path_str),
        });
        Ok(())
    }

    /// WroteComponentDicts → WroteFooter → Closed.  Returns the stats of
    /// the finished archive.
    pub fn finalize(mut self) -> Result<ZipStats> {
        debug_assert_eq!(self.state, ZipState::WroteFileHeader);

        // Random-access section.
        let ra_index = RaIndex { entries: std::mem::take(&mut self.ra) };
        if !ra_index.entries.is_empty() {
            let sec = build_section(
                &SubHeader::RandomAccess { num_entries: ra_index.entries.len() as u32 },
                &ra_index.to_bytes(),
                CodecId::Zstd,
                self.opts.level,
                VB_NONE,
                0,
                self.key.as_ref(),
            )?;
            Self::append_section(&mut self.out, &mut self.sections, &sec, VB_NONE)?;
        }

        // Footer (never encrypted) + trailing offset.
        let footer = Footer {
            sections:       std::mem::take(&mut self.sections),
            components:     std::mem::take(&mut self.components),
            archive_digest: self.digest.whole(),
            created_unix:   chrono::Utc::now().timestamp(),
        };
        let sec = build_section(
            &SubHeader::Footer,
            &footer.to_bytes(),
            CodecId::Zstd,
            self.opts.level,
            VB_NONE,
            0,
            self.key.as_ref(),
        )?;
        let footer_offset = self.out.stream_position()?;
        self.out.write_all(&sec.bytes)?;
        self.out.write_all(&footer_offset.to_le_bytes())?;
        self.out.flush()?;
        self.state = ZipState::WroteFooter;

        Ok(ZipStats {
            components: footer.components.len(),
            skipped:    0,
            txt_bytes:  footer.components.iter().map(|c| c.txt_len).sum(),
            out_bytes:  self.out.stream_position()?,
        })
    }
}

// ── Worker-side block processing ─────────────────────────────────────────────

/// Codec assignment per stream.  b250 and dictionaries compress with the
/// general-purpose default; local streams pick by payload shape: short
/// strings go to the dictionary-oriented codec, qualities to the range
/// coder, everything else to the default.
fn local_codec(ltype: LocalType, ctx_name: &str) -> CodecId {
    match ltype {
        LocalType::Text => CodecId::Brotli,
        LocalType::U32 | LocalType::I32 => CodecId::Zstd,
        LocalType::Seq => {
            if ctx_name == "QUAL" {
                CodecId::Lzma
            } else {
                CodecId::Zstd
            }
        }
    }
}

fn process_block(
    vb:      &mut VBlock,
    zset:    &ContextSet,
    ops:     &'static dyn DataTypeOps,
    path:    &str,
    samples: usize,
    level:   i32,
    key:     Option<&[u8; 32]>,
) -> Result<()> {
    // Dictionary sentinels and snip control prefixes rely on genomic text
    // being printable ASCII plus whitespace; reject binary bytes up front.
    if let Some(bad) = vb.txt.as_slice().iter().position(|&b| b < crate::context::SNIP_RESERVED_MAX) {
        return Err(BiozError::malformed(
            path, vb.vblock_i, 0,
            format!("binary byte {:#04x} at block offset {bad}", vb.txt.as_slice()[bad]),
        ));
    }

    vb.build_line_table();
    let num_lines = vb.num_lines;
    let ranges: Vec<(usize, usize, crate::vblock::Eol)> =
        (0..num_lines).map(|i| vb.line_range(i)).collect();

    // Detach the text while contexts are being mutated; no buffer moves
    // under a held slice.
    let txt = vb.txt.take();
    let env = SegEnv { path, samples };
    for (i, &(s, e, eol)) in ranges.iter().enumerate() {
        let line_i = i as u32;
        ops.seg_line(vb, zset, &txt[s..e], line_i, &env)?;
        seg_eol(vb, zset, eol, line_i)?;
    }
    vb.txt.set(txt);

    vb.merge_and_serialize(zset, ops.chrom_id())?;

    // Frame the block's sections: VB header, then per-context b250, then
    // per-context local streams.  Contexts with neither are omitted.
    let num_contexts = vb.ctxs.iter().filter(|c| c.has_output()).count() as u32;
    let mut sec_i: u16 = 0;
    let vblock_i = vb.vblock_i;
    let mut sections = Vec::new();

    sections.push(build_section(
        &SubHeader::VbHeader {
            num_lines,
            txt_len: vb.txt_len() as u32,
            longest_line: vb.longest_line,
            num_contexts,
        },
        &[],
        CodecId::None,
        level,
        vblock_i,
        sec_i,
        key,
    )?);
    sec_i += 1;

    for ci in 0..vb.ctxs.len() {
        if vb.ctxs[ci].b250.is_empty() {
            continue;
        }
        sections.push(build_section(
            &SubHeader::B250 { field_id: vb.ctxs[ci].id },
            vb.ctxs[ci].b250.as_slice(),
            CodecId::Zstd,
            level,
            vblock_i,
            sec_i,
            key,
        )?);
        sec_i += 1;
    }
    for ci in 0..vb.ctxs.len() {
        let ctx = &vb.ctxs[ci];
        if ctx.local.is_empty() {
            continue;
        }
        let codec = local_codec(ctx.ltype, &ctx.name);
        sections.push(build_section(
            &SubHeader::Local { field_id: ctx.id, ltype: ctx.ltype as u8 },
            ctx.local.as_slice(),
            codec,
            level,
            vblock_i,
            sec_i,
            key,
        )?);
        sec_i += 1;
    }

    vb.sections = sections;
    Ok(())
}

// ── Entry point ──────────────────────────────────────────────────────────────

/// Compress one or more inputs into a `.bioz` archive.  Multiple inputs
/// concatenate into one archive, one component each.  On fatal error the
/// partial output is removed.
pub fn zip_files(inputs: &[PathBuf], out_path: &Path, opts: ZipOptions) -> Result<ZipStats> {
    let multi = inputs.len() > 1;
    let run = || -> Result<ZipStats> {
        let mut writer = ZipWriter::create(out_path, opts.clone())?;
        let mut skipped = 0usize;
        for input in inputs {
            match writer.add_component(input) {
                Ok(())                                  => {}
                Err(BiozError::SkippedInput { path }) if multi => {
                    eprintln!("biozip: skipping {path}: unsupported input type");
                    skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        if skipped == inputs.len() {
            return Err(BiozError::SkippedInput {
                path: inputs
                    .first()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            });
        }
        let mut stats = writer.finalize()?;
        stats.skipped = skipped;
        Ok(stats)
    };

    run().map_err(|e| {
        let _ = std::fs::remove_file(out_path);
        e
    })
}
