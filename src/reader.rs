//! Decode session — footer-first open, selective block decode, filtered
//! reconstruction, digest verification.
//!
//! Opening an archive always starts with one seek to the end: the last 8
//! bytes locate the footer, the footer locates everything else.  Only
//! the dictionaries and the random-access index are loaded up front; the
//! chromosome dictionary is all a region filter needs to resolve names,
//! and blocks outside the region scope are never read at all.  Where a
//! block partially overlaps a region it is fully decompressed and rows
//! are filtered at reconstruction time.
//!
//! Digest verification only runs for unfiltered reconstruction: a
//! filtered read never feeds suppressed rows to the digest, so there is
//! nothing meaningful to compare.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::archive::{FileHeader, Footer, Manifest};
use crate::context::{DictSet, LocalType};
use crate::crypto;
use crate::datatype::{self, DataTypeOps};
use crate::digest::RunningDigest;
use crate::error::{BiozError, Result};
use crate::fingerprint::{Category, FieldId};
use crate::random_access::{RaIndex, Region, ResolvedRegions};
use crate::reconstruct::{ReconOpts, Reconstructor};
use crate::section::{read_section, SectionType, SubHeader};
use crate::segment::EOL_ID_NAME;
use crate::vblock::VBlock;

// ── Options & stats ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct UnzipOptions {
    pub password:          Option<String>,
    /// Region filters: `chrom`, `chrom:pos`, `chrom:start-end`.
    pub regions:           Vec<String>,
    /// Identifier-substring filter (record-granular on FASTA/FASTQ).
    pub grep:              Option<String>,
    pub fasta_single_line: bool,
}

#[derive(Debug, Default)]
pub struct UnzipStats {
    pub components: usize,
    pub bytes_out:  u64,
    /// True when the digests were compared (unfiltered read) and matched.
    pub verified:   bool,
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct ArchiveReader {
    file:       File,
    path:       String,
    pub header: FileHeader,
    pub footer: Footer,
    key:        Option<[u8; 32]>,
    pub dicts:  DictSet,
    pub ra:     RaIndex,
}

impl ArchiveReader {
    /// Open an archive: file header, footer (via the trailing offset),
    /// dictionaries, random-access index.  For encrypted archives the
    /// first sealed section is decrypted as the password self-test, so a
    /// wrong password fails here and not halfway through decode.
    pub fn open(path: &Path, password: Option<&str>) -> Result<ArchiveReader> {
        let mut file = File::open(path)?;
        let header = FileHeader::read(&mut file)?;

        let key = match (header.is_encrypted(), password) {
            (true, None)      => return Err(BiozError::PasswordRequired),
            (true, Some(pwd)) => Some(crypto::derive_key(pwd, header.archive_uuid.as_bytes())?),
            (false, _)        => None,
        };

        // Footer-first: mandatory seek to the end.
        let file_len = file.seek(SeekFrom::End(0))?;
        if file_len < 8 {
            return Err(BiozError::Corrupt("archive truncated before footer offset".into()));
        }
        file.seek(SeekFrom::End(-8))?;
        let mut off_bytes = [0u8; 8];
        file.read_exact(&mut off_bytes)?;
        let footer_offset = u64::from_le_bytes(off_bytes);
        if footer_offset >= file_len {
            return Err(BiozError::Corrupt("footer offset out of range".into()));
        }

        let (fh, fsub, fpayload) = read_section(&mut file, footer_offset, None)?;
        if fh.section_type != SectionType::Footer || fsub != SubHeader::Footer {
            return Err(BiozError::Corrupt("trailing offset does not point at the footer".into()));
        }
        let footer = Footer::from_bytes(&fpayload)?;

        // Password self-test on the first sealed section: the GCM tag of
        // the first text header distinguishes "wrong password" from
        // corruption before any real decode work starts.
        if header.is_encrypted() {
            if let Some(first) = footer
                .sections
                .iter()
                .find(|s| s.section_type == SectionType::TxtHeader)
            {
                read_section(&mut file, first.offset, key.as_ref())?;
            }
        }

        // Dictionaries, in write order so fragment word indices line up.
        let mut dicts = DictSet::default();
        let dict_ents: Vec<_> = footer
            .sections_of_type(SectionType::Dict)
            .copied()
            .collect();
        for ent in dict_ents {
            let (_, sub, payload) = read_section(&mut file, ent.offset, key.as_ref())?;
            let SubHeader::Dict { field_id, num_words } = sub else {
                return Err(BiozError::Corrupt("mislabelled dictionary section".into()));
            };
            dicts.append_fragment(field_id, &payload, num_words)?;
        }

        // Random-access index.
        let ra = match footer.sections_of_type(SectionType::RandomAccess).next().copied() {
            Some(ent) => {
                let (_, _, payload) = read_section(&mut file, ent.offset, key.as_ref())?;
                RaIndex::from_bytes(&payload)?
            }
            None => RaIndex::default(),
        };

        Ok(ArchiveReader {
            file,
            path: path.display().to_string(),
            header,
            footer,
            key,
            dicts,
            ra,
        })
    }

    pub fn manifest(&self) -> Manifest {
        Manifest::new(&self.path, &self.header, &self.footer)
    }

    // ── Block loading ───────────────────────────────────────────────────────

    fn load_vblock(&mut self, vblock_i: u32, component_i: u32) -> Result<(VBlock, u32, u32)> {
        let ents: Vec<_> = self
            .footer
            .sections_of_vb(vblock_i)
            .into_iter()
            .copied()
            .collect();
        let mut vb = VBlock::new();
        vb.prepare(vblock_i, component_i);
        let mut shape: Option<(u32, u32)> = None;

        for ent in ents {
            let (_, sub, payload) = read_section(&mut self.file, ent.offset, self.key.as_ref())?;
            match sub {
                SubHeader::VbHeader { num_lines, txt_len, .. } => {
                    shape = Some((num_lines, txt_len));
                }
                SubHeader::B250 { field_id } => {
                    let name = field_id.name();
                    let i = vb.ctx_idx_decode(field_id, &name);
                    vb.ctxs[i].b250.set(payload);
                }
                SubHeader::Local { field_id, ltype } => {
                    let name = field_id.name();
                    let i = vb.ctx_idx_decode(field_id, &name);
                    vb.ctxs[i].ltype = LocalType::from_u8(ltype).ok_or_else(|| {
                        BiozError::Corrupt(format!("unknown local type {ltype} in context {name}"))
                    })?;
                    vb.ctxs[i].local.set(payload);
                }
                _ => {
                    return Err(BiozError::Corrupt(format!(
                        "unexpected section inside block {vblock_i}"
                    )))
                }
            }
        }
        let (num_lines, txt_len) =
            shape.ok_or_else(|| BiozError::Corrupt(format!("block {vblock_i} has no VB header")))?;
        vb.num_lines = num_lines;
        Ok((vb, num_lines, txt_len))
    }

    // ── Decode driver ───────────────────────────────────────────────────────

    /// Reconstruct the archive (or the filtered subset) into `out`.
    pub fn unzip(&mut self, out: &mut dyn Write, opts: &UnzipOptions) -> Result<UnzipStats> {
        let regions = opts
            .regions
            .iter()
            .map(|s| Region::parse(s))
            .collect::<Result<Vec<Region>>>()?;
        // Any transform of the output disables digest comparison.
        let exact = regions.is_empty() && opts.grep.is_none() && !opts.fasta_single_line;

        let mut digest = RunningDigest::new();
        let mut stats = UnzipStats { components: self.footer.components.len(), ..Default::default() };
        let eol_id = FieldId::new(EOL_ID_NAME, Category::Primary);

        let components = self.footer.components.clone();
        for (ci, comp) in components.iter().enumerate() {
            let ops = datatype::ops(comp.data_type);

            // Component text header.
            let hdr_ent = self
                .footer
                .sections
                .iter()
                .find(|s| s.section_type == SectionType::TxtHeader && s.vblock_i == ci as u32)
                .copied()
                .ok_or_else(|| {
                    BiozError::Corrupt(format!("component {ci} has no text header section"))
                })?;
            let (_, _, txt_header) = read_section(&mut self.file, hdr_ent.offset, self.key.as_ref())?;
            out.write_all(&txt_header)?;
            stats.bytes_out += txt_header.len() as u64;
            if exact {
                digest.update(&txt_header);
            }
            let sample_count = ops.sample_count(&txt_header);

            // Region resolution against the chromosome dictionary.
            let resolved = match (ops.chrom_id(), regions.is_empty()) {
                (Some(cid), false) => {
                    ResolvedRegions::resolve(&regions, |name| self.dicts.find(cid, name.as_bytes()))
                }
                (None, false) => {
                    eprintln!(
                        "biozip: warning: {} has no genomic coordinates; region filter ignored",
                        comp.name
                    );
                    ResolvedRegions::default()
                }
                _ => ResolvedRegions::default(),
            };
            let region_filtering = !regions.is_empty() && ops.chrom_id().is_some();
            let scope: Option<Vec<u32>> = region_filtering.then(|| resolved.vblocks_in_scope(&self.ra));

            let grep = match (&opts.grep, ops.greppable()) {
                (Some(g), true)  => Some(g.clone().into_bytes()),
                (Some(_), false) => {
                    eprintln!(
                        "biozip: warning: {} records have no identifier lines; grep ignored",
                        comp.name
                    );
                    None
                }
                (None, _) => None,
            };

            let recon_opts = ReconOpts {
                regions: if region_filtering { resolved } else { ResolvedRegions::default() },
                grep,
                fasta_single_line: opts.fasta_single_line,
            };

            let mut pending_eol: Vec<u8> = Vec::new();
            let mut include_record = true;

            for vb_i in comp.first_vb..comp.first_vb + comp.num_vbs {
                if let Some(scope) = &scope {
                    if !scope.contains(&vb_i) {
                        continue; // skipped entirely; never read from disk
                    }
                }
                let (mut vb, num_lines, txt_len) = self.load_vblock(vb_i, ci as u32)?;
                let mut block_out: Vec<u8> = Vec::with_capacity(txt_len as usize);
                {
                    let mut r = Reconstructor::new(
                        &mut vb,
                        &self.dicts,
                        &mut block_out,
                        &recon_opts,
                        sample_count,
                    );
                    r.pending_eol = std::mem::take(&mut pending_eol);

                    for line_i in 0..num_lines {
                        let row_start = r.out.len();
                        r.line_i = line_i;
                        let meta = ops.recon_line(&mut r, line_i)?;

                        let eol_start = r.out.len();
                        r.recon_field(ops, eol_id)?;
                        let eol_len = r.out.len() - eol_start;

                        // Record-granular grep gate on identifier lines.
                        let mut include = true;
                        if let Some(pat) = &r.opts.grep {
                            if meta.id_line {
                                let row = &r.out[row_start..eol_start];
                                include_record =
                                    row.windows(pat.len().max(1)).any(|w| w == &pat[..]);
                            }
                            include = include_record;
                        }
                        // Per-row region filter.
                        if include && region_filtering {
                            include = match (meta.chrom_word, meta.pos_range) {
                                (Some(w), Some((lo, hi))) => r.opts.regions.overlaps(w, lo, hi),
                                _ => false,
                            };
                        }
                        if !include {
                            r.out.truncate(row_start);
                            continue;
                        }

                        if meta.suppress_eol {
                            // Joined sequence lines: hold this line's EOL,
                            // drop the previous one (no separator between
                            // joined lines).
                            let eol_bytes = r.out[r.out.len() - eol_len..].to_vec();
                            r.out.truncate(r.out.len() - eol_len);
                            r.pending_eol = eol_bytes;
                        } else if !r.pending_eol.is_empty() {
                            // A record boundary: emit the held EOL before
                            // this row.
                            let held = std::mem::take(&mut r.pending_eol);
                            r.out.splice(row_start..row_start, held);
                        }
                    }
                    pending_eol = std::mem::take(&mut r.pending_eol);
                }

                if exact && block_out.len() != txt_len as usize {
                    return Err(BiozError::Corrupt(format!(
                        "block {vb_i} reconstructed {} bytes, VB header records {txt_len}",
                        block_out.len()
                    )));
                }
                if exact {
                    digest.update(&block_out);
                }
                out.write_all(&block_out)?;
                stats.bytes_out += block_out.len() as u64;
            }

            if !pending_eol.is_empty() {
                out.write_all(&pending_eol)?;
                stats.bytes_out += pending_eol.len() as u64;
            }

            if exact {
                let got = digest.finish_component();
                if got != comp.digest {
                    return Err(BiozError::IntegrityMismatch {
                        expected: hex::encode(comp.digest),
                        actual:   hex::encode(got),
                    });
                }
            }
        }

        if exact {
            let got = digest.whole();
            if got != self.footer.archive_digest {
                return Err(BiozError::IntegrityMismatch {
                    expected: hex::encode(self.footer.archive_digest),
                    actual:   hex::encode(got),
                });
            }
            stats.verified = true;
        }
        Ok(stats)
    }
}

// ── Convenience entry points ─────────────────────────────────────────────────

/// Decode an archive into a byte vector (tests and `cat`).
pub fn unzip_to_vec(archive: &Path, opts: &UnzipOptions) -> Result<(Vec<u8>, UnzipStats)> {
    let mut reader = ArchiveReader::open(archive, opts.password.as_deref())?;
    let mut out = Vec::new();
    let stats = reader.unzip(&mut out, opts)?;
    Ok((out, stats))
}

/// Decode an archive to a file path.  Nothing is left behind on error.
pub fn unzip_to_file(archive: &Path, out_path: &Path, opts: &UnzipOptions) -> Result<UnzipStats> {
    let run = || -> Result<UnzipStats> {
        let mut reader = ArchiveReader::open(archive, opts.password.as_deref())?;
        let mut out = std::io::BufWriter::new(File::create(out_path)?);
        let stats = reader.unzip(&mut out, opts)?;
        out.flush()?;
        Ok(stats)
    };
    run().map_err(|e| {
        let _ = std::fs::remove_file(out_path);
        e
    })
}
