//! Archive anchors — the fixed file header at offset 0 and the global
//! footer written last.
//!
//! # File header (64 bytes, little-endian, CRC32-guarded)
//!
//! ```text
//! Offset  Size  Field
//!    0      4   magic        = "bioz" (4 ASCII bytes)
//!    4      4   format_version = 1    (LE u32)
//!    8      4   flags        0x01=encrypted  (LE u32)
//!   12      4   block_size   configured text-block size (LE u32)
//!   16     16   archive_uuid (KDF salt for encrypted archives)
//!   32      4   header_crc32 CRC32 of bytes 0..32 (LE u32)
//!   ...    ...  zero padding to exactly 64 bytes
//! ```
//!
//! # Footer
//!
//! The footer is a normal (never encrypted) section holding the section
//! list, the component table, the whole-archive digest and the creation
//! timestamp, CRC32-terminated.  Its offset sits in the last 8 bytes of
//! the file, so a decoder always starts with one seek to the end.

use std::io::{self, Read, Write};

use crc32fast::Hasher;
use serde::Serialize;
use uuid::Uuid;

use crate::datatype::DataType;
use crate::digest::Digest;
use crate::error::{BiozError, Result};
use crate::fingerprint::FieldId;
use crate::section::SectionType;

pub const FILE_MAGIC:       &[u8; 4] = b"bioz";
pub const FORMAT_VERSION:   u32      = 1;
pub const FILE_HEADER_SIZE: usize    = 64;

pub const HDR_FLAG_ENCRYPTED: u32 = 0x0001;

// ── File header ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FileHeader {
    pub format_version: u32,
    pub flags:          u32,
    pub block_size:     u32,
    pub archive_uuid:   Uuid,
}

impl FileHeader {
    pub fn new(block_size: u32, encrypted: bool) -> Self {
        FileHeader {
            format_version: FORMAT_VERSION,
            flags: if encrypted { HDR_FLAG_ENCRYPTED } else { 0 },
            block_size,
            archive_uuid: Uuid::new_v4(),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & HDR_FLAG_ENCRYPTED != 0
    }

    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        let mut body = Vec::with_capacity(FILE_HEADER_SIZE);
        body.extend_from_slice(FILE_MAGIC);
        body.extend_from_slice(&self.format_version.to_le_bytes());
        body.extend_from_slice(&self.flags.to_le_bytes());
        body.extend_from_slice(&self.block_size.to_le_bytes());
        body.extend_from_slice(self.archive_uuid.as_bytes());

        let mut h = Hasher::new();
        h.update(&body);
        body.extend_from_slice(&h.finalize().to_le_bytes());
        body.resize(FILE_HEADER_SIZE, 0);
        w.write_all(&body)
    }

    pub fn read<R: Read>(mut r: R) -> Result<Self> {
        let mut buf = [0u8; FILE_HEADER_SIZE];
        r.read_exact(&mut buf)?;

        if &buf[0..4] != FILE_MAGIC {
            return Err(BiozError::InvalidMagic);
        }
        let format_version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if format_version > FORMAT_VERSION {
            return Err(BiozError::UnsupportedVersion {
                found:     format_version,
                supported: FORMAT_VERSION,
            });
        }
        let flags      = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let block_size = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let archive_uuid = Uuid::from_bytes(buf[16..32].try_into().unwrap());

        let stored_crc = u32::from_le_bytes(buf[32..36].try_into().unwrap());
        let mut h = Hasher::new();
        h.update(&buf[..32]);
        if h.finalize() != stored_crc {
            return Err(BiozError::HeaderCrcMismatch);
        }

        Ok(FileHeader { format_version, flags, block_size, archive_uuid })
    }
}

// ── Section list ─────────────────────────────────────────────────────────────

/// One row of the footer's section list: enough to seek to any section
/// without scanning.
#[derive(Debug, Clone, Copy)]
pub struct SectionEnt {
    pub section_type: SectionType,
    pub vblock_i:     u32,
    pub offset:       u64,
    /// Total on-disk bytes: header + sub-header + payload.
    pub len:          u64,
    pub field_id:     FieldId,
}

const SECTION_ENT_SIZE: usize = 32;

impl SectionEnt {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.section_type as u16).to_le_bytes());
        out.extend_from_slice(&[0u8; 2]);
        out.extend_from_slice(&self.vblock_i.to_le_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.len.to_le_bytes());
        out.extend_from_slice(&self.field_id.0);
    }

    fn read(b: &[u8]) -> Result<SectionEnt> {
        let t = u16::from_le_bytes(b[0..2].try_into().unwrap());
        Ok(SectionEnt {
            section_type: SectionType::from_u16(t)
                .ok_or_else(|| BiozError::Corrupt(format!("footer lists unknown section type {t}")))?,
            vblock_i: u32::from_le_bytes(b[4..8].try_into().unwrap()),
            offset:   u64::from_le_bytes(b[8..16].try_into().unwrap()),
            len:      u64::from_le_bytes(b[16..24].try_into().unwrap()),
            field_id: FieldId::from_bytes(b[24..32].try_into().unwrap()),
        })
    }
}

// ── Component table ──────────────────────────────────────────────────────────

/// One input file's footprint in the archive.
#[derive(Debug, Clone)]
pub struct ComponentEnt {
    pub data_type: DataType,
    pub first_vb:  u32,
    pub num_vbs:   u32,
    /// Original uncompressed size, text header included.
    pub txt_len:   u64,
    pub digest:    Digest,
    pub name:      String,
}

impl ComponentEnt {
    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.data_type as u8);
        out.extend_from_slice(&[0u8; 3]);
        out.extend_from_slice(&self.first_vb.to_le_bytes());
        out.extend_from_slice(&self.num_vbs.to_le_bytes());
        out.extend_from_slice(&self.txt_len.to_le_bytes());
        out.extend_from_slice(&self.digest);
        let name = self.name.as_bytes();
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(name);
    }

    fn read(b: &[u8]) -> Result<(ComponentEnt, usize)> {
        if b.len() < 54 {
            return Err(BiozError::Corrupt("truncated component entry".into()));
        }
        let data_type = DataType::from_u8(b[0])
            .ok_or_else(|| BiozError::Corrupt(format!("unknown data type {}", b[0])))?;
        let first_vb = u32::from_le_bytes(b[4..8].try_into().unwrap());
        let num_vbs  = u32::from_le_bytes(b[8..12].try_into().unwrap());
        let txt_len  = u64::from_le_bytes(b[12..20].try_into().unwrap());
        let digest: Digest = b[20..52].try_into().unwrap();
        let name_len = u16::from_le_bytes(b[52..54].try_into().unwrap()) as usize;
        if b.len() < 54 + name_len {
            return Err(BiozError::Corrupt("truncated component name".into()));
        }
        let name = String::from_utf8_lossy(&b[54..54 + name_len]).into_owned();
        Ok((
            ComponentEnt { data_type, first_vb, num_vbs, txt_len, digest, name },
            54 + name_len,
        ))
    }
}

// ── Footer ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct Footer {
    pub sections:       Vec<SectionEnt>,
    pub components:     Vec<ComponentEnt>,
    pub archive_digest: Digest,
    pub created_unix:   i64,
}

impl Footer {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            16 + self.sections.len() * SECTION_ENT_SIZE + self.components.len() * 80,
        );
        out.extend_from_slice(&(self.sections.len() as u32).to_le_bytes());
        for s in &self.sections {
            s.write(&mut out);
        }
        out.extend_from_slice(&(self.components.len() as u32).to_le_bytes());
        for c in &self.components {
            c.write(&mut out);
        }
        out.extend_from_slice(&self.archive_digest);
        out.extend_from_slice(&self.created_unix.to_le_bytes());

        let mut h = Hasher::new();
        h.update(&out);
        out.extend_from_slice(&h.finalize().to_le_bytes());
        out
    }

    pub fn from_bytes(b: &[u8]) -> Result<Footer> {
        if b.len() < 4 + 32 + 8 + 4 {
            return Err(BiozError::Corrupt("footer too short".into()));
        }
        let body = &b[..b.len() - 4];
        let stored_crc = u32::from_le_bytes(b[b.len() - 4..].try_into().unwrap());
        let mut h = Hasher::new();
        h.update(body);
        if h.finalize() != stored_crc {
            return Err(BiozError::Corrupt("footer CRC32 mismatch".into()));
        }

        let num_sections = u32::from_le_bytes(body[0..4].try_into().unwrap()) as usize;
        let mut pos = 4usize;
        let mut sections = Vec::with_capacity(num_sections);
        for _ in 0..num_sections {
            if pos + SECTION_ENT_SIZE > body.len() {
                return Err(BiozError::Corrupt("truncated footer section list".into()));
            }
            sections.push(SectionEnt::read(&body[pos..pos + SECTION_ENT_SIZE])?);
            pos += SECTION_ENT_SIZE;
        }

        if pos + 4 > body.len() {
            return Err(BiozError::Corrupt("truncated footer".into()));
        }
        let num_components =
            u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        let mut components = Vec::with_capacity(num_components);
        for _ in 0..num_components {
            let (c, used) = ComponentEnt::read(&body[pos..])?;
            components.push(c);
            pos += used;
        }

        if pos + 40 > body.len() {
            return Err(BiozError::Corrupt("truncated footer tail".into()));
        }
        let archive_digest: Digest = body[pos..pos + 32].try_into().unwrap();
        let created_unix = i64::from_le_bytes(body[pos + 32..pos + 40].try_into().unwrap());

        Ok(Footer { sections, components, archive_digest, created_unix })
    }

    /// All section entries of one block, in write order.
    pub fn sections_of_vb(&self, vblock_i: u32) -> Vec<&SectionEnt> {
        self.sections
            .iter()
            .filter(|s| {
                s.vblock_i == vblock_i
                    && matches!(
                        s.section_type,
                        SectionType::VbHeader | SectionType::B250 | SectionType::Local
                    )
            })
            .collect()
    }

    pub fn sections_of_type(&self, t: SectionType) -> impl Iterator<Item = &SectionEnt> {
        self.sections.iter().filter(move |s| s.section_type == t)
    }

    pub fn component_of_vb(&self, vblock_i: u32) -> Option<&ComponentEnt> {
        self.components
            .iter()
            .find(|c| vblock_i >= c.first_vb && vblock_i < c.first_vb + c.num_vbs)
    }
}

// ── Human-facing manifest (list --json) ──────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct Manifest {
    pub path:           String,
    pub format_version: u32,
    pub encrypted:      bool,
    pub block_size:     u32,
    pub created:        String,
    pub archive_digest: String,
    pub num_sections:   usize,
    pub components:     Vec<ManifestComponent>,
}

#[derive(Debug, Serialize)]
pub struct ManifestComponent {
    pub name:       String,
    pub data_type:  &'static str,
    pub txt_len:    u64,
    pub num_blocks: u32,
    pub digest:     String,
}

impl Manifest {
    pub fn new(path: &str, header: &FileHeader, footer: &Footer) -> Manifest {
        let created = chrono::DateTime::from_timestamp(footer.created_unix, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| footer.created_unix.to_string());
        Manifest {
            path: path.to_owned(),
            format_version: header.format_version,
            encrypted: header.is_encrypted(),
            block_size: header.block_size,
            created,
            archive_digest: hex::encode(footer.archive_digest),
            num_sections: footer.sections.len(),
            components: footer
                .components
                .iter()
                .map(|c| ManifestComponent {
                    name:       c.name.clone(),
                    data_type:  c.data_type.name(),
                    txt_len:    c.txt_len,
                    num_blocks: c.num_vbs,
                    digest:     hex::encode(c.digest),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_header_roundtrip() {
        let hdr = FileHeader::new(16 * 1024 * 1024, true);
        let mut buf = Vec::new();
        hdr.write(&mut buf).unwrap();
        assert_eq!(buf.len(), FILE_HEADER_SIZE);
        let back = FileHeader::read(&buf[..]).unwrap();
        assert_eq!(back.archive_uuid, hdr.archive_uuid);
        assert!(back.is_encrypted());
    }

    #[test]
    fn newer_version_is_rejected_with_upgrade_message() {
        let hdr = FileHeader::new(1024, false);
        let mut buf = Vec::new();
        hdr.write(&mut buf).unwrap();
        // Bump the version and re-CRC.
        buf[4..8].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
        let mut h = Hasher::new();
        h.update(&buf[..32]);
        buf[32..36].copy_from_slice(&h.finalize().to_le_bytes());
        assert!(matches!(
            FileHeader::read(&buf[..]),
            Err(BiozError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn footer_roundtrip() {
        let footer = Footer {
            sections: vec![SectionEnt {
                section_type: SectionType::VbHeader,
                vblock_i:     0,
                offset:       64,
                len:          42,
                field_id:     FieldId::NONE,
            }],
            components: vec![ComponentEnt {
                data_type: DataType::Vcf,
                first_vb:  0,
                num_vbs:   1,
                txt_len:   88,
                digest:    [7u8; 32],
                name:      "sample.vcf".into(),
            }],
            archive_digest: [9u8; 32],
            created_unix:   1_700_000_000,
        };
        let bytes = footer.to_bytes();
        let back = Footer::from_bytes(&bytes).unwrap();
        assert_eq!(back.sections.len(), 1);
        assert_eq!(back.components[0].name, "sample.vcf");
        assert_eq!(back.archive_digest, footer.archive_digest);

        let mut corrupted = bytes.clone();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;
        assert!(Footer::from_bytes(&corrupted).is_err());
    }
}
