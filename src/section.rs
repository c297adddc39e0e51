//! Section I/O — bit-exact serialization of every persisted unit.
//!
//! # On-disk layout (26-byte fixed header, all fields little-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      4   magic            = 0x5A6F6942  ("BioZ", LE u32)
//!    4      2   section_type     (LE u16)
//!    6      2   flags            0x0001=Encrypted  (LE u16)
//!    8      4   comp_len         on-disk payload bytes (post compress+seal)
//!   12      4   uncomp_len       payload bytes before compression
//!   16      1   codec            codec tag (see codec module)
//!   17      1   reserved         = 0
//!   18      4   vblock_index     0xFFFF_FFFF for archive-global sections
//!   22      2   section_in_vblock_index
//!   24      2   reserved2        = 0
//! ```
//!
//! A type-specific sub-header follows the fixed header in plaintext, then
//! the payload (compressed, and sealed when encryption is on — the GCM
//! nonce is derived from the (type, vblock, section) tuple, never stored).
//! Sections are appended with no alignment; offsets live in the footer.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::codec::{get_codec, get_codec_by_tag, CodecId};
use crate::crypto;
use crate::error::{BiozError, Result};
use crate::fingerprint::FieldId;

pub const SECTION_MAGIC: u32 = u32::from_le_bytes(*b"BioZ");
pub const SECTION_HEADER_SIZE: usize = 26;

/// `vblock_index` sentinel for sections not tied to one block.
pub const VB_NONE: u32 = 0xFFFF_FFFF;

pub const SECTION_FLAG_ENCRYPTED: u16 = 0x0001;

// ── Section type ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SectionType {
    TxtHeader    = 1,
    VbHeader     = 2,
    B250         = 3,
    Local        = 4,
    Dict         = 5,
    RandomAccess = 6,
    Footer       = 7,
}

impl SectionType {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(SectionType::TxtHeader),
            2 => Some(SectionType::VbHeader),
            3 => Some(SectionType::B250),
            4 => Some(SectionType::Local),
            5 => Some(SectionType::Dict),
            6 => Some(SectionType::RandomAccess),
            7 => Some(SectionType::Footer),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SectionType::TxtHeader    => "TXT_HEADER",
            SectionType::VbHeader     => "VB_HEADER",
            SectionType::B250         => "B250",
            SectionType::Local        => "LOCAL",
            SectionType::Dict         => "DICT",
            SectionType::RandomAccess => "RAND_ACCESS",
            SectionType::Footer       => "FOOTER",
        }
    }
}

// ── Sub-headers ──────────────────────────────────────────────────────────────

/// Type-specific plaintext sub-header between the fixed header and the
/// payload.  Fixed wire size per section type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubHeader {
    /// Payload: the raw text header of one input component.
    TxtHeader { data_type: u8 },
    /// No payload; the block's shape lives here.
    VbHeader { num_lines: u32, txt_len: u32, longest_line: u32, num_contexts: u32 },
    /// Payload: the context's serialized b250 stream.
    B250 { field_id: FieldId },
    /// Payload: the context's local stream.
    Local { field_id: FieldId, ltype: u8 },
    /// Payload: dictionary fragment (sentinel-separated words).
    Dict { field_id: FieldId, num_words: u32 },
    /// Payload: fixed-width random-access entries.
    RandomAccess { num_entries: u32 },
    /// Payload: the footer body (see archive module).
    Footer,
}

impl SubHeader {
    pub fn wire_len(t: SectionType) -> usize {
        match t {
            SectionType::TxtHeader    => 4,
            SectionType::VbHeader     => 16,
            SectionType::B250         => 8,
            SectionType::Local        => 12,
            SectionType::Dict         => 12,
            SectionType::RandomAccess => 4,
            SectionType::Footer       => 0,
        }
    }

    pub fn section_type(&self) -> SectionType {
        match self {
            SubHeader::TxtHeader { .. }    => SectionType::TxtHeader,
            SubHeader::VbHeader { .. }     => SectionType::VbHeader,
            SubHeader::B250 { .. }         => SectionType::B250,
            SubHeader::Local { .. }        => SectionType::Local,
            SubHeader::Dict { .. }         => SectionType::Dict,
            SubHeader::RandomAccess { .. } => SectionType::RandomAccess,
            SubHeader::Footer              => SectionType::Footer,
        }
    }

    pub fn field_id(&self) -> Option<FieldId> {
        match self {
            SubHeader::B250 { field_id }
            | SubHeader::Local { field_id, .. }
            | SubHeader::Dict { field_id, .. } => Some(*field_id),
            _ => None,
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        match *self {
            SubHeader::TxtHeader { data_type } => {
                out.push(data_type);
                out.extend_from_slice(&[0u8; 3]);
            }
            SubHeader::VbHeader { num_lines, txt_len, longest_line, num_contexts } => {
                out.extend_from_slice(&num_lines.to_le_bytes());
                out.extend_from_slice(&txt_len.to_le_bytes());
                out.extend_from_slice(&longest_line.to_le_bytes());
                out.extend_from_slice(&num_contexts.to_le_bytes());
            }
            SubHeader::B250 { field_id } => out.extend_from_slice(&field_id.0),
            SubHeader::Local { field_id, ltype } => {
                out.extend_from_slice(&field_id.0);
                out.push(ltype);
                out.extend_from_slice(&[0u8; 3]);
            }
            SubHeader::Dict { field_id, num_words } => {
                out.extend_from_slice(&field_id.0);
                out.extend_from_slice(&num_words.to_le_bytes());
            }
            SubHeader::RandomAccess { num_entries } => {
                out.extend_from_slice(&num_entries.to_le_bytes());
            }
            SubHeader::Footer => {}
        }
    }

    fn read(t: SectionType, b: &[u8]) -> Result<SubHeader> {
        let need = Self::wire_len(t);
        if b.len() < need {
            return Err(BiozError::Corrupt(format!("truncated {} sub-header", t.name())));
        }
        let fid = |b: &[u8]| FieldId::from_bytes(b[0..8].try_into().unwrap());
        Ok(match t {
            SectionType::TxtHeader => SubHeader::TxtHeader { data_type: b[0] },
            SectionType::VbHeader => SubHeader::VbHeader {
                num_lines:    u32::from_le_bytes(b[0..4].try_into().unwrap()),
                txt_len:      u32::from_le_bytes(b[4..8].try_into().unwrap()),
                longest_line: u32::from_le_bytes(b[8..12].try_into().unwrap()),
                num_contexts: u32::from_le_bytes(b[12..16].try_into().unwrap()),
            },
            SectionType::B250 => SubHeader::B250 { field_id: fid(b) },
            SectionType::Local => SubHeader::Local { field_id: fid(b), ltype: b[8] },
            SectionType::Dict => SubHeader::Dict {
                field_id:  fid(b),
                num_words: u32::from_le_bytes(b[8..12].try_into().unwrap()),
            },
            SectionType::RandomAccess => SubHeader::RandomAccess {
                num_entries: u32::from_le_bytes(b[0..4].try_into().unwrap()),
            },
            SectionType::Footer => SubHeader::Footer,
        })
    }
}

// ── Section header ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SectionHeader {
    pub section_type: SectionType,
    pub flags:        u16,
    pub comp_len:     u32,
    pub uncomp_len:   u32,
    pub codec:        u8,
    pub vblock_i:     u32,
    pub section_i:    u16,
}

impl SectionHeader {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&SECTION_MAGIC.to_le_bytes());
        out.extend_from_slice(&(self.section_type as u16).to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.comp_len.to_le_bytes());
        out.extend_from_slice(&self.uncomp_len.to_le_bytes());
        out.push(self.codec);
        out.push(0); // reserved
        out.extend_from_slice(&self.vblock_i.to_le_bytes());
        out.extend_from_slice(&self.section_i.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // reserved2
    }

    pub fn read<R: Read>(mut r: R) -> Result<Self> {
        let magic = r.read_u32::<LittleEndian>()?;
        if magic != SECTION_MAGIC {
            return Err(BiozError::Corrupt(format!(
                "bad section magic {magic:#010x} (expected {SECTION_MAGIC:#010x})"
            )));
        }
        let type_raw  = r.read_u16::<LittleEndian>()?;
        let flags     = r.read_u16::<LittleEndian>()?;
        let comp_len  = r.read_u32::<LittleEndian>()?;
        let uncomp_len = r.read_u32::<LittleEndian>()?;
        let codec     = r.read_u8()?;
        let _reserved = r.read_u8()?;
        let vblock_i  = r.read_u32::<LittleEndian>()?;
        let section_i = r.read_u16::<LittleEndian>()?;
        let _reserved2 = r.read_u16::<LittleEndian>()?;

        let section_type = SectionType::from_u16(type_raw)
            .ok_or_else(|| BiozError::Corrupt(format!("unknown section type {type_raw}")))?;
        Ok(SectionHeader {
            section_type, flags, comp_len, uncomp_len, codec, vblock_i, section_i,
        })
    }

    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.flags & SECTION_FLAG_ENCRYPTED != 0
    }
}

// ── Building sections ────────────────────────────────────────────────────────

/// One fully serialized section, ready to append to the archive.
#[derive(Debug)]
pub struct SectionBuf {
    pub section_type: SectionType,
    pub field_id:     Option<FieldId>,
    pub bytes:        Vec<u8>,
}

/// Compress (falling back to stored when compression does not help),
/// optionally seal, and frame `payload` as one section.
pub fn build_section(
    sub:       &SubHeader,
    payload:   &[u8],
    codec_id:  CodecId,
    level:     i32,
    vblock_i:  u32,
    section_i: u16,
    key:       Option<&[u8; 32]>,
) -> Result<SectionBuf> {
    let mut compressed = get_codec(codec_id).compress(payload, level)?;
    let mut codec = codec_id;
    if compressed.len() >= payload.len() {
        compressed = payload.to_vec();
        codec = CodecId::None;
    }
    frame(sub, payload.len(), compressed, codec, vblock_i, section_i, key)
}

/// Streaming variant: the payload arrives as slices and is fed straight
/// into the codec without materializing one contiguous buffer.
pub fn build_section_parts<'a>(
    sub:       &SubHeader,
    parts:     &mut dyn Iterator<Item = &'a [u8]>,
    uncomp_len: usize,
    codec_id:  CodecId,
    level:     i32,
    vblock_i:  u32,
    section_i: u16,
    key:       Option<&[u8; 32]>,
) -> Result<SectionBuf> {
    let compressed = get_codec(codec_id).compress_parts(parts, level)?;
    frame(sub, uncomp_len, compressed, codec_id, vblock_i, section_i, key)
}

fn frame(
    sub:        &SubHeader,
    uncomp_len: usize,
    compressed: Vec<u8>,
    codec:      CodecId,
    vblock_i:   u32,
    section_i:  u16,
    key:        Option<&[u8; 32]>,
) -> Result<SectionBuf> {
    let section_type = sub.section_type();
    // The footer must stay readable without the key: it is how a decoder
    // learns the archive is encrypted in the first place.
    let encrypt = key.is_some() && section_type != SectionType::Footer;

    let payload = if let Some(key) = key.filter(|_| encrypt) {
        let nonce = crypto::section_nonce(section_type as u16, vblock_i, section_i);
        crypto::seal(key, &nonce, &compressed)?
    } else {
        compressed
    };

    if uncomp_len > u32::MAX as usize || payload.len() > u32::MAX as usize {
        return Err(BiozError::Corrupt(format!(
            "section {} exceeds 4 GiB", section_type.name()
        )));
    }

    let header = SectionHeader {
        section_type,
        flags: if encrypt { SECTION_FLAG_ENCRYPTED } else { 0 },
        comp_len: payload.len() as u32,
        uncomp_len: uncomp_len as u32,
        codec: codec as u8,
        vblock_i,
        section_i,
    };

    let mut bytes = Vec::with_capacity(
        SECTION_HEADER_SIZE + SubHeader::wire_len(section_type) + payload.len(),
    );
    header.write(&mut bytes);
    sub.write(&mut bytes);
    bytes.extend_from_slice(&payload);

    Ok(SectionBuf { section_type, field_id: sub.field_id(), bytes })
}

// ── Reading sections ─────────────────────────────────────────────────────────

/// Read one section at `offset`: header, sub-header, and the fully
/// decoded (opened + decompressed) payload.
pub fn read_section<R: Read + Seek>(
    r:      &mut R,
    offset: u64,
    key:    Option<&[u8; 32]>,
) -> Result<(SectionHeader, SubHeader, Vec<u8>)> {
    r.seek(SeekFrom::Start(offset))?;
    let header = SectionHeader::read(&mut *r)?;

    let mut sub_bytes = vec![0u8; SubHeader::wire_len(header.section_type)];
    r.read_exact(&mut sub_bytes)?;
    let sub = SubHeader::read(header.section_type, &sub_bytes)?;

    let mut payload = vec![0u8; header.comp_len as usize];
    r.read_exact(&mut payload)?;

    if header.is_encrypted() {
        let key = key.ok_or(BiozError::PasswordRequired)?;
        let nonce =
            crypto::section_nonce(header.section_type as u16, header.vblock_i, header.section_i);
        payload = crypto::open(key, &nonce, &payload).map_err(|_| BiozError::WrongPassword)?;
    }

    let decoded = get_codec_by_tag(header.codec)?
        .decompress(&payload, header.uncomp_len as usize)?;
    if decoded.len() != header.uncomp_len as usize {
        return Err(BiozError::Corrupt(format!(
            "section {} vblock {} decoded to {} bytes, header says {}",
            header.section_type.name(), header.vblock_i, decoded.len(), header.uncomp_len
        )));
    }
    Ok((header, sub, decoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{Category, FieldId};
    use std::io::Cursor;

    #[test]
    fn section_roundtrip_plain() {
        let fid = FieldId::new("CHROM", Category::Primary);
        let sub = SubHeader::B250 { field_id: fid };
        let payload = b"abcabcabcabcabcabcabcabcabc".repeat(50);
        let sec = build_section(&sub, &payload, CodecId::Zstd, 3, 7, 1, None).unwrap();

        let mut cur = Cursor::new(sec.bytes);
        let (h, s, p) = read_section(&mut cur, 0, None).unwrap();
        assert_eq!(h.section_type, SectionType::B250);
        assert_eq!(h.vblock_i, 7);
        assert_eq!(h.section_i, 1);
        assert_eq!(s, sub);
        assert_eq!(p, payload);
    }

    #[test]
    fn incompressible_payload_stores_raw() {
        let sub = SubHeader::Local {
            field_id: FieldId::new("SEQ", Category::Primary),
            ltype: 3,
        };
        let payload: Vec<u8> = (0..=255u8).collect();
        let sec = build_section(&sub, &payload, CodecId::Zstd, 3, 0, 0, None).unwrap();
        let mut cur = Cursor::new(sec.bytes);
        let (h, _, p) = read_section(&mut cur, 0, None).unwrap();
        assert_eq!(h.codec, CodecId::None as u8);
        assert_eq!(p, payload);
    }

    #[test]
    fn encrypted_section_needs_right_key() {
        let key = [7u8; 32];
        let sub = SubHeader::TxtHeader { data_type: 0 };
        let sec =
            build_section(&sub, b"##fileformat=VCFv4.2\n", CodecId::Zstd, 3, VB_NONE, 0, Some(&key))
                .unwrap();

        let mut cur = Cursor::new(sec.bytes.clone());
        let (_, _, p) = read_section(&mut cur, 0, Some(&key)).unwrap();
        assert_eq!(p, b"##fileformat=VCFv4.2\n");

        let mut cur = Cursor::new(sec.bytes.clone());
        assert!(matches!(
            read_section(&mut cur, 0, Some(&[8u8; 32])),
            Err(BiozError::WrongPassword)
        ));
        let mut cur = Cursor::new(sec.bytes);
        assert!(matches!(
            read_section(&mut cur, 0, None),
            Err(BiozError::PasswordRequired)
        ));
    }
}
