//! Codec wrappers — one uniform interface over several byte-stream
//! compressors.
//!
//! # Identity rules
//! Every codec is identified by a one-byte tag recorded in each section
//! header.  Tags are frozen: a value is never reused, even if a codec is
//! deprecated.  A reader that encounters an unknown tag MUST fail — no
//! negotiation, no fallback.
//!
//! | tag | codec  | role |
//! |-----|--------|------|
//! | 0   | none   | passthrough "stored" mode |
//! | 1   | zstd   | general-purpose block compressor (default) |
//! | 2   | lzma   | high-ratio range coder |
//! | 3   | brotli | dictionary compressor, strongest on short strings |
//! | 4   | lz4    | maximum-throughput fallback |

use std::io::{self, Read, Write};
use thiserror::Error;

// ── CodecId ──────────────────────────────────────────────────────────────────

/// On-disk codec tag.  The numeric value is the byte written into section
/// headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CodecId {
    None   = 0,
    Zstd   = 1,
    Lzma   = 2,
    Brotli = 3,
    Lz4    = 4,
}

impl CodecId {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CodecId::None),
            1 => Some(CodecId::Zstd),
            2 => Some(CodecId::Lzma),
            3 => Some(CodecId::Brotli),
            4 => Some(CodecId::Lz4),
            _ => None,
        }
    }

    /// Human-readable name (diagnostics only — never parsed off disk).
    pub fn name(self) -> &'static str {
        match self {
            CodecId::None   => "none",
            CodecId::Zstd   => "zstd",
            CodecId::Lzma   => "lzma",
            CodecId::Brotli => "brotli",
            CodecId::Lz4    => "lz4",
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none"   => Some(CodecId::None),
            "zstd"   => Some(CodecId::Zstd),
            "lzma"   => Some(CodecId::Lzma),
            "brotli" => Some(CodecId::Brotli),
            "lz4"    => Some(CodecId::Lz4),
            _        => None,
        }
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    /// Emitted when a section names a codec tag this build does not know.
    #[error("Unknown codec tag {tag} — cannot decode this section")]
    UnknownCodec { tag: u8 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn codec_id(&self) -> CodecId;

    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError>;

    /// `uncomp_hint` is the decompressed size recorded in the section
    /// header — used to pre-size the output where the codec allows it.
    fn decompress(&self, data: &[u8], uncomp_hint: usize) -> Result<Vec<u8>, CodecError>;

    /// Streaming callback form: compress a sequence of slices as one
    /// stream without first materializing them into a contiguous buffer.
    /// The default concatenates; codecs with a true streaming encoder
    /// override it.
    fn compress_parts(
        &self,
        parts: &mut dyn Iterator<Item = &[u8]>,
        level: i32,
    ) -> Result<Vec<u8>, CodecError> {
        let mut whole = Vec::new();
        for p in parts {
            whole.extend_from_slice(p);
        }
        self.compress(&whole, level)
    }
}

// ── Built-in codec implementations ──────────────────────────────────────────

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn codec_id(&self) -> CodecId { CodecId::None }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8], _: usize) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
}

pub struct ZstdCodec;
impl Codec for ZstdCodec {
    fn codec_id(&self) -> CodecId { CodecId::Zstd }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        zstd::encode_all(data, level).map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8], uncomp_hint: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(uncomp_hint);
        zstd::Decoder::new(data)
            .and_then(|mut d| d.read_to_end(&mut out))
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
    fn compress_parts(
        &self,
        parts: &mut dyn Iterator<Item = &[u8]>,
        level: i32,
    ) -> Result<Vec<u8>, CodecError> {
        let mut enc = zstd::Encoder::new(Vec::new(), level)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        for p in parts {
            enc.write_all(p).map_err(|e| CodecError::Compression(e.to_string()))?;
        }
        enc.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }
}

pub struct LzmaCodec;
impl Codec for LzmaCodec {
    fn codec_id(&self) -> CodecId { CodecId::Lzma }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::lzma_compress(&mut std::io::Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        Ok(out)
    }
    fn decompress(&self, data: &[u8], _: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::lzma_decompress(&mut std::io::Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

pub struct BrotliCodec;
impl Codec for BrotliCodec {
    fn codec_id(&self) -> CodecId { CodecId::Brotli }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        let quality = level.clamp(0, 11) as u32;
        let mut out = Vec::new();
        {
            let mut w = brotli::CompressorWriter::new(&mut out, 4096, quality, 22);
            w.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        }
        Ok(out)
    }
    fn decompress(&self, data: &[u8], uncomp_hint: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(uncomp_hint);
        brotli::Decompressor::new(data, 4096)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

pub struct Lz4Codec;
impl Codec for Lz4Codec {
    fn codec_id(&self) -> CodecId { CodecId::Lz4 }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::compress_prepend_size(data))
    }
    fn decompress(&self, data: &[u8], _: usize) -> Result<Vec<u8>, CodecError> {
        lz4_flex::decompress_size_prepended(data)
            .map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a codec tag read off disk.  Fails hard on unknown tags.
pub fn get_codec_by_tag(tag: u8) -> Result<Box<dyn Codec>, CodecError> {
    match CodecId::from_u8(tag) {
        Some(id) => Ok(get_codec(id)),
        None     => Err(CodecError::UnknownCodec { tag }),
    }
}

pub fn get_codec(id: CodecId) -> Box<dyn Codec> {
    match id {
        CodecId::None   => Box::new(NoneCodec),
        CodecId::Zstd   => Box::new(ZstdCodec),
        CodecId::Lzma   => Box::new(LzmaCodec),
        CodecId::Brotli => Box::new(BrotliCodec),
        CodecId::Lz4    => Box::new(Lz4Codec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut v = Vec::new();
        for i in 0..2000u32 {
            v.extend_from_slice(format!("chr1\t{}\tA\tG\n", 100 + i).as_bytes());
        }
        v
    }

    #[test]
    fn all_codecs_roundtrip() {
        let data = sample();
        for id in [CodecId::None, CodecId::Zstd, CodecId::Lzma, CodecId::Brotli, CodecId::Lz4] {
            let c = get_codec(id);
            let comp = c.compress(&data, 3).unwrap();
            let back = c.decompress(&comp, data.len()).unwrap();
            assert_eq!(back, data, "codec {}", id.name());
        }
    }

    #[test]
    fn parts_equal_whole() {
        let data = sample();
        let c = ZstdCodec;
        let mut parts = data.chunks(37);
        let streamed = c.compress_parts(&mut parts, 3).unwrap();
        let back = c.decompress(&streamed, data.len()).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn unknown_tag_is_fatal() {
        assert!(get_codec_by_tag(99).is_err());
    }
}
