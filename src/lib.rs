//! # biozip — domain-specific compressor for genomic text formats
//!
//! Format guarantees (frozen in v1):
//! - All numeric fields are little-endian, except b250 dictionary
//!   references, which use the base-250 form documented in `b250`
//! - Every section is self-describing: magic, type, sizes, codec tag
//! - The footer is at the end; its offset sits in the last 8 bytes of
//!   the file, and both the file header and the footer carry a CRC32
//! - `decompress(compress(input))` is byte-identical, verified by a
//!   running BLAKE3 digest per component and over the whole archive
//! - Encrypted archives seal every section except the footer with
//!   AES-256-GCM; the nonce derives from (section type, block index,
//!   section-within-block index) and is never stored
//! - Random access by genomic region loads one dictionary and the RA
//!   index, then decodes only overlapping blocks

pub mod archive;
pub mod b250;
pub mod buffer;
pub mod codec;
pub mod context;
pub mod crypto;
pub mod datatype;
pub mod digest;
pub mod dispatch;
pub mod error;
pub mod fingerprint;
pub mod hash;
pub mod random_access;
pub mod reader;
pub mod reconstruct;
pub mod section;
pub mod segment;
pub mod vblock;
pub mod writer;

// Flat re-exports for the most common types.
pub use archive::{FileHeader, Footer, Manifest};
pub use codec::CodecId;
pub use datatype::DataType;
pub use error::{BiozError, Result};
pub use reader::{unzip_to_file, unzip_to_vec, ArchiveReader, UnzipOptions, UnzipStats};
pub use writer::{zip_files, ZipOptions, ZipStats, ZipWriter};
