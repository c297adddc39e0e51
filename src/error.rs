//! Crate-wide error taxonomy.
//!
//! Workers never abort the process: every fallible step returns
//! [`BiozError`] through the pipeline, the dispatcher records the first one
//! seen, and the driver translates it into the process exit code.

use std::io;
use thiserror::Error;

use crate::codec::CodecError;
use crate::crypto::CryptoError;

pub type Result<T> = std::result::Result<T, BiozError>;

#[derive(Error, Debug)]
pub enum BiozError {
    /// A parser rejected a line of input.  Always carries enough context to
    /// locate the offending bytes in the original file.
    #[error("{path}: malformed input in block {vblock}, line {line}: {what}")]
    Malformed {
        path:   String,
        vblock: u32,
        line:   u32,
        what:   String,
    },

    #[error("Not a .bioz archive (bad magic)")]
    InvalidMagic,

    #[error("Archive format version {found} is newer than this build (max supported: {supported}) — please upgrade")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("File header CRC32 mismatch — archive is corrupted")]
    HeaderCrcMismatch,

    #[error("Integrity failure: reconstructed digest {actual} does not match recorded digest {expected}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("Archive is corrupt: {0}")]
    Corrupt(String),

    /// b250 reference beyond 2^31 distinct values — not expected on any
    /// real input; indicates the context model has broken down.
    #[error("b250 overflow in context {ctx}: more than 2^31 distinct values")]
    B250Overflow { ctx: String },

    #[error("Dictionary overflow in context {ctx}: more than 2^32 bytes")]
    DictOverflow { ctx: String },

    #[error("Archive is encrypted — a password is required")]
    PasswordRequired,

    #[error("Wrong password for encrypted archive")]
    WrongPassword,

    /// Multi-file mode only: the offending input is skipped with a warning
    /// and processing continues with the remaining files.
    #[error("{path}: unsupported input type")]
    SkippedInput { path: String },

    #[error("Cannot concatenate {path}: {why}")]
    ConcatMismatch { path: String, why: String },

    #[error("Unknown region syntax: {0}")]
    BadRegion(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl BiozError {
    /// Shorthand used by the segmenters.
    pub fn malformed(path: &str, vblock: u32, line: u32, what: impl Into<String>) -> Self {
        BiozError::Malformed { path: path.to_owned(), vblock, line, what: what.into() }
    }
}
