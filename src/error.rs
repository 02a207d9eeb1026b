//! Crate-wide error taxonomy.
//!
//! Every error surfaced by this crate falls into one of the six kinds below.
//! There are no internal retries or fallbacks: an error always propagates to
//! the caller exactly as raised. `warn` integrity mode (see [`crate::hashchain`])
//! downgrades hash-chain mismatches to a log line; it never turns any of
//! these variants into a silent success.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GicsError {
    /// Unexpected EOF, truncated block/section/segment/footer, missing EOS marker.
    #[error("incomplete data: {0}")]
    IncompleteData(String),

    /// Magic mismatch, CRC mismatch, hash-chain mismatch, decompressed-length
    /// mismatch, out-of-bounds offset/length, cross-stream length inequality,
    /// unsupported version, invalid encryption password.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Declared uncompressed size above the safety cap, dictionary explosion,
    /// block count beyond the implementation max.
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// Categorical value not in enum and not a passthrough integer, missing
    /// required field, wrong itemIdType for the provided key.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// Version byte outside the supported range for this build.
    #[error("version mismatch: {0}")]
    VersionMismatch(String),

    /// Only raised at the file-handle boundary; never from pure in-memory
    /// codec paths.
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, GicsError>;

impl GicsError {
    /// Maps an error to the CLI exit code fixed by the external interface.
    pub fn exit_code(&self) -> i32 {
        match self {
            GicsError::IncompleteData(_) => 1,
            GicsError::Integrity(_) => 1,
            GicsError::LimitExceeded(_) => 1,
            GicsError::SchemaViolation(_) => 2,
            GicsError::VersionMismatch(_) => 1,
            GicsError::IoError(_) => 3,
        }
    }
}
