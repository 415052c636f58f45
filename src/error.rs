//! Typed errors for gcc-ocf.
//!
//! Kept small and boring on purpose: the CLI maps each variant to a stable
//! exit code (see [`GccError::exit_code`]) and nothing downstream should need
//! to pattern-match on error text.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// The base error type for the whole crate.
///
/// Variant ordering mirrors the original error taxonomy: usage mistakes,
/// then the three "this payload is bad" buckets (corrupt/bad-magic/unsupported
/// version), then the two "something is missing or doesn't match" buckets.
#[derive(Debug, Error)]
pub enum GccError {
    #[error("usage error: {0}")]
    Usage(String),

    #[error("corrupt payload: {0}")]
    CorruptPayload(String),

    #[error("bad magic: {0}")]
    BadMagic(String),

    #[error("unsupported version: {0}")]
    UnsupportedVersion(String),

    #[error("missing resource: {0}")]
    MissingResource(String),

    #[error("hash mismatch: {0}")]
    HashMismatch(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl GccError {
    /// Frozen exit codes. These are part of the external CLI contract and must
    /// never be renumbered once released.
    pub fn exit_code(&self) -> i32 {
        match self {
            GccError::Usage(_) => 2,
            GccError::CorruptPayload(_) => 10,
            GccError::BadMagic(_) => 10,
            GccError::UnsupportedVersion(_) => 11,
            GccError::MissingResource(_) => 12,
            GccError::HashMismatch(_) => 13,
            GccError::Io { .. } => 10,
            GccError::Json(_) => 10,
            GccError::Other(_) => 10,
        }
    }

    pub fn io(source: std::io::Error, path: impl AsRef<Path>) -> Self {
        GccError::Io { source, path: path.as_ref().to_path_buf() }
    }
}

pub type GccResult<T> = Result<T, GccError>;

impl From<std::io::Error> for GccError {
    fn from(err: std::io::Error) -> Self {
        GccError::Io { source: err, path: PathBuf::new() }
    }
}
