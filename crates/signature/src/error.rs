//! crates/signature/src/error.rs
//!
//! Error types for signature storage and the signature/delta/patch
//! primitives.

use std::io;

use thiserror::Error;

/// Result type for signature-store operations.
pub type SignatureResult<T> = Result<T, SignatureError>;

/// Errors that can occur while computing, storing, or applying signatures
/// and deltas.
#[derive(Debug, Error)]
pub enum SignatureError {
    /// I/O error reading from or writing to the signature store directory.
    #[error("signature store I/O error: {0}")]
    Io(
        #[from]
        #[source]
        io::Error,
    ),
    /// A persisted signature blob could not be parsed.
    #[error("corrupt signature for {path}: {source}")]
    Corrupt {
        /// The relative path whose signature failed to parse.
        path: String,
        /// Underlying parse error from the signature primitive.
        source: fast_rsync::SignatureParseError,
    },
    /// Delta computation failed (signature/data mismatch, truncated input).
    #[error("failed to compute delta: {0}")]
    Diff(#[source] fast_rsync::DiffError),
    /// Patch application failed (corrupt delta, base mismatch).
    #[error("failed to apply delta: {0}")]
    Apply(#[source] fast_rsync::ApplyError),
    /// No persisted signature exists for a path that requires one.
    #[error("no signature on record for {0}")]
    MissingBase(String),
}
