//! crates/protocol/src/error.rs
//!
//! Error types for frame encoding/decoding.

use std::io;

use thiserror::Error;

/// Result type for frame codec operations.
pub type FrameResult<T> = Result<T, FrameError>;

/// Errors that can occur while reading or writing a framed message.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The peer closed the socket before a complete frame arrived.
    #[error("connection closed before a complete frame arrived")]
    Closed,
    /// The declared frame length exceeds the configured cap.
    #[error("frame length {len} exceeds cap of {cap} bytes")]
    TooLarge {
        /// Declared length on the wire.
        len: u64,
        /// Configured `max_frame_bytes` cap.
        cap: u64,
    },
    /// The zlib payload failed to decompress.
    #[error("failed to decompress frame payload: {0}")]
    Decompress(String),
    /// The decompressed payload was not valid JSON, or not a known message shape.
    #[error("failed to parse frame payload as JSON: {0}")]
    Parse(
        #[from]
        #[source]
        serde_json::Error,
    ),
    /// Underlying I/O error on the socket.
    #[error("I/O error: {0}")]
    Io(
        #[from]
        #[source]
        io::Error,
    ),
}
