//! crates/protocol/src/frame.rs
//!
//! Length-prefixed, zlib-compressed message framing: an 8-byte big-endian
//! length `N`, followed by `N` bytes of zlib-compressed UTF-8 JSON.
//!
//! Frame reads and writes are each a single call into the underlying
//! stream's buffered reader/writer; callers are responsible for
//! serializing concurrent writers onto one socket (the session's send
//! queue does this).

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{FrameError, FrameResult};
use crate::message::Message;

/// Default cap on a frame's declared length, matching `Config`'s
/// `max_frame_bytes` default of 64 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: u64 = 64 * 1024 * 1024;

/// Encode `msg` into a complete frame (length prefix + compressed payload).
///
/// # Errors
///
/// Returns [`FrameError::Parse`] if `msg` cannot be serialized to JSON (this
/// should not happen for well-formed [`Message`] values) and
/// [`FrameError::Io`] if compression itself fails.
pub fn encode(msg: &Message) -> FrameResult<Vec<u8>> {
    let json = serde_json::to_vec(msg)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;

    let mut out = Vec::with_capacity(8 + compressed.len());
    out.extend_from_slice(&(compressed.len() as u64).to_be_bytes());
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Write one frame for `msg` to `writer`.
///
/// # Errors
///
/// See [`encode`] and [`FrameError::Io`].
pub fn write_frame<W: Write>(writer: &mut W, msg: &Message) -> FrameResult<()> {
    let frame = encode(msg)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read exactly one frame from `reader` and decode it into a [`Message`].
///
/// Returns `Ok(None)` if the stream is at EOF exactly on a frame boundary
/// (a graceful close). A short read partway through the length prefix or
/// payload is [`FrameError::Closed`].
///
/// # Errors
///
/// [`FrameError::TooLarge`] if the declared length exceeds `max_frame_bytes`,
/// [`FrameError::Decompress`] on a corrupt zlib stream, [`FrameError::Parse`]
/// on invalid JSON, and [`FrameError::Io`] on other I/O failures.
pub fn read_frame<R: Read>(reader: &mut R, max_frame_bytes: u64) -> FrameResult<Option<Message>> {
    let mut len_buf = [0u8; 8];
    match read_exact_or_eof(reader, &mut len_buf)? {
        ReadOutcome::Eof => return Ok(None),
        ReadOutcome::Partial => return Err(FrameError::Closed),
        ReadOutcome::Full => {}
    }
    let len = u64::from_be_bytes(len_buf);
    if len > max_frame_bytes {
        return Err(FrameError::TooLarge {
            len,
            cap: max_frame_bytes,
        });
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::Closed
        } else {
            FrameError::Io(e)
        }
    })?;

    let mut decoder = ZlibDecoder::new(&payload[..]);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| FrameError::Decompress(e.to_string()))?;

    let msg: Message = serde_json::from_slice(&json)?;
    Ok(Some(msg))
}

enum ReadOutcome {
    Full,
    Partial,
    Eof,
}

/// Like `read_exact`, but distinguishes "nothing read at all" (clean EOF)
/// from "some bytes read, then EOF" (a peer that died mid-frame).
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> FrameResult<ReadOutcome> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => {
                return Ok(if total == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Partial
                });
            }
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FrameError::Io(e)),
        }
    }
    Ok(ReadOutcome::Full)
}
