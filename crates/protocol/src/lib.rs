//! Frame codec and message model for the dirsyncd peer protocol.
//!
//! This crate implements an 8-byte length-prefixed, zlib-compressed JSON
//! framing, and the tagged [`message::Message`] variants that ride inside
//! it. It has no knowledge of sockets, peers, or sync policy — that lives
//! in `sync_core`.

pub mod error;
pub mod frame;
pub mod message;

pub use error::{FrameError, FrameResult};
pub use frame::{read_frame, write_frame, DEFAULT_MAX_FRAME_BYTES};
pub use message::{DirStateEntry, Message};
