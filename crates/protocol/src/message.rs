//! crates/protocol/src/message.rs
//!
//! Tagged message variants exchanged between peers: each rides the wire as
//! a UTF-8 JSON object whose `type` field selects the variant.

use serde::{Deserialize, Serialize};

/// One file's state as carried in a [`Message::DirState`] snapshot.
///
/// `sig` is the base64-encoded opaque signature blob produced by the
/// external signature primitive; it is present for every entry because
/// `DIR_STATE` always accompanies a fresh walk with up-to-date signatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirStateEntry {
    /// Forward-slash-normalized path relative to the monitored root.
    pub path: String,
    /// Modification time in seconds, the sole ordering key.
    pub mtime: f64,
    /// File size in bytes, informational only (ties are not broken on it
    /// during reconciliation itself — see `model::FileStat`).
    pub size: u64,
    /// Base64-encoded signature blob.
    pub sig: String,
    /// Strong hash of the file's full content, used to break an exact
    /// `mtime` tie between two peers deterministically.
    pub content_hash: u64,
}

/// A message exchanged on a peer socket, tagged by `type` on the wire.
///
/// `CREATE`, `MODIFY`, `DELETE`, and `RENAME` are collectively referred to
/// as a `MODIFICATION_UPDATE`: reconciliation pushes and steady-state event
/// propagation both use these same four variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// UDP-only discovery beacon (never sent over a framed peer socket).
    #[serde(rename = "BEACON")]
    Beacon {
        /// The advertised TCP listen port of the sender.
        port: u16,
    },
    /// Full directory-state snapshot sent once per session on entering
    /// `Reconciling`.
    #[serde(rename = "DIR_STATE")]
    DirState {
        /// Every regular file under the sender's monitored root.
        files: Vec<DirStateEntry>,
    },
    /// A new file, or a file the receiver doesn't know about yet.
    #[serde(rename = "CREATE")]
    Create {
        /// Path relative to the monitored root.
        path: String,
        /// New modification time.
        mtime: f64,
        /// Base64-encoded full file contents.
        bytes: String,
    },
    /// An rsync-style delta against a signature of the receiver's prior
    /// content.
    #[serde(rename = "MODIFY")]
    Modify {
        /// Path relative to the monitored root.
        path: String,
        /// New modification time.
        mtime: f64,
        /// Base64-encoded delta blob.
        delta: String,
    },
    /// A file removed by the sender.
    #[serde(rename = "DELETE")]
    Delete {
        /// Path relative to the monitored root.
        path: String,
        /// Modification time recorded at the moment of deletion.
        mtime: f64,
    },
    /// A file moved by the sender.
    #[serde(rename = "RENAME")]
    Rename {
        /// Prior path.
        src: String,
        /// New path.
        dst: String,
        /// Modification time associated with the rename.
        mtime: f64,
    },
}

impl Message {
    /// Returns the wire `type` tag for this message, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Beacon { .. } => "BEACON",
            Message::DirState { .. } => "DIR_STATE",
            Message::Create { .. } => "CREATE",
            Message::Modify { .. } => "MODIFY",
            Message::Delete { .. } => "DELETE",
            Message::Rename { .. } => "RENAME",
        }
    }

    /// The mtime carried by this message, if any (`DIR_STATE` and `BEACON`
    /// carry none).
    #[must_use]
    pub fn mtime(&self) -> Option<f64> {
        match self {
            Message::Create { mtime, .. }
            | Message::Modify { mtime, .. }
            | Message::Delete { mtime, .. }
            | Message::Rename { mtime, .. } => Some(*mtime),
            Message::Beacon { .. } | Message::DirState { .. } => None,
        }
    }
}
