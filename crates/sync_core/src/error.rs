//! crates/sync_core/src/error.rs
//!
//! Error kinds and their disposition. Each variant documents what the
//! supervisor/session does with it; only [`ConfigError`] is fatal to the
//! process.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::PeerId;

/// Result type for configuration construction.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Startup configuration errors: fatal, the process never enters the run
/// loop.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `monitored_dir` does not exist or is not a directory.
    #[error("monitored_dir {0:?} does not exist or is not a directory")]
    MonitoredDirMissing(PathBuf),
    /// The signature directory could not be created.
    #[error("cannot create signature_dir {path:?}: {source}")]
    SignatureDirUnavailable {
        /// The configured signature directory.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Two configured ports collide (broadcast and listen must differ).
    #[error("broadcast_port and listen_port must differ (both {0})")]
    PortCollision(u16),
}

/// Result type for peer-session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that close a [`crate::session::PeerSession`]: the registry
/// removes the session and a later beacon causes re-dial and
/// re-reconciliation. None of these are fatal to the process.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Frame codec failure.
    #[error(transparent)]
    Frame(#[from] protocol::FrameError),
    /// The peer violated the expected message ordering or sent a message
    /// type not valid in the current state.
    #[error("protocol violation from {peer}: {detail}")]
    ProtocolViolation {
        /// The offending peer.
        peer: PeerId,
        /// Human-readable description.
        detail: String,
    },
    /// A duplicate session for the same `PeerId` lost the tie-break.
    #[error("duplicate session for {0}, closing the losing side")]
    DuplicateSession(PeerId),
    /// The send queue overflowed its bound.
    #[error("send queue backpressure for {0}, closing the session")]
    Backpressure(PeerId),
    /// A local I/O failure (e.g. the directory walk backing an outbound
    /// `DIR_STATE`) prevented the session from proceeding.
    #[error("local I/O error: {0}")]
    Io(
        #[from]
        #[source]
        io::Error,
    ),
}

/// Result type for applying a remote message to the local filesystem.
pub type ApplyResult<T> = Result<T, ApplyError>;

/// Errors encountered while applying a received message. None of these
/// close the session; the message is dropped and a future reconciliation
/// retries.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// A `MODIFY` arrived with only a delta and no local base file exists.
    #[error("no local base file for {0}, dropping delta and waiting for reconciliation")]
    MissingBase(String),
    /// The path escapes the monitored root or is otherwise invalid.
    #[error("invalid path in message: {0}")]
    InvalidPath(String),
    /// An I/O error occurred while writing, patching, or removing a file.
    #[error("I/O error applying update to {path}: {source}")]
    Io {
        /// The path being updated.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Delta/patch computation failed.
    #[error(transparent)]
    Signature(#[from] signature::SignatureError),
}

/// Result type for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors from the UDP discovery beacon/listener. Logged and retried;
/// discovery never brings down the process.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Failed to bind or configure the UDP socket.
    #[error("discovery socket error on {addr}: {source}")]
    Socket {
        /// The address that failed to bind.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Failed to send or receive a beacon.
    #[error("discovery I/O error: {0}")]
    Io(
        #[from]
        #[source]
        io::Error,
    ),
}

/// Result type for the supervisor's outermost operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Aggregates every error kind into one top-level type for the supervisor's
/// outermost `Result`.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Fatal startup misconfiguration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A peer session failed.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Applying a remote update failed.
    #[error(transparent)]
    Apply(#[from] ApplyError),
    /// Discovery failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    /// The signature store could not be opened.
    #[error(transparent)]
    Signature(#[from] signature::SignatureError),
    /// A bare I/O error not otherwise categorized (directory walks, etc).
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_mentions_the_path() {
        let err = ConfigError::MonitoredDirMissing(PathBuf::from("/no/such/dir"));
        assert!(err.to_string().contains("/no/such/dir"));
    }

    #[test]
    fn port_collision_mentions_the_port() {
        let err = ConfigError::PortCollision(6000);
        assert!(err.to_string().contains("6000"));
    }

    #[test]
    fn sync_error_wraps_config_error_via_from() {
        let cfg_err = ConfigError::PortCollision(1);
        let sync_err: SyncError = cfg_err.into();
        assert!(matches!(sync_err, SyncError::Config(_)));
    }
}
