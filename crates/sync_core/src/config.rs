//! crates/sync_core/src/config.rs
//!
//! The `Config` external collaborator: every tunable the core engine reads,
//! validated once at startup. The root binary crate is responsible for
//! populating this from CLI flags and/or environment, per its own policy;
//! this module only owns the shape and the validation rules.

use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};

/// Default UDP port for discovery beacons.
pub const DEFAULT_BROADCAST_PORT: u16 = 5000;
/// Default TCP port for peer sessions.
pub const DEFAULT_LISTEN_PORT: u16 = 6000;
/// Default signature store location.
pub const DEFAULT_SIGNATURE_DIR: &str = "/tmp/signatures";
/// Default seconds between discovery beacons.
pub const DEFAULT_BEACON_INTERVAL_S: u64 = 5;
/// Default hard cap on a frame's declared length (64 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: u64 = 64 * 1024 * 1024;
/// Default bound on a peer session's outbound queue depth.
pub const DEFAULT_SEND_QUEUE_DEPTH: usize = 256;
/// Default grace period before a stale ignore-set entry expires.
pub const DEFAULT_IGNORE_GRACE_S: f64 = 2.0;
/// Default timeout on an outbound peer dial.
pub const DEFAULT_CONNECT_TIMEOUT_S: u64 = 5;

/// Every tunable the core engine needs, already validated.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory to watch and synchronize. Must exist.
    pub monitored_dir: PathBuf,
    /// UDP port discovery beacons are sent to and listened on.
    pub broadcast_port: u16,
    /// TCP port peer sessions accept on and dial.
    pub listen_port: u16,
    /// Directory backing the persistent per-file signature cache.
    pub signature_dir: PathBuf,
    /// Seconds between periodic discovery beacons.
    pub beacon_interval_s: u64,
    /// Hard cap on a frame's declared length.
    pub max_frame_bytes: u64,
    /// Bound on a peer session's outbound send-queue depth before the
    /// session is closed with backpressure.
    pub send_queue_depth: usize,
    /// Grace period, in seconds, before a stale ignore-set entry expires.
    pub ignore_grace_s: f64,
    /// Timeout, in seconds, on an outbound peer dial.
    pub connect_timeout_s: u64,
}

impl Config {
    /// Build a config for `monitored_dir` with every other option at its
    /// documented default.
    #[must_use]
    pub fn new(monitored_dir: impl Into<PathBuf>) -> Self {
        Self {
            monitored_dir: monitored_dir.into(),
            broadcast_port: DEFAULT_BROADCAST_PORT,
            listen_port: DEFAULT_LISTEN_PORT,
            signature_dir: PathBuf::from(DEFAULT_SIGNATURE_DIR),
            beacon_interval_s: DEFAULT_BEACON_INTERVAL_S,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            send_queue_depth: DEFAULT_SEND_QUEUE_DEPTH,
            ignore_grace_s: DEFAULT_IGNORE_GRACE_S,
            connect_timeout_s: DEFAULT_CONNECT_TIMEOUT_S,
        }
    }

    /// Validate this configuration, creating the signature directory if it
    /// does not yet exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MonitoredDirMissing`] if `monitored_dir` does
    /// not exist or is not a directory, [`ConfigError::PortCollision`] if
    /// `broadcast_port == listen_port`, and
    /// [`ConfigError::SignatureDirUnavailable`] if `signature_dir` cannot be
    /// created.
    pub fn validate(self) -> ConfigResult<Self> {
        if !is_directory(&self.monitored_dir) {
            return Err(ConfigError::MonitoredDirMissing(self.monitored_dir));
        }
        if self.broadcast_port == self.listen_port {
            return Err(ConfigError::PortCollision(self.listen_port));
        }
        std::fs::create_dir_all(&self.signature_dir).map_err(|source| {
            ConfigError::SignatureDirUnavailable {
                path: self.signature_dir.clone(),
                source,
            }
        })?;
        Ok(self)
    }
}

fn is_directory(path: &Path) -> bool {
    path.is_dir()
}
