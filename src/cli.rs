//! src/cli.rs
//!
//! Command-line argument parsing: one flag per `Config` field plus the
//! logging knobs the core engine has no opinion on.

use std::path::PathBuf;

use clap::Parser;

use sync_core::config::{
    Config, DEFAULT_BEACON_INTERVAL_S, DEFAULT_BROADCAST_PORT, DEFAULT_CONNECT_TIMEOUT_S,
    DEFAULT_IGNORE_GRACE_S, DEFAULT_LISTEN_PORT, DEFAULT_MAX_FRAME_BYTES,
    DEFAULT_SEND_QUEUE_DEPTH,
};

/// Peer-to-peer LAN directory synchronizer.
#[derive(Debug, Parser)]
#[command(name = "dirsyncd", version, about)]
pub struct Args {
    /// Directory to watch and synchronize with peers on the local network.
    pub monitored_dir: PathBuf,

    /// UDP port discovery beacons are sent to and listened on.
    #[arg(long, default_value_t = DEFAULT_BROADCAST_PORT)]
    pub broadcast_port: u16,

    /// TCP port peer sessions accept on and dial.
    #[arg(long, default_value_t = DEFAULT_LISTEN_PORT)]
    pub listen_port: u16,

    /// Directory backing the persistent per-file signature cache. Defaults
    /// to a subdirectory alongside the signature store's own default.
    #[arg(long)]
    pub signature_dir: Option<PathBuf>,

    /// Seconds between periodic discovery beacons.
    #[arg(long, default_value_t = DEFAULT_BEACON_INTERVAL_S)]
    pub beacon_interval_s: u64,

    /// Hard cap on a frame's declared length, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: u64,

    /// Bound on a peer session's outbound send-queue depth.
    #[arg(long, default_value_t = DEFAULT_SEND_QUEUE_DEPTH)]
    pub send_queue_depth: usize,

    /// Grace period, in seconds, before a stale ignore-set entry expires.
    #[arg(long, default_value_t = DEFAULT_IGNORE_GRACE_S)]
    pub ignore_grace_s: f64,

    /// Timeout, in seconds, on an outbound peer dial.
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_S)]
    pub connect_timeout_s: u64,

    /// Advertise this IP address instead of auto-detecting the outbound
    /// interface address.
    #[arg(long)]
    pub advertise_ip: Option<std::net::IpAddr>,

    /// Increase log verbosity (`-v` for debug, `-vv` for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// The `tracing-subscriber` layer to initialize logging with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable, for a terminal.
    Text,
    /// Newline-delimited JSON, for log aggregation.
    Json,
}

impl Args {
    /// Fold the parsed arguments into a `Config`, leaving any flag the user
    /// didn't pass at its documented default.
    #[must_use]
    pub fn into_config(self) -> Config {
        let mut config = Config::new(self.monitored_dir);
        config.broadcast_port = self.broadcast_port;
        config.listen_port = self.listen_port;
        if let Some(dir) = self.signature_dir {
            config.signature_dir = dir;
        }
        config.beacon_interval_s = self.beacon_interval_s;
        config.max_frame_bytes = self.max_frame_bytes;
        config.send_queue_depth = self.send_queue_depth;
        config.ignore_grace_s = self.ignore_grace_s;
        config.connect_timeout_s = self.connect_timeout_s;
        config
    }
}
