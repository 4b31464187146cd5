//! crates/sync_core/src/lib.rs
//!
//! Peer discovery, reconciliation, and change-propagation engine for
//! `dirsyncd`. Everything here is transport-agnostic beyond raw TCP/UDP
//! sockets: CLI parsing, logging setup, and the concrete filesystem watcher
//! live in the root binary crate and are wired in through the `Clock`,
//! `DirEvents`, and `Config` collaborators this crate only consumes.

pub mod apply;
pub mod clock;
pub mod config;
pub mod dir_events;
pub mod discovery;
pub mod error;
pub mod event_router;
pub mod ignore;
pub mod model;
pub mod reconciler;
pub mod registry;
pub mod session;
pub mod supervisor;
pub mod walk;

pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use dir_events::{DirEvent, DirEvents};
pub use error::{SyncError, SyncResult};
pub use model::{DirState, FileStat, PeerId, RelPath};
pub use registry::PeerRegistry;
pub use supervisor::Supervisor;
