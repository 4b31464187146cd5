//! crates/sync_core/src/event_router.rs
//!
//! Consumes local filesystem events, filters echoes of the node's own
//! remote-update application, and fans out `CREATE`/`MODIFY`/`DELETE`/
//! `RENAME` messages to every synchronized peer.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::{debug, warn};

use protocol::Message;
use signature::{ops, SignatureStore};

use crate::clock::Clock;
use crate::dir_events::{DirEvent, DirEvents};
use crate::ignore::IgnoreSet;
use crate::model::RelPath;
use crate::registry::PeerRegistry;

/// Routes local directory events to every synchronized peer, applying the
/// echo-suppression discipline against a shared [`IgnoreSet`].
pub struct EventRouter {
    monitored_dir: std::path::PathBuf,
    sig_store: Arc<SignatureStore>,
    ignore: Arc<IgnoreSet>,
    clock: Arc<dyn Clock>,
    registry: Arc<PeerRegistry>,
    /// Same lock a directory walk holds across its snapshot, so a local
    /// event is never processed mid-walk.
    dir_lock: Arc<Mutex<()>>,
}

impl EventRouter {
    /// Build a router over the given shared state.
    #[must_use]
    pub fn new(
        monitored_dir: std::path::PathBuf,
        sig_store: Arc<SignatureStore>,
        ignore: Arc<IgnoreSet>,
        clock: Arc<dyn Clock>,
        registry: Arc<PeerRegistry>,
        dir_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            monitored_dir,
            sig_store,
            ignore,
            clock,
            registry,
            dir_lock,
        }
    }

    /// Drain `events` until its source closes. Intended to run inline on
    /// the watcher thread, as the design allows.
    pub fn run(&self, events: &dyn DirEvents) {
        while let Some(event) = events.recv() {
            self.handle(event);
        }
    }

    /// Handle a single event. Exposed directly (beyond [`Self::run`]) so
    /// tests can drive the router without a background thread.
    pub fn handle(&self, event: DirEvent) {
        let _guard = self.dir_lock.lock().unwrap_or_else(|e| e.into_inner());
        match event {
            DirEvent::Create(path) => self.handle_create(path),
            DirEvent::Modify(path) => self.handle_modify(path),
            DirEvent::Delete(path) => self.handle_delete(path),
            DirEvent::Rename { from, to } => self.handle_rename(from, to),
        }
    }

    fn full_path(&self, path: &RelPath) -> std::path::PathBuf {
        self.monitored_dir.join(path.as_str())
    }

    fn handle_create(&self, path: RelPath) {
        let full = self.full_path(&path);
        if let Some(mtime) = current_mtime(&full) {
            if self.ignore.consume_if_matches(&path, mtime, self.clock.as_ref()) {
                debug!(path = %path, "suppressed echo of our own CREATE application");
                return;
            }
        }

        let bytes = match fs::read(&full) {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %path, error = %e, "failed to read created file");
                return;
            }
        };
        let mtime = current_mtime(&full).unwrap_or_else(|| self.clock.now_secs());
        if let Err(e) = self.sig_store.store(path.as_str(), &ops::signature(&bytes)) {
            warn!(path = %path, error = %e, "failed to store signature for new file");
        }

        self.broadcast(Message::Create {
            path: path.into(),
            mtime,
            bytes: BASE64.encode(bytes),
        });
    }

    fn handle_modify(&self, path: RelPath) {
        let full = self.full_path(&path);
        if let Some(mtime) = current_mtime(&full) {
            if self.ignore.consume_if_matches(&path, mtime, self.clock.as_ref()) {
                debug!(path = %path, "suppressed echo of our own MODIFY application");
                return;
            }
        }

        let new_data = match fs::read(&full) {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %path, error = %e, "failed to read modified file");
                return;
            }
        };
        let mtime = current_mtime(&full).unwrap_or_else(|| self.clock.now_secs());

        let prior_sig = match self.sig_store.load(path.as_str()) {
            Ok(Some(sig)) => sig,
            Ok(None) => {
                // No prior signature on record: this path was never
                // reconciled or created under our watch. Fall back to
                // treating it as a CREATE of the full content.
                if let Err(e) = self.sig_store.store(path.as_str(), &ops::signature(&new_data)) {
                    warn!(path = %path, error = %e, "failed to store signature for modified file");
                }
                self.broadcast(Message::Create {
                    path: path.into(),
                    mtime,
                    bytes: BASE64.encode(new_data),
                });
                return;
            }
            Err(e) => {
                warn!(path = %path, error = %e, "failed to load prior signature");
                return;
            }
        };

        let delta = match ops::delta(path.as_str(), &prior_sig, &new_data) {
            Ok(d) => d,
            Err(e) => {
                warn!(path = %path, error = %e, "failed to compute outbound delta");
                return;
            }
        };

        self.broadcast(Message::Modify {
            path: path.as_str().to_string(),
            mtime,
            delta: BASE64.encode(delta),
        });

        // The prior signature is overwritten only now, after the delta
        // computed against it has been enqueued for every synchronized
        // peer.
        if let Err(e) = self.sig_store.store(path.as_str(), &ops::signature(&new_data)) {
            warn!(path = %path, error = %e, "failed to refresh signature after MODIFY");
        }
    }

    fn handle_delete(&self, path: RelPath) {
        if self.ignore.consume_any(&path, self.clock.as_ref()) {
            debug!(path = %path, "suppressed echo of our own DELETE application");
            return;
        }

        if let Err(e) = self.sig_store.remove(path.as_str()) {
            warn!(path = %path, error = %e, "failed to remove signature for deleted file");
        }

        self.broadcast(Message::Delete {
            path: path.into(),
            mtime: self.clock.now_secs(),
        });
    }

    fn handle_rename(&self, from: RelPath, to: RelPath) {
        let dst_full = self.full_path(&to);
        if let Some(mtime) = current_mtime(&dst_full) {
            if self.ignore.consume_if_matches(&to, mtime, self.clock.as_ref()) {
                debug!(from = %from, to = %to, "suppressed echo of our own RENAME application");
                return;
            }
        }

        if let Err(e) = self.sig_store.rename(from.as_str(), to.as_str()) {
            warn!(from = %from, to = %to, error = %e, "failed to move signature entry");
        }

        let mtime = current_mtime(&dst_full).unwrap_or_else(|| self.clock.now_secs());
        self.broadcast(Message::Rename {
            src: from.into(),
            dst: to.into(),
            mtime,
        });
    }

    fn broadcast(&self, msg: Message) {
        self.registry.broadcast(&msg, true);
    }
}

fn current_mtime(path: &Path) -> Option<f64> {
    let metadata = fs::metadata(path).ok()?;
    let modified = metadata.modified().ok()?;
    modified
        .duration_since(std::time::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs_f64())
}
