//! crates/sync_core/src/ignore.rs
//!
//! Short-lived suppression set for paths recently written by a remote
//! update, so the filesystem event that write produces doesn't bounce back
//! out as an outbound message (echo suppression).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::clock::Clock;
use crate::model::RelPath;

/// Matching tolerance, in seconds, between an expected and observed mtime
/// (documented as "±1 ms").
const MTIME_TOLERANCE_S: f64 = 0.001;

struct Entry {
    expected_mtime: f64,
    inserted_at: f64,
}

/// Mapping from [`RelPath`] to an expected mtime, used to recognize and
/// discard the local filesystem event produced by applying a remote
/// update. Entries expire after a bounded grace period so a coalesced or
/// dropped watcher event can never deadlock future changes to that path.
pub struct IgnoreSet {
    grace_s: f64,
    entries: Mutex<HashMap<RelPath, Entry>>,
}

impl IgnoreSet {
    /// Create an ignore set with the given grace period, in seconds.
    #[must_use]
    pub fn new(grace_s: f64) -> Self {
        Self {
            grace_s,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record that `path` is about to be written locally with `mtime`, so
    /// the ensuing watcher event should be suppressed. Call this
    /// immediately before applying a remote update.
    pub fn expect(&self, path: RelPath, mtime: f64, clock: &dyn Clock) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            path,
            Entry {
                expected_mtime: mtime,
                inserted_at: clock.now_secs(),
            },
        );
    }

    /// Check whether a locally observed event for `path` with `mtime`
    /// matches a pending suppression, and if so, consume it (remove the
    /// entry and return `true`). Stale entries older than the grace period
    /// are swept on every call rather than requiring a background timer.
    #[must_use]
    pub fn consume_if_matches(&self, path: &RelPath, mtime: f64, clock: &dyn Clock) -> bool {
        let now = clock.now_secs();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, entry| now - entry.inserted_at <= self.grace_s);

        match entries.get(path) {
            Some(entry) if (entry.expected_mtime - mtime).abs() <= MTIME_TOLERANCE_S => {
                entries.remove(path);
                true
            }
            _ => false,
        }
    }

    /// Consume any pending suppression for `path`, regardless of its
    /// expected mtime. Used for delete events, which carry no mtime of
    /// their own to match against once the file is gone.
    #[must_use]
    pub fn consume_any(&self, path: &RelPath, clock: &dyn Clock) -> bool {
        let now = clock.now_secs();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, entry| now - entry.inserted_at <= self.grace_s);
        entries.remove(path).is_some()
    }

    /// Remove every entry older than the grace period. Exposed for a
    /// supervisor-driven periodic sweep independent of event traffic.
    pub fn sweep(&self, clock: &dyn Clock) {
        let now = clock.now_secs();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, entry| now - entry.inserted_at <= self.grace_s);
    }

    /// Number of pending suppressions, for tests and diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether no suppressions are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
