//! src/watcher.rs
//!
//! A `notify`-backed [`DirEvents`] adapter: translates OS filesystem events
//! into the event shape the reconciliation engine consumes.

use std::fs;
use std::path::Path;

use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::warn;

use sync_core::dir_events::{DirEvent, DirEvents};
use sync_core::model::RelPath;

/// A live filesystem watcher over a monitored directory.
///
/// Holds the `notify::RecommendedWatcher` alive for as long as the adapter
/// lives; dropping it stops delivery and, in turn, unblocks `recv` with
/// `None` once the channel drains.
pub struct NotifyEvents {
    rx: crossbeam_channel::Receiver<DirEvent>,
    _watcher: RecommendedWatcher,
}

impl NotifyEvents {
    /// Start watching `root` recursively.
    ///
    /// # Errors
    ///
    /// Returns a `notify` error if the platform watcher cannot be
    /// constructed or the root cannot be watched.
    pub fn new(root: &Path) -> notify::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let watch_root = root.to_path_buf();
        let callback_root = root.to_path_buf();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => handle_event(&event, &callback_root, &tx),
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            }
        })?;
        watcher.watch(&watch_root, RecursiveMode::Recursive)?;

        Ok(Self {
            rx,
            _watcher: watcher,
        })
    }
}

impl DirEvents for NotifyEvents {
    fn recv(&self) -> Option<DirEvent> {
        self.rx.recv().ok()
    }
}

fn handle_event(event: &Event, root: &Path, tx: &crossbeam_channel::Sender<DirEvent>) {
    match event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any) => {
            if let Some(path) = event.paths.first().and_then(|p| existing_file_rel(root, p)) {
                let _ = tx.send(DirEvent::Create(path));
            }
        }
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => {
            if let Some(path) = event.paths.first().and_then(|p| existing_file_rel(root, p)) {
                let _ = tx.send(DirEvent::Modify(path));
            }
        }
        EventKind::Remove(RemoveKind::File | RemoveKind::Any) => {
            if let Some(path) = event.paths.first().and_then(|p| rel(root, p)) {
                let _ = tx.send(DirEvent::Delete(path));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to] = event.paths.as_slice() {
                if let (Some(from), Some(to)) = (rel(root, from), existing_file_rel(root, to)) {
                    let _ = tx.send(DirEvent::Rename { from, to });
                }
            }
        }
        // notify could not correlate the halves of a rename (e.g. one side
        // crossed a watch boundary): degrade to the equivalent delete/create
        // pair rather than dropping the change.
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            if let Some(path) = event.paths.first().and_then(|p| rel(root, p)) {
                let _ = tx.send(DirEvent::Delete(path));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            if let Some(path) = event.paths.first().and_then(|p| existing_file_rel(root, p)) {
                let _ = tx.send(DirEvent::Create(path));
            }
        }
        _ => {}
    }
}

fn rel(root: &Path, path: &Path) -> Option<RelPath> {
    if is_dirsyncd_temp(path) {
        return None;
    }
    let stripped = path.strip_prefix(root).ok()?;
    RelPath::new(stripped.to_str()?)
}

/// Whether `path` is the same-directory staging file `apply::write_atomic`
/// creates for an atomic write. Never surfaced as an event: the rename
/// into place already produces the real `Create`/`Modify` event for the
/// target path, so treating the temp name as its own file would broadcast
/// a phantom entry no `Delete` ever cleans up.
fn is_dirsyncd_temp(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(sync_core::apply::TEMP_FILE_SUFFIX))
}

/// Like [`rel`], but only for paths that currently name a regular file;
/// filters out directory events, which the reconciler has no use for.
fn existing_file_rel(root: &Path, path: &Path) -> Option<RelPath> {
    if !fs::metadata(path).map(|m| m.is_file()).unwrap_or(false) {
        return None;
    }
    rel(root, path)
}
