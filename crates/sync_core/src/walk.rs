//! crates/sync_core/src/walk.rs
//!
//! Builds a [`DirState`] by synchronously walking a directory tree. The
//! walk is the only producer of a full snapshot; callers hold
//! [`crate::session::SessionContext::dir_lock`] across the walk, and across
//! every applied mutation, so no filesystem event can be interleaved with
//! it.

use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::model::{DirState, FileStat, RelPath};

/// Walk every regular file under `root`, producing a [`DirState`].
///
/// Symbolic links are skipped entirely (out of scope, per the data model:
/// only regular files are tracked). Directories are descended but never
/// themselves recorded as entries.
///
/// # Errors
///
/// Returns an error if `root` cannot be read, or if any entry's metadata
/// cannot be retrieved. A single unreadable subtree aborts the whole walk;
/// callers that want partial results should catch and log instead of
/// propagating.
pub fn walk(root: &Path) -> io::Result<DirState> {
    let mut state = DirState::new();
    walk_into(root, root, &mut state)?;
    Ok(state)
}

fn walk_into(root: &Path, dir: &Path, state: &mut DirState) -> io::Result<()> {
    let entries = fs::read_dir(dir)?;
    for entry in entries {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();

        if file_type.is_symlink() {
            continue;
        }
        if file_type.is_dir() {
            walk_into(root, &path, state)?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        let rel = path
            .strip_prefix(root)
            .expect("walked entry is always under root");
        let Some(rel_str) = rel.to_str() else {
            continue; // non-UTF-8 paths have no RelPath representation
        };
        let Some(rel_path) = RelPath::new(rel_str) else {
            continue;
        };

        let metadata = entry.metadata()?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0.0, |d| d.as_secs_f64());

        state.insert(FileStat {
            path: rel_path,
            mtime,
            exists: true,
            size: metadata.len(),
        });
    }
    Ok(())
}
