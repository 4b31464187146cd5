//! crates/sync_core/src/apply.rs
//!
//! Applies a received message to the local filesystem: validates the
//! variant against current local state, then writes/patches/removes/renames
//! under the ignore-set discipline so the resulting watcher event is
//! suppressed rather than re-propagated.

use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use protocol::Message;
use signature::SignatureStore;
use tracing::debug;

use crate::clock::Clock;
use crate::error::{ApplyError, ApplyResult};
use crate::ignore::IgnoreSet;
use crate::model::{FileStat, RelPath};

/// Suffix `write_atomic` uses for its same-directory staging file, shared
/// with the watcher so it can filter the rename-into-place event rather
/// than mistake it for an externally created file.
pub const TEMP_FILE_SUFFIX: &str = ".dirsyncd-tmp";

fn resolve(monitored_dir: &Path, raw_path: &str) -> ApplyResult<(RelPath, PathBuf)> {
    let rel = RelPath::new(raw_path).ok_or_else(|| ApplyError::InvalidPath(raw_path.to_string()))?;
    let full = monitored_dir.join(rel.as_str());
    Ok((rel, full))
}

/// Whether an incoming value's content should overwrite the current local
/// content when both report the exact same mtime. Deterministic and
/// symmetric: the side with the strictly greater hash wins, so both peers
/// reach the same outcome without needing to compare notes.
fn candidate_wins_tie(current: &[u8], candidate: &[u8]) -> bool {
    FileStat::tie_break_hash(candidate).to_be_bytes() > FileStat::tie_break_hash(current).to_be_bytes()
}

pub(crate) fn current_mtime(path: &Path) -> Option<f64> {
    let metadata = fs::metadata(path).ok()?;
    let modified = metadata.modified().ok()?;
    modified
        .duration_since(std::time::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs_f64())
}

/// Atomically write `bytes` to `path`, then set its mtime to `mtime`.
fn write_atomic(path: &Path, bytes: &[u8], mtime: f64) -> ApplyResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|source| ApplyError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let tmp = dir.join(format!(
        ".{}{TEMP_FILE_SUFFIX}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("_")
    ));
    (|| -> std::io::Result<()> {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        drop(f);
        fs::rename(&tmp, path)?;
        set_mtime(path, mtime)
    })()
    .map_err(|source| ApplyError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn set_mtime(path: &Path, mtime: f64) -> std::io::Result<()> {
    let secs = mtime.trunc() as i64;
    let nanos = ((mtime.fract()) * 1_000_000_000.0).round() as u32;
    let time = filetime::FileTime::from_unix_time(secs, nanos);
    filetime::set_file_mtime(path, time)
}

/// Apply a `CREATE` message: writes the full file unless the local copy
/// already has a strictly newer mtime, or an equal mtime and a
/// tie-break hash that outranks the incoming content.
pub fn apply_create(
    monitored_dir: &Path,
    sig_store: &SignatureStore,
    ignore: &IgnoreSet,
    clock: &dyn Clock,
    path: &str,
    mtime: f64,
    bytes_b64: &str,
) -> ApplyResult<()> {
    let (rel, full) = resolve(monitored_dir, path)?;
    let bytes = BASE64
        .decode(bytes_b64)
        .map_err(|_| ApplyError::InvalidPath(path.to_string()))?;

    if let Some(existing) = current_mtime(&full) {
        if existing > mtime {
            debug!(path = %rel, "dropping stale CREATE");
            return Ok(());
        }
        if existing == mtime {
            let current = fs::read(&full).unwrap_or_default();
            if !candidate_wins_tie(&current, &bytes) {
                debug!(path = %rel, "dropping CREATE, local content wins mtime tie");
                return Ok(());
            }
        }
    }

    ignore.expect(rel.clone(), mtime, clock);
    write_atomic(&full, &bytes, mtime)?;
    sig_store.store(rel.as_str(), &signature::ops::signature(&bytes))?;
    Ok(())
}

/// Apply a `MODIFY` message: patches the existing file against the
/// carried delta, or falls back to treating it as a `CREATE` if the
/// message happens to carry full bytes and no local base exists (it
/// never does on the wire today, but the check is cheap and documents the
/// recognized weakness explicitly instead of silently dropping).
pub fn apply_modify(
    monitored_dir: &Path,
    sig_store: &SignatureStore,
    ignore: &IgnoreSet,
    clock: &dyn Clock,
    path: &str,
    mtime: f64,
    delta_b64: &str,
) -> ApplyResult<()> {
    let (rel, full) = resolve(monitored_dir, path)?;
    let existing_mtime = current_mtime(&full);
    let base = match fs::read(&full) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApplyError::MissingBase(rel.into()));
        }
        Err(e) => {
            return Err(ApplyError::Io {
                path: full.display().to_string(),
                source: e,
            });
        }
    };
    let delta = BASE64
        .decode(delta_b64)
        .map_err(|_| ApplyError::InvalidPath(path.to_string()))?;
    let patched = signature::ops::patch(&base, &delta)?;

    if let Some(existing) = existing_mtime {
        if existing > mtime {
            debug!(path = %rel, "dropping stale MODIFY");
            return Ok(());
        }
        if existing == mtime && !candidate_wins_tie(&base, &patched) {
            debug!(path = %rel, "dropping MODIFY, local content wins mtime tie");
            return Ok(());
        }
    }

    ignore.expect(rel.clone(), mtime, clock);
    write_atomic(&full, &patched, mtime)?;
    sig_store.store(rel.as_str(), &signature::ops::signature(&patched))?;
    Ok(())
}

/// Apply a `DELETE` message.
pub fn apply_delete(
    monitored_dir: &Path,
    sig_store: &SignatureStore,
    ignore: &IgnoreSet,
    clock: &dyn Clock,
    path: &str,
    mtime: f64,
) -> ApplyResult<()> {
    let (rel, full) = resolve(monitored_dir, path)?;
    let Some(existing) = current_mtime(&full) else {
        debug!(path = %rel, "DELETE for a path we don't have, no-op");
        return Ok(());
    };
    if existing > mtime {
        debug!(path = %rel, "dropping stale DELETE");
        return Ok(());
    }

    ignore.expect(rel.clone(), mtime, clock);
    match fs::remove_file(&full) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(ApplyError::Io {
                path: full.display().to_string(),
                source: e,
            });
        }
    }
    sig_store.remove(rel.as_str())?;
    Ok(())
}

/// Apply a `RENAME` message: moves `src` onto `dst` unless `dst` already
/// exists with a strictly newer mtime, or an equal mtime and a tie-break
/// hash that outranks the source's content.
pub fn apply_rename(
    monitored_dir: &Path,
    sig_store: &SignatureStore,
    ignore: &IgnoreSet,
    clock: &dyn Clock,
    src: &str,
    dst: &str,
    mtime: f64,
) -> ApplyResult<()> {
    let (src_rel, src_full) = resolve(monitored_dir, src)?;
    let (dst_rel, dst_full) = resolve(monitored_dir, dst)?;

    if current_mtime(&src_full).is_none() {
        debug!(path = %src_rel, "RENAME source missing, no-op");
        return Ok(());
    }
    if let Some(existing) = current_mtime(&dst_full) {
        if existing > mtime {
            debug!(path = %dst_rel, "dropping stale RENAME");
            return Ok(());
        }
        if existing == mtime {
            let current = fs::read(&dst_full).unwrap_or_default();
            let incoming = fs::read(&src_full).unwrap_or_default();
            if !candidate_wins_tie(&current, &incoming) {
                debug!(path = %dst_rel, "dropping RENAME, local content wins mtime tie");
                return Ok(());
            }
        }
    }

    ignore.expect(dst_rel.clone(), mtime, clock);
    if let Some(parent) = dst_full.parent() {
        fs::create_dir_all(parent).map_err(|source| ApplyError::Io {
            path: dst_full.display().to_string(),
            source,
        })?;
    }
    fs::rename(&src_full, &dst_full).map_err(|source| ApplyError::Io {
        path: dst_full.display().to_string(),
        source,
    })?;
    set_mtime(&dst_full, mtime).map_err(|source| ApplyError::Io {
        path: dst_full.display().to_string(),
        source,
    })?;
    sig_store.rename(src_rel.as_str(), dst_rel.as_str())?;
    Ok(())
}

/// Apply any [`Message`] variant that carries a modification (`CREATE`,
/// `MODIFY`, `DELETE`, `RENAME`). `DIR_STATE` and `BEACON` are not
/// modifications and are rejected with [`ApplyError::InvalidPath`].
pub fn apply(
    monitored_dir: &Path,
    sig_store: &SignatureStore,
    ignore: &IgnoreSet,
    clock: &dyn Clock,
    msg: &Message,
) -> ApplyResult<()> {
    match msg {
        Message::Create { path, mtime, bytes } => {
            apply_create(monitored_dir, sig_store, ignore, clock, path, *mtime, bytes)
        }
        Message::Modify { path, mtime, delta } => {
            apply_modify(monitored_dir, sig_store, ignore, clock, path, *mtime, delta)
        }
        Message::Delete { path, mtime } => {
            apply_delete(monitored_dir, sig_store, ignore, clock, path, *mtime)
        }
        Message::Rename { src, dst, mtime } => {
            apply_rename(monitored_dir, sig_store, ignore, clock, src, dst, *mtime)
        }
        Message::DirState { .. } | Message::Beacon { .. } => {
            Err(ApplyError::InvalidPath(msg.kind().to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FakeClock;

    fn stores() -> (tempfile::TempDir, tempfile::TempDir, SignatureStore, IgnoreSet, FakeClock) {
        let monitored = tempfile::tempdir().unwrap();
        let sig_dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(sig_dir.path()).unwrap();
        let ignore = IgnoreSet::new(2.0);
        let clock = FakeClock::at(1000.0);
        (monitored, sig_dir, store, ignore, clock)
    }

    #[test]
    fn create_writes_file_and_sets_mtime() {
        let (monitored, _sig_dir, store, ignore, clock) = stores();
        apply_create(
            monitored.path(),
            &store,
            &ignore,
            &clock,
            "a.txt",
            100.0,
            &BASE64.encode("hello"),
        )
        .unwrap();

        let content = fs::read(monitored.path().join("a.txt")).unwrap();
        assert_eq!(content, b"hello");
        assert!((current_mtime(&monitored.path().join("a.txt")).unwrap() - 100.0).abs() < 0.01);
        assert!(store.load("a.txt").unwrap().is_some());
        assert_eq!(ignore.len(), 1);
    }

    #[test]
    fn create_drops_when_local_is_not_older() {
        let (monitored, _sig_dir, store, ignore, clock) = stores();
        let path = monitored.path().join("a.txt");
        fs::write(&path, b"existing").unwrap();
        set_mtime(&path, 500.0).unwrap();

        apply_create(
            monitored.path(),
            &store,
            &ignore,
            &clock,
            "a.txt",
            100.0,
            &BASE64.encode("new"),
        )
        .unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"existing");
        assert!(ignore.is_empty());
    }

    fn winner_and_loser(a: &'static [u8], b: &'static [u8]) -> (&'static [u8], &'static [u8]) {
        if FileStat::tie_break_hash(a) > FileStat::tie_break_hash(b) {
            (a, b)
        } else {
            (b, a)
        }
    }

    #[test]
    fn create_overwrites_on_an_exact_mtime_tie_when_incoming_content_wins() {
        let (monitored, _sig_dir, store, ignore, clock) = stores();
        let (winner, loser) = winner_and_loser(b"content-a", b"content-b");
        let path = monitored.path().join("a.txt");
        fs::write(&path, loser).unwrap();
        set_mtime(&path, 100.0).unwrap();

        apply_create(
            monitored.path(),
            &store,
            &ignore,
            &clock,
            "a.txt",
            100.0,
            &BASE64.encode(winner),
        )
        .unwrap();

        assert_eq!(fs::read(&path).unwrap(), winner);
    }

    #[test]
    fn create_drops_on_an_exact_mtime_tie_when_local_content_wins() {
        let (monitored, _sig_dir, store, ignore, clock) = stores();
        let (winner, loser) = winner_and_loser(b"content-a", b"content-b");
        let path = monitored.path().join("a.txt");
        fs::write(&path, winner).unwrap();
        set_mtime(&path, 100.0).unwrap();

        apply_create(
            monitored.path(),
            &store,
            &ignore,
            &clock,
            "a.txt",
            100.0,
            &BASE64.encode(loser),
        )
        .unwrap();

        assert_eq!(fs::read(&path).unwrap(), winner);
        assert!(ignore.is_empty());
    }

    #[test]
    fn modify_without_base_is_missing_base_error() {
        let (monitored, _sig_dir, store, ignore, clock) = stores();
        let err = apply_modify(
            monitored.path(),
            &store,
            &ignore,
            &clock,
            "nope.txt",
            1.0,
            &BASE64.encode("delta"),
        )
        .unwrap_err();
        assert!(matches!(err, ApplyError::MissingBase(_)));
    }

    #[test]
    fn modify_patches_existing_content() {
        let (monitored, _sig_dir, store, ignore, clock) = stores();
        let original = b"the quick brown fox".repeat(5);
        let path = monitored.path().join("m.txt");
        fs::write(&path, &original).unwrap();
        set_mtime(&path, 1.0).unwrap();

        let sig = signature::ops::signature(&original);
        let mut modified = original.clone();
        modified[3] = b'!';
        let delta = signature::ops::delta("m.txt", &sig, &modified).unwrap();

        apply_modify(
            monitored.path(),
            &store,
            &ignore,
            &clock,
            "m.txt",
            2.0,
            &BASE64.encode(delta),
        )
        .unwrap();

        assert_eq!(fs::read(&path).unwrap(), modified);
    }

    #[test]
    fn modify_overwrites_on_an_exact_mtime_tie_when_incoming_content_wins() {
        let (monitored, _sig_dir, store, ignore, clock) = stores();
        let (winner, loser) = winner_and_loser(b"content-aaaa", b"content-bbbb");
        let path = monitored.path().join("m.txt");
        fs::write(&path, loser).unwrap();
        set_mtime(&path, 100.0).unwrap();

        let sig = signature::ops::signature(loser);
        let delta = signature::ops::delta("m.txt", &sig, winner).unwrap();

        apply_modify(
            monitored.path(),
            &store,
            &ignore,
            &clock,
            "m.txt",
            100.0,
            &BASE64.encode(delta),
        )
        .unwrap();

        assert_eq!(fs::read(&path).unwrap(), winner);
    }

    #[test]
    fn modify_drops_on_an_exact_mtime_tie_when_local_content_wins() {
        let (monitored, _sig_dir, store, ignore, clock) = stores();
        let (winner, loser) = winner_and_loser(b"content-aaaa", b"content-bbbb");
        let path = monitored.path().join("m.txt");
        fs::write(&path, winner).unwrap();
        set_mtime(&path, 100.0).unwrap();

        let sig = signature::ops::signature(winner);
        let delta = signature::ops::delta("m.txt", &sig, loser).unwrap();

        apply_modify(
            monitored.path(),
            &store,
            &ignore,
            &clock,
            "m.txt",
            100.0,
            &BASE64.encode(delta),
        )
        .unwrap();

        assert_eq!(fs::read(&path).unwrap(), winner);
        assert!(ignore.is_empty());
    }

    #[test]
    fn delete_removes_file_and_signature() {
        let (monitored, _sig_dir, store, ignore, clock) = stores();
        let path = monitored.path().join("d.txt");
        fs::write(&path, b"x").unwrap();
        set_mtime(&path, 1.0).unwrap();
        store.store("d.txt", b"sig").unwrap();

        apply_delete(monitored.path(), &store, &ignore, &clock, "d.txt", 2.0).unwrap();

        assert!(!path.exists());
        assert!(store.load("d.txt").unwrap().is_none());
    }

    #[test]
    fn delete_of_missing_path_is_a_no_op() {
        let (monitored, _sig_dir, store, ignore, clock) = stores();
        apply_delete(monitored.path(), &store, &ignore, &clock, "ghost.txt", 2.0).unwrap();
        assert!(ignore.is_empty());
    }

    #[test]
    fn delete_drops_when_local_is_strictly_newer() {
        let (monitored, _sig_dir, store, ignore, clock) = stores();
        let path = monitored.path().join("d.txt");
        fs::write(&path, b"x").unwrap();
        set_mtime(&path, 300.0).unwrap();

        apply_delete(monitored.path(), &store, &ignore, &clock, "d.txt", 100.0).unwrap();

        assert!(path.exists());
    }

    #[test]
    fn rename_moves_file_and_signature() {
        let (monitored, _sig_dir, store, ignore, clock) = stores();
        let src = monitored.path().join("old.txt");
        fs::write(&src, b"content").unwrap();
        set_mtime(&src, 1.0).unwrap();
        store.store("old.txt", b"sig").unwrap();

        apply_rename(monitored.path(), &store, &ignore, &clock, "old.txt", "new.txt", 50.0).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(monitored.path().join("new.txt")).unwrap(), b"content");
        assert!(store.load("old.txt").unwrap().is_none());
        assert!(store.load("new.txt").unwrap().is_some());
    }

    #[test]
    fn rename_overwrites_on_an_exact_mtime_tie_when_incoming_content_wins() {
        let (monitored, _sig_dir, store, ignore, clock) = stores();
        let (winner, loser) = winner_and_loser(b"content-aaaa", b"content-bbbb");
        let src = monitored.path().join("old.txt");
        let dst = monitored.path().join("new.txt");
        fs::write(&src, winner).unwrap();
        fs::write(&dst, loser).unwrap();
        set_mtime(&dst, 100.0).unwrap();

        apply_rename(monitored.path(), &store, &ignore, &clock, "old.txt", "new.txt", 100.0).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).unwrap(), winner);
    }

    #[test]
    fn rename_drops_on_an_exact_mtime_tie_when_local_content_wins() {
        let (monitored, _sig_dir, store, ignore, clock) = stores();
        let (winner, loser) = winner_and_loser(b"content-aaaa", b"content-bbbb");
        let src = monitored.path().join("old.txt");
        let dst = monitored.path().join("new.txt");
        fs::write(&src, loser).unwrap();
        fs::write(&dst, winner).unwrap();
        set_mtime(&dst, 100.0).unwrap();

        apply_rename(monitored.path(), &store, &ignore, &clock, "old.txt", "new.txt", 100.0).unwrap();

        assert!(src.exists());
        assert_eq!(fs::read(&dst).unwrap(), winner);
        assert!(ignore.is_empty());
    }

    #[test]
    fn rename_of_missing_source_is_a_no_op() {
        let (monitored, _sig_dir, store, ignore, clock) = stores();
        apply_rename(monitored.path(), &store, &ignore, &clock, "ghost.txt", "new.txt", 1.0).unwrap();
        assert!(!monitored.path().join("new.txt").exists());
    }

    #[test]
    fn invalid_path_is_rejected() {
        let (monitored, _sig_dir, store, ignore, clock) = stores();
        let err = apply_create(
            monitored.path(),
            &store,
            &ignore,
            &clock,
            "../escape.txt",
            1.0,
            &BASE64.encode("x"),
        )
        .unwrap_err();
        assert!(matches!(err, ApplyError::InvalidPath(_)));
    }
}
