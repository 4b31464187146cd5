//! crates/signature/src/store.rs
//!
//! Persistent per-file signature cache keyed by relative path.
//!
//! The store is a flat directory of opaque blobs. Each file is named by
//! percent-encoding the file's `RelPath` (escaping `/` along with the usual
//! reserved set), so the directory never needs nested subdirectories created
//! or cleaned up as files come and go — a deliberate simplification over
//! mirroring the monitored tree's own layout.

use std::fs;
use std::path::{Path, PathBuf};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::error::SignatureResult;

/// Characters escaped in signature-store filenames, beyond the control-code
/// set: anything that would otherwise create a path separator or confuse a
/// shell globbing the directory.
const ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'\\')
    .add(b'%')
    .add(b' ')
    .add(b':');

/// A directory of persisted signature blobs, one file per monitored path.
#[derive(Debug, Clone)]
pub struct SignatureStore {
    root: PathBuf,
}

impl SignatureStore {
    /// Open (creating if necessary) a signature store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> SignatureResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The on-disk path backing `rel_path`'s signature, regardless of
    /// whether it currently exists.
    #[must_use]
    pub fn path_for(&self, rel_path: &str) -> PathBuf {
        let encoded = utf8_percent_encode(rel_path, ENCODE_SET).to_string();
        self.root.join(encoded)
    }

    /// Load the raw persisted signature blob for `rel_path`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure other than the entry not existing.
    pub fn load(&self, rel_path: &str) -> SignatureResult<Option<Vec<u8>>> {
        let path = self.path_for(rel_path);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist `bytes` as the signature for `rel_path`, overwriting any
    /// prior signature.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn store(&self, rel_path: &str, bytes: &[u8]) -> SignatureResult<()> {
        let path = self.path_for(rel_path);
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Remove the signature for `rel_path`, if any. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure other than the entry being absent.
    pub fn remove(&self, rel_path: &str) -> SignatureResult<()> {
        let path = self.path_for(rel_path);
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Move the signature entry from `src` to `dst`, mirroring a rename of
    /// the underlying file. A no-op (beyond removing any stale entry at
    /// `dst`) if `src` has no signature on record.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn rename(&self, src: &str, dst: &str) -> SignatureResult<()> {
        let src_path = self.path_for(src);
        let dst_path = self.path_for(dst);
        match fs::rename(&src_path, &dst_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns every relative path currently present in the store, decoded
    /// back from its on-disk filename. Used only by consistency checks and
    /// tests; the authoritative set of paths is `DirState`, not this store:
    /// the store mirrors `DirState`, never leads it.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure reading the directory.
    pub fn known_paths(&self) -> SignatureResult<Vec<String>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let decoded = percent_decode_str(&name).decode_utf8_lossy().into_owned();
            out.push(decoded);
        }
        Ok(out)
    }

    /// The directory backing this store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(dir.path()).unwrap();
        store.store("notes.txt", b"sig-bytes").unwrap();
        assert_eq!(store.load("notes.txt").unwrap().unwrap(), b"sig-bytes");
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(dir.path()).unwrap();
        assert!(store.load("never-written").unwrap().is_none());
    }

    #[test]
    fn nested_paths_flatten_into_one_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(dir.path()).unwrap();
        store.store("a/b/c.txt", b"sig").unwrap();
        let path = store.path_for("a/b/c.txt");
        assert_eq!(path.parent().unwrap(), dir.path());
        assert!(path.is_file());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(dir.path()).unwrap();
        store.remove("absent").unwrap();
        store.store("present", b"x").unwrap();
        store.remove("present").unwrap();
        store.remove("present").unwrap();
        assert!(store.load("present").unwrap().is_none());
    }

    #[test]
    fn rename_moves_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(dir.path()).unwrap();
        store.store("old.txt", b"sig").unwrap();
        store.rename("old.txt", "new.txt").unwrap();
        assert!(store.load("old.txt").unwrap().is_none());
        assert_eq!(store.load("new.txt").unwrap().unwrap(), b"sig");
    }

    #[test]
    fn rename_of_unknown_src_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(dir.path()).unwrap();
        store.rename("ghost", "new.txt").unwrap();
        assert!(store.load("new.txt").unwrap().is_none());
    }

    #[test]
    fn known_paths_decodes_back_to_original() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(dir.path()).unwrap();
        store.store("a/b c.txt", b"sig").unwrap();
        let known = store.known_paths().unwrap();
        assert_eq!(known, vec!["a/b c.txt".to_string()]);
    }
}
