//! crates/sync_core/src/reconciler.rs
//!
//! Compares two directory states and decides what this peer must push to a
//! given remote, once per session on entering `Reconciling`. The design is
//! deliberately symmetric: both peers run the same rule, so neither needs to
//! request data from the other. See [`decide`] for the pure decision logic
//! and [`plan`] for the version that also builds the outbound messages.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::warn;

use protocol::{DirStateEntry, Message};
use signature::{ops, SignatureStore};

use crate::model::{DirState, FileStat, RelPath};

/// A directory state as reported by a remote peer in its `DIR_STATE`
/// message: the file stats plus, for every file, the signature and content
/// hash the remote computed over its current content.
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    /// The remote's reported file stats.
    pub state: DirState,
    /// Signature blob per path, as carried in the `DIR_STATE` message.
    pub signatures: HashMap<RelPath, Vec<u8>>,
    /// Content hash per path, as carried in the `DIR_STATE` message. Only
    /// consulted when a path's mtime exactly matches the local copy's.
    pub content_hashes: HashMap<RelPath, u64>,
}

impl RemoteSnapshot {
    /// Build a snapshot from the wire representation of a `DIR_STATE`
    /// message.
    #[must_use]
    pub fn from_entries(entries: &[DirStateEntry]) -> Self {
        let mut state = DirState::new();
        let mut signatures = HashMap::new();
        let mut content_hashes = HashMap::new();
        for entry in entries {
            let Some(path) = RelPath::new(&entry.path) else {
                continue;
            };
            if let Ok(sig) = BASE64.decode(&entry.sig) {
                signatures.insert(path.clone(), sig);
            }
            content_hashes.insert(path.clone(), entry.content_hash);
            state.insert(crate::model::FileStat {
                path,
                mtime: entry.mtime,
                exists: true,
                size: entry.size,
            });
        }
        Self {
            state,
            signatures,
            content_hashes,
        }
    }
}

/// One push this peer has decided to make to a remote, before the outbound
/// message is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The remote has no record of this path at all.
    Create(RelPath),
    /// Both peers know this path, but the local copy is strictly newer.
    Modify(RelPath),
    /// Both peers know this path and report the same mtime; resolved by
    /// content hash when the outbound message is built.
    Tie(RelPath),
}

/// Decide what pushes this peer owes a remote, given the local and remote
/// directory states.
///
/// Returns creates first, then modifies, then ties, matching the send
/// ordering. Deletions are never decided here: a path absent from the
/// remote's state is indistinguishable from "not yet known" during a
/// one-shot diff, so deletion only ever propagates through a live event.
#[must_use]
pub fn decide(local: &DirState, remote: &DirState) -> Vec<Decision> {
    let mut creates = Vec::new();
    let mut modifies = Vec::new();
    let mut ties = Vec::new();

    for (path, stat) in local.iter() {
        match remote.get(path) {
            None => creates.push(Decision::Create(path.clone())),
            Some(remote_stat) if stat.mtime > remote_stat.mtime => {
                modifies.push(Decision::Modify(path.clone()));
            }
            Some(remote_stat) if (stat.mtime - remote_stat.mtime).abs() < f64::EPSILON => {
                ties.push(Decision::Tie(path.clone()));
            }
            _ => {}
        }
    }

    creates.into_iter().chain(modifies).chain(ties).collect()
}

/// Decide and build every outbound message this peer owes `remote`,
/// reading file content under `monitored_dir` and consulting `sig_store`
/// for delta bases.
///
/// A path that vanishes or changes between the walk that produced `local`
/// and this call is skipped with a warning rather than failing the whole
/// reconciliation; the next reconciliation (on reconnect) will retry it.
pub fn plan(
    monitored_dir: &Path,
    local: &DirState,
    remote: &RemoteSnapshot,
    sig_store: &SignatureStore,
) -> Vec<Message> {
    decide(local, &remote.state)
        .into_iter()
        .filter_map(|decision| build_message(monitored_dir, local, remote, sig_store, decision))
        .collect()
}

fn build_message(
    monitored_dir: &Path,
    local: &DirState,
    remote: &RemoteSnapshot,
    sig_store: &SignatureStore,
    decision: Decision,
) -> Option<Message> {
    match decision {
        Decision::Create(path) => {
            let stat = local.get(&path)?;
            let bytes = match fs::read(monitored_dir.join(path.as_str())) {
                Ok(b) => b,
                Err(e) => {
                    warn!(path = %path, error = %e, "skipping reconciliation push, file vanished");
                    return None;
                }
            };
            if let Err(e) = sig_store.store(path.as_str(), &ops::signature(&bytes)) {
                warn!(path = %path, error = %e, "failed to refresh signature during reconciliation");
            }
            Some(Message::Create {
                path: path.into(),
                mtime: stat.mtime,
                bytes: BASE64.encode(bytes),
            })
        }
        Decision::Modify(path) => {
            let stat = local.get(&path)?;
            let data = match fs::read(monitored_dir.join(path.as_str())) {
                Ok(b) => b,
                Err(e) => {
                    warn!(path = %path, error = %e, "skipping reconciliation push, file vanished");
                    return None;
                }
            };
            let base_sig = remote.signatures.get(&path)?;
            let delta = match ops::delta(path.as_str(), base_sig, &data) {
                Ok(d) => d,
                Err(e) => {
                    warn!(path = %path, error = %e, "failed to compute reconciliation delta");
                    return None;
                }
            };
            Some(Message::Modify {
                path: path.into(),
                mtime: stat.mtime,
                delta: BASE64.encode(delta),
            })
        }
        Decision::Tie(path) => {
            let stat = local.get(&path)?;
            let data = match fs::read(monitored_dir.join(path.as_str())) {
                Ok(b) => b,
                Err(e) => {
                    warn!(path = %path, error = %e, "skipping reconciliation push, file vanished");
                    return None;
                }
            };
            let local_hash = FileStat::tie_break_hash(&data);
            let remote_hash = *remote.content_hashes.get(&path)?;
            if local_hash.to_be_bytes() <= remote_hash.to_be_bytes() {
                // Identical content needs no push; a remote that strictly
                // outranks us will push its own content to us instead.
                return None;
            }

            let base_sig = remote.signatures.get(&path)?;
            let delta = match ops::delta(path.as_str(), base_sig, &data) {
                Ok(d) => d,
                Err(e) => {
                    warn!(path = %path, error = %e, "failed to compute reconciliation delta");
                    return None;
                }
            };
            Some(Message::Modify {
                path: path.into(),
                mtime: stat.mtime,
                delta: BASE64.encode(delta),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(path: &str, mtime: f64) -> FileStat {
        FileStat {
            path: RelPath::new(path).unwrap(),
            mtime,
            exists: true,
            size: 0,
        }
    }

    #[test]
    fn file_missing_on_peer_is_a_create() {
        let mut local = DirState::new();
        local.insert(stat("only-local.txt", 100.0));
        let remote = DirState::new();

        let decisions = decide(&local, &remote);
        assert_eq!(
            decisions,
            vec![Decision::Create(RelPath::new("only-local.txt").unwrap())]
        );
    }

    #[test]
    fn newer_local_mtime_is_a_modify() {
        let mut local = DirState::new();
        local.insert(stat("a.txt", 200.0));
        let mut remote = DirState::new();
        remote.insert(stat("a.txt", 100.0));

        let decisions = decide(&local, &remote);
        assert_eq!(decisions, vec![Decision::Modify(RelPath::new("a.txt").unwrap())]);
    }

    #[test]
    fn older_local_mtime_is_no_action() {
        let mut local = DirState::new();
        local.insert(stat("older.txt", 100.0));
        let mut remote = DirState::new();
        remote.insert(stat("older.txt", 200.0));

        assert!(decide(&local, &remote).is_empty());
    }

    #[test]
    fn equal_mtime_is_a_tie_decision() {
        let mut local = DirState::new();
        local.insert(stat("same.txt", 100.0));
        let mut remote = DirState::new();
        remote.insert(stat("same.txt", 100.0));

        assert_eq!(
            decide(&local, &remote),
            vec![Decision::Tie(RelPath::new("same.txt").unwrap())]
        );
    }

    #[test]
    fn path_only_on_remote_is_no_action() {
        let local = DirState::new();
        let mut remote = DirState::new();
        remote.insert(stat("remote-only.txt", 100.0));

        assert!(decide(&local, &remote).is_empty());
    }

    #[test]
    fn creates_are_ordered_before_modifies() {
        let mut local = DirState::new();
        local.insert(stat("newer.txt", 200.0));
        local.insert(stat("missing.txt", 50.0));
        let mut remote = DirState::new();
        remote.insert(stat("newer.txt", 100.0));

        let decisions = decide(&local, &remote);
        assert_eq!(
            decisions,
            vec![
                Decision::Create(RelPath::new("missing.txt").unwrap()),
                Decision::Modify(RelPath::new("newer.txt").unwrap()),
            ]
        );
    }

    #[test]
    fn empty_states_on_both_sides_emit_nothing() {
        let local = DirState::new();
        let remote = DirState::new();

        assert!(decide(&local, &remote).is_empty());
    }

    #[test]
    fn plan_emits_nothing_when_content_is_truly_identical_on_both_sides() {
        // Equal mtime and equal content is the fully-converged case: the
        // tie must resolve to silence, or reconciliation would re-push
        // forever on every reconnect.
        let dir = tempfile::tempdir().unwrap();
        let content = b"stable content";
        std::fs::write(dir.path().join("a.txt"), content).unwrap();
        let sig_dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(sig_dir.path()).unwrap();

        let mut local = DirState::new();
        local.insert(stat("a.txt", 100.0));

        let mut remote = RemoteSnapshot::default();
        remote.state.insert(stat("a.txt", 100.0));
        remote
            .content_hashes
            .insert(RelPath::new("a.txt").unwrap(), FileStat::tie_break_hash(content));
        remote
            .signatures
            .insert(RelPath::new("a.txt").unwrap(), ops::signature(content));

        assert!(plan(dir.path(), &local, &remote, &store).is_empty());
    }

    #[test]
    fn plan_resolves_an_exact_mtime_tie_in_favor_of_the_higher_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let sig_dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(sig_dir.path()).unwrap();

        let a = b"content-a".as_slice();
        let b = b"content-b".as_slice();
        let (winner, loser) = if FileStat::tie_break_hash(a) > FileStat::tie_break_hash(b) {
            (a, b)
        } else {
            (b, a)
        };

        std::fs::write(dir.path().join("t.txt"), winner).unwrap();
        let mut local = DirState::new();
        local.insert(stat("t.txt", 100.0));

        let mut remote = RemoteSnapshot::default();
        remote.state.insert(stat("t.txt", 100.0));
        remote
            .content_hashes
            .insert(RelPath::new("t.txt").unwrap(), FileStat::tie_break_hash(loser));
        remote
            .signatures
            .insert(RelPath::new("t.txt").unwrap(), ops::signature(loser));

        let messages = plan(dir.path(), &local, &remote, &store);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Message::Modify { path, .. } => assert_eq!(path, "t.txt"),
            other => panic!("expected Modify, got {other:?}"),
        }
    }

    #[test]
    fn plan_emits_nothing_when_local_loses_the_content_hash_tie() {
        let dir = tempfile::tempdir().unwrap();
        let sig_dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(sig_dir.path()).unwrap();

        let a = b"content-a".as_slice();
        let b = b"content-b".as_slice();
        let (winner, loser) = if FileStat::tie_break_hash(a) > FileStat::tie_break_hash(b) {
            (a, b)
        } else {
            (b, a)
        };

        std::fs::write(dir.path().join("t.txt"), loser).unwrap();
        let mut local = DirState::new();
        local.insert(stat("t.txt", 100.0));

        let mut remote = RemoteSnapshot::default();
        remote.state.insert(stat("t.txt", 100.0));
        remote
            .content_hashes
            .insert(RelPath::new("t.txt").unwrap(), FileStat::tie_break_hash(winner));
        remote
            .signatures
            .insert(RelPath::new("t.txt").unwrap(), ops::signature(winner));

        assert!(plan(dir.path(), &local, &remote, &store).is_empty());
    }

    #[test]
    fn plan_builds_create_message_with_full_bytes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("new.txt"), b"hello world").unwrap();
        let sig_dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(sig_dir.path()).unwrap();

        let mut local = DirState::new();
        local.insert(stat("new.txt", 42.0));
        let remote = RemoteSnapshot::default();

        let messages = plan(dir.path(), &local, &remote, &store);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Message::Create { path, mtime, bytes } => {
                assert_eq!(path, "new.txt");
                assert_eq!(*mtime, 42.0);
                assert_eq!(BASE64.decode(bytes).unwrap(), b"hello world");
            }
            other => panic!("expected Create, got {other:?}"),
        }
        assert!(store.load("new.txt").unwrap().is_some());
    }

    #[test]
    fn plan_builds_modify_message_with_a_delta() {
        let dir = tempfile::tempdir().unwrap();
        let original = b"the quick brown fox".repeat(10);
        let mut modified = original.clone();
        modified[5] = b'!';
        std::fs::write(dir.path().join("m.txt"), &modified).unwrap();

        let sig_dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(sig_dir.path()).unwrap();

        let mut local = DirState::new();
        local.insert(stat("m.txt", 99.0));

        let mut remote = RemoteSnapshot::default();
        remote.state.insert(stat("m.txt", 10.0));
        remote
            .signatures
            .insert(RelPath::new("m.txt").unwrap(), ops::signature(&original));

        let messages = plan(dir.path(), &local, &remote, &store);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Message::Modify { path, mtime, delta } => {
                assert_eq!(path, "m.txt");
                assert_eq!(*mtime, 99.0);
                let delta_bytes = BASE64.decode(delta).unwrap();
                let patched = ops::patch(&original, &delta_bytes).unwrap();
                assert_eq!(patched, modified);
            }
            other => panic!("expected Modify, got {other:?}"),
        }
    }

    #[test]
    fn plan_skips_a_file_that_vanished_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let sig_dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(sig_dir.path()).unwrap();

        let mut local = DirState::new();
        local.insert(stat("ghost.txt", 1.0));
        let remote = RemoteSnapshot::default();

        let messages = plan(dir.path(), &local, &remote, &store);
        assert!(messages.is_empty());
    }
}
