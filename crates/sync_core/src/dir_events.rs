//! crates/sync_core/src/dir_events.rs
//!
//! The `DirEvents` external collaborator: a source of filesystem events for
//! the monitored directory. `sync_core` only consumes this trait; the
//! concrete `notify`-backed adapter lives in the root binary crate.

use crate::model::RelPath;

/// One observed change under the monitored root.
#[derive(Debug, Clone, PartialEq)]
pub enum DirEvent {
    /// A new file appeared.
    Create(RelPath),
    /// An existing file's content changed.
    Modify(RelPath),
    /// A file was removed.
    Delete(RelPath),
    /// A file moved from one path to another.
    Rename {
        /// The path before the move.
        from: RelPath,
        /// The path after the move.
        to: RelPath,
    },
}

/// A blocking source of directory events.
///
/// Implementors translate a platform filesystem watcher (or, in tests, a
/// scripted sequence) into the event shape the event router consumes.
/// `recv` blocks until an event is available and returns `None` once the
/// source is closed (supervisor shutdown); it is never polled busily.
pub trait DirEvents: Send {
    /// Block for the next event, or return `None` once the source is
    /// closed and will never produce another one.
    fn recv(&self) -> Option<DirEvent>;
}

#[cfg(test)]
pub mod test_support {
    //! A scripted `DirEvents` source for deterministic tests elsewhere in
    //! the workspace.
    use super::{DirEvent, DirEvents};
    use crossbeam_channel::{Receiver, Sender};

    /// A channel-backed `DirEvents` whose events are pushed by the test
    /// driving it.
    pub struct ScriptedEvents {
        rx: Receiver<DirEvent>,
    }

    impl ScriptedEvents {
        /// Create a scripted source paired with a sender the test can push
        /// events through.
        #[must_use]
        pub fn channel() -> (Sender<DirEvent>, Self) {
            let (tx, rx) = crossbeam_channel::unbounded();
            (tx, Self { rx })
        }
    }

    impl DirEvents for ScriptedEvents {
        fn recv(&self) -> Option<DirEvent> {
            self.rx.recv().ok()
        }
    }
}
