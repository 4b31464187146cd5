//! crates/sync_core/src/session.rs
//!
//! One persistent bidirectional channel with one remote peer: owns the send
//! queue, the receive loop, and the session's position in the sync state
//! machine. A session never talks back to the registry directly; it is
//! constructed with a narrow [`SessionHost`] capability (close
//! notification only) so the registry/session relationship never forms a
//! reference cycle.

use std::io::BufReader;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, error, info, warn, Span};

use protocol::{frame, DirStateEntry, Message};
use signature::{ops, SignatureStore};

use crate::clock::Clock;
use crate::error::{ApplyError, SessionError, SessionResult};
use crate::ignore::IgnoreSet;
use crate::model::{DirState, FileStat, PeerId};
use crate::reconciler::{self, RemoteSnapshot};
use crate::walk;

/// The sync-state machine a [`PeerSession`] moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// The socket was just established; no `DIR_STATE` has been exchanged.
    Connecting,
    /// `DIR_STATE` is being sent and/or awaited.
    Reconciling,
    /// Both `DIR_STATE`s are exchanged and every reconciliation push has
    /// been enqueued; steady-state event propagation applies.
    Synchronized,
    /// Terminal: the socket closed or a fatal protocol error occurred.
    Closing,
}

/// Shared, read-only context every session needs to do its work: where the
/// monitored tree and signature store live, the ignore-set it shares with
/// every other session and the event router, and the clock.
pub struct SessionContext {
    /// Root directory being synchronized.
    pub monitored_dir: std::path::PathBuf,
    /// Persistent signature cache, shared by every session and the event
    /// router.
    pub sig_store: Arc<SignatureStore>,
    /// Echo-suppression set, shared by every session and the event router.
    pub ignore: Arc<IgnoreSet>,
    /// Source of wall-clock seconds.
    pub clock: Arc<dyn Clock>,
    /// Hard cap on a frame's declared length.
    pub max_frame_bytes: u64,
    /// Bound on the outbound send queue before the session is closed with
    /// backpressure.
    pub send_queue_depth: usize,
    /// Held across every directory walk and every applied filesystem
    /// mutation, so a walk's snapshot is never interleaved with an
    /// in-flight `apply` on the same tree. Shared by every session and the
    /// event router's own apply path.
    pub dir_lock: Arc<Mutex<()>>,
}

/// The narrow capability a [`PeerSession`] is given back to its owning
/// registry: close notification only. Sessions never enqueue into other
/// sessions or mutate the registry's map directly.
pub trait SessionHost: Send + Sync {
    /// Called exactly once, from whichever of the send/receive threads
    /// first observes the session's terminal condition.
    fn on_close(&self, id: PeerId);
}

/// One persistent bidirectional framed channel to a single remote peer.
pub struct PeerSession {
    /// The peer's advertised identity.
    pub id: PeerId,
    /// Whether this side initiated the connection (outbound dial) or
    /// accepted it. Used only for logging and the duplicate-dial
    /// tie-break, which the registry performs, not the session.
    pub outbound: bool,
    state: Mutex<SyncState>,
    sender: Sender<Message>,
    closed: AtomicBool,
    span: Span,
    shutdown_handle: Mutex<Option<TcpStream>>,
}

impl PeerSession {
    /// Current sync state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: SyncState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Whether this session has reached `Synchronized`.
    #[must_use]
    pub fn is_synchronized(&self) -> bool {
        self.state() == SyncState::Synchronized
    }

    /// Enqueue a message for delivery, non-blocking up to the queue bound.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Backpressure`] if the queue is full, which
    /// also closes the session. Silently succeeds-as-no-op if the session
    /// is already closing (there is no queue left to drain).
    pub fn enqueue(&self, msg: Message) -> SessionResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        match self.sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(parent: &self.span, "send queue overflow, closing session");
                self.mark_closed();
                Err(SessionError::Backpressure(self.id))
            }
            Err(TrySendError::Disconnected(_)) => Ok(()),
        }
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.set_state(SyncState::Closing);
    }

    /// Forcibly close the underlying socket, e.g. when the registry loses a
    /// duplicate-dial tie-break on this session's behalf. The send/receive
    /// threads observe the resulting I/O error and unwind normally,
    /// notifying the session host exactly once.
    pub fn close(&self) {
        if let Some(handle) = self.shutdown_handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.shutdown(std::net::Shutdown::Both);
        }
        self.mark_closed();
    }
}

/// Spawn a session for an already-established socket (either accepted or
/// freshly dialed) and start its send/receive threads.
///
/// Immediately transitions to `Reconciling` and enqueues this side's
/// `DIR_STATE` before returning: both directions transition together, and
/// the local state is advertised immediately on entering `Reconciling`.
pub fn spawn(
    stream: TcpStream,
    id: PeerId,
    outbound: bool,
    ctx: Arc<SessionContext>,
    host: Arc<dyn SessionHost>,
) -> Arc<PeerSession> {
    let span = tracing::info_span!("peer_session", peer = %id, outbound);
    let (tx, rx) = crossbeam_channel::bounded(ctx.send_queue_depth);

    let write_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            error!(parent: &span, error = %e, "failed to clone session socket");
            let session = Arc::new(PeerSession {
                id,
                outbound,
                state: Mutex::new(SyncState::Closing),
                sender: tx,
                closed: AtomicBool::new(true),
                span: span.clone(),
                shutdown_handle: Mutex::new(None),
            });
            host.on_close(id);
            return session;
        }
    };
    let shutdown_handle = stream.try_clone().ok();

    let session = Arc::new(PeerSession {
        id,
        outbound,
        state: Mutex::new(SyncState::Connecting),
        sender: tx,
        closed: AtomicBool::new(false),
        span: span.clone(),
        shutdown_handle: Mutex::new(shutdown_handle),
    });

    session.set_state(SyncState::Reconciling);
    match local_dir_state_message(&ctx) {
        Ok(msg) => {
            let _ = session.enqueue(msg);
        }
        Err(e) => warn!(parent: &span, error = %e, "failed to build local DIR_STATE"),
    }

    {
        let session = Arc::clone(&session);
        let host = Arc::clone(&host);
        let span = span.clone();
        thread::spawn(move || send_loop(write_stream, rx, &session, &host, &span));
    }
    {
        let session = Arc::clone(&session);
        let ctx = Arc::clone(&ctx);
        thread::spawn(move || receive_loop(stream, &session, &ctx, &host, &span));
    }

    session
}

fn send_loop(
    mut stream: TcpStream,
    rx: Receiver<Message>,
    session: &Arc<PeerSession>,
    host: &Arc<dyn SessionHost>,
    span: &Span,
) {
    let _enter = span.enter();
    for msg in rx.iter() {
        if let Err(e) = frame::write_frame(&mut stream, &msg) {
            warn!(error = %e, "send loop failed, closing session");
            break;
        }
    }
    drop(stream.shutdown(std::net::Shutdown::Both));
    session.mark_closed();
    host.on_close(session.id);
}

fn receive_loop(
    stream: TcpStream,
    session: &Arc<PeerSession>,
    ctx: &Arc<SessionContext>,
    host: &Arc<dyn SessionHost>,
    span: &Span,
) {
    let _enter = span.enter();
    let mut reader = BufReader::new(stream);
    loop {
        let frame_result = frame::read_frame(&mut reader, ctx.max_frame_bytes);
        match frame_result {
            Ok(None) => {
                debug!("peer closed the connection");
                break;
            }
            Ok(Some(msg)) => {
                if let Err(e) = dispatch(&msg, session, ctx) {
                    warn!(kind = msg.kind(), error = %e, "failed to handle incoming message");
                }
            }
            Err(e) => {
                warn!(error = %e, "frame error, closing session");
                break;
            }
        }
    }
    session.mark_closed();
    host.on_close(session.id);
}

fn dispatch(
    msg: &Message,
    session: &Arc<PeerSession>,
    ctx: &Arc<SessionContext>,
) -> SessionResult<()> {
    match msg {
        Message::DirState { files } => handle_dir_state(files, session, ctx),
        Message::Create { .. } | Message::Modify { .. } | Message::Delete { .. } | Message::Rename { .. } => {
            let result = {
                let _guard = ctx.dir_lock.lock().unwrap_or_else(|e| e.into_inner());
                crate::apply::apply(&ctx.monitored_dir, &ctx.sig_store, &ctx.ignore, ctx.clock.as_ref(), msg)
            };
            match result {
                Ok(()) => Ok(()),
                Err(ApplyError::MissingBase(path)) => {
                    info!(path = %path, "dropping MODIFY with no local base, awaiting reconciliation");
                    Ok(())
                }
                Err(e) => {
                    warn!(error = %e, "failed to apply remote update");
                    Ok(())
                }
            }
        }
        Message::Beacon { .. } => Err(SessionError::ProtocolViolation {
            peer: session.id,
            detail: "BEACON is UDP-only and must never arrive on a peer socket".into(),
        }),
    }
}

fn handle_dir_state(
    files: &[DirStateEntry],
    session: &Arc<PeerSession>,
    ctx: &Arc<SessionContext>,
) -> SessionResult<()> {
    if session.state() == SyncState::Synchronized {
        // A peer should only send DIR_STATE once, at the start of a
        // session; a second one is a protocol violation rather than
        // silently re-reconciled, since it would otherwise let a buggy
        // or hostile peer re-trigger pushes mid-steady-state.
        return Err(SessionError::ProtocolViolation {
            peer: session.id,
            detail: "received a second DIR_STATE after synchronization".into(),
        });
    }

    let remote = RemoteSnapshot::from_entries(files);
    let local = {
        let _guard = ctx.dir_lock.lock().unwrap_or_else(|e| e.into_inner());
        match walk::walk(&ctx.monitored_dir) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "failed to walk monitored directory during reconciliation");
                DirState::new()
            }
        }
    };

    for push in reconciler::plan(&ctx.monitored_dir, &local, &remote, &ctx.sig_store) {
        session.enqueue(push)?;
    }

    session.set_state(SyncState::Synchronized);
    info!(peer = %session.id, "session synchronized");
    Ok(())
}

fn local_dir_state_message(ctx: &Arc<SessionContext>) -> SessionResult<Message> {
    let state = {
        let _guard = ctx.dir_lock.lock().unwrap_or_else(|e| e.into_inner());
        walk::walk(&ctx.monitored_dir)?
    };
    let mut files = Vec::with_capacity(state.len());
    for (path, stat) in state.iter() {
        // Every entry needs its content hashed for the tie-break, so the
        // signature cache can no longer save us a read on a cache hit.
        let data = std::fs::read(ctx.monitored_dir.join(path.as_str())).unwrap_or_default();
        let sig = match ctx.sig_store.load(path.as_str()) {
            Ok(Some(sig)) => sig,
            _ => {
                let sig = ops::signature(&data);
                let _ = ctx.sig_store.store(path.as_str(), &sig);
                sig
            }
        };
        files.push(DirStateEntry {
            path: path.as_str().to_string(),
            mtime: stat.mtime,
            size: stat.size,
            sig: BASE64.encode(sig),
            content_hash: FileStat::tie_break_hash(&data),
        });
    }
    Ok(Message::DirState { files })
}

/// Timeout applied to an outbound TCP dial.
pub fn dial_with_timeout(
    addr: std::net::SocketAddr,
    timeout: Duration,
) -> std::io::Result<TcpStream> {
    TcpStream::connect_timeout(&addr, timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use std::net::{IpAddr, Ipv4Addr};

    fn ctx() -> (tempfile::TempDir, Arc<SessionContext>) {
        let dir = tempfile::tempdir().unwrap();
        let sig_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SignatureStore::open(sig_dir.path()).unwrap());
        let ctx = Arc::new(SessionContext {
            monitored_dir: dir.path().to_path_buf(),
            sig_store: store,
            ignore: Arc::new(IgnoreSet::new(2.0)),
            clock: Arc::new(SystemClock),
            max_frame_bytes: 1024 * 1024,
            send_queue_depth: 8,
            dir_lock: Arc::new(Mutex::new(())),
        });
        (dir, ctx)
    }

    struct NoopHost;
    impl SessionHost for NoopHost {
        fn on_close(&self, _id: PeerId) {}
    }

    #[test]
    fn local_dir_state_message_includes_every_file() {
        let (dir, ctx) = ctx();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let msg = local_dir_state_message(&ctx).unwrap();
        match msg {
            Message::DirState { files } => {
                assert_eq!(files.len(), 1);
                assert_eq!(files[0].path, "a.txt");
            }
            other => panic!("expected DirState, got {other:?}"),
        }
    }

    #[test]
    fn enqueue_past_bound_closes_with_backpressure() {
        let (_dir, ctx) = ctx();
        let (tx, _rx) = crossbeam_channel::bounded(2);
        let session = Arc::new(PeerSession {
            id: PeerId::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 6000),
            outbound: true,
            state: Mutex::new(SyncState::Synchronized),
            sender: tx,
            closed: AtomicBool::new(false),
            span: tracing::info_span!("test"),
            shutdown_handle: Mutex::new(None),
        });
        let _ = ctx;

        session.enqueue(Message::Beacon { port: 1 }).unwrap();
        session.enqueue(Message::Beacon { port: 2 }).unwrap();
        let err = session.enqueue(Message::Beacon { port: 3 }).unwrap_err();
        assert!(matches!(err, SessionError::Backpressure(_)));
        assert_eq!(session.state(), SyncState::Closing);
    }

    #[test]
    fn second_dir_state_after_synchronized_is_protocol_violation() {
        let (_dir, ctx) = ctx();
        let (tx, _rx) = crossbeam_channel::bounded(8);
        let session = Arc::new(PeerSession {
            id: PeerId::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 6000),
            outbound: true,
            state: Mutex::new(SyncState::Synchronized),
            sender: tx,
            closed: AtomicBool::new(false),
            span: tracing::info_span!("test"),
            shutdown_handle: Mutex::new(None),
        });

        let err = handle_dir_state(&[], &session, &ctx).unwrap_err();
        assert!(matches!(err, SessionError::ProtocolViolation { .. }));
    }

    #[test]
    fn handle_dir_state_transitions_to_synchronized() {
        let (_dir, ctx) = ctx();
        let (tx, _rx) = crossbeam_channel::bounded(8);
        let session = Arc::new(PeerSession {
            id: PeerId::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 6000),
            outbound: true,
            state: Mutex::new(SyncState::Reconciling),
            sender: tx,
            closed: AtomicBool::new(false),
            span: tracing::info_span!("test"),
            shutdown_handle: Mutex::new(None),
        });

        handle_dir_state(&[], &session, &ctx).unwrap();
        assert_eq!(session.state(), SyncState::Synchronized);
    }

    #[test]
    fn noop_host_compiles_and_runs() {
        NoopHost.on_close(PeerId::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 6000));
    }
}
