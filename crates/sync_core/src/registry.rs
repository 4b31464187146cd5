//! crates/sync_core/src/registry.rs
//!
//! The set of live peer sessions keyed by [`PeerId`], plus accept/connect
//! coordination: deduplicating concurrent dials and resolving the
//! simultaneous-dial race with a deterministic tie-break.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::warn;

use protocol::Message;

use crate::error::SessionError;
use crate::model::PeerId;
use crate::session::{self, PeerSession, SessionContext, SessionHost};

/// Holds every live [`PeerSession`], keyed by [`PeerId`], plus the set of
/// dials currently in flight (so a second discovery beacon for a peer
/// already being dialed does nothing).
pub struct PeerRegistry {
    local_id: PeerId,
    ctx: Arc<SessionContext>,
    sessions: Mutex<HashMap<PeerId, Arc<PeerSession>>>,
    dialing: Mutex<HashSet<PeerId>>,
    /// Advertised listen port per IP, learned from discovery beacons. A
    /// raw TCP accept only carries an ephemeral source port, so the accept
    /// loop consults this map to recover the peer's advertised identity.
    known_ports: Mutex<HashMap<IpAddr, u16>>,
    connect_timeout: Duration,
}

impl PeerRegistry {
    /// Create an empty registry for a node advertising `local_id`.
    #[must_use]
    pub fn new(local_id: PeerId, ctx: Arc<SessionContext>, connect_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            local_id,
            ctx,
            sessions: Mutex::new(HashMap::new()),
            dialing: Mutex::new(HashSet::new()),
            known_ports: Mutex::new(HashMap::new()),
            connect_timeout,
        })
    }

    /// A peer was discovered (by a beacon). If no session exists for it and
    /// no dial is already in flight, spawn one; otherwise this is a no-op.
    pub fn on_discovered(self: &Arc<Self>, peer: PeerId) {
        self.known_ports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(peer.ip, peer.port);
        if peer == self.local_id {
            return;
        }
        {
            let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            if sessions.contains_key(&peer) {
                return;
            }
        }
        {
            let mut dialing = self.dialing.lock().unwrap_or_else(|e| e.into_inner());
            if !dialing.insert(peer) {
                return; // a dial for this peer is already in flight
            }
        }

        let registry = Arc::clone(self);
        std::thread::spawn(move || {
            let result = session::dial_with_timeout(
                std::net::SocketAddr::new(peer.ip, peer.port),
                registry.connect_timeout,
            );
            registry.dialing.lock().unwrap_or_else(|e| e.into_inner()).remove(&peer);
            match result {
                Ok(stream) => registry.on_connected(stream, peer),
                Err(e) => warn!(peer = %peer, error = %e, "outbound dial failed"),
            }
        });
    }

    fn on_connected(self: &Arc<Self>, stream: TcpStream, peer: PeerId) {
        let host: Arc<dyn SessionHost> = Arc::clone(self) as Arc<dyn SessionHost>;
        let session = session::spawn(stream, peer, true, Arc::clone(&self.ctx), host);
        self.insert_resolving_duplicates(peer, session);
    }

    /// A socket was accepted on the listen port, and the peer's advertised
    /// identity `peer` is now known (e.g. from its first `DIR_STATE`'s
    /// source address and a prior beacon, or from the connection's peer
    /// address directly). Creates a session; if one already exists for
    /// `peer`, resolves the collision with the documented tie-break.
    pub fn on_accepted(self: &Arc<Self>, stream: TcpStream, peer: PeerId) {
        let host: Arc<dyn SessionHost> = Arc::clone(self) as Arc<dyn SessionHost>;
        let session = session::spawn(stream, peer, false, Arc::clone(&self.ctx), host);
        self.insert_resolving_duplicates(peer, session);
    }

    /// Resolve an accepted socket's peer identity from its source IP and the
    /// advertised listen port last seen in a beacon from that IP, then hand
    /// it to [`Self::on_accepted`]. Drops the connection with a warning if
    /// no beacon from this IP has been observed yet; the peer's own
    /// periodic beacon will let a later accept succeed.
    pub fn accept(self: &Arc<Self>, stream: TcpStream) {
        let ip = match stream.peer_addr() {
            Ok(addr) => addr.ip(),
            Err(e) => {
                warn!(error = %e, "accepted socket has no peer address");
                return;
            }
        };
        let port = self
            .known_ports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&ip)
            .copied();
        match port {
            Some(port) => self.on_accepted(stream, PeerId::new(ip, port)),
            None => warn!(ip = %ip, "accepted connection from a peer with no known beacon, dropping"),
        }
    }

    fn insert_resolving_duplicates(self: &Arc<Self>, peer: PeerId, incoming: Arc<PeerSession>) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        match sessions.get(&peer) {
            Some(existing) if Arc::ptr_eq(existing, &incoming) => {}
            Some(existing) => {
                // Simultaneous dial: both sides have a session for `peer`.
                // The peer with the lower PeerId keeps its own outbound
                // session; the other side keeps its accepted session.
                let local_is_lower = self.local_id < peer;
                let existing_survives = if local_is_lower {
                    existing.outbound
                } else {
                    !existing.outbound
                };

                if existing_survives {
                    warn!(error = %SessionError::DuplicateSession(peer), "keeping existing session");
                    incoming.close();
                } else {
                    warn!(error = %SessionError::DuplicateSession(peer), "keeping newly established session");
                    existing.close();
                    sessions.insert(peer, incoming);
                }
            }
            None => {
                sessions.insert(peer, incoming);
            }
        }
    }

    /// Enqueue `msg` on every session matching the filter. Holds the
    /// registry lock only across the map iteration, never across socket
    /// I/O (enqueue is itself non-blocking).
    pub fn broadcast(&self, msg: &Message, only_synchronized: bool) {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        for session in sessions.values() {
            if only_synchronized && !session.is_synchronized() {
                continue;
            }
            let _ = session.enqueue(msg.clone());
        }
    }

    /// Idempotent removal of the session for `peer`, if present.
    pub fn remove(&self, peer: PeerId) {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).remove(&peer);
    }

    /// Number of live sessions, for tests and diagnostics.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether a session currently exists for `peer`.
    #[must_use]
    pub fn contains(&self, peer: PeerId) -> bool {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).contains_key(&peer)
    }
}

impl SessionHost for PeerRegistry {
    fn on_close(&self, id: PeerId) {
        self.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::ignore::IgnoreSet;
    use signature::SignatureStore;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_ctx() -> Arc<SessionContext> {
        let dir = tempfile::tempdir().unwrap();
        let sig_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SignatureStore::open(sig_dir.path()).unwrap());
        Arc::new(SessionContext {
            monitored_dir: dir.path().to_path_buf(),
            sig_store: store,
            ignore: Arc::new(IgnoreSet::new(2.0)),
            clock: Arc::new(SystemClock),
            max_frame_bytes: 1024 * 1024,
            send_queue_depth: 8,
            dir_lock: Arc::new(Mutex::new(())),
        })
    }

    #[test]
    fn discovering_self_is_ignored() {
        let local = PeerId::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 6000);
        let registry = PeerRegistry::new(local, test_ctx(), Duration::from_millis(50));
        registry.on_discovered(local);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn remove_is_idempotent() {
        let local = PeerId::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 6000);
        let registry = PeerRegistry::new(local, test_ctx(), Duration::from_millis(50));
        let peer = PeerId::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 7000);
        registry.remove(peer);
        registry.remove(peer);
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn accept_drops_connection_from_unknown_beacon() {
        let local = PeerId::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 6000);
        let registry = PeerRegistry::new(local, test_ctx(), Duration::from_millis(50));
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        drop(client);

        registry.accept(accepted);
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn dial_to_unreachable_address_times_out_without_panicking() {
        let local = PeerId::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 6000);
        let registry = PeerRegistry::new(local, test_ctx(), Duration::from_millis(50));
        // 192.0.2.0/24 is reserved (TEST-NET-1) and will not answer.
        let peer = PeerId::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 6000);
        registry.on_discovered(peer);
        std::thread::sleep(Duration::from_millis(500));
        assert!(!registry.contains(peer));
    }
}
