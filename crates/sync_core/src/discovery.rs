//! crates/sync_core/src/discovery.rs
//!
//! Periodic UDP broadcast beacon plus a listener that triggers an outbound
//! TCP dial on every newly observed peer.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::model::PeerId;
use crate::registry::PeerRegistry;

/// A beacon payload: `{ "type": "BEACON", "port": <u16> }`.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
struct Beacon {
    #[serde(rename = "type")]
    kind: BeaconTag,
    port: u16,
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
enum BeaconTag {
    #[serde(rename = "BEACON")]
    Beacon,
}

/// Everything discovery needs to know about this node's own identity and
/// the sockets it beacons on.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryConfig {
    /// This node's own advertised IP address, used to ignore self-beacons.
    pub local_ip: IpAddr,
    /// This node's TCP listen port, advertised in every beacon.
    pub listen_port: u16,
    /// UDP port beacons are broadcast to and listened on.
    pub broadcast_port: u16,
    /// Seconds between periodic beacons.
    pub beacon_interval: Duration,
}

fn configure_broadcast_socket(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;
    socket.set_broadcast(true)?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    socket.set_reuse_port(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

fn send_beacon(socket: &UdpSocket, target: SocketAddr, port: u16) {
    let payload = serde_json::to_vec(&Beacon {
        kind: BeaconTag::Beacon,
        port,
    })
    .expect("Beacon always serializes");
    if let Err(e) = socket.send_to(&payload, target) {
        warn!(error = %e, "failed to send discovery beacon");
    }
}

/// Run the periodic beacon loop on the current thread until `stop` is set.
/// Intended to be run on a dedicated thread by the supervisor.
pub fn beacon_loop(cfg: &DiscoveryConfig, stop: &AtomicBool) {
    let bind_addr = SocketAddr::new(
        if cfg.local_ip.is_ipv6() {
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
        },
        0,
    );
    let socket = match configure_broadcast_socket(bind_addr) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to open discovery beacon socket");
            return;
        }
    };
    let target = SocketAddr::new(broadcast_address(cfg.local_ip), cfg.broadcast_port);

    while !stop.load(Ordering::SeqCst) {
        send_beacon(&socket, target, cfg.listen_port);
        trace!(port = cfg.listen_port, "sent periodic beacon");
        sleep_interruptible(cfg.beacon_interval, stop);
    }
}

/// Run the listener loop: receive beacons and call `registry.on_discovered`
/// for every beacon not originating from this node itself. Runs until
/// `stop` is set or the socket errors unrecoverably.
pub fn listen_loop(cfg: &DiscoveryConfig, registry: &Arc<PeerRegistry>, stop: &AtomicBool) {
    let bind_addr = SocketAddr::new(
        if cfg.local_ip.is_ipv6() {
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
        },
        cfg.broadcast_port,
    );
    let socket = match configure_broadcast_socket(bind_addr) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to open discovery listener socket");
            return;
        }
    };
    if let Err(e) = socket.set_read_timeout(Some(Duration::from_millis(200))) {
        warn!(error = %e, "failed to set discovery listener read timeout");
    }

    let mut known = std::collections::HashSet::new();
    let mut buf = [0u8; 256];
    while !stop.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                handle_beacon(&buf[..n], from, cfg, registry, &socket, &mut known);
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                warn!(error = %e, "discovery listener socket error");
                break;
            }
        }
    }
}

fn handle_beacon(
    payload: &[u8],
    from: SocketAddr,
    cfg: &DiscoveryConfig,
    registry: &Arc<PeerRegistry>,
    socket: &UdpSocket,
    known: &mut std::collections::HashSet<PeerId>,
) {
    let Ok(beacon) = serde_json::from_slice::<Beacon>(payload) else {
        return;
    };
    let sender_ip = from.ip();
    if sender_ip == cfg.local_ip && beacon.port == cfg.listen_port {
        return; // self-broadcast
    }

    let peer = PeerId::new(sender_ip, beacon.port);
    debug!(peer = %peer, "received discovery beacon");
    registry.on_discovered(peer);

    if known.insert(peer) {
        // First time we've seen this peer: send one extra beacon right
        // away so it learns of us without waiting a full interval.
        let target = SocketAddr::new(broadcast_address(cfg.local_ip), cfg.broadcast_port);
        send_beacon(socket, target, cfg.listen_port);
    }
}

fn sleep_interruptible(total: Duration, stop: &AtomicBool) {
    const STEP: Duration = Duration::from_millis(100);
    let mut remaining = total;
    while remaining > Duration::ZERO && !stop.load(Ordering::SeqCst) {
        let step = remaining.min(STEP);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

/// The IPv4 subnet broadcast address for a /24 containing `ip`, or the
/// link-local all-nodes multicast-equivalent fallback for IPv6 (discovery
/// is a LAN-only mechanism; IPv6 deployments are expected to be IPv4
/// dual-stack for this purpose).
fn broadcast_address(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            IpAddr::V4(std::net::Ipv4Addr::new(octets[0], octets[1], octets[2], 255))
        }
        IpAddr::V6(_) => IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
    }
}
