//! src/local_ip.rs
//!
//! Detect the IP address this node should advertise in discovery beacons.

use std::io;
use std::net::{IpAddr, UdpSocket};

/// The address of the outbound network interface, found by asking the
/// kernel which local address a UDP socket would use to reach a public
/// address. No packet is sent: `connect` on a `UdpSocket` only selects a
/// route and a source address.
pub fn detect() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    Ok(socket.local_addr()?.ip())
}
