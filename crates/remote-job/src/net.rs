//! Small host-networking helpers the endpoint manager needs: picking an
//! ephemeral port to bind ZMQ to, and finding the address to announce it
//! under.

use std::net::{IpAddr, TcpListener, UdpSocket};

/// Reserve an unused TCP port by letting the OS assign one, then release it
/// immediately. ZMQ has no "tell me the port you picked" API reachable
/// through `tmq`'s builder, so the job picks the port itself first and
/// binds ZMQ to that exact address -- the same trick this workspace's own
/// test harnesses use to find a free port for a `TcpListener`.
pub fn free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind("0.0.0.0:0")?;
    Ok(listener.local_addr()?.port())
}

/// The host's primary outbound IP: the local address a socket would use to
/// reach the public internet. Connecting a UDP socket doesn't send any
/// packets -- it only asks the kernel to pick a route -- so this works
/// without the target host being reachable.
pub fn primary_ip() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    Ok(socket.local_addr()?.ip())
}
