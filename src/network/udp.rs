//! UDP socket setup
//!
//! Sockets are built with `socket2` for options std does not expose, then
//! handed to tokio.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;

use crate::error::NetworkError;

/// Receive buffer requested from the kernel for bursty multicast input
const RECV_BUFFER_BYTES: usize = 1 << 20;

/// Bind `port` on all interfaces and join `group` on `interface`.
///
/// Must be called from within a tokio runtime.
pub fn create_multicast_socket(
    group: Ipv4Addr,
    port: u16,
    interface: Ipv4Addr,
) -> Result<UdpSocket, NetworkError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::BindFailed(format!("SO_REUSEADDR: {}", e)))?;
    #[cfg(unix)]
    socket
        .set_reuse_port(true)
        .map_err(|e| NetworkError::BindFailed(format!("SO_REUSEPORT: {}", e)))?;

    if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_BYTES) {
        tracing::warn!("Could not enlarge receive buffer: {}", e);
    }

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket
        .bind(&bind_addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", bind_addr, e)))?;

    socket
        .join_multicast_v4(&group, &interface)
        .map_err(|e| NetworkError::JoinFailed {
            group: group.to_string(),
            reason: e.to_string(),
        })?;

    into_tokio(socket)
}

/// Unbound-port send socket for `destination`. Sets the multicast TTL when
/// the destination is a group.
pub fn create_send_socket(
    destination: SocketAddr,
    multicast_ttl: u32,
) -> Result<UdpSocket, NetworkError> {
    let (domain, local): (Domain, SocketAddr) = match destination.ip() {
        IpAddr::V4(_) => (Domain::IPV4, (Ipv4Addr::UNSPECIFIED, 0).into()),
        IpAddr::V6(_) => (Domain::IPV6, (std::net::Ipv6Addr::UNSPECIFIED, 0).into()),
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    if destination.ip().is_multicast() {
        let result = match destination.ip() {
            IpAddr::V4(_) => socket.set_multicast_ttl_v4(multicast_ttl),
            IpAddr::V6(_) => socket.set_multicast_hops_v6(multicast_ttl),
        };
        result.map_err(|e| NetworkError::BindFailed(format!("multicast TTL: {}", e)))?;
    }

    socket
        .bind(&local.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", local, e)))?;

    into_tokio(socket)
}

fn into_tokio(socket: Socket) -> Result<UdpSocket, NetworkError> {
    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    UdpSocket::from_std(socket.into()).map_err(|e| NetworkError::BindFailed(e.to_string()))
}
