//! Raw socket management

use crate::error::{raw_socket_error, ScanResult};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

/// Blocking raw TCP socket used by the SYN prober.
///
/// Opened per probe and closed on drop, so no descriptor outlives its probe.
pub struct RawSocket {
    socket: Socket,
}

impl RawSocket {
    /// Create a new raw TCP socket
    pub fn new_tcp() -> ScanResult<Self> {
        let socket = Socket::new(Domain::IPV4, Type::from(libc::SOCK_RAW), Some(Protocol::TCP))
            .map_err(raw_socket_error)?;
        Ok(Self { socket })
    }

    /// Send a crafted TCP segment; the kernel supplies the IP header.
    pub fn send_to(&self, segment: &[u8], dest: Ipv4Addr) -> io::Result<usize> {
        let addr = SocketAddr::new(IpAddr::V4(dest), 0);
        self.socket.send_to(segment, &addr.into())
    }

    /// Read one datagram (IP header included), waiting at most `timeout`.
    pub fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.socket.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        self.socket.read(buf)
    }
}

/// Local address the kernel would use to reach `target`.
///
/// Connecting a UDP socket sends nothing; it only selects a route.
pub fn local_ipv4_for(target: Ipv4Addr) -> io::Result<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect((target, 9))?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(ip) => Ok(ip),
        IpAddr::V6(_) => Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no IPv4 route to target",
        )),
    }
}

/// Whether this process may open raw sockets.
pub fn check_raw_socket_privilege() -> ScanResult<()> {
    RawSocket::new_tcp().map(drop)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_route_uses_loopback_source() {
        let ip = local_ipv4_for(Ipv4Addr::LOCALHOST).unwrap();
        assert!(ip.is_loopback());
    }

    #[test]
    fn privilege_failure_is_configuration_error() {
        if let Err(err) = check_raw_socket_privilege() {
            assert!(matches!(
                err,
                crate::error::ScanError::PermissionDenied(_) | crate::error::ScanError::NetworkError(_)
            ));
        }
    }
}
