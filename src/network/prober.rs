//! Probe strategies: one object per technique, one call per port

use crate::error::{ProbeError, ScanResult};
use crate::network::syn::SynProber;
use crate::network::{PortState, ProbeResult, Technique};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpStream, UdpSocket};

/// A single-port probe strategy.
///
/// Implementations never fail as a whole: every outcome, including transport
/// failures, is folded into the returned [`ProbeResult`].
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn probe(&self, target: IpAddr, port: u16, timeout: Duration) -> ProbeResult;

    fn name(&self) -> &'static str;
}

/// Build the probe strategy for a technique.
///
/// `syn` checks raw-socket privilege here, before any probe is scheduled.
pub fn prober_for(technique: Technique) -> ScanResult<Arc<dyn PortProbe>> {
    Ok(match technique {
        Technique::TcpConnect | Technique::Hybrid => Arc::new(TcpConnectProber),
        Technique::Udp => Arc::new(UdpProber::new()),
        Technique::Syn => Arc::new(SynProber::new()?),
    })
}

/// Map the outcome of a timed connect attempt to a port state.
pub fn classify_connect<T>(
    outcome: Result<io::Result<T>, tokio::time::error::Elapsed>,
) -> Result<PortState, ProbeError> {
    match outcome {
        Ok(Ok(_)) => Ok(PortState::Open),
        Err(_) => Ok(PortState::Filtered),
        Ok(Err(e)) => match ProbeError::from(e) {
            ProbeError::ConnectionRefused => Ok(PortState::Closed),
            ProbeError::Timeout => Ok(PortState::Filtered),
            other => Err(other),
        },
    }
}

/// Full three-way handshake prober
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnectProber;

#[async_trait]
impl PortProbe for TcpConnectProber {
    async fn probe(&self, target: IpAddr, port: u16, timeout: Duration) -> ProbeResult {
        let addr = SocketAddr::new(target, port);
        let start = Instant::now();
        let outcome = tokio::time::timeout(timeout, TcpStream::connect(addr)).await;
        let latency = start.elapsed();

        match classify_connect(outcome) {
            Ok(state) => ProbeResult::new(port, state).with_latency(latency),
            Err(cause) => ProbeResult::failed(port, cause.to_string()).with_latency(latency),
        }
    }

    fn name(&self) -> &'static str {
        "tcp_connect"
    }
}

/// Protocol-aware payloads for common UDP services; other ports get an empty datagram.
static UDP_PAYLOADS: Lazy<HashMap<u16, Vec<u8>>> = Lazy::new(|| {
    let mut payloads = HashMap::new();

    // DNS: standard query for the root zone NS records
    payloads.insert(
        53,
        vec![
            0x52, 0x53, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x02, 0x00, 0x01,
        ],
    );
    // TFTP: read request
    payloads.insert(69, b"\x00\x01probe\x00octet\x00".to_vec());
    // NTP: client mode version 3
    let mut ntp = vec![0u8; 48];
    ntp[0] = 0x1b;
    payloads.insert(123, ntp);
    // NetBIOS name service: node status request
    payloads.insert(
        137,
        vec![
            0x80, 0xf0, 0x00, 0x10, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x20, 0x43,
            0x4b, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41,
            0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41,
            0x41, 0x41, 0x41, 0x00, 0x00, 0x21, 0x00, 0x01,
        ],
    );
    // SNMP v1 get-request, community "public", sysDescr
    payloads.insert(
        161,
        vec![
            0x30, 0x26, 0x02, 0x01, 0x00, 0x04, 0x06, 0x70, 0x75, 0x62, 0x6c, 0x69, 0x63, 0xa0,
            0x19, 0x02, 0x04, 0x71, 0x2f, 0x0e, 0x5b, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x30,
            0x0b, 0x30, 0x09, 0x06, 0x05, 0x2b, 0x06, 0x01, 0x02, 0x01, 0x05, 0x00,
        ],
    );
    // SSDP discovery
    payloads.insert(
        1900,
        b"M-SEARCH * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nMAN: \"ssdp:discover\"\r\nMX: 1\r\nST: ssdp:all\r\n\r\n".to_vec(),
    );
    // SIP OPTIONS
    payloads.insert(
        5060,
        b"OPTIONS sip:probe SIP/2.0\r\nVia: SIP/2.0/UDP 0.0.0.0:5060\r\nMax-Forwards: 70\r\nContent-Length: 0\r\n\r\n".to_vec(),
    );

    payloads
});

/// UDP datagram prober.
///
/// Uses a connected socket so an ICMP port-unreachable answer surfaces as
/// `ConnectionRefused` on the next receive.
#[derive(Debug, Clone, Default)]
pub struct UdpProber {
    payloads: HashMap<u16, Vec<u8>>,
}

impl UdpProber {
    pub fn new() -> Self {
        Self {
            payloads: UDP_PAYLOADS.clone(),
        }
    }

    /// Override the datagram sent to one port.
    pub fn with_payload(mut self, port: u16, payload: Vec<u8>) -> Self {
        self.payloads.insert(port, payload);
        self
    }

    pub fn payload_for(&self, port: u16) -> &[u8] {
        self.payloads.get(&port).map(Vec::as_slice).unwrap_or(&[])
    }

    async fn exchange(&self, target: IpAddr, port: u16, timeout: Duration) -> Result<PortState, ProbeError> {
        let bind_addr = match target {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(SocketAddr::new(target, port)).await?;
        socket.send(self.payload_for(port)).await?;

        let mut buf = [0u8; 1024];
        match tokio::time::timeout(timeout, socket.recv(&mut buf)).await {
            Ok(Ok(_)) => Ok(PortState::Open),
            Err(_) => Ok(PortState::OpenOrFiltered),
            Ok(Err(e)) => match ProbeError::from(e) {
                ProbeError::ConnectionRefused => Ok(PortState::Closed),
                ProbeError::Timeout => Ok(PortState::OpenOrFiltered),
                other => Err(other),
            },
        }
    }
}

#[async_trait]
impl PortProbe for UdpProber {
    async fn probe(&self, target: IpAddr, port: u16, timeout: Duration) -> ProbeResult {
        let start = Instant::now();
        let outcome = self.exchange(target, port, timeout).await;
        let latency = start.elapsed();

        match outcome {
            Ok(state) => ProbeResult::new(port, state).with_latency(latency),
            Err(cause) => ProbeResult::failed(port, cause.to_string()).with_latency(latency),
        }
    }

    fn name(&self) -> &'static str {
        "udp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn classify_connect_outcomes() {
        let refused: io::Result<()> = Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        let unreachable: io::Result<()> = Err(io::Error::new(io::ErrorKind::Other, "host unreachable"));
        assert_eq!(classify_connect(Ok(Ok(()))), Ok(PortState::Open));
        assert_eq!(classify_connect(Ok(refused)), Ok(PortState::Closed));
        assert!(matches!(classify_connect(Ok(unreachable)), Err(ProbeError::Transport(_))));
    }

    #[tokio::test]
    async fn connect_probe_open_and_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();

        let closed_port = {
            let tmp = TcpListener::bind("127.0.0.1:0").await.unwrap();
            tmp.local_addr().unwrap().port()
        };

        let prober = TcpConnectProber;
        let open = prober.probe(LOCALHOST, open_port, Duration::from_millis(500)).await;
        let closed = prober.probe(LOCALHOST, closed_port, Duration::from_millis(500)).await;

        assert_eq!(open.state, PortState::Open);
        assert!(open.latency_ms >= 0.0);
        assert_eq!(closed.state, PortState::Closed);
    }

    #[tokio::test]
    async fn udp_probe_reads_reply() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = responder.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            if let Ok((_, peer)) = responder.recv_from(&mut buf).await {
                let _ = responder.send_to(b"pong", peer).await;
            }
        });

        let result = UdpProber::new()
            .probe(LOCALHOST, port, Duration::from_millis(500))
            .await;
        assert_eq!(result.state, PortState::Open);
    }

    #[tokio::test]
    async fn udp_unreachable_is_closed() {
        let port = {
            let tmp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            tmp.local_addr().unwrap().port()
        };
        let result = UdpProber::new()
            .probe(LOCALHOST, port, Duration::from_millis(500))
            .await;
        assert_eq!(result.state, PortState::Closed);
    }

    #[test]
    fn known_services_get_payloads() {
        let prober = UdpProber::new().with_payload(9999, b"hi".to_vec());
        assert_eq!(prober.payload_for(123).len(), 48);
        assert_eq!(prober.payload_for(9999), b"hi");
        assert!(prober.payload_for(40000).is_empty());
    }

    #[test]
    fn factory_maps_techniques() {
        assert_eq!(prober_for(Technique::TcpConnect).unwrap().name(), "tcp_connect");
        assert_eq!(prober_for(Technique::Hybrid).unwrap().name(), "tcp_connect");
        assert_eq!(prober_for(Technique::Udp).unwrap().name(), "udp");
    }
}
