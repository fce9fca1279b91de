//! Half-open (SYN) probing over raw sockets

use crate::error::ScanResult;
use crate::network::packet::{parse_syn_reply, SynPacketBuilder, SynReply};
use crate::network::prober::PortProbe;
use crate::network::socket::{check_raw_socket_privilege, local_ipv4_for, RawSocket};
use crate::network::{PortState, ProbeResult};
use async_trait::async_trait;
use rand::Rng;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

const SOURCE_PORT_RANGE: std::ops::RangeInclusive<u16> = 40000..=60999;

/// SYN prober: SYN/ACK means open, RST means closed, silence means filtered.
#[derive(Debug, Clone)]
pub struct SynProber {
    _private: (),
}

impl SynProber {
    /// Fails with `PermissionDenied` when raw sockets are not available.
    pub fn new() -> ScanResult<Self> {
        check_raw_socket_privilege()?;
        Ok(Self { _private: () })
    }
}

#[async_trait]
impl PortProbe for SynProber {
    async fn probe(&self, target: IpAddr, port: u16, timeout: Duration) -> ProbeResult {
        let IpAddr::V4(dest) = target else {
            return ProbeResult::failed(port, "syn probing supports IPv4 targets only");
        };

        let start = Instant::now();
        let outcome = tokio::task::spawn_blocking(move || syn_exchange(dest, port, timeout)).await;

        match outcome {
            Ok(Ok(Some(SynReply::SynAck))) => {
                ProbeResult::new(port, PortState::Open).with_latency(start.elapsed())
            }
            Ok(Ok(Some(SynReply::Reset))) => {
                ProbeResult::new(port, PortState::Closed).with_latency(start.elapsed())
            }
            Ok(Ok(None)) => ProbeResult::new(port, PortState::Filtered).with_latency(start.elapsed()),
            Ok(Err(e)) => ProbeResult::failed(port, e.to_string()).with_latency(start.elapsed()),
            Err(e) => ProbeResult::failed(port, format!("probe task failed: {}", e)),
        }
    }

    fn name(&self) -> &'static str {
        "syn"
    }
}

/// Send one SYN and wait for a matching answer until the deadline.
fn syn_exchange(dest: Ipv4Addr, port: u16, timeout: Duration) -> io::Result<Option<SynReply>> {
    let mut socket = RawSocket::new_tcp()
        .map_err(|e| io::Error::new(io::ErrorKind::PermissionDenied, e.to_string()))?;
    let source_ip = local_ipv4_for(dest)?;
    let source_port = rand::thread_rng().gen_range(SOURCE_PORT_RANGE);

    let segment = SynPacketBuilder::new(source_ip, dest, source_port, port).build();
    socket.send_to(&segment, dest)?;

    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 1500];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        match socket.recv(&mut buf, remaining) {
            Ok(len) => {
                if let Some(reply) = parse_syn_reply(&buf[..len], dest, port, source_port) {
                    return Ok(Some(reply));
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Ok(None);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ipv6_targets_are_reported_per_port() {
        let prober = SynProber { _private: () };
        let result = prober
            .probe("::1".parse().unwrap(), 22, Duration::from_millis(50))
            .await;
        assert_eq!(result.state, PortState::Error);
        assert!(result.error.unwrap().contains("IPv4"));
    }
}
