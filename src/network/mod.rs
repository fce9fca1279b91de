//! Network module: techniques, port states and per-port probers

pub mod packet;
pub mod prober;
pub mod socket;
pub mod syn;

use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Available scanning techniques
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    /// Full TCP three-way handshake
    TcpConnect,
    /// TCP SYN scan (half-open, raw sockets)
    Syn,
    /// UDP datagram probing
    Udp,
    /// TCP connect probing followed by service detection
    Hybrid,
}

impl Technique {
    pub const ALL: [Technique; 4] = [
        Technique::TcpConnect,
        Technique::Syn,
        Technique::Udp,
        Technique::Hybrid,
    ];

    /// Get the name of the technique
    pub fn name(&self) -> &'static str {
        match self {
            Technique::TcpConnect => "tcp_connect",
            Technique::Syn => "syn",
            Technique::Udp => "udp",
            Technique::Hybrid => "hybrid",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Technique::TcpConnect => "TCP connect scan",
            Technique::Syn => "TCP SYN scan",
            Technique::Udp => "UDP scan",
            Technique::Hybrid => "TCP connect scan with service detection",
        }
    }

    /// Check if the technique requires raw sockets
    pub fn requires_raw_socket(&self) -> bool {
        matches!(self, Technique::Syn)
    }

    pub fn is_tcp(&self) -> bool {
        !matches!(self, Technique::Udp)
    }

    /// Whether open ports are handed to the service detector during the scan
    pub fn detects_services(&self) -> bool {
        matches!(self, Technique::Hybrid)
    }

    /// Packets put on the wire for one probe of one port.
    ///
    /// A connect probe costs the full handshake; SYN and UDP send a single
    /// packet.
    pub fn packets_per_probe(&self) -> u64 {
        match self {
            Technique::TcpConnect | Technique::Hybrid => 3,
            Technique::Syn | Technique::Udp => 1,
        }
    }

    /// State recorded when the target stays silent until the timeout.
    pub fn silent_state(&self) -> PortState {
        match self {
            Technique::Udp => PortState::OpenOrFiltered,
            _ => PortState::Filtered,
        }
    }
}

impl std::fmt::Display for Technique {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Technique {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "tcp_connect" | "connect" | "tcp" => Ok(Technique::TcpConnect),
            "syn" => Ok(Technique::Syn),
            "udp" => Ok(Technique::Udp),
            "hybrid" => Ok(Technique::Hybrid),
            other => Err(ScanError::UnknownTechnique(other.to_string())),
        }
    }
}

/// Port state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
    OpenOrFiltered,
    Error,
}

impl PortState {
    pub fn is_open(&self) -> bool {
        matches!(self, PortState::Open)
    }
}

impl std::fmt::Display for PortState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortState::Open => write!(f, "open"),
            PortState::Closed => write!(f, "closed"),
            PortState::Filtered => write!(f, "filtered"),
            PortState::OpenOrFiltered => write!(f, "open|filtered"),
            PortState::Error => write!(f, "error"),
        }
    }
}

/// Outcome of probing one port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub port: u16,
    pub state: PortState,
    pub latency_ms: f64,
    pub service: Option<String>,
    pub version: Option<String>,
    pub banner: Option<String>,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn new(port: u16, state: PortState) -> Self {
        Self {
            port,
            state,
            latency_ms: 0.0,
            service: None,
            version: None,
            banner: None,
            confidence: 0.0,
            error: None,
        }
    }

    /// An `error` entry carrying the failure cause
    pub fn failed(port: u16, cause: impl Into<String>) -> Self {
        let mut result = Self::new(port, PortState::Error);
        result.error = Some(cause.into());
        result
    }

    pub fn with_latency(mut self, latency: std::time::Duration) -> Self {
        self.latency_ms = latency.as_secs_f64() * 1000.0;
        self
    }

    pub fn with_service(mut self, service: impl Into<String>, confidence: f64) -> Self {
        self.service = Some(service.into());
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());
        self
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn technique_names_round_trip() {
        for technique in Technique::ALL {
            assert_eq!(technique.name().parse::<Technique>().unwrap(), technique);
        }
        assert_eq!("TCP-Connect".parse::<Technique>().unwrap(), Technique::TcpConnect);
    }

    #[test]
    fn unknown_technique_is_rejected() {
        assert!(matches!(
            "xmas".parse::<Technique>(),
            Err(ScanError::UnknownTechnique(name)) if name == "xmas"
        ));
    }

    #[test]
    fn silence_maps_per_protocol() {
        assert_eq!(Technique::TcpConnect.silent_state(), PortState::Filtered);
        assert_eq!(Technique::Syn.silent_state(), PortState::Filtered);
        assert_eq!(Technique::Udp.silent_state(), PortState::OpenOrFiltered);
    }

    #[test]
    fn serialized_shape() {
        let result = ProbeResult::new(22, PortState::OpenOrFiltered);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["state"], "open_or_filtered");
        assert!(json.get("error").is_none());
        assert_eq!(serde_json::to_value(Technique::TcpConnect).unwrap(), "tcp_connect");
    }

    #[test]
    fn confidence_is_clamped() {
        let result = ProbeResult::new(80, PortState::Open).with_service("http", 1.7);
        assert_eq!(result.confidence, 1.0);
    }
}
