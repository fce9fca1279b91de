//! Target parsing and address lookup

use crate::error::{ScanError, ScanResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// A scan target: a host name or an IP address literal.
///
/// The identifier is fixed at construction; resolution to an address is
/// delegated to the operating system resolver and happens once per session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Target {
    host: String,
}

impl Target {
    pub fn new(host: impl Into<String>) -> ScanResult<Self> {
        let host = host.into().trim().to_string();
        if host.is_empty() {
            return Err(ScanError::InvalidTarget("target cannot be empty".to_string()));
        }
        if host.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(ScanError::InvalidTarget(format!(
                "'{}' is not a single host",
                host
            )));
        }
        Ok(Self { host })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The address literal, if the target is one.
    pub fn ip(&self) -> Option<IpAddr> {
        self.host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse()
            .ok()
    }

    /// Resolve to a single address, preferring IPv4.
    pub async fn resolve(&self) -> ScanResult<IpAddr> {
        if let Some(ip) = self.ip() {
            return Ok(ip);
        }

        let addrs: Vec<IpAddr> = tokio::net::lookup_host((self.host.as_str(), 0))
            .await
            .map_err(|e| {
                ScanError::InvalidTarget(format!("could not resolve '{}': {}", self.host, e))
            })?
            .map(|sa| sa.ip())
            .collect();

        addrs
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| ScanError::InvalidTarget(format!("'{}' has no addresses", self.host)))
    }
}

impl FromStr for Target {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Target::new(s)
    }
}

impl TryFrom<String> for Target {
    type Error = ScanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Target::new(value)
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.host
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host)
    }
}
