//! Port specification parsing and validation

use crate::error::{ScanError, ScanResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MIN_PORT: u32 = 1;
pub const MAX_PORT: u32 = 65535;

/// A validated, de-duplicated set of ports.
///
/// Built from an explicit list or a numeric range; ports are stored in
/// ascending order and every value lies in `1..=65535`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u32>", into = "Vec<u16>")]
pub struct PortSpec {
    ports: Vec<u16>,
}

impl PortSpec {
    /// Build from an explicit list. Duplicates are removed; zero or
    /// out-of-range values are rejected.
    pub fn list<I>(ports: I) -> ScanResult<Self>
    where
        I: IntoIterator,
        I::Item: Into<u32>,
    {
        let mut validated = Vec::new();
        for port in ports {
            validated.push(check_port(port.into())?);
        }
        if validated.is_empty() {
            return Err(ScanError::InvalidPortRange("no ports specified".to_string()));
        }
        validated.sort_unstable();
        validated.dedup();
        Ok(Self { ports: validated })
    }

    /// Build from an inclusive numeric range.
    pub fn range(start: u32, end: u32) -> ScanResult<Self> {
        let start = check_port(start)?;
        let end = check_port(end)?;
        if start > end {
            return Err(ScanError::InvalidPortRange(format!(
                "range start {} is greater than end {}",
                start, end
            )));
        }
        Ok(Self {
            ports: (start..=end).collect(),
        })
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn contains(&self, port: u16) -> bool {
        self.ports.binary_search(&port).is_ok()
    }
}

fn check_port(port: u32) -> ScanResult<u16> {
    if (MIN_PORT..=MAX_PORT).contains(&port) {
        Ok(port as u16)
    } else {
        Err(ScanError::InvalidPortRange(format!(
            "port {} outside {}-{}",
            port, MIN_PORT, MAX_PORT
        )))
    }
}

impl FromStr for PortSpec {
    type Err = ScanError;

    /// Parse `"22,80,8000-8100"` style specifications.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut ports: Vec<u32> = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if let Some((start, end)) = part.split_once('-') {
                let start = parse_number(start)?;
                let end = parse_number(end)?;
                ports.extend(PortSpec::range(start, end)?.ports.iter().map(|&p| p as u32));
            } else {
                ports.push(parse_number(part)?);
            }
        }
        PortSpec::list(ports)
    }
}

fn parse_number(s: &str) -> ScanResult<u32> {
    s.trim()
        .parse::<u32>()
        .map_err(|_| ScanError::InvalidPortRange(format!("'{}' is not a port number", s.trim())))
}

impl TryFrom<Vec<u32>> for PortSpec {
    type Error = ScanError;

    fn try_from(ports: Vec<u32>) -> Result<Self, Self::Error> {
        PortSpec::list(ports)
    }
}

impl From<PortSpec> for Vec<u16> {
    fn from(spec: PortSpec) -> Self {
        spec.ports
    }
}

impl fmt::Display for PortSpec {
    /// Compact form with consecutive runs collapsed, e.g. `22,80-82`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        let mut iter = self.ports.iter().copied().peekable();
        while let Some(start) = iter.next() {
            let mut end = start;
            while let Some(&next) = iter.peek() {
                if next == end.wrapping_add(1) && next > end {
                    end = next;
                    iter.next();
                } else {
                    break;
                }
            }
            if start == end {
                parts.push(start.to_string());
            } else {
                parts.push(format!("{}-{}", start, end));
            }
        }
        write!(f, "{}", parts.join(","))
    }
}
