//! reconscan - concurrent port scanning with service detection,
//! scan-quality metrics and benchmarking against other scanners.
//!
//! A scan is described by a [`ScanConfig`] and executed by a [`ScanEngine`],
//! which produces an immutable [`ScanSession`]. Sessions can be compared
//! across tools ([`benchmark`]) or between plain probing and probing plus
//! service detection ([`hybrid`]).

pub mod api;
pub mod benchmark;
pub mod config;
pub mod error;
pub mod hybrid;
pub mod integration;
pub mod metrics;
pub mod network;
pub mod report;
pub mod scanner;
pub mod service;
pub mod top_ports;
pub mod utils;

// Re-export commonly used types
pub use api::{compare_benchmark, compare_hybrid, scan};
pub use config::{ScanConfig, Settings};
pub use error::{ProbeError, ScanError, ScanResult};
pub use metrics::{GroundTruth, SessionMetrics};
pub use network::{PortState, ProbeResult, Technique};
pub use report::{ComparisonReport, Verdict};
pub use scanner::{ScanContext, ScanEngine, ScanSession};
pub use utils::{port_spec::PortSpec, target_parser::Target};

pub type Result<T> = std::result::Result<T, ScanError>;
