//! Configuration for scans, metrics, hybrid comparison and benchmarking

use crate::error::{ScanError, ScanResult};
use crate::metrics::{GroundTruth, StealthWeights};
use crate::network::Technique;
use crate::service::DetectorConfig;
use crate::utils::port_spec::PortSpec;
use crate::utils::target_parser::Target;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONCURRENCY: usize = 50;
pub const DEFAULT_TIMEOUT_MS: u64 = 1500;
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 250;
pub const DEFAULT_OVERHEAD_THRESHOLD_PCT: f64 = 25.0;
pub const CONFIG_FILE_NAME: &str = ".reconscan.toml";

/// Configuration for one scan session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Host to scan
    pub target: Target,

    /// Ports to probe
    pub ports: PortSpec,

    pub technique: Technique,

    /// Maximum number of probes in flight
    pub concurrency: usize,

    /// Per-probe timeout in milliseconds
    pub timeout_ms: u64,

    /// Probe the common-ports list before the rest
    pub prioritize_common_ports: bool,

    /// Attach registered service names to open ports
    pub port_hints: bool,

    /// Minimum spacing between progress events
    pub progress_interval_ms: u64,

    /// How long in-flight probes may finish after cancellation
    pub cancel_grace_ms: u64,

    /// Resource sampler period
    pub sample_interval_ms: u64,

    pub detector: DetectorConfig,

    pub stealth_weights: StealthWeights,

    /// Ground truth for accuracy metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<GroundTruth>,
}

impl ScanConfig {
    /// Create a configuration with default settings
    pub fn new(target: Target, ports: PortSpec) -> Self {
        ScanSettings::default().to_config(target, ports)
    }

    pub fn with_ports(mut self, ports: PortSpec) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_technique(mut self, technique: Technique) -> Self {
        self.technique = technique;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the per-probe timeout in milliseconds
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_reference(mut self, reference: GroundTruth) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_prioritization(mut self, enabled: bool) -> Self {
        self.prioritize_common_ports = enabled;
        self
    }

    pub fn with_port_hints(mut self, enabled: bool) -> Self {
        self.port_hints = enabled;
        self
    }

    pub fn with_progress_interval(mut self, interval_ms: u64) -> Self {
        self.progress_interval_ms = interval_ms;
        self
    }

    pub fn with_detector(mut self, detector: DetectorConfig) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_stealth_weights(mut self, weights: StealthWeights) -> Self {
        self.stealth_weights = weights;
        self
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ScanResult<()> {
        if self.concurrency == 0 {
            return Err(ScanError::ConfigError(
                "concurrency limit must be greater than 0".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ScanError::ConfigError(
                "probe timeout must be greater than 0".to_string(),
            ));
        }
        if self.ports.is_empty() {
            return Err(ScanError::InvalidPortRange("no ports specified".to_string()));
        }
        self.detector.validate()?;
        self.stealth_weights.validate()?;
        Ok(())
    }
}

/// `[scan]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub technique: Technique,
    pub concurrency: usize,
    pub timeout_ms: u64,
    pub prioritize_common_ports: bool,
    pub port_hints: bool,
    pub progress_interval_ms: u64,
    pub cancel_grace_ms: u64,
    pub detector: DetectorConfig,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            technique: Technique::TcpConnect,
            concurrency: DEFAULT_CONCURRENCY,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            prioritize_common_ports: true,
            port_hints: true,
            progress_interval_ms: 100,
            cancel_grace_ms: DEFAULT_CANCEL_GRACE_MS,
            detector: DetectorConfig::default(),
        }
    }
}

impl ScanSettings {
    fn to_config(&self, target: Target, ports: PortSpec) -> ScanConfig {
        let metrics = MetricsSettings::default();
        ScanConfig {
            target,
            ports,
            technique: self.technique,
            concurrency: self.concurrency,
            timeout_ms: self.timeout_ms,
            prioritize_common_ports: self.prioritize_common_ports,
            port_hints: self.port_hints,
            progress_interval_ms: self.progress_interval_ms,
            cancel_grace_ms: self.cancel_grace_ms,
            sample_interval_ms: metrics.sample_interval_ms,
            detector: self.detector.clone(),
            stealth_weights: metrics.stealth_weights,
            reference: None,
        }
    }
}

/// `[metrics]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub stealth_weights: StealthWeights,
    pub sample_interval_ms: u64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            stealth_weights: StealthWeights::default(),
            sample_interval_ms: 100,
        }
    }
}

/// `[hybrid]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridSettings {
    /// Maximum time overhead (percent) for a hybrid win
    pub overhead_threshold_pct: f64,
    /// Run both configurations at the same time
    pub parallel: bool,
}

impl Default for HybridSettings {
    fn default() -> Self {
        Self {
            overhead_threshold_pct: DEFAULT_OVERHEAD_THRESHOLD_PCT,
            parallel: false,
        }
    }
}

/// `[benchmark]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkSettings {
    /// Run tools concurrently instead of one after another
    pub concurrent: bool,
    pub nmap_path: PathBuf,
    pub masscan_path: PathBuf,
    /// Packets per second handed to masscan
    pub masscan_rate: u32,
    /// Upper bound for one external tool run
    pub tool_timeout_secs: u64,
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        Self {
            concurrent: false,
            nmap_path: PathBuf::from("nmap"),
            masscan_path: PathBuf::from("masscan"),
            masscan_rate: 1000,
            tool_timeout_secs: 300,
        }
    }
}

/// Contents of the settings file; every field has a default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scan: ScanSettings,
    pub metrics: MetricsSettings,
    pub hybrid: HybridSettings,
    pub benchmark: BenchmarkSettings,
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ScanResult<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ScanError::ConfigError(format!("Failed to read config file: {}", e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ScanResult<Self> {
        toml::from_str(content)
            .map_err(|e| ScanError::ConfigError(format!("Failed to parse TOML: {}", e)))
    }

    /// `~/.reconscan.toml`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_FILE_NAME)
    }

    /// Load from the default location, falling back to built-in defaults.
    pub fn load_default() -> Self {
        let path = Self::default_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::from_toml_file(&path) {
            Ok(settings) => {
                log::info!("Loaded config from {}", path.display());
                settings
            }
            Err(e) => {
                log::warn!("Ignoring {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Build a scan configuration for one target from these settings.
    pub fn scan_config(&self, target: Target, ports: PortSpec) -> ScanConfig {
        let mut config = self.scan.to_config(target, ports);
        config.stealth_weights = self.metrics.stealth_weights.clone();
        config.sample_interval_ms = self.metrics.sample_interval_ms;
        config
    }
}
