//! Scan quality metrics
//!
//! Everything here is a pure function of its inputs: computing metrics twice
//! over the same session gives bit-identical values.

pub mod resource;

pub use resource::{ResourceUsage, SamplingWindow};

use crate::error::{ScanError, ScanResult};
use crate::network::{ProbeResult, Technique};
use crate::scanner::ScanSession;
use crate::top_ports::PORT_HINT_CONFIDENCE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Ground truth to measure detection against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundTruth {
    /// Ports known to be open
    OpenPorts(BTreeSet<u16>),
    /// `(port, service)` pairs known to be served
    Services(BTreeSet<(u16, String)>),
}

impl GroundTruth {
    pub fn open_ports<I: IntoIterator<Item = u16>>(ports: I) -> Self {
        GroundTruth::OpenPorts(ports.into_iter().collect())
    }

    pub fn services<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (u16, S)>,
        S: Into<String>,
    {
        GroundTruth::Services(pairs.into_iter().map(|(p, s)| (p, s.into())).collect())
    }
}

/// Precision, recall and F1 with the underlying counts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Accuracy {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl Accuracy {
    fn from_counts(tp: usize, fp: usize, fn_: usize) -> Self {
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            precision,
            recall,
            f1,
            true_positives: tp,
            false_positives: fp,
            false_negatives: fn_,
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn set_accuracy<T: Ord>(reference: &BTreeSet<T>, detected: &BTreeSet<T>) -> Accuracy {
    let tp = reference.intersection(detected).count();
    Accuracy::from_counts(tp, detected.len() - tp, reference.len() - tp)
}

/// Compare detected results against a ground-truth set.
pub fn accuracy(reference: &GroundTruth, results: &[ProbeResult]) -> Accuracy {
    match reference {
        GroundTruth::OpenPorts(expected) => {
            let detected: BTreeSet<u16> = results
                .iter()
                .filter(|r| r.is_open())
                .map(|r| r.port)
                .collect();
            set_accuracy(expected, &detected)
        }
        GroundTruth::Services(expected) => {
            let detected: BTreeSet<(u16, String)> = results
                .iter()
                .filter(|r| r.is_open())
                .filter_map(|r| r.service.clone().map(|s| (r.port, s)))
                .collect();
            set_accuracy(expected, &detected)
        }
    }
}

/// Ports per second; zero for an empty window.
pub fn speed(ports_scanned: usize, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        ports_scanned as f64 / elapsed_secs
    } else {
        0.0
    }
}

pub fn coverage(open_ports: usize, ports_scanned: usize) -> f64 {
    ratio(open_ports, ports_scanned)
}

/// Distinct identified service names per open port.
pub fn service_diversity(results: &[ProbeResult]) -> f64 {
    let open = results.iter().filter(|r| r.is_open()).count();
    let distinct: BTreeSet<&str> = results
        .iter()
        .filter(|r| is_identified(r))
        .filter_map(|r| r.service.as_deref())
        .collect();
    ratio(distinct.len(), open)
}

/// An open port whose service is backed by more than its port number.
pub fn is_identified(result: &ProbeResult) -> bool {
    result.is_open() && result.service.is_some() && result.confidence > PORT_HINT_CONFIDENCE
}

/// Per-technique weights of the detection-likelihood model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StealthWeights {
    pub tcp_connect: f64,
    pub syn: f64,
    pub udp: f64,
    pub hybrid: f64,
}

impl Default for StealthWeights {
    fn default() -> Self {
        Self {
            tcp_connect: 0.20,
            syn: 0.15,
            udp: 0.10,
            hybrid: 0.20,
        }
    }
}

impl StealthWeights {
    pub fn weight(&self, technique: Technique) -> f64 {
        match technique {
            Technique::TcpConnect => self.tcp_connect,
            Technique::Syn => self.syn,
            Technique::Udp => self.udp,
            Technique::Hybrid => self.hybrid,
        }
    }

    pub fn validate(&self) -> ScanResult<()> {
        for technique in Technique::ALL {
            let w = self.weight(technique);
            if !w.is_finite() || w < 0.0 {
                return Err(ScanError::ConfigError(format!(
                    "stealth weight for {} must be a non-negative number",
                    technique
                )));
            }
        }
        Ok(())
    }
}

/// Detection likelihood in `[0, 1)`: `1 - exp(-w * packets_per_port)`.
/// Higher means more detectable.
pub fn stealthiness(
    technique: Technique,
    packets_sent: u64,
    ports_scanned: usize,
    weights: &StealthWeights,
) -> f64 {
    if ports_scanned == 0 {
        return 0.0;
    }
    let packets_per_port = packets_sent as f64 / ports_scanned as f64;
    1.0 - (-weights.weight(technique) * packets_per_port).exp()
}

/// Metrics attached to a finished session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub speed: f64,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
    pub coverage: f64,
    pub service_diversity: f64,
    pub resource: Option<ResourceUsage>,
    pub stealthiness: f64,
    pub efficiency: Option<f64>,
    pub ports_scanned: usize,
    pub open_ports: usize,
    pub services_identified: usize,
    pub elapsed_secs: f64,
}

/// Everything the metrics depend on
#[derive(Debug, Clone, Copy)]
pub struct MetricsInput<'a> {
    pub technique: Technique,
    pub results: &'a [ProbeResult],
    pub elapsed_secs: f64,
    pub packets_sent: u64,
    pub resource: Option<&'a ResourceUsage>,
}

impl SessionMetrics {
    pub fn compute(
        input: MetricsInput<'_>,
        reference: Option<&GroundTruth>,
        weights: &StealthWeights,
    ) -> Self {
        let ports_scanned = input.results.len();
        let open_ports = input.results.iter().filter(|r| r.is_open()).count();
        let services_identified = input
            .results
            .iter()
            .filter(|r| is_identified(r))
            .count();
        let speed = speed(ports_scanned, input.elapsed_secs);
        let accuracy = reference.map(|r| accuracy(r, input.results));

        Self {
            speed,
            precision: accuracy.map(|a| a.precision),
            recall: accuracy.map(|a| a.recall),
            f1: accuracy.map(|a| a.f1),
            coverage: coverage(open_ports, ports_scanned),
            service_diversity: service_diversity(input.results),
            resource: input.resource.cloned(),
            stealthiness: stealthiness(input.technique, input.packets_sent, ports_scanned, weights),
            efficiency: accuracy.map(|a| a.f1 * speed),
            ports_scanned,
            open_ports,
            services_identified,
            elapsed_secs: input.elapsed_secs,
        }
    }
}

/// Computes metrics for finished sessions, e.g. against a reference chosen
/// after the scan ran.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    weights: StealthWeights,
}

impl MetricsCollector {
    pub fn new(weights: StealthWeights) -> Self {
        Self { weights }
    }

    pub fn evaluate(&self, session: &ScanSession, reference: Option<&GroundTruth>) -> SessionMetrics {
        SessionMetrics::compute(session.metrics_input(), reference, &self.weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::PortState;

    fn open(port: u16) -> ProbeResult {
        ProbeResult::new(port, PortState::Open)
    }

    #[test]
    fn zero_denominators() {
        let acc = accuracy(&GroundTruth::open_ports([]), &[]);
        assert_eq!((acc.precision, acc.recall, acc.f1), (0.0, 0.0, 0.0));
        assert_eq!(speed(10, 0.0), 0.0);
        assert_eq!(coverage(0, 0), 0.0);
        assert_eq!(service_diversity(&[]), 0.0);
    }

    #[test]
    fn service_pairs_must_match_exactly() {
        let reference = GroundTruth::services([(22, "ssh"), (80, "http")]);
        let results = vec![
            open(22).with_service("ssh", 1.0),
            open(80).with_service("nginx", 0.6),
            ProbeResult::new(443, PortState::Closed),
        ];
        let acc = accuracy(&reference, &results);
        assert_eq!(acc.true_positives, 1);
        assert_eq!(acc.false_positives, 1);
        assert_eq!(acc.false_negatives, 1);
    }

    #[test]
    fn stealth_model() {
        let weights = StealthWeights::default();
        let connect = stealthiness(Technique::TcpConnect, 300, 100, &weights);
        let syn = stealthiness(Technique::Syn, 100, 100, &weights);
        assert!((connect - (1.0 - (-0.6f64).exp())).abs() < 1e-12);
        assert!(syn < connect);
        assert_eq!(stealthiness(Technique::Udp, 0, 0, &weights), 0.0);
    }

    #[test]
    fn diversity_counts_distinct_names() {
        let results = vec![
            open(80).with_service("http", 0.8),
            open(8080).with_service("http", 1.0),
            open(22).with_service("ssh", 1.0),
            open(9999),
        ];
        assert_eq!(service_diversity(&results), 0.5);

        // port-number guesses are not identifications
        let hinted = vec![open(80).with_service("http", 0.3), open(22).with_service("ssh", 0.3)];
        assert_eq!(service_diversity(&hinted), 0.0);
    }

    #[test]
    fn no_reference_leaves_accuracy_absent() {
        let results = vec![open(80), ProbeResult::new(81, PortState::Closed)];
        let metrics = SessionMetrics::compute(
            MetricsInput {
                technique: Technique::TcpConnect,
                results: &results,
                elapsed_secs: 1.0,
                packets_sent: 6,
                resource: None,
            },
            None,
            &StealthWeights::default(),
        );
        assert!(metrics.precision.is_none());
        assert!(metrics.efficiency.is_none());
        assert_eq!(metrics.coverage, 0.5);
        let json = serde_json::to_value(&metrics).unwrap();
        assert!(json["f1"].is_null());
    }

    #[test]
    fn port_hints_do_not_count_as_identified() {
        assert!(!is_identified(&open(80).with_service("http", 0.3)));
        assert!(is_identified(&open(80).with_service("http", 0.6)));
        assert!(!is_identified(&ProbeResult::new(80, PortState::Closed).with_service("http", 1.0)));
    }

    #[test]
    fn negative_weights_are_rejected() {
        let weights = StealthWeights {
            udp: -1.0,
            ..StealthWeights::default()
        };
        assert!(weights.validate().is_err());
    }
}
