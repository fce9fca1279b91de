//! Scanner module: session model, per-session context and the scan engine

pub mod context;
pub mod engine;

use crate::metrics::{GroundTruth, MetricsInput, ResourceUsage, SessionMetrics, StealthWeights};
use crate::network::{PortState, ProbeResult, Technique};
use crate::utils::target_parser::Target;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use context::ScanContext;
pub use engine::ScanEngine;

/// Tool name recorded on sessions produced by this crate's engine
pub const ENGINE_TOOL_NAME: &str = "reconscan";

/// How a session ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Completed,
    Cancelled,
}

/// Counters accumulated while results are collected
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Packets put on the wire (estimated per technique)
    pub packets_sent: u64,

    pub probes_completed: u64,

    /// Probes that ended in silence
    pub timeouts: u64,

    /// Probes that ended in a transport error
    pub errors: u64,

    /// Highest number of probes observed in flight at once
    pub peak_in_flight: usize,

    pub average_latency_ms: f64,
}

impl ScanStats {
    pub fn record(&mut self, result: &ProbeResult, technique: Technique) {
        self.packets_sent += technique.packets_per_probe();
        self.probes_completed += 1;
        match result.state {
            PortState::Filtered | PortState::OpenOrFiltered => self.timeouts += 1,
            PortState::Error => self.errors += 1,
            PortState::Open | PortState::Closed => {}
        }
        let n = self.probes_completed as f64;
        self.average_latency_ms += (result.latency_ms - self.average_latency_ms) / n;
    }

    /// Counters for results that were not observed live, e.g. tool output
    pub fn from_results(results: &[ProbeResult], technique: Technique) -> Self {
        let mut stats = Self::default();
        for result in results {
            stats.record(result, technique);
        }
        stats
    }
}

/// Progress event published on the session's progress channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub target: String,
    pub ports_scanned: usize,
    pub total_ports: usize,
    pub percent: f64,
}

impl ScanProgress {
    pub fn new(target: impl Into<String>, ports_scanned: usize, total_ports: usize) -> Self {
        let percent = if total_ports == 0 {
            100.0
        } else {
            ports_scanned as f64 / total_ports as f64 * 100.0
        };
        Self {
            target: target.into(),
            ports_scanned,
            total_ports,
            percent,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.ports_scanned >= self.total_ports
    }
}

/// Raw material for a session, before ordering and metrics are applied
#[derive(Debug, Clone)]
pub struct SessionDraft {
    pub tool: String,
    pub target: Target,
    pub technique: Technique,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub concurrency_limit: usize,
    pub results: Vec<ProbeResult>,
    pub stats: ScanStats,
    pub resource: Option<ResourceUsage>,
}

/// One finished scan invocation.
///
/// Fields are read-only: a session is assembled once by [`ScanSession::finalize`]
/// and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSession {
    id: Uuid,
    tool: String,
    target: Target,
    technique: Technique,
    state: SessionState,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    concurrency_limit: usize,
    results: Vec<ProbeResult>,
    stats: ScanStats,
    metrics: SessionMetrics,
}

impl ScanSession {
    /// Order results by port (first entry wins on duplicates) and attach metrics.
    pub fn finalize(
        draft: SessionDraft,
        reference: Option<&GroundTruth>,
        weights: &StealthWeights,
    ) -> Self {
        let mut results = draft.results;
        results.sort_by_key(|r| r.port);
        results.dedup_by_key(|r| r.port);

        let elapsed_secs = elapsed_secs(draft.started_at, draft.finished_at);
        let metrics = SessionMetrics::compute(
            MetricsInput {
                technique: draft.technique,
                results: &results,
                elapsed_secs,
                packets_sent: draft.stats.packets_sent,
                resource: draft.resource.as_ref(),
            },
            reference,
            weights,
        );

        Self {
            id: Uuid::new_v4(),
            tool: draft.tool,
            target: draft.target,
            technique: draft.technique,
            state: draft.state,
            started_at: draft.started_at,
            finished_at: draft.finished_at,
            concurrency_limit: draft.concurrency_limit,
            results,
            stats: draft.stats,
            metrics,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn technique(&self) -> Technique {
        self.technique
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == SessionState::Cancelled
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Results ordered by port number
    pub fn results(&self) -> &[ProbeResult] {
        &self.results
    }

    pub fn result_for(&self, port: u16) -> Option<&ProbeResult> {
        self.results
            .binary_search_by_key(&port, |r| r.port)
            .ok()
            .map(|i| &self.results[i])
    }

    pub fn open_ports(&self) -> Vec<u16> {
        self.results
            .iter()
            .filter(|r| r.is_open())
            .map(|r| r.port)
            .collect()
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    pub fn elapsed_secs(&self) -> f64 {
        elapsed_secs(self.started_at, self.finished_at)
    }

    /// Inputs for recomputing metrics, e.g. against another reference
    pub fn metrics_input(&self) -> MetricsInput<'_> {
        MetricsInput {
            technique: self.technique,
            results: &self.results,
            elapsed_secs: self.elapsed_secs(),
            packets_sent: self.stats.packets_sent,
            resource: self.metrics.resource.as_ref(),
        }
    }
}

fn elapsed_secs(started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> f64 {
    let micros = (finished_at - started_at).num_microseconds().unwrap_or(0);
    micros.max(0) as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn draft(results: Vec<ProbeResult>) -> SessionDraft {
        let started_at = Utc::now();
        SessionDraft {
            tool: ENGINE_TOOL_NAME.to_string(),
            target: Target::new("127.0.0.1").unwrap(),
            technique: Technique::TcpConnect,
            state: SessionState::Completed,
            started_at,
            finished_at: started_at + Duration::milliseconds(500),
            concurrency_limit: 10,
            stats: ScanStats::from_results(&results, Technique::TcpConnect),
            results,
            resource: None,
        }
    }

    #[test]
    fn finalize_orders_and_deduplicates() {
        let results = vec![
            ProbeResult::new(443, PortState::Open),
            ProbeResult::new(22, PortState::Closed),
            ProbeResult::new(443, PortState::Closed),
        ];
        let session = ScanSession::finalize(draft(results), None, &StealthWeights::default());
        let ports: Vec<u16> = session.results().iter().map(|r| r.port).collect();
        assert_eq!(ports, vec![22, 443]);
        assert_eq!(session.result_for(443).unwrap().state, PortState::Open);
        assert_eq!(session.elapsed_secs(), 0.5);
    }

    #[test]
    fn stats_running_average() {
        let mut stats = ScanStats::default();
        let mut a = ProbeResult::new(1, PortState::Open);
        a.latency_ms = 10.0;
        let mut b = ProbeResult::new(2, PortState::Filtered);
        b.latency_ms = 30.0;
        stats.record(&a, Technique::Syn);
        stats.record(&b, Technique::Syn);
        assert_eq!(stats.average_latency_ms, 20.0);
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.packets_sent, 2);
    }

    #[test]
    fn json_shape_has_core_fields() {
        let session = ScanSession::finalize(
            draft(vec![ProbeResult::new(80, PortState::Open)]),
            None,
            &StealthWeights::default(),
        );
        let json = serde_json::to_value(&session).unwrap();
        for key in ["target", "technique", "started_at", "finished_at", "results", "metrics"] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(json["state"], "completed");
        assert_eq!(json["results"][0]["port"], 80);
    }

    #[test]
    fn progress_percent() {
        assert_eq!(ScanProgress::new("h", 25, 100).percent, 25.0);
        assert!(ScanProgress::new("h", 0, 0).is_complete());
    }
}
