//! Benchmark orchestration: the engine and external tools against one target

pub mod adapters;

pub use adapters::{EngineAdapter, MasscanAdapter, NmapAdapter, NmapPorts, ToolAdapter, ToolOutput};

use crate::config::ScanConfig;
use crate::error::ScanResult;
use crate::metrics::{GroundTruth, StealthWeights};
use crate::network::{PortState, ProbeResult};
use crate::report::{ComparisonReport, ReportKind, SessionRef, Verdict};
use crate::scanner::{ScanContext, ScanSession, ScanStats, SessionDraft, SessionState};
use crate::utils::port_spec::PortSpec;
use crate::utils::target_parser::Target;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// One tool's position in a ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    pub tool: String,
    pub value: f64,
}

/// Three independent orderings, best first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rankings {
    pub speed: Vec<RankEntry>,
    pub accuracy: Vec<RankEntry>,
    pub efficiency: Vec<RankEntry>,
}

impl Rankings {
    pub fn from_sessions(sessions: &[ScanSession]) -> Self {
        let rank = |value: fn(&ScanSession) -> f64| {
            let mut entries: Vec<RankEntry> = sessions
                .iter()
                .map(|s| RankEntry {
                    tool: s.tool().to_string(),
                    value: value(s),
                })
                .collect();
            entries.sort_by(|a, b| b.value.total_cmp(&a.value));
            entries
        };
        Self {
            speed: rank(|s| s.metrics().speed),
            accuracy: rank(|s| s.metrics().f1.unwrap_or(0.0)),
            efficiency: rank(efficiency),
        }
    }
}

/// Everything a benchmark run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkOutcome {
    pub sessions: Vec<ScanSession>,
    pub rankings: Rankings,
    pub reference: GroundTruth,
    pub report: ComparisonReport,
    pub warnings: Vec<String>,
}

impl BenchmarkOutcome {
    pub fn winner(&self) -> Option<&str> {
        match self.report.verdict() {
            Verdict::Winner { tool } => Some(tool),
            _ => None,
        }
    }
}

/// Runs every participant against the same target and port set
pub struct BenchmarkOrchestrator {
    target: Target,
    ports: PortSpec,
    reference: Option<GroundTruth>,
    weights: StealthWeights,
    adapters: Vec<Arc<dyn ToolAdapter>>,
    concurrent: bool,
}

impl BenchmarkOrchestrator {
    /// The engine configured by `base` always takes part.
    pub fn new(base: ScanConfig) -> ScanResult<Self> {
        Self::with_context(base, ScanContext::new())
    }

    pub fn with_context(base: ScanConfig, context: ScanContext) -> ScanResult<Self> {
        base.validate()?;
        let engine = EngineAdapter::new(base.clone()).with_context(context);
        Ok(Self {
            target: base.target,
            ports: base.ports,
            reference: base.reference,
            weights: base.stealth_weights,
            adapters: vec![Arc::new(engine)],
            concurrent: false,
        })
    }

    /// Only the given adapters take part; the engine is not added.
    pub fn from_adapters(
        target: Target,
        ports: PortSpec,
        adapters: Vec<Arc<dyn ToolAdapter>>,
    ) -> Self {
        Self {
            target,
            ports,
            reference: None,
            weights: StealthWeights::default(),
            adapters,
            concurrent: false,
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ToolAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn with_reference(mut self, reference: Option<GroundTruth>) -> Self {
        self.reference = reference;
        self
    }

    pub fn with_stealth_weights(mut self, weights: StealthWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Run the participants at the same time; each keeps its own sampling window
    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn participants(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    pub async fn run(&self) -> BenchmarkOutcome {
        log::info!(
            "Benchmarking {} on {} ({} ports, {} participants)",
            self.participants().join(", "),
            self.target,
            self.ports.len(),
            self.adapters.len()
        );

        let runs: Vec<(DateTime<Utc>, ScanResult<ToolOutput>)> = if self.concurrent {
            join_all(self.adapters.iter().map(|adapter| self.run_one(adapter.as_ref()))).await
        } else {
            let mut runs = Vec::with_capacity(self.adapters.len());
            for adapter in &self.adapters {
                runs.push(self.run_one(adapter.as_ref()).await);
            }
            runs
        };

        let mut warnings = Vec::new();
        let mut drafts = Vec::new();
        for (adapter, (started_at, outcome)) in self.adapters.iter().zip(runs) {
            match outcome {
                Ok(output) if output.state == SessionState::Cancelled => {
                    log::warn!("Skipping {} in benchmark: run was cancelled", adapter.name());
                    warnings.push(format!(
                        "{} excluded: cancelled after {} ports",
                        adapter.name(),
                        output.results.len()
                    ));
                }
                Ok(output) => drafts.push(self.draft(adapter.as_ref(), started_at, output)),
                Err(e) => {
                    log::warn!("Skipping {} in benchmark: {}", adapter.name(), e);
                    warnings.push(format!("{} excluded: {}", adapter.name(), e));
                }
            }
        }

        let reference = self
            .reference
            .clone()
            .unwrap_or_else(|| consensus_reference(&drafts));
        let sessions: Vec<ScanSession> = drafts
            .into_iter()
            .map(|draft| ScanSession::finalize(draft, Some(&reference), &self.weights))
            .collect();

        let rankings = Rankings::from_sessions(&sessions);
        let verdict = match winner(&sessions) {
            Some(session) => Verdict::Winner {
                tool: session.tool().to_string(),
            },
            None => Verdict::NoResults,
        };
        log::info!("Benchmark of {} finished: {}", self.target, verdict);

        let report = ComparisonReport::new(
            ReportKind::Benchmark,
            sessions.iter().map(SessionRef::from).collect(),
            deltas(&sessions),
            verdict,
            warnings.clone(),
        );

        BenchmarkOutcome {
            sessions,
            rankings,
            reference,
            report,
            warnings,
        }
    }

    async fn run_one(&self, adapter: &dyn ToolAdapter) -> (DateTime<Utc>, ScanResult<ToolOutput>) {
        let started_at = Utc::now();
        log::debug!("benchmark participant {} starting", adapter.name());
        (started_at, adapter.run(&self.target, &self.ports).await)
    }

    fn draft(
        &self,
        adapter: &dyn ToolAdapter,
        started_at: DateTime<Utc>,
        output: ToolOutput,
    ) -> SessionDraft {
        let technique = adapter.technique();
        let results = normalize(
            output.results,
            &self.ports,
            output.unlisted_state.unwrap_or(PortState::Closed),
        );
        let stats = output
            .stats
            .unwrap_or_else(|| ScanStats::from_results(&results, technique));
        let elapsed = chrono::Duration::microseconds((output.elapsed_secs.max(0.0) * 1e6) as i64);
        SessionDraft {
            tool: adapter.name().to_string(),
            target: self.target.clone(),
            technique,
            state: SessionState::Completed,
            started_at,
            finished_at: started_at + elapsed,
            concurrency_limit: stats.peak_in_flight,
            results,
            stats,
            resource: output.resource,
        }
    }
}

/// One entry per requested port: duplicates and unrequested ports are
/// dropped, requested ports the tool never reported get `unlisted`.
pub fn normalize(
    results: Vec<ProbeResult>,
    requested: &PortSpec,
    unlisted: PortState,
) -> Vec<ProbeResult> {
    let mut by_port: BTreeMap<u16, ProbeResult> = BTreeMap::new();
    for result in results {
        if requested.contains(result.port) {
            by_port.entry(result.port).or_insert(result);
        }
    }
    for &port in requested.ports() {
        by_port
            .entry(port)
            .or_insert_with(|| ProbeResult::new(port, unlisted));
    }
    by_port.into_values().collect()
}

/// Ports reported open by at least half of the runs
pub fn consensus_reference(drafts: &[SessionDraft]) -> GroundTruth {
    let mut votes: HashMap<u16, usize> = HashMap::new();
    for draft in drafts {
        for result in draft.results.iter().filter(|r| r.is_open()) {
            *votes.entry(result.port).or_default() += 1;
        }
    }
    let runs = drafts.len();
    GroundTruth::open_ports(
        votes
            .into_iter()
            .filter(|&(_, count)| count * 2 >= runs)
            .map(|(port, _)| port),
    )
}

fn efficiency(session: &ScanSession) -> f64 {
    session.metrics().efficiency.unwrap_or(0.0)
}

fn peak_memory(session: &ScanSession) -> f64 {
    session
        .metrics()
        .resource
        .as_ref()
        .map_or(f64::INFINITY, |r| r.peak_memory_mib)
}

/// Highest efficiency, lower peak memory on ties
fn winner(sessions: &[ScanSession]) -> Option<&ScanSession> {
    sessions.iter().min_by(|a, b| {
        efficiency(b)
            .total_cmp(&efficiency(a))
            .then_with(|| peak_memory(a).total_cmp(&peak_memory(b)))
    })
}

fn deltas(sessions: &[ScanSession]) -> BTreeMap<String, f64> {
    let mut deltas = BTreeMap::new();
    for session in sessions {
        let metrics = session.metrics();
        let tool = session.tool();
        deltas.insert(format!("{}.speed", tool), metrics.speed);
        deltas.insert(format!("{}.f1", tool), metrics.f1.unwrap_or(0.0));
        deltas.insert(format!("{}.efficiency", tool), efficiency(session));
        if let Some(resource) = &metrics.resource {
            deltas.insert(format!("{}.peak_memory_mib", tool), resource.peak_memory_mib);
        }
    }
    deltas
}
