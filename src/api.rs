//! Entry points for library users

use crate::benchmark::{BenchmarkOrchestrator, BenchmarkOutcome, ToolAdapter};
use crate::config::ScanConfig;
use crate::error::ScanResult;
use crate::hybrid::{HybridComparator, HybridOutcome};
use crate::metrics::GroundTruth;
use crate::network::Technique;
use crate::scanner::{ScanContext, ScanEngine, ScanSession};
use crate::utils::port_spec::PortSpec;
use crate::utils::target_parser::Target;
use std::sync::Arc;

/// Scan one target with one technique.
///
/// Configuration problems are returned before any probe is sent.
pub async fn scan(
    target: Target,
    ports: PortSpec,
    technique: Technique,
    concurrency: usize,
    timeout_ms: u64,
    reference: Option<GroundTruth>,
) -> ScanResult<ScanSession> {
    let mut config = ScanConfig::new(target, ports)
        .with_technique(technique)
        .with_concurrency(concurrency)
        .with_timeout(timeout_ms);
    if let Some(reference) = reference {
        config = config.with_reference(reference);
    }
    ScanEngine::new(config)?.scan().await
}

/// Run the engine and the given tools against the same target and ports.
pub async fn compare_benchmark(
    target: Target,
    ports: PortSpec,
    adapters: Vec<Arc<dyn ToolAdapter>>,
) -> ScanResult<BenchmarkOutcome> {
    let orchestrator = adapters.into_iter().fold(
        BenchmarkOrchestrator::new(ScanConfig::new(target, ports))?,
        |orchestrator, adapter| orchestrator.with_adapter(adapter),
    );
    Ok(orchestrator.run().await)
}

/// Compare tcp_connect probing alone against probing plus service detection.
pub async fn compare_hybrid(
    target: Target,
    ports: PortSpec,
    overhead_threshold_pct: f64,
) -> ScanResult<HybridOutcome> {
    HybridComparator::new(overhead_threshold_pct)
        .run(&ScanConfig::new(target, ports), &ScanContext::new())
        .await
}
