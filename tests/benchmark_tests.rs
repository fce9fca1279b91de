//! Benchmark orchestration with scripted tool adapters

use async_trait::async_trait;
use reconscan::{
    benchmark::{BenchmarkOrchestrator, ToolAdapter, ToolOutput},
    config::ScanConfig,
    metrics::{GroundTruth, ResourceUsage},
    network::{PortState, ProbeResult, Technique},
    report::{ReportKind, Verdict},
    scanner::ScanContext,
    utils::{port_spec::PortSpec, target_parser::Target},
    ScanError, ScanResult,
};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Replays a canned result set
struct Scripted {
    name: &'static str,
    open: Vec<u16>,
    elapsed_secs: f64,
    peak_memory_mib: f64,
}

impl Scripted {
    fn new(name: &'static str, open: &[u16], elapsed_secs: f64, peak_memory_mib: f64) -> Arc<dyn ToolAdapter> {
        Arc::new(Self {
            name,
            open: open.to_vec(),
            elapsed_secs,
            peak_memory_mib,
        })
    }
}

#[async_trait]
impl ToolAdapter for Scripted {
    async fn run(&self, _target: &Target, _ports: &PortSpec) -> ScanResult<ToolOutput> {
        let mut results: Vec<ProbeResult> = self
            .open
            .iter()
            .map(|&p| ProbeResult::new(p, PortState::Open))
            .collect();
        // stray output the orchestrator must drop
        results.push(ProbeResult::new(9999, PortState::Open));
        Ok(ToolOutput {
            results,
            elapsed_secs: self.elapsed_secs,
            resource: Some(ResourceUsage {
                peak_memory_mib: self.peak_memory_mib,
                avg_memory_mib: self.peak_memory_mib,
                avg_cpu_percent: 1.0,
                samples: 3,
            }),
            ..ToolOutput::default()
        })
    }

    fn name(&self) -> &str {
        self.name
    }

    fn technique(&self) -> Technique {
        Technique::TcpConnect
    }
}

struct NotInstalled;

#[async_trait]
impl ToolAdapter for NotInstalled {
    async fn run(&self, _target: &Target, _ports: &PortSpec) -> ScanResult<ToolOutput> {
        Err(ScanError::tool_unavailable("ghostscan", "not found in PATH"))
    }

    fn name(&self) -> &str {
        "ghostscan"
    }

    fn technique(&self) -> Technique {
        Technique::Syn
    }
}

fn target() -> Target {
    Target::new("192.0.2.30").unwrap()
}

fn ports() -> PortSpec {
    "22,80,443,8080".parse().unwrap()
}

fn tools(entries: &[(&str, f64)]) -> Vec<String> {
    entries.iter().map(|(t, _)| t.to_string()).collect()
}

#[tokio::test]
async fn failing_tool_is_excluded_and_rankings_hold() {
    let adapters = vec![
        Scripted::new("alpha", &[22, 80], 1.0, 10.0),
        Scripted::new("beta", &[22, 80, 443], 2.0, 5.0),
        Scripted::new("gamma", &[22], 0.5, 20.0),
        Arc::new(NotInstalled) as Arc<dyn ToolAdapter>,
    ];
    let outcome = BenchmarkOrchestrator::from_adapters(target(), ports(), adapters)
        .run()
        .await;

    assert_eq!(outcome.sessions.len(), 3);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("ghostscan"));
    assert_eq!(outcome.report.warnings(), outcome.warnings.as_slice());

    // consensus: open in at least two of three runs
    assert_eq!(outcome.reference, GroundTruth::open_ports([22, 80]));

    for session in &outcome.sessions {
        let listed: Vec<u16> = session.results().iter().map(|r| r.port).collect();
        assert_eq!(listed, vec![22, 80, 443, 8080]);
    }

    let speed: Vec<(&str, f64)> = outcome.rankings.speed.iter().map(|e| (e.tool.as_str(), e.value)).collect();
    assert_eq!(tools(&speed), vec!["gamma", "alpha", "beta"]);
    assert_eq!(speed[0].1, 8.0);

    let accuracy: Vec<(&str, f64)> =
        outcome.rankings.accuracy.iter().map(|e| (e.tool.as_str(), e.value)).collect();
    assert_eq!(tools(&accuracy), vec!["alpha", "beta", "gamma"]);
    assert_eq!(accuracy[0].1, 1.0);

    let efficiency: Vec<(&str, f64)> =
        outcome.rankings.efficiency.iter().map(|e| (e.tool.as_str(), e.value)).collect();
    assert_eq!(tools(&efficiency), vec!["gamma", "alpha", "beta"]);

    assert_eq!(outcome.report.kind(), ReportKind::Benchmark);
    assert_eq!(outcome.winner(), Some("gamma"));
}

#[tokio::test]
async fn efficiency_ties_go_to_lower_memory() {
    let adapters = vec![
        Scripted::new("heavy", &[22, 80], 1.0, 64.0),
        Scripted::new("light", &[22, 80], 1.0, 8.0),
    ];
    let outcome = BenchmarkOrchestrator::from_adapters(target(), ports(), adapters)
        .run()
        .await;
    assert_eq!(
        outcome.report.verdict(),
        &Verdict::Winner {
            tool: "light".to_string()
        }
    );
}

#[tokio::test]
async fn explicit_reference_overrides_consensus() {
    let adapters = vec![
        Scripted::new("alpha", &[22, 80], 1.0, 10.0),
        Scripted::new("beta", &[22, 80, 443], 1.0, 10.0),
    ];
    let outcome = BenchmarkOrchestrator::from_adapters(target(), ports(), adapters)
        .with_reference(Some(GroundTruth::open_ports([22, 80, 443])))
        .run()
        .await;
    let beta = outcome.sessions.iter().find(|s| s.tool() == "beta").unwrap();
    assert_eq!(beta.metrics().f1, Some(1.0));
    assert_eq!(outcome.winner(), Some("beta"));
}

#[tokio::test]
async fn nothing_usable_means_no_results() {
    let outcome = BenchmarkOrchestrator::from_adapters(
        target(),
        ports(),
        vec![Arc::new(NotInstalled) as Arc<dyn ToolAdapter>],
    )
    .concurrent(true)
    .run()
    .await;
    assert!(outcome.sessions.is_empty());
    assert_eq!(outcome.report.verdict(), &Verdict::NoResults);
    assert_eq!(outcome.winner(), None);
}

#[tokio::test]
async fn engine_takes_part_alongside_tools() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move { while listener.accept().await.is_ok() {} });

    let config = ScanConfig::new(Target::new("127.0.0.1").unwrap(), PortSpec::list([port]).unwrap())
        .with_timeout(500);
    let outcome = BenchmarkOrchestrator::new(config)
        .unwrap()
        .with_adapter(Arc::new(NotInstalled))
        .run()
        .await;

    assert_eq!(outcome.sessions.len(), 1);
    assert_eq!(outcome.sessions[0].tool(), "reconscan");
    assert_eq!(outcome.sessions[0].open_ports(), vec![port]);
    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.winner(), Some("reconscan"));
}

#[tokio::test]
async fn cancelled_engine_run_is_excluded() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move { while listener.accept().await.is_ok() {} });

    let config = ScanConfig::new(Target::new("127.0.0.1").unwrap(), PortSpec::list([port]).unwrap())
        .with_timeout(500);
    let context = ScanContext::new();
    context.cancel();
    let outcome = BenchmarkOrchestrator::with_context(config, context)
        .unwrap()
        .with_adapter(Scripted::new("alpha", &[port], 1.0, 10.0))
        .run()
        .await;

    assert_eq!(outcome.sessions.len(), 1);
    assert_eq!(outcome.sessions[0].tool(), "alpha");
    assert!(outcome.sessions.iter().all(|s| !s.is_cancelled()));
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("reconscan"));
    assert!(outcome.warnings[0].contains("cancelled"));
    assert_eq!(outcome.winner(), Some("alpha"));
}

#[tokio::test]
async fn engine_progress_reaches_the_callers_subscriber() {
    let config = ScanConfig::new(Target::new("127.0.0.1").unwrap(), PortSpec::range(1, 20).unwrap())
        .with_timeout(200);
    let context = ScanContext::new();
    let mut progress = context.subscribe();
    let outcome = BenchmarkOrchestrator::with_context(config, context)
        .unwrap()
        .run()
        .await;

    assert_eq!(outcome.sessions.len(), 1);
    let mut events = 0;
    while progress.try_recv().is_ok() {
        events += 1;
    }
    assert!(events > 0);
}
