//! Metric values on hand-built sessions

use chrono::{Duration, Utc};
use reconscan::{
    metrics::{accuracy, GroundTruth, MetricsCollector, StealthWeights},
    network::{PortState, ProbeResult, Technique},
    scanner::{ScanSession, ScanStats, SessionDraft, SessionState, ENGINE_TOOL_NAME},
    utils::target_parser::Target,
};

fn session(results: Vec<ProbeResult>, elapsed_ms: i64, reference: Option<&GroundTruth>) -> ScanSession {
    let started_at = Utc::now();
    ScanSession::finalize(
        SessionDraft {
            tool: ENGINE_TOOL_NAME.to_string(),
            target: Target::new("192.0.2.10").unwrap(),
            technique: Technique::TcpConnect,
            state: SessionState::Completed,
            started_at,
            finished_at: started_at + Duration::milliseconds(elapsed_ms),
            concurrency_limit: 50,
            stats: ScanStats::from_results(&results, Technique::TcpConnect),
            results,
            resource: None,
        },
        reference,
        &StealthWeights::default(),
    )
}

#[test]
fn half_right_detection_scores_one_half() {
    let reference = GroundTruth::open_ports([80, 443]);
    let results = vec![
        ProbeResult::new(80, PortState::Open),
        ProbeResult::new(443, PortState::Closed),
        ProbeResult::new(8080, PortState::Open),
    ];
    let acc = accuracy(&reference, &results);
    assert_eq!(acc.precision, 0.5);
    assert_eq!(acc.recall, 0.5);
    assert_eq!(acc.f1, 0.5);

    let session = session(results, 1000, Some(&reference));
    assert_eq!(session.metrics().f1, Some(0.5));
}

#[test]
fn hundred_ports_in_half_a_second() {
    let results: Vec<ProbeResult> = (1..=100)
        .map(|p| ProbeResult::new(p, PortState::Closed))
        .collect();
    let session = session(results, 500, None);
    assert_eq!(session.metrics().speed, 200.0);
    assert_eq!(session.metrics().ports_scanned, 100);
}

#[test]
fn recomputing_metrics_is_bit_identical() {
    let reference = GroundTruth::open_ports([22, 80]);
    let results = vec![
        ProbeResult::new(22, PortState::Open).with_service("ssh", 1.0),
        ProbeResult::new(80, PortState::Open).with_service("http", 0.8),
        ProbeResult::new(81, PortState::Filtered),
        ProbeResult::new(8080, PortState::Open),
    ];
    let session = session(results, 1234, Some(&reference));
    let collector = MetricsCollector::new(StealthWeights::default());

    let first = collector.evaluate(&session, Some(&reference));
    let second = collector.evaluate(&session, Some(&reference));
    assert_eq!(first, second);
    assert_eq!(first.speed.to_bits(), second.speed.to_bits());
    assert_eq!(first.stealthiness.to_bits(), second.stealthiness.to_bits());
    assert_eq!(
        first.efficiency.map(f64::to_bits),
        session.metrics().efficiency.map(f64::to_bits)
    );
}

#[test]
fn missing_reference_leaves_accuracy_null() {
    let session = session(vec![ProbeResult::new(80, PortState::Open)], 100, None);
    let json = serde_json::to_value(&session).unwrap();
    assert!(json["metrics"]["precision"].is_null());
    assert!(json["metrics"]["recall"].is_null());
    assert!(json["metrics"]["f1"].is_null());
    assert_eq!(json["metrics"]["coverage"], 1.0);
}

#[test]
fn services_count_only_above_hint_confidence() {
    let results = vec![
        ProbeResult::new(22, PortState::Open).with_service("ssh", 1.0),
        ProbeResult::new(80, PortState::Open).with_service("http", 0.3),
        ProbeResult::new(443, PortState::Closed),
    ];
    let session = session(results, 100, None);
    assert_eq!(session.metrics().open_ports, 2);
    assert_eq!(session.metrics().services_identified, 1);
    assert_eq!(session.metrics().service_diversity, 0.5);
}

#[test]
fn stealth_weights_come_from_configuration() {
    let results: Vec<ProbeResult> = (1..=10)
        .map(|p| ProbeResult::new(p, PortState::Closed))
        .collect();
    let session = session(results, 100, None);
    let quiet = StealthWeights {
        tcp_connect: 0.01,
        ..StealthWeights::default()
    };
    let loud = MetricsCollector::default().evaluate(&session, None);
    let muted = MetricsCollector::new(quiet).evaluate(&session, None);
    assert!(muted.stealthiness < loud.stealthiness);
    assert_eq!(loud.stealthiness, session.metrics().stealthiness);
}
