//! Performance benchmarks for the hot pure paths

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use reconscan::{
    metrics::{GroundTruth, MetricsInput, SessionMetrics, StealthWeights},
    network::{packet::SynPacketBuilder, PortState, ProbeResult, Technique},
    service::match_banner,
    top_ports::priority_order,
    utils::port_spec::PortSpec,
};

/// Port list parsing and ordering
fn bench_port_spec(c: &mut Criterion) {
    let mut group = c.benchmark_group("port_spec");

    group.bench_function("parse_full_range", |b| {
        b.iter(|| black_box("1-65535".parse::<PortSpec>().unwrap()))
    });
    group.bench_function("parse_mixed_list", |b| {
        b.iter(|| black_box("21-23,25,53,80,110-143,443,1000-2000,8080".parse::<PortSpec>().unwrap()))
    });

    let all = PortSpec::range(1, 65535).unwrap();
    group.bench_function("priority_order_full_range", |b| {
        b.iter(|| black_box(priority_order(all.ports(), true)))
    });

    group.finish();
}

/// Metrics over growing result sets
fn bench_metrics(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics");
    let weights = StealthWeights::default();

    for size in [100usize, 1_000, 10_000] {
        let results: Vec<ProbeResult> = (1..=size as u16)
            .map(|p| {
                if p % 10 == 0 {
                    ProbeResult::new(p, PortState::Open).with_service("http", 0.8)
                } else {
                    ProbeResult::new(p, PortState::Closed)
                }
            })
            .collect();
        let reference = GroundTruth::open_ports((1..=size as u16).filter(|p| p % 20 == 0));

        group.bench_with_input(BenchmarkId::new("compute", size), &results, |b, results| {
            b.iter(|| {
                black_box(SessionMetrics::compute(
                    MetricsInput {
                        technique: Technique::TcpConnect,
                        results,
                        elapsed_secs: 1.5,
                        packets_sent: results.len() as u64 * 3,
                        resource: None,
                    },
                    Some(&reference),
                    &weights,
                ))
            })
        });
    }

    group.finish();
}

/// Signature matching and SYN segment crafting
fn bench_detection_and_packets(c: &mut Criterion) {
    let mut group = c.benchmark_group("detection");

    group.bench_function("match_ssh_banner", |b| {
        b.iter(|| black_box(match_banner(22, Some(black_box("SSH-2.0-OpenSSH_9.6p1 Ubuntu-3")))))
    });
    group.bench_function("match_unknown_banner", |b| {
        b.iter(|| black_box(match_banner(40000, Some(black_box("hello there")))))
    });
    group.bench_function("syn_segment", |b| {
        b.iter(|| {
            black_box(
                SynPacketBuilder::new(
                    black_box("192.168.1.1".parse().unwrap()),
                    black_box("192.168.1.100".parse().unwrap()),
                    black_box(45000),
                    black_box(80),
                )
                .build(),
            )
        })
    });

    group.finish();
}

criterion_group!(benches, bench_port_spec, bench_metrics, bench_detection_and_packets);
criterion_main!(benches);
