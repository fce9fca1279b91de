use clap::{Arg, ArgAction, ArgMatches, Command};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;

use reconscan::{
    benchmark::{BenchmarkOrchestrator, BenchmarkOutcome, MasscanAdapter, NmapAdapter},
    config::Settings,
    hybrid::{HybridComparator, HybridOutcome},
    integration::{publish_report, publish_session, scan_supplied_targets, FileTargets, JsonDirSink, MultiScanSummary, SessionSink},
    metrics::GroundTruth,
    network::{PortState, ProbeResult, Technique},
    scanner::{ScanContext, ScanEngine, ScanSession},
    utils::{port_spec::PortSpec, target_parser::Target},
};

const DEFAULT_PORTS: &str = "1-1024";

fn cli() -> Command {
    let target = Arg::new("target")
        .value_name("TARGET")
        .help("Hostname or IP address to scan")
        .index(1);
    let ports = Arg::new("ports")
        .short('p')
        .long("ports")
        .value_name("PORTS")
        .help("Ports to scan, e.g. 22,80,8000-8100")
        .default_value(DEFAULT_PORTS);
    let json = Arg::new("json")
        .long("json")
        .help("Print the result as JSON")
        .action(ArgAction::SetTrue);
    let no_progress = Arg::new("no-progress")
        .long("no-progress")
        .help("Hide the progress bar")
        .action(ArgAction::SetTrue);
    let save_dir = Arg::new("save-dir")
        .long("save-dir")
        .value_name("DIR")
        .help("Also write sessions and reports as JSON files into DIR")
        .value_parser(clap::value_parser!(PathBuf));

    Command::new("reconscan")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Port scanning with service detection, scan-quality metrics and tool benchmarking")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Raise log verbosity (repeat for more)")
                .action(ArgAction::Count)
                .global(true),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("Settings file (default ~/.reconscan.toml)")
                .value_parser(clap::value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("ulimit")
                .short('u')
                .long("ulimit")
                .value_name("LIMIT")
                .help("Raise the open file limit to this value")
                .value_parser(clap::value_parser!(u64))
                .global(true),
        )
        .subcommand(
            Command::new("scan")
                .about("Scan one target, or every target listed in a file")
                .arg(target.clone().required_unless_present("input-file"))
                .arg(ports.clone())
                .arg(
                    Arg::new("technique")
                        .short('t')
                        .long("technique")
                        .value_name("TECHNIQUE")
                        .help("tcp_connect, syn, udp or hybrid"),
                )
                .arg(
                    Arg::new("concurrency")
                        .short('c')
                        .long("concurrency")
                        .value_name("N")
                        .help("Probes in flight at once")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_name("MS")
                        .help("Per-probe timeout in milliseconds")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    Arg::new("reference")
                        .long("reference")
                        .value_name("PORTS")
                        .help("Ports known to be open, for precision and recall"),
                )
                .arg(
                    Arg::new("input-file")
                        .short('i')
                        .long("input-file")
                        .value_name("FILE")
                        .help("Read targets from FILE, one per line")
                        .value_parser(clap::value_parser!(PathBuf))
                        .conflicts_with("target"),
                )
                .arg(no_progress.clone())
                .arg(json.clone())
                .arg(save_dir.clone()),
        )
        .subcommand(
            Command::new("benchmark")
                .about("Compare the engine against external scanners")
                .arg(target.clone().required(true))
                .arg(ports.clone())
                .arg(
                    Arg::new("tools")
                        .long("tools")
                        .value_name("TOOLS")
                        .help("External tools to include")
                        .value_delimiter(',')
                        .default_value("nmap"),
                )
                .arg(
                    Arg::new("concurrent")
                        .long("concurrent")
                        .help("Run all participants at the same time")
                        .action(ArgAction::SetTrue),
                )
                .arg(no_progress.clone())
                .arg(json.clone())
                .arg(save_dir.clone()),
        )
        .subcommand(
            Command::new("hybrid")
                .about("Compare plain probing against probing plus service detection")
                .arg(target.required(true))
                .arg(ports)
                .arg(
                    Arg::new("threshold")
                        .long("threshold")
                        .value_name("PCT")
                        .help("Largest time overhead (percent) for a hybrid win")
                        .value_parser(clap::value_parser!(f64)),
                )
                .arg(
                    Arg::new("parallel")
                        .long("parallel")
                        .help("Run both configurations at the same time")
                        .action(ArgAction::SetTrue),
                )
                .arg(no_progress)
                .arg(json)
                .arg(save_dir),
        )
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

// Ulimit adjustment for Unix systems
#[cfg(unix)]
fn adjust_ulimit(limit: u64) {
    use rlimit::Resource;

    if Resource::NOFILE.set(limit, limit).is_ok() {
        println!(
            "{} {}",
            "[~] Raised open file limit to".bright_blue(),
            limit.to_string().bright_cyan().bold()
        );
    } else {
        eprintln!("{}", "[!] Failed to set ulimit value".bright_red());
    }
}

#[cfg(not(unix))]
fn adjust_ulimit(_limit: u64) {}

fn load_settings(matches: &ArgMatches) -> anyhow::Result<Settings> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => Ok(Settings::from_toml_file(path)?),
        None => Ok(Settings::load_default()),
    }
}

fn port_spec(matches: &ArgMatches) -> anyhow::Result<PortSpec> {
    let raw = matches
        .get_one::<String>("ports")
        .map(String::as_str)
        .unwrap_or(DEFAULT_PORTS);
    Ok(raw.parse()?)
}

fn target(matches: &ArgMatches) -> anyhow::Result<Target> {
    let raw = matches
        .get_one::<String>("target")
        .ok_or_else(|| anyhow::anyhow!("a target is required"))?;
    Ok(raw.parse()?)
}

fn sink(matches: &ArgMatches) -> Option<Arc<dyn SessionSink>> {
    matches
        .get_one::<PathBuf>("save-dir")
        .map(|dir| Arc::new(JsonDirSink::new(dir)) as Arc<dyn SessionSink>)
}

/// Cancel the context on Ctrl-C
fn cancel_on_ctrl_c(context: &ScanContext) {
    let context = context.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "\n[!] Interrupted, finishing up...".bright_yellow());
            context.cancel();
        }
    });
}

fn protocol(technique: Technique) -> &'static str {
    match technique {
        Technique::Udp => "udp",
        _ => "tcp",
    }
}

/// Ports worth a line in the text report; silent UDP ports included
fn is_listed(result: &ProbeResult) -> bool {
    result.is_open() || result.state == PortState::OpenOrFiltered
}

/// Follows every scan published on `context` until its channel closes
fn progress_bar(context: &ScanContext) -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ports ({msg})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    bar.set_style(style);

    let mut events = context.subscribe();
    let updates = bar.clone();
    tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match events.recv().await {
                Ok(event) => {
                    updates.set_length(event.total_ports as u64);
                    updates.set_position(event.ports_scanned as u64);
                    updates.set_message(event.target.clone());
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
    bar
}

fn print_session(session: &ScanSession) {
    let metrics = session.metrics();
    println!(
        "\n{} {} ({}) {}",
        "[✓]".bright_green(),
        session.target().to_string().bright_cyan().bold(),
        session.technique(),
        if session.is_cancelled() {
            "cancelled".bright_yellow().to_string()
        } else {
            "completed".bright_green().to_string()
        }
    );

    let protocol = protocol(session.technique());
    for result in session.results().iter().filter(|r| is_listed(r)) {
        println!(
            "  {:>5}/{}  {:<13} {:<14} {:<12} {}",
            result.port.to_string().bright_white().bold(),
            protocol,
            result.state.to_string().bright_green(),
            result.service.as_deref().unwrap_or("-"),
            result.version.as_deref().unwrap_or(""),
            result.banner.as_deref().unwrap_or("").dimmed()
        );
    }

    println!(
        "  {} ports in {:.2}s ({:.1} ports/s), {} open, {} services identified",
        metrics.ports_scanned,
        metrics.elapsed_secs,
        metrics.speed,
        metrics.open_ports,
        metrics.services_identified
    );
    if let (Some(p), Some(r), Some(f1)) = (metrics.precision, metrics.recall, metrics.f1) {
        println!("  precision {:.3}  recall {:.3}  f1 {:.3}", p, r, f1);
    }
    println!("  detection likelihood {:.3}", metrics.stealthiness);
    if let Some(resource) = &metrics.resource {
        println!(
            "  memory peak {:.1} MiB / avg {:.1} MiB, cpu {:.1}%",
            resource.peak_memory_mib, resource.avg_memory_mib, resource.avg_cpu_percent
        );
    }
}

fn print_summary(summary: &MultiScanSummary) {
    for session in &summary.sessions {
        print_session(session);
    }
    for failure in &summary.failures {
        eprintln!("{} {}: {}", "[!]".bright_red(), failure.target, failure.error);
    }
    println!(
        "\n{} {} targets, {} successful, {} open ports, {:.2}s average",
        "[~]".bright_blue(),
        summary.targets_scanned,
        summary.successful_scans,
        summary.total_open_ports,
        summary.average_scan_secs
    );
}

fn print_benchmark(outcome: &BenchmarkOutcome) {
    for warning in &outcome.warnings {
        eprintln!("{} {}", "[!]".bright_yellow(), warning);
    }
    println!("\n{}", "Benchmark".bright_cyan().bold());
    println!(
        "  {:<12} {:>12} {:>8} {:>12} {:>12}",
        "tool", "ports/s", "f1", "efficiency", "peak MiB"
    );
    for session in &outcome.sessions {
        let metrics = session.metrics();
        println!(
            "  {:<12} {:>12.1} {:>8.3} {:>12.1} {:>12}",
            session.tool(),
            metrics.speed,
            metrics.f1.unwrap_or(0.0),
            metrics.efficiency.unwrap_or(0.0),
            metrics
                .resource
                .as_ref()
                .map_or("-".to_string(), |r| format!("{:.1}", r.peak_memory_mib))
        );
    }
    match outcome.winner() {
        Some(tool) => println!("\n{} {}", "[✓] Winner:".bright_green(), tool.bold()),
        None => println!("\n{}", "[!] No participant produced results".bright_red()),
    }
}

fn print_hybrid(outcome: &HybridOutcome) {
    println!("\n{}", "Hybrid comparison".bright_cyan().bold());
    println!(
        "  single: {} services in {:.2}s",
        outcome.single.metrics().services_identified,
        outcome.single.metrics().elapsed_secs
    );
    println!(
        "  hybrid: {} services in {:.2}s",
        outcome.hybrid.metrics().services_identified,
        outcome.hybrid.metrics().elapsed_secs
    );
    println!(
        "  service delta {:+}, time overhead {:.1}%, detection risk delta {:+.3}",
        outcome.advantage.service_delta,
        outcome.advantage.time_overhead_pct,
        outcome.advantage.detection_risk_delta
    );
    println!("{} {}", "[✓] Verdict:".bright_green(), outcome.report.verdict().to_string().bold());
}

async fn run_scan(matches: &ArgMatches, settings: &Settings) -> anyhow::Result<()> {
    let ports = port_spec(matches)?;
    let json = matches.get_flag("json");
    let sink = sink(matches);
    let context = ScanContext::new();
    cancel_on_ctrl_c(&context);

    let placeholder = match matches.get_one::<String>("target") {
        Some(raw) => raw.parse::<Target>()?,
        None => Target::new("localhost")?,
    };
    let mut config = settings.scan_config(placeholder, ports);
    if let Some(raw) = matches.get_one::<String>("technique") {
        config = config.with_technique(raw.parse::<Technique>()?);
    }
    if let Some(&concurrency) = matches.get_one::<usize>("concurrency") {
        config = config.with_concurrency(concurrency);
    }
    if let Some(&timeout) = matches.get_one::<u64>("timeout") {
        config = config.with_timeout(timeout);
    }
    if let Some(raw) = matches.get_one::<String>("reference") {
        let reference: PortSpec = raw.parse()?;
        config = config.with_reference(GroundTruth::open_ports(reference.ports().iter().copied()));
    }
    config.validate()?;

    let show_progress = !json && !matches.get_flag("no-progress");
    if let Some(path) = matches.get_one::<PathBuf>("input-file") {
        let bar = show_progress.then(|| progress_bar(&context));
        let summary = scan_supplied_targets(&FileTargets::new(path), &config, &context, sink).await;
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
        let summary = summary?;
        if json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            print_summary(&summary);
        }
        return Ok(());
    }

    let bar = show_progress.then(|| progress_bar(&context));
    let engine = ScanEngine::new(config)?.with_context(context);
    let session = engine.scan().await;
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    let session = session?;

    if json {
        println!("{}", serde_json::to_string_pretty(&session)?);
    } else {
        print_session(&session);
    }
    if let Some(sink) = sink {
        publish_session(sink, session).await?;
    }
    Ok(())
}

async fn run_benchmark(matches: &ArgMatches, settings: &Settings) -> anyhow::Result<()> {
    let config = settings.scan_config(target(matches)?, port_spec(matches)?);
    let json = matches.get_flag("json");
    let context = ScanContext::new();
    cancel_on_ctrl_c(&context);
    let bar = (!json && !matches.get_flag("no-progress")).then(|| progress_bar(&context));

    let mut orchestrator = BenchmarkOrchestrator::with_context(config, context)?
        .concurrent(matches.get_flag("concurrent") || settings.benchmark.concurrent);
    for tool in matches.get_many::<String>("tools").into_iter().flatten() {
        orchestrator = match tool.trim() {
            "nmap" => orchestrator.with_adapter(Arc::new(NmapAdapter::from_settings(&settings.benchmark))),
            "masscan" => {
                orchestrator.with_adapter(Arc::new(MasscanAdapter::from_settings(&settings.benchmark)))
            }
            "" | "none" => orchestrator,
            other => anyhow::bail!("unknown benchmark tool '{}' (expected nmap or masscan)", other),
        };
    }

    let outcome = orchestrator.run().await;
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_benchmark(&outcome);
    }
    if let Some(sink) = sink(matches) {
        for session in &outcome.sessions {
            publish_session(sink.clone(), session.clone()).await?;
        }
        publish_report(sink, outcome.report).await?;
    }
    Ok(())
}

async fn run_hybrid(matches: &ArgMatches, settings: &Settings) -> anyhow::Result<()> {
    let config = settings.scan_config(target(matches)?, port_spec(matches)?);
    let context = ScanContext::new();
    cancel_on_ctrl_c(&context);

    let mut comparator = HybridComparator::from_settings(&settings.hybrid);
    if let Some(&threshold) = matches.get_one::<f64>("threshold") {
        comparator = HybridComparator::new(threshold).parallel(settings.hybrid.parallel);
    }
    if matches.get_flag("parallel") {
        comparator = comparator.parallel(true);
    }

    let json = matches.get_flag("json");
    let bar = (!json && !matches.get_flag("no-progress")).then(|| progress_bar(&context));
    let outcome = comparator.run(&config, &context).await;
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    let outcome = outcome?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_hybrid(&outcome);
    }
    if let Some(sink) = sink(matches) {
        publish_session(sink.clone(), outcome.single).await?;
        publish_session(sink.clone(), outcome.hybrid).await?;
        publish_report(sink, outcome.report).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_logging(matches.get_count("verbose"));

    if let Some(&limit) = matches.get_one::<u64>("ulimit") {
        adjust_ulimit(limit);
    }
    let settings = load_settings(&matches)?;

    match matches.subcommand() {
        Some(("scan", sub)) => run_scan(sub, &settings).await,
        Some(("benchmark", sub)) => run_benchmark(sub, &settings).await,
        Some(("hybrid", sub)) => run_hybrid(sub, &settings).await,
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn parses_scan_arguments() {
        let matches = cli()
            .try_get_matches_from(["reconscan", "-v", "scan", "10.0.0.1", "-p", "22,80", "-t", "syn"])
            .unwrap();
        assert_eq!(matches.get_count("verbose"), 1);
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "scan");
        assert_eq!(port_spec(sub).unwrap().ports(), &[22, 80]);
        assert_eq!(sub.get_one::<String>("technique").unwrap(), "syn");
    }

    #[test]
    fn udp_sessions_list_silent_ports() {
        assert_eq!(protocol(Technique::Udp), "udp");
        assert_eq!(protocol(Technique::Hybrid), "tcp");
        assert!(is_listed(&ProbeResult::new(53, PortState::OpenOrFiltered)));
        assert!(is_listed(&ProbeResult::new(22, PortState::Open)));
        assert!(!is_listed(&ProbeResult::new(23, PortState::Closed)));
        assert!(!is_listed(&ProbeResult::new(25, PortState::Filtered)));
    }

    #[test]
    fn every_subcommand_accepts_no_progress() {
        for args in [
            vec!["reconscan", "scan", "127.0.0.1", "--no-progress"],
            vec!["reconscan", "benchmark", "127.0.0.1", "--no-progress"],
            vec!["reconscan", "hybrid", "127.0.0.1", "--no-progress"],
        ] {
            let matches = cli().try_get_matches_from(args).unwrap();
            let (_, sub) = matches.subcommand().unwrap();
            assert!(sub.get_flag("no-progress"));
        }
    }
}
