//! Tool adapters: every scanner taking part in a benchmark sits behind [`ToolAdapter`]

use crate::config::{BenchmarkSettings, ScanConfig};
use crate::error::{ScanError, ScanResult};
use crate::metrics::resource::{ProcSampler, ResourceUsage, SamplingWindow};
use crate::network::{PortState, ProbeResult, Technique};
use crate::scanner::{ScanContext, ScanEngine, ScanStats, SessionState, ENGINE_TOOL_NAME};
use crate::utils::port_spec::PortSpec;
use crate::utils::target_parser::Target;
use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;

const CHILD_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// What one tool run produced
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub results: Vec<ProbeResult>,
    pub elapsed_secs: f64,
    pub resource: Option<ResourceUsage>,
    /// Counters observed live, when the tool exposes them
    pub stats: Option<ScanStats>,
    pub state: SessionState,
    /// State of requested ports the tool did not list; closed when unset
    pub unlisted_state: Option<PortState>,
}

/// A scanner that can be run against a target and port set.
///
/// Runs are expected to be idempotent and free of side effects visible to
/// the caller.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    async fn run(&self, target: &Target, ports: &PortSpec) -> ScanResult<ToolOutput>;

    fn name(&self) -> &str;

    fn technique(&self) -> Technique;
}

/// This crate's own engine behind the adapter interface
pub struct EngineAdapter {
    base: ScanConfig,
    context: ScanContext,
}

impl EngineAdapter {
    /// `base` supplies technique and timing; target and ports come from each run.
    pub fn new(base: ScanConfig) -> Self {
        Self {
            base,
            context: ScanContext::new(),
        }
    }

    /// Runs share the given context's cancellation and progress subscribers
    pub fn with_context(mut self, context: ScanContext) -> Self {
        self.context = context;
        self
    }
}

#[async_trait]
impl ToolAdapter for EngineAdapter {
    async fn run(&self, target: &Target, ports: &PortSpec) -> ScanResult<ToolOutput> {
        let mut config = self.base.clone().with_ports(ports.clone());
        config.target = target.clone();
        let session = ScanEngine::new(config)?
            .with_context(self.context.child())
            .scan()
            .await?;
        Ok(ToolOutput {
            elapsed_secs: session.elapsed_secs(),
            resource: session.metrics().resource.clone(),
            stats: Some(session.stats().clone()),
            state: session.state(),
            unlisted_state: None,
            results: session.results().to_vec(),
        })
    }

    fn name(&self) -> &str {
        ENGINE_TOOL_NAME
    }

    fn technique(&self) -> Technique {
        self.base.technique
    }
}

/// Captured output of one external tool run
struct ChildRun {
    stdout: String,
    elapsed_secs: f64,
    resource: Option<ResourceUsage>,
}

/// Spawn `program`, sample it while it runs and collect its stdout.
async fn run_tool(
    tool: &str,
    program: &Path,
    args: &[String],
    limit: Duration,
) -> ScanResult<ChildRun> {
    log::debug!("running {} {}", program.display(), args.join(" "));
    let started = Instant::now();
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ScanError::tool_unavailable(
                tool,
                format!("{} not found in PATH", program.display()),
            ),
            _ => ScanError::tool_unavailable(tool, format!("failed to start: {}", e)),
        })?;

    let sampler = child
        .id()
        .map(|pid| SamplingWindow::start(Arc::new(ProcSampler::for_pid(pid)), CHILD_SAMPLE_INTERVAL));

    let output = tokio::time::timeout(limit, child.wait_with_output()).await;
    let elapsed_secs = started.elapsed().as_secs_f64();
    let resource = match sampler {
        Some(sampler) => sampler.stop().await,
        None => None,
    };

    let output = match output {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(ScanError::tool_unavailable(tool, e.to_string())),
        Err(_) => {
            return Err(ScanError::tool_unavailable(
                tool,
                format!("no result within {}s", limit.as_secs()),
            ))
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
        return Err(ScanError::tool_unavailable(
            tool,
            format!("exited with {}: {}", output.status, reason),
        ));
    }

    Ok(ChildRun {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        elapsed_secs,
        resource,
    })
}

/// `nmap -sT` with XML output on stdout
pub struct NmapAdapter {
    program: PathBuf,
    timeout: Duration,
}

impl NmapAdapter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn from_settings(settings: &BenchmarkSettings) -> Self {
        Self {
            program: settings.nmap_path.clone(),
            timeout: Duration::from_secs(settings.tool_timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn args(target: &Target, ports: &PortSpec) -> Vec<String> {
        vec![
            "-sT".to_string(),
            "-Pn".to_string(),
            "-n".to_string(),
            "-p".to_string(),
            ports.to_string(),
            "-oX".to_string(),
            "-".to_string(),
            target.host().to_string(),
        ]
    }
}

#[async_trait]
impl ToolAdapter for NmapAdapter {
    async fn run(&self, target: &Target, ports: &PortSpec) -> ScanResult<ToolOutput> {
        let run = run_tool(self.name(), &self.program, &Self::args(target, ports), self.timeout).await?;
        let parsed = parse_nmap_xml(&run.stdout)?;
        Ok(ToolOutput {
            results: parsed.ports,
            elapsed_secs: run.elapsed_secs,
            resource: run.resource,
            unlisted_state: parsed.extra_state,
            ..ToolOutput::default()
        })
    }

    fn name(&self) -> &str {
        "nmap"
    }

    fn technique(&self) -> Technique {
        Technique::TcpConnect
    }
}

fn nmap_state(state: &str) -> PortState {
    match state {
        "open" => PortState::Open,
        "closed" | "unfiltered" => PortState::Closed,
        "open|filtered" => PortState::OpenOrFiltered,
        _ => PortState::Filtered,
    }
}

fn attribute(element: &BytesStart<'_>, name: &str) -> ScanResult<Option<String>> {
    let attr = element
        .try_get_attribute(name)
        .map_err(|e| ScanError::ParseError(format!("nmap xml: {}", e)))?;
    match attr {
        Some(attr) => attr
            .unescape_value()
            .map(|v| Some(v.into_owned()))
            .map_err(|e| ScanError::ParseError(format!("nmap xml: {}", e))),
        None => Ok(None),
    }
}

/// What nmap's `-oX` document says about the scanned ports
#[derive(Debug, Clone, PartialEq)]
pub struct NmapPorts {
    pub ports: Vec<ProbeResult>,
    /// State of the largest `<extraports>` group, if nmap folded any
    pub extra_state: Option<PortState>,
}

/// Port entries from nmap's `-oX` document.
///
/// Ports folded into `<extraports>` are not listed; their state is kept
/// so the caller can fill them in.
pub fn parse_nmap_xml(xml: &str) -> ScanResult<NmapPorts> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut results = Vec::new();
    let mut current: Option<ProbeResult> = None;
    let mut extra: Option<(u64, PortState)> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ScanError::ParseError(format!("nmap xml: {}", e)))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => match e.name().as_ref() {
                b"port" => {
                    let port = attribute(e, "portid")?
                        .and_then(|p| p.parse::<u16>().ok())
                        .ok_or_else(|| ScanError::ParseError("port without portid".to_string()))?;
                    current = Some(ProbeResult::new(port, PortState::Filtered));
                }
                b"extraports" => {
                    if let Some(state) = attribute(e, "state")? {
                        let count = attribute(e, "count")?
                            .and_then(|c| c.parse::<u64>().ok())
                            .unwrap_or(0);
                        if extra.map_or(true, |(largest, _)| count > largest) {
                            extra = Some((count, nmap_state(&state)));
                        }
                    }
                }
                b"state" => {
                    if let (Some(result), Some(state)) = (current.as_mut(), attribute(e, "state")?) {
                        result.state = nmap_state(&state);
                    }
                }
                b"service" => {
                    if let (Some(result), Some(name)) = (current.as_mut(), attribute(e, "name")?) {
                        let confidence = attribute(e, "conf")?
                            .and_then(|c| c.parse::<f64>().ok())
                            .map_or(0.0, |c| c / 10.0);
                        result.service = Some(name);
                        result.confidence = confidence.clamp(0.0, 1.0);
                        result.version = attribute(e, "version")?;
                    }
                }
                _ => {}
            },
            Event::End(ref e) if e.name().as_ref() == b"port" => {
                if let Some(result) = current.take() {
                    results.push(result);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(NmapPorts {
        ports: results,
        extra_state: extra.map(|(_, state)| state),
    })
}

/// `masscan` with list output on stdout. Needs raw-socket privileges.
pub struct MasscanAdapter {
    program: PathBuf,
    rate: u32,
    timeout: Duration,
}

impl MasscanAdapter {
    pub fn new(program: impl Into<PathBuf>, rate: u32) -> Self {
        Self {
            program: program.into(),
            rate,
            timeout: Duration::from_secs(300),
        }
    }

    pub fn from_settings(settings: &BenchmarkSettings) -> Self {
        Self {
            program: settings.masscan_path.clone(),
            rate: settings.masscan_rate,
            timeout: Duration::from_secs(settings.tool_timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ToolAdapter for MasscanAdapter {
    async fn run(&self, target: &Target, ports: &PortSpec) -> ScanResult<ToolOutput> {
        // masscan takes addresses only
        let address = target.resolve().await?;
        let args = vec![
            format!("-p{}", ports),
            "--rate".to_string(),
            self.rate.to_string(),
            "-oL".to_string(),
            "-".to_string(),
            address.to_string(),
        ];
        let run = run_tool(self.name(), &self.program, &args, self.timeout).await?;
        Ok(ToolOutput {
            results: parse_masscan_list(&run.stdout),
            elapsed_secs: run.elapsed_secs,
            resource: run.resource,
            ..ToolOutput::default()
        })
    }

    fn name(&self) -> &str {
        "masscan"
    }

    fn technique(&self) -> Technique {
        Technique::Syn
    }
}

/// Lines of the form `open tcp 80 10.0.0.1 1700000000`.
pub fn parse_masscan_list(output: &str) -> Vec<ProbeResult> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let state = fields.next()?;
            let _proto = fields.next()?;
            let port = fields.next()?.parse::<u16>().ok()?;
            match state {
                "open" => Some(ProbeResult::new(port, PortState::Open)),
                "closed" => Some(ProbeResult::new(port, PortState::Closed)),
                _ => None,
            }
        })
        .collect()
}
