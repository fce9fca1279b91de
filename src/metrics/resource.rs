//! Process resource sampling over a scan's wall-clock window

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Resource usage summary for one sampling window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub peak_memory_mib: f64,
    pub avg_memory_mib: f64,
    pub avg_cpu_percent: f64,
    pub samples: usize,
}

/// One reading of a process' counters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSample {
    pub rss_bytes: u64,
    /// utime + stime in clock ticks
    pub cpu_ticks: u64,
}

/// Something that can report a process' memory and CPU counters.
pub trait ResourceSource: Send + Sync {
    fn sample(&self) -> Option<ProcessSample>;
}

/// Reads `/proc/<pid>/status` and `/proc/<pid>/stat`.
#[derive(Debug, Clone)]
pub struct ProcSampler {
    proc_dir: String,
}

impl ProcSampler {
    /// The current process
    pub fn current() -> Self {
        Self {
            proc_dir: "/proc/self".to_string(),
        }
    }

    /// Another process, e.g. a spawned tool
    pub fn for_pid(pid: u32) -> Self {
        Self {
            proc_dir: format!("/proc/{}", pid),
        }
    }

    fn rss_bytes(&self) -> Option<u64> {
        let status = std::fs::read_to_string(format!("{}/status", self.proc_dir)).ok()?;
        parse_vm_rss(&status)
    }

    fn cpu_ticks(&self) -> Option<u64> {
        let stat = std::fs::read_to_string(format!("{}/stat", self.proc_dir)).ok()?;
        parse_cpu_ticks(&stat)
    }
}

impl ResourceSource for ProcSampler {
    fn sample(&self) -> Option<ProcessSample> {
        Some(ProcessSample {
            rss_bytes: self.rss_bytes()?,
            cpu_ticks: self.cpu_ticks()?,
        })
    }
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// utime and stime are fields 14 and 15; the command name may contain spaces,
/// so counting starts after its closing parenthesis.
fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

fn clock_ticks_per_second() -> f64 {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as f64
    } else {
        100.0
    }
}

/// Folds samples into a [`ResourceUsage`].
#[derive(Debug, Clone, Default)]
pub struct UsageAccumulator {
    peak_rss: u64,
    rss_sum: f64,
    count: usize,
    first: Option<(Instant, u64)>,
    last: Option<(Instant, u64)>,
}

impl UsageAccumulator {
    pub fn record(&mut self, sample: ProcessSample, at: Instant) {
        self.peak_rss = self.peak_rss.max(sample.rss_bytes);
        self.rss_sum += sample.rss_bytes as f64;
        self.count += 1;
        if self.first.is_none() {
            self.first = Some((at, sample.cpu_ticks));
        }
        self.last = Some((at, sample.cpu_ticks));
    }

    pub fn finish(&self, ticks_per_second: f64) -> Option<ResourceUsage> {
        if self.count == 0 {
            return None;
        }
        let avg_cpu_percent = match (self.first, self.last) {
            (Some((t0, c0)), Some((t1, c1))) if t1 > t0 => {
                let wall = t1.duration_since(t0).as_secs_f64();
                let cpu = c1.saturating_sub(c0) as f64 / ticks_per_second;
                cpu / wall * 100.0
            }
            _ => 0.0,
        };
        Some(ResourceUsage {
            peak_memory_mib: self.peak_rss as f64 / BYTES_PER_MIB,
            avg_memory_mib: self.rss_sum / self.count as f64 / BYTES_PER_MIB,
            avg_cpu_percent,
            samples: self.count,
        })
    }
}

/// A running sampler; stop it to get the window's summary.
pub struct SamplingWindow {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<UsageAccumulator>,
}

impl SamplingWindow {
    pub fn start(source: Arc<dyn ResourceSource>, interval: Duration) -> Self {
        let (stop, mut stopped) = oneshot::channel();
        let interval = interval.max(Duration::from_millis(10));
        let handle = tokio::spawn(async move {
            let mut acc = UsageAccumulator::default();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        if let Some(sample) = source.sample() {
                            acc.record(sample, Instant::now());
                        }
                    }
                }
            }
            if let Some(sample) = source.sample() {
                acc.record(sample, Instant::now());
            }
            acc
        });
        Self { stop, handle }
    }

    /// Sample the current process
    pub fn start_current(interval: Duration) -> Self {
        Self::start(Arc::new(ProcSampler::current()), interval)
    }

    pub async fn stop(self) -> Option<ResourceUsage> {
        let _ = self.stop.send(());
        match self.handle.await {
            Ok(acc) => acc.finish(clock_ticks_per_second()),
            Err(e) => {
                log::debug!("resource sampler stopped abnormally: {}", e);
                None
            }
        }
    }
}
