//! Collaborators around the engine: where targets come from and where
//! finished sessions and reports go.

use crate::config::ScanConfig;
use crate::error::{ScanError, ScanResult};
use crate::report::ComparisonReport;
use crate::scanner::{ScanContext, ScanEngine, ScanSession};
use crate::utils::file_input::targets_from_file;
use crate::utils::target_parser::Target;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Source of scan targets
pub trait TargetSupplier: Send + Sync {
    fn targets(&self) -> ScanResult<Vec<Target>>;
}

/// A fixed list
#[derive(Debug, Clone, Default)]
pub struct StaticTargets(pub Vec<Target>);

impl TargetSupplier for StaticTargets {
    fn targets(&self) -> ScanResult<Vec<Target>> {
        Ok(self.0.clone())
    }
}

/// One target per line; `#` starts a comment
#[derive(Debug, Clone)]
pub struct FileTargets {
    path: PathBuf,
}

impl FileTargets {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TargetSupplier for FileTargets {
    fn targets(&self) -> ScanResult<Vec<Target>> {
        targets_from_file(&self.path)
    }
}

/// Storage for finished sessions and reports
#[async_trait]
pub trait SessionSink: Send + Sync {
    async fn store_session(&self, session: &ScanSession) -> ScanResult<()>;

    async fn store_report(&self, report: &ComparisonReport) -> ScanResult<()>;
}

/// Hand a session to the sink without waiting; failures are only logged.
pub fn publish_session(sink: Arc<dyn SessionSink>, session: ScanSession) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = sink.store_session(&session).await {
            log::warn!("Failed to store session {}: {}", session.id(), e);
        }
    })
}

/// Hand a report to the sink without waiting; failures are only logged.
pub fn publish_report(sink: Arc<dyn SessionSink>, report: ComparisonReport) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = sink.store_report(&report).await {
            log::warn!("Failed to store report {}: {}", report.id(), e);
        }
    })
}

/// Writes each session or report as `<id>.json` into a directory
#[derive(Debug, Clone)]
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn write<T: Serialize>(&self, name: String, value: &T) -> ScanResult<()> {
        let json = serde_json::to_vec_pretty(value)
            .map_err(|e| ScanError::ParseError(format!("serialize {}: {}", name, e)))?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.dir.join(name), json).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionSink for JsonDirSink {
    async fn store_session(&self, session: &ScanSession) -> ScanResult<()> {
        self.write(format!("session-{}.json", session.id()), session).await
    }

    async fn store_report(&self, report: &ComparisonReport) -> ScanResult<()> {
        self.write(format!("report-{}.json", report.id()), report).await
    }
}

/// A target that could not be scanned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetFailure {
    pub target: String,
    pub error: String,
}

/// Summary over a multi-target run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiScanSummary {
    pub targets_scanned: usize,
    pub successful_scans: usize,
    pub total_open_ports: usize,
    pub average_scan_secs: f64,
    pub failures: Vec<TargetFailure>,
    pub sessions: Vec<ScanSession>,
}

/// Scan every supplied target in turn with `base`'s settings.
///
/// A failing target is recorded and the rest still run. Cancelling `context`
/// stops after the current target.
pub async fn scan_supplied_targets(
    supplier: &dyn TargetSupplier,
    base: &ScanConfig,
    context: &ScanContext,
    sink: Option<Arc<dyn SessionSink>>,
) -> ScanResult<MultiScanSummary> {
    let targets = supplier.targets()?;
    let mut summary = MultiScanSummary::default();
    let mut total_secs = 0.0;

    for target in targets {
        if context.is_cancelled() {
            log::info!("Multi-target scan cancelled before {}", target);
            break;
        }
        summary.targets_scanned += 1;

        let mut config = base.clone();
        config.target = target.clone();
        let scan = async {
            ScanEngine::new(config)?
                .with_context(context.child())
                .scan()
                .await
        };

        match scan.await {
            Ok(session) => {
                summary.successful_scans += 1;
                summary.total_open_ports += session.metrics().open_ports;
                total_secs += session.elapsed_secs();
                if let Some(sink) = &sink {
                    publish_session(sink.clone(), session.clone());
                }
                summary.sessions.push(session);
            }
            Err(e) => {
                log::warn!("Scan of {} failed: {}", target, e);
                summary.failures.push(TargetFailure {
                    target: target.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    if summary.successful_scans > 0 {
        summary.average_scan_secs = total_secs / summary.successful_scans as f64;
    }
    Ok(summary)
}
