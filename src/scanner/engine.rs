//! Main scanning engine implementation

use crate::config::ScanConfig;
use crate::error::{ScanError, ScanResult};
use crate::metrics::resource::{ProcSampler, ResourceSource, SamplingWindow};
use crate::network::prober::{prober_for, PortProbe};
use crate::network::{ProbeResult, Technique};
use crate::scanner::{
    ScanContext, ScanProgress, ScanSession, ScanStats, SessionDraft, SessionState, ENGINE_TOOL_NAME,
};
use crate::service::{Detection, ServiceDetector, PACKETS_PER_DETECTION};
use crate::top_ports::{priority_order, service_for_port, PORT_HINT_CONFIDENCE};
use chrono::Utc;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

/// Extra time a probe may take beyond its own timeout before it is cut off
const PROBE_SLACK: Duration = Duration::from_millis(500);

/// Main scanning engine: one configured scan of one target
pub struct ScanEngine {
    config: ScanConfig,
    prober: Arc<dyn PortProbe>,
    detector: Option<ServiceDetector>,
    context: ScanContext,
    resource_source: Arc<dyn ResourceSource>,
}

impl ScanEngine {
    /// Create a new scan engine with the given configuration.
    ///
    /// Configuration problems, including missing raw-socket privilege for
    /// `syn`, are reported here before anything is sent.
    pub fn new(config: ScanConfig) -> ScanResult<Self> {
        config.validate()?;
        let prober = prober_for(config.technique)?;
        Ok(Self::assemble(config, prober))
    }

    /// Use a custom probe strategy instead of the technique's default
    pub fn with_prober(config: ScanConfig, prober: Arc<dyn PortProbe>) -> ScanResult<Self> {
        config.validate()?;
        Ok(Self::assemble(config, prober))
    }

    fn assemble(config: ScanConfig, prober: Arc<dyn PortProbe>) -> Self {
        let detector = config
            .technique
            .detects_services()
            .then(|| ServiceDetector::new(config.detector.clone()));
        Self {
            config,
            prober,
            detector,
            context: ScanContext::new(),
            resource_source: Arc::new(ProcSampler::current()),
        }
    }

    /// Share cancellation and progress with the caller
    pub fn with_context(mut self, context: ScanContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_resource_source(mut self, source: Arc<dyn ResourceSource>) -> Self {
        self.resource_source = source;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn context(&self) -> &ScanContext {
        &self.context
    }

    /// Perform the scan
    pub async fn scan(&self) -> ScanResult<ScanSession> {
        let address = self.config.target.resolve().await?;
        if self.config.technique == Technique::Syn && !address.is_ipv4() {
            return Err(ScanError::ConfigError(format!(
                "syn scans need an IPv4 target, {} resolved to {}",
                self.config.target, address
            )));
        }

        let order = priority_order(self.config.ports.ports(), self.config.prioritize_common_ports);
        log::info!(
            "Scanning {} ({}) : {} ports, technique {}, concurrency {}",
            self.config.target,
            address,
            order.len(),
            self.config.technique,
            self.config.concurrency
        );

        let started_at = Utc::now();
        let sampler = SamplingWindow::start(
            self.resource_source.clone(),
            Duration::from_millis(self.config.sample_interval_ms),
        );
        let cancel = self.context.cancel_token();

        let (open_tx, detector_handle) = match &self.detector {
            Some(detector) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let detector = detector.clone();
                let cancel = cancel.clone();
                let handle = tokio::spawn(async move { detector.run_stream(address, rx, cancel).await });
                (Some(tx), Some(handle))
            }
            None => (None, None),
        };

        let (result_tx, result_rx) = mpsc::unbounded_channel::<ProbeResult>();
        let collector = self.spawn_collector(result_rx, open_tx, order.len());

        let peak_in_flight = Arc::new(AtomicUsize::new(0));
        let interrupted = self
            .run_probes(address, &order, result_tx, peak_in_flight.clone())
            .await;

        let (mut results, mut stats) = match collector.await {
            Ok(collected) => collected,
            Err(e) => {
                return Err(ScanError::NetworkError(format!("result collector failed: {}", e)));
            }
        };
        stats.peak_in_flight = peak_in_flight.load(Ordering::SeqCst);

        if let Some(handle) = detector_handle {
            match handle.await {
                Ok(detections) => {
                    stats.packets_sent += detections.len() as u64 * PACKETS_PER_DETECTION;
                    apply_detections(&mut results, &detections);
                }
                Err(e) => log::warn!("service detection stopped early: {}", e),
            }
        }

        let finished_at = Utc::now();
        let resource = sampler.stop().await;
        let state = if interrupted {
            log::info!(
                "Scan of {} cancelled after {} of {} ports",
                self.config.target,
                results.len(),
                order.len()
            );
            SessionState::Cancelled
        } else {
            SessionState::Completed
        };

        Ok(ScanSession::finalize(
            SessionDraft {
                tool: ENGINE_TOOL_NAME.to_string(),
                target: self.config.target.clone(),
                technique: self.config.technique,
                state,
                started_at,
                finished_at,
                concurrency_limit: self.config.concurrency,
                results,
                stats,
                resource,
            },
            self.config.reference.as_ref(),
            &self.config.stealth_weights,
        ))
    }

    /// Schedule every port through the bounded pool. Returns whether the
    /// run was cut short by cancellation.
    async fn run_probes(
        &self,
        address: IpAddr,
        order: &[u16],
        result_tx: mpsc::UnboundedSender<ProbeResult>,
        peak_in_flight: Arc<AtomicUsize>,
    ) -> bool {
        let cancel = self.context.cancel_token();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let timeout = self.config.timeout_duration();
        let silent_state = self.config.technique.silent_state();
        let mut tasks = JoinSet::new();
        let mut interrupted = false;

        for &port in order {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    interrupted = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let prober = self.prober.clone();
            let tx = result_tx.clone();
            let in_flight = in_flight.clone();
            let peak = peak_in_flight.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);

                let start = Instant::now();
                let result = match tokio::time::timeout(
                    timeout + PROBE_SLACK,
                    prober.probe(address, port, timeout),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => ProbeResult::new(port, silent_state).with_latency(start.elapsed()),
                };

                in_flight.fetch_sub(1, Ordering::SeqCst);
                let _ = tx.send(result);
            });
        }
        drop(result_tx);

        let cancelled_while_draining = tokio::select! {
            biased;
            _ = drain(&mut tasks) => false,
            _ = cancel.cancelled() => true,
        };

        if interrupted || cancelled_while_draining {
            let grace = self.config.cancel_grace();
            if tokio::time::timeout(grace, drain(&mut tasks)).await.is_err() {
                log::debug!("aborting {} probes after {:?} grace period", tasks.len(), grace);
                tasks.abort_all();
                drain(&mut tasks).await;
            }
            return true;
        }
        false
    }

    /// The single writer of the result vector.
    fn spawn_collector(
        &self,
        mut result_rx: mpsc::UnboundedReceiver<ProbeResult>,
        open_tx: Option<mpsc::UnboundedSender<u16>>,
        total_ports: usize,
    ) -> JoinHandle<(Vec<ProbeResult>, ScanStats)> {
        let context = self.context.clone();
        let target = self.config.target.to_string();
        let technique = self.config.technique;
        let port_hints = self.config.port_hints;
        let interval = Duration::from_millis(self.config.progress_interval_ms);

        tokio::spawn(async move {
            let mut results = Vec::with_capacity(total_ports);
            let mut stats = ScanStats::default();
            let mut last_progress: Option<Instant> = None;

            while let Some(mut result) = result_rx.recv().await {
                if result.is_open() {
                    if port_hints && result.service.is_none() {
                        if let Some(name) = service_for_port(result.port) {
                            result = result.with_service(name, PORT_HINT_CONFIDENCE);
                        }
                    }
                    if let Some(tx) = &open_tx {
                        let _ = tx.send(result.port);
                    }
                }
                log::debug!("{}:{} {}", target, result.port, result.state);
                stats.record(&result, technique);
                results.push(result);

                if last_progress.map_or(true, |t| t.elapsed() >= interval) {
                    last_progress = Some(Instant::now());
                    context.publish(ScanProgress::new(target.clone(), results.len(), total_ports));
                }
            }

            context.publish(ScanProgress::new(target, results.len(), total_ports));
            (results, stats)
        })
    }
}

async fn drain<T: 'static>(tasks: &mut JoinSet<T>) {
    while tasks.join_next().await.is_some() {}
}

fn apply_detections(results: &mut [ProbeResult], detections: &HashMap<u16, Detection>) {
    for result in results.iter_mut().filter(|r| r.is_open()) {
        if let Some(detection) = detections.get(&result.port) {
            detection.apply_to(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::PortState;
    use crate::utils::port_spec::PortSpec;
    use crate::utils::target_parser::Target;
    use async_trait::async_trait;

    struct EveryOther;

    #[async_trait]
    impl PortProbe for EveryOther {
        async fn probe(&self, _target: IpAddr, port: u16, _timeout: Duration) -> ProbeResult {
            let state = if port % 2 == 0 { PortState::Open } else { PortState::Closed };
            ProbeResult::new(port, state)
        }

        fn name(&self) -> &'static str {
            "every_other"
        }
    }

    struct Hangs;

    #[async_trait]
    impl PortProbe for Hangs {
        async fn probe(&self, _target: IpAddr, port: u16, _timeout: Duration) -> ProbeResult {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            ProbeResult::new(port, PortState::Open)
        }

        fn name(&self) -> &'static str {
            "hangs"
        }
    }

    fn config(ports: &str) -> ScanConfig {
        ScanConfig::new(Target::new("127.0.0.1").unwrap(), ports.parse::<PortSpec>().unwrap())
    }

    #[tokio::test]
    async fn results_are_sorted_and_hinted() {
        let engine = ScanEngine::with_prober(config("1-40,80,443"), Arc::new(EveryOther)).unwrap();
        let session = engine.scan().await.unwrap();

        let ports: Vec<u16> = session.results().iter().map(|r| r.port).collect();
        let mut expected: Vec<u16> = (1..=40).collect();
        expected.extend([80, 443]);
        assert_eq!(ports, expected);
        assert_eq!(session.state(), SessionState::Completed);

        let http = session.result_for(80).unwrap();
        assert_eq!(http.service.as_deref(), Some("http"));
        assert_eq!(http.confidence, PORT_HINT_CONFIDENCE);
        assert!(session.result_for(21).unwrap().service.is_none());
    }

    #[tokio::test]
    async fn overlong_probes_become_silent_state() {
        let engine = ScanEngine::with_prober(config("9").with_timeout(10), Arc::new(Hangs))
            .unwrap();
        let session = engine.scan().await.unwrap();
        assert_eq!(session.results()[0].state, PortState::Filtered);
    }

    #[tokio::test]
    async fn final_progress_event_reaches_100_percent() {
        let engine = ScanEngine::with_prober(config("1-10"), Arc::new(EveryOther)).unwrap();
        let mut rx = engine.context().subscribe();
        engine.scan().await.unwrap();

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert_eq!(last.unwrap().percent, 100.0);
    }

    #[test]
    fn invalid_config_fails_before_scanning() {
        assert!(ScanEngine::new(config("80").with_concurrency(0)).is_err());
    }
}
