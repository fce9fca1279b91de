//! Service detection: banner retrieval plus signature matching on open ports

pub mod banner;
pub mod signatures;

pub use banner::BannerGrabber;
pub use signatures::{match_banner, SignatureMatch};

use crate::error::{ScanError, ScanResult};
use crate::network::ProbeResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Packets one banner exchange puts on the wire: handshake, prompt, teardown
pub const PACKETS_PER_DETECTION: u64 = 5;

/// Service detector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Detections running at once, independent of the probe pool
    pub concurrency: usize,
    /// Upper bound for one banner exchange
    pub banner_timeout_ms: u64,
    /// How long to wait for an unsolicited greeting before prompting
    pub passive_wait_ms: u64,
    pub max_banner_len: usize,
    /// Ports where a TLS handshake is attempted first
    pub tls_ports: Vec<u16>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            concurrency: 20,
            banner_timeout_ms: 1500,
            passive_wait_ms: 800,
            max_banner_len: 200,
            tls_ports: vec![443, 8443],
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> ScanResult<()> {
        if self.concurrency == 0 {
            return Err(ScanError::ConfigError(
                "detector concurrency must be greater than 0".to_string(),
            ));
        }
        if self.banner_timeout_ms == 0 {
            return Err(ScanError::ConfigError(
                "banner timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// What the detector learned about one open port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub port: u16,
    pub service: Option<String>,
    pub version: Option<String>,
    pub banner: Option<String>,
    pub confidence: f64,
}

impl Detection {
    /// Enrich an open result. The banner is always recorded; the service
    /// only replaces an existing one when this detection is at least as
    /// confident.
    pub fn apply_to(&self, result: &mut ProbeResult) {
        if !result.is_open() || result.port != self.port {
            return;
        }
        if self.banner.is_some() {
            result.banner = self.banner.clone();
        }
        if self.service.is_some() && self.confidence >= result.confidence {
            result.service = self.service.clone();
            result.version = self.version.clone();
            result.confidence = self.confidence;
        }
    }
}

/// Second pass over open ports
#[derive(Debug, Clone)]
pub struct ServiceDetector {
    config: DetectorConfig,
    grabber: BannerGrabber,
}

impl ServiceDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let grabber = BannerGrabber::new(
            Duration::from_millis(config.banner_timeout_ms),
            Duration::from_millis(config.passive_wait_ms.min(config.banner_timeout_ms)),
            config.tls_ports.clone(),
        );
        Self { config, grabber }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Detect the service on a single open port
    pub async fn detect(&self, ip: IpAddr, port: u16) -> Detection {
        let raw = self.grabber.grab(ip, port).await;
        let matched = match_banner(port, raw.as_deref());
        let banner = raw
            .as_deref()
            .and_then(|b| banner::sanitize_banner(b, self.config.max_banner_len));
        log::debug!(
            "{}:{} -> {:?} (confidence {:.1})",
            ip,
            port,
            matched.service,
            matched.confidence
        );
        Detection {
            port,
            service: matched.service,
            version: matched.version,
            banner,
            confidence: matched.confidence,
        }
    }

    /// Detect services on a fixed set of open ports
    pub async fn detect_all(&self, ip: IpAddr, ports: &[u16]) -> Vec<Detection> {
        let (tx, rx) = mpsc::unbounded_channel();
        for &port in ports {
            let _ = tx.send(port);
        }
        drop(tx);
        let mut detections: Vec<Detection> = self
            .run_stream(ip, rx, CancellationToken::new())
            .await
            .into_values()
            .collect();
        detections.sort_by_key(|d| d.port);
        detections
    }

    /// Consume open ports as they are discovered until the sender closes.
    ///
    /// Cancellation stops new detections and aborts running ones.
    pub async fn run_stream(
        &self,
        ip: IpAddr,
        mut open_ports: mpsc::UnboundedReceiver<u16>,
        cancel: CancellationToken,
    ) -> HashMap<u16, Detection> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks: JoinSet<Detection> = JoinSet::new();
        let mut detections = HashMap::new();

        loop {
            let port = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Ok(detection) = done {
                        detections.insert(detection.port, detection);
                    }
                    continue;
                }
                next = open_ports.recv() => match next {
                    Some(port) => port,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let detector = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                detector.detect(ip, port).await
            });
        }

        if cancel.is_cancelled() {
            tasks.abort_all();
        }
        while let Some(done) = tasks.join_next().await {
            if let Ok(detection) = done {
                detections.insert(detection.port, detection);
            }
        }
        detections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::PortState;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn detection_keeps_stronger_existing_service() {
        let mut result = ProbeResult::new(8080, PortState::Open).with_service("http-proxy", 0.3);
        let weak = Detection {
            port: 8080,
            service: None,
            version: None,
            banner: Some("hello".into()),
            confidence: 0.0,
        };
        weak.apply_to(&mut result);
        assert_eq!(result.service.as_deref(), Some("http-proxy"));
        assert_eq!(result.banner.as_deref(), Some("hello"));

        let strong = Detection {
            port: 8080,
            service: Some("http".into()),
            version: Some("1.24.0".into()),
            banner: None,
            confidence: 1.0,
        };
        strong.apply_to(&mut result);
        assert_eq!(result.service.as_deref(), Some("http"));
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn closed_ports_are_never_enriched() {
        let mut result = ProbeResult::new(22, PortState::Closed);
        Detection {
            port: 22,
            service: Some("ssh".into()),
            version: None,
            banner: None,
            confidence: 0.8,
        }
        .apply_to(&mut result);
        assert!(result.service.is_none());
    }

    #[tokio::test]
    async fn detects_ssh_greeting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let _ = sock.write_all(b"SSH-2.0-OpenSSH_9.6p1\r\n").await;
            }
        });

        let detector = ServiceDetector::new(DetectorConfig::default());
        let detections = detector.detect_all("127.0.0.1".parse().unwrap(), &[port]).await;
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].service.as_deref(), Some("ssh"));
        assert_eq!(detections[0].version.as_deref(), Some("9.6p1"));
        assert_eq!(detections[0].confidence, 1.0);
        assert_eq!(detections[0].banner.as_deref(), Some("SSH-2.0-OpenSSH_9.6p1"));
    }

    #[test]
    fn zero_concurrency_is_invalid() {
        let config = DetectorConfig {
            concurrency: 0,
            ..DetectorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
