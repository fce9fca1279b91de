//! Single vs hybrid reconnaissance comparison

use crate::config::{HybridSettings, ScanConfig};
use crate::error::ScanResult;
use crate::network::Technique;
use crate::report::{ComparisonReport, ReportKind, SessionRef, Verdict};
use crate::scanner::{ScanContext, ScanEngine, ScanSession};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SERVICE_DELTA: &str = "service_delta";
pub const TIME_OVERHEAD_PCT: &str = "time_overhead_pct";
pub const DETECTION_RISK_DELTA: &str = "detection_risk_delta";

/// Derived comparison figures
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridAdvantage {
    pub service_delta: i64,
    pub time_overhead_pct: f64,
    pub detection_risk_delta: f64,
}

/// Both sessions plus the report derived from them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridOutcome {
    pub single: ScanSession,
    pub hybrid: ScanSession,
    pub advantage: HybridAdvantage,
    pub report: ComparisonReport,
}

/// Compares tcp_connect probing alone against probing plus service detection
#[derive(Debug, Clone)]
pub struct HybridComparator {
    overhead_threshold_pct: f64,
    parallel: bool,
}

impl Default for HybridComparator {
    fn default() -> Self {
        Self::from_settings(&HybridSettings::default())
    }
}

impl HybridComparator {
    pub fn new(overhead_threshold_pct: f64) -> Self {
        Self {
            overhead_threshold_pct,
            parallel: false,
        }
    }

    pub fn from_settings(settings: &HybridSettings) -> Self {
        Self {
            overhead_threshold_pct: settings.overhead_threshold_pct,
            parallel: settings.parallel,
        }
    }

    /// Run both configurations at the same time, each with its own context
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn overhead_threshold_pct(&self) -> f64 {
        self.overhead_threshold_pct
    }

    /// Derive the advantage figures from two finished sessions.
    pub fn advantage(single: &ScanSession, hybrid: &ScanSession) -> HybridAdvantage {
        let single_metrics = single.metrics();
        let hybrid_metrics = hybrid.metrics();
        let service_delta =
            hybrid_metrics.services_identified as i64 - single_metrics.services_identified as i64;
        let time_overhead_pct = if single_metrics.elapsed_secs > 0.0 {
            (hybrid_metrics.elapsed_secs - single_metrics.elapsed_secs)
                / single_metrics.elapsed_secs
                * 100.0
        } else {
            0.0
        };
        HybridAdvantage {
            service_delta,
            time_overhead_pct,
            detection_risk_delta: single_metrics.stealthiness - hybrid_metrics.stealthiness,
        }
    }

    pub fn verdict(&self, advantage: &HybridAdvantage) -> Verdict {
        if advantage.service_delta <= 0 {
            Verdict::SingleSufficient
        } else if advantage.time_overhead_pct <= self.overhead_threshold_pct {
            Verdict::HybridSuperior
        } else {
            Verdict::Inconclusive
        }
    }

    /// Pure comparison of two finished sessions. A cancelled session only
    /// ever yields an inconclusive verdict.
    pub fn evaluate(&self, single: &ScanSession, hybrid: &ScanSession) -> ComparisonReport {
        let advantage = Self::advantage(single, hybrid);
        let verdict = if single.is_cancelled() || hybrid.is_cancelled() {
            Verdict::Inconclusive
        } else {
            self.verdict(&advantage)
        };

        let mut deltas = BTreeMap::new();
        deltas.insert(SERVICE_DELTA.to_string(), advantage.service_delta as f64);
        deltas.insert(TIME_OVERHEAD_PCT.to_string(), advantage.time_overhead_pct);
        deltas.insert(DETECTION_RISK_DELTA.to_string(), advantage.detection_risk_delta);

        let mut warnings = Vec::new();
        for session in [single, hybrid] {
            if session.is_cancelled() {
                warnings.push(format!(
                    "{} session {} was cancelled; figures cover partial results only",
                    session.technique(),
                    session.id()
                ));
            }
        }

        ComparisonReport::new(
            ReportKind::Hybrid,
            vec![SessionRef::from(single), SessionRef::from(hybrid)],
            deltas,
            verdict,
            warnings,
        )
    }

    /// Scan with both configurations and compare.
    ///
    /// `base` supplies target, ports and timing; its technique is overridden.
    pub async fn run(&self, base: &ScanConfig, context: &ScanContext) -> ScanResult<HybridOutcome> {
        let single_engine = ScanEngine::new(base.clone().with_technique(Technique::TcpConnect))?
            .with_context(context.child());
        let hybrid_engine = ScanEngine::new(base.clone().with_technique(Technique::Hybrid))?
            .with_context(context.child());

        let (single, hybrid) = if self.parallel {
            let (single, hybrid) = tokio::join!(single_engine.scan(), hybrid_engine.scan());
            (single?, hybrid?)
        } else {
            let single = single_engine.scan().await?;
            let hybrid = hybrid_engine.scan().await?;
            (single, hybrid)
        };

        let report = self.evaluate(&single, &hybrid);
        let advantage = Self::advantage(&single, &hybrid);
        log::info!(
            "Hybrid comparison for {}: {} ({:+} services, {:.1}% overhead)",
            base.target,
            report.verdict(),
            advantage.service_delta,
            advantage.time_overhead_pct
        );
        Ok(HybridOutcome {
            advantage,
            single,
            hybrid,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_rules() {
        let comparator = HybridComparator::new(25.0);
        let adv = |service_delta, time_overhead_pct| HybridAdvantage {
            service_delta,
            time_overhead_pct,
            detection_risk_delta: 0.0,
        };
        assert_eq!(comparator.verdict(&adv(1, 11.0)), Verdict::HybridSuperior);
        assert_eq!(comparator.verdict(&adv(1, 25.0)), Verdict::HybridSuperior);
        assert_eq!(comparator.verdict(&adv(2, 40.0)), Verdict::Inconclusive);
        assert_eq!(comparator.verdict(&adv(0, 1.0)), Verdict::SingleSufficient);
        assert_eq!(comparator.verdict(&adv(-1, 1.0)), Verdict::SingleSufficient);
    }
}
