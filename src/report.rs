//! Comparison reports produced by the benchmark and hybrid comparators

use crate::network::Technique;
use crate::scanner::ScanSession;
use crate::utils::target_parser::Target;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Which comparison produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Benchmark,
    Hybrid,
}

/// Outcome of a comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "verdict")]
pub enum Verdict {
    HybridSuperior,
    SingleSufficient,
    Inconclusive,
    Winner { tool: String },
    NoResults,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::HybridSuperior => write!(f, "hybrid_superior"),
            Verdict::SingleSufficient => write!(f, "single_sufficient"),
            Verdict::Inconclusive => write!(f, "inconclusive"),
            Verdict::Winner { tool } => write!(f, "winner: {}", tool),
            Verdict::NoResults => write!(f, "no_results"),
        }
    }
}

/// A session referenced from a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRef {
    pub id: Uuid,
    pub tool: String,
    pub technique: Technique,
    pub target: Target,
}

impl From<&ScanSession> for SessionRef {
    fn from(session: &ScanSession) -> Self {
        Self {
            id: session.id(),
            tool: session.tool().to_string(),
            technique: session.technique(),
            target: session.target().clone(),
        }
    }
}

/// Immutable result of comparing finished sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    id: Uuid,
    kind: ReportKind,
    created_at: DateTime<Utc>,
    sessions: Vec<SessionRef>,
    deltas: BTreeMap<String, f64>,
    verdict: Verdict,
    warnings: Vec<String>,
}

impl ComparisonReport {
    pub fn new(
        kind: ReportKind,
        sessions: Vec<SessionRef>,
        deltas: BTreeMap<String, f64>,
        verdict: Verdict,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            created_at: Utc::now(),
            sessions,
            deltas,
            verdict,
            warnings,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> ReportKind {
        self.kind
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn sessions(&self) -> &[SessionRef] {
        &self.sessions
    }

    pub fn deltas(&self) -> &BTreeMap<String, f64> {
        &self.deltas
    }

    pub fn delta(&self, name: &str) -> Option<f64> {
        self.deltas.get(name).copied()
    }

    pub fn verdict(&self) -> &Verdict {
        &self.verdict
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}
