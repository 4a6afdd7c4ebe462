//! Model call records and the finalized result of a pipeline run.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{TaskType, Tier};

/// Status of one model invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Ok,
    Timeout,
    Error,
    /// Synthesised by the deterministic stub instead of calling the network.
    Mocked,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Timeout => "timeout",
            Self::Error => "error",
            Self::Mocked => "mocked",
        }
    }
}

/// One model invocation. Append-only; owned by the run that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCallRecord {
    pub tier: Tier,
    pub template_id: String,
    pub prompt_text: String,
    pub response_text: Option<String>,
    pub error: Option<String>,
    pub latency_ms: u64,
    pub status: CallStatus,
    /// Network attempts made; zero for mocked, cached, or unrendered calls.
    pub attempts: u32,
    pub cached: bool,
    pub started_at: DateTime<Utc>,
}

impl ModelCallRecord {
    /// `true` when the call produced text the pipeline can use.
    pub fn is_usable(&self) -> bool {
        matches!(self.status, CallStatus::Ok | CallStatus::Mocked) && self.response_text.is_some()
    }

    pub fn is_mocked(&self) -> bool {
        self.status == CallStatus::Mocked
    }

    pub fn text(&self) -> Option<&str> {
        self.response_text.as_deref()
    }

    pub fn provenance(&self) -> Provenance {
        if self.is_mocked() {
            Provenance::Mocked
        } else {
            Provenance::Model
        }
    }
}

/// Whether a piece of merged output came from a real model or the stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Model,
    Mocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Lenient parse of model-provided severity labels (English or Chinese).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "high" | "critical" | "severe" | "高" | "高風險" | "高风险" => Some(Self::High),
            "medium" | "moderate" | "med" | "中" | "中風險" | "中风险" => Some(Self::Medium),
            "low" | "minor" | "低" | "低風險" | "低风险" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskItem {
    pub description: String,
    pub severity: Severity,
    pub legal_basis: Option<String>,
    pub recommendation: String,
    /// Risk surfaced by the tier-2 review rather than the tier-1 draft.
    #[serde(default)]
    pub added_by_review: bool,
}

/// All risks found in one clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClauseFinding {
    pub clause_id: String,
    pub clause_text: Option<String>,
    pub risks: Vec<RiskItem>,
    pub provenance: Provenance,
}

impl ClauseFinding {
    /// Highest severity among this clause's risks.
    pub fn severity(&self) -> Option<Severity> {
        self.risks.iter().map(|r| r.severity).max()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub overall: String,
}

impl RiskSummary {
    pub fn from_findings(findings: &[ClauseFinding]) -> Self {
        let (mut high, mut medium, mut low) = (0, 0, 0);
        for risk in findings.iter().flat_map(|f| &f.risks) {
            match risk.severity {
                Severity::High => high += 1,
                Severity::Medium => medium += 1,
                Severity::Low => low += 1,
            }
        }
        let level = if high > 0 {
            "high"
        } else if medium > 0 {
            "medium"
        } else if low > 0 {
            "low"
        } else {
            "none"
        };
        Self {
            high,
            medium,
            low,
            overall: format!(
                "{high} high, {medium} medium, {low} low risk items; overall risk level: {level}"
            ),
        }
    }
}

/// Tier-2 verdict on the tier-1 draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// 1–10 as reported by the reviewing model.
    pub quality_score: Option<u8>,
    pub feedback: String,
    pub needs_improvement: bool,
    /// The merged output carries the reviewer's refined version.
    pub refined: bool,
    pub provenance: Provenance,
}

/// Clause-keyed risk findings for `contract_risk`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskReport {
    pub findings: Vec<ClauseFinding>,
    pub summary: RiskSummary,
    /// Raw model text kept when no structured findings could be extracted.
    pub narrative: Option<String>,
    pub review: Option<Review>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub provenance: Provenance,
    pub review: Option<Review>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoSection {
    pub heading: String,
    pub body: String,
}

/// Sectioned output for drafting, litigation, and research tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memo {
    pub sections: Vec<MemoSection>,
    pub provenance: Provenance,
    pub review: Option<Review>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNotice {
    pub stage: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergedOutput {
    RiskFindings(RiskReport),
    Answer(Answer),
    Memo(Memo),
    Failure(FailureNotice),
}

impl MergedOutput {
    /// Short plain-text rendering, used as the assistant side of a conversation turn.
    pub fn reply_text(&self) -> String {
        match self {
            Self::Answer(a) => a.text.clone(),
            Self::RiskFindings(r) => match &r.narrative {
                Some(n) if r.findings.is_empty() => n.clone(),
                _ => r.summary.overall.clone(),
            },
            Self::Memo(m) => m
                .sections
                .iter()
                .map(|s| {
                    if s.heading.is_empty() {
                        s.body.clone()
                    } else {
                        format!("{}: {}", s.heading, s.body)
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Self::Failure(f) => format!("[analysis failed at {}] {}", f.stage, f.reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    PartialTier2Failure,
    FullMock,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialTier2Failure => "partial_tier2_failure",
            Self::FullMock => "full_mock",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finalized output of one pipeline run. Built exactly once, never reopened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub task_id: String,
    pub task_type: TaskType,
    pub tier1_record: ModelCallRecord,
    pub tier2_record: Option<ModelCallRecord>,
    pub merged_output: MergedOutput,
    pub outcome: Outcome,
    pub quality_score: Option<u8>,
    /// Human-readable labels for degraded results (fallbacks, mock mode).
    pub notices: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finalized_at: DateTime<Utc>,
}

impl PipelineResult {
    pub fn records(&self) -> impl Iterator<Item = &ModelCallRecord> {
        std::iter::once(&self.tier1_record).chain(self.tier2_record.as_ref())
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finalized_at - self.started_at).num_milliseconds()
    }
}
