//! Analysis tasks and the document profile that travels with them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CoreError;
use crate::clause::split_into_clauses;

/// The legal task a pipeline run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ContractRisk,
    Consultation,
    Drafting,
    Litigation,
    Research,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        Self::ContractRisk,
        Self::Consultation,
        Self::Drafting,
        Self::Litigation,
        Self::Research,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContractRisk => "contract_risk",
            Self::Consultation => "consultation",
            Self::Drafting => "drafting",
            Self::Litigation => "litigation",
            Self::Research => "research",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| CoreError::UnknownTaskType(s.to_string()))
    }
}

/// Which model in the pipeline: tier 1 drafts, tier 2 critiques and refines.
///
/// Serialised as the bare number `1` or `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Tier {
    Tier1,
    Tier2,
}

impl Tier {
    pub fn number(&self) -> u8 {
        match self {
            Self::Tier1 => 1,
            Self::Tier2 => 2,
        }
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> u8 {
        tier.number()
    }
}

impl TryFrom<u8> for Tier {
    type Error = CoreError;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        match n {
            1 => Ok(Self::Tier1),
            2 => Ok(Self::Tier2),
            other => Err(CoreError::UnknownTier(other)),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier{}", self.number())
    }
}

/// Shape of the incoming document, supplied by ingestion or derived from text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentProfile {
    /// `zh` or `en`; free-form for callers that know better.
    pub language: String,
    /// Length in characters.
    pub length: usize,
    pub clause_count: usize,
}

impl DocumentProfile {
    pub fn new(language: impl Into<String>, length: usize, clause_count: usize) -> Self {
        Self {
            language: language.into(),
            length,
            clause_count,
        }
    }

    /// Derive a profile from plain text.
    ///
    /// Language is `zh` when at least 30% of non-whitespace characters are CJK.
    pub fn from_text(text: &str) -> Self {
        let mut total = 0usize;
        let mut cjk = 0usize;
        for c in text.chars().filter(|c| !c.is_whitespace()) {
            total += 1;
            if is_cjk(c) {
                cjk += 1;
            }
        }
        let language = if total > 0 && cjk * 10 >= total * 3 {
            "zh"
        } else {
            "en"
        };
        Self {
            language: language.to_string(),
            length: text.chars().count(),
            clause_count: split_into_clauses(text).len(),
        }
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF)
}

/// One unit of work for the orchestrator. Immutable once dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisTask {
    pub task_id: String,
    pub task_type: TaskType,
    pub input_text: String,
    pub document_profile: DocumentProfile,
}

impl AnalysisTask {
    pub fn new(task_type: TaskType, input_text: impl Into<String>, profile: DocumentProfile) -> Self {
        Self {
            task_id: format!("task_{}", Uuid::new_v4().simple()),
            task_type,
            input_text: input_text.into(),
            document_profile: profile,
        }
    }

    /// Build a task whose profile is derived from the text itself.
    pub fn from_text(task_type: TaskType, input_text: impl Into<String>) -> Self {
        let input_text = input_text.into();
        let profile = DocumentProfile::from_text(&input_text);
        Self::new(task_type, input_text, profile)
    }
}
