//! Structured extraction from free-form model output.
//!
//! Models wrap JSON in prose or code fences more often than not, so every
//! parser here first tries the whole text and then the span from the first
//! `{` to the last `}`. Field names accept the common variants models use.

use jurisnexus_core::{Clause, ClauseFinding, MemoSection, Provenance, RiskItem, Severity};
use serde_json::Value;

/// Parse the JSON object embedded in `text`, if any.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}

fn str_field<'a>(v: &'a Value, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|n| v.get(*n).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn id_field(v: &Value, names: &[&str]) -> Option<String> {
    names.iter().find_map(|n| match v.get(*n)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn severity_field(v: &Value) -> Severity {
    str_field(v, &["severity", "risk_level", "level"])
        .and_then(Severity::parse)
        .unwrap_or(Severity::Medium)
}

fn risk_item(v: &Value, added_by_review: bool) -> Option<RiskItem> {
    let description = str_field(v, &["risk_description", "description", "risk"])?;
    Some(RiskItem {
        description: description.to_string(),
        severity: severity_field(v),
        legal_basis: str_field(v, &["legal_basis", "basis", "law"]).map(String::from),
        recommendation: str_field(v, &["recommendation", "suggestion", "fix"])
            .unwrap_or_default()
            .to_string(),
        added_by_review,
    })
}

/// Clause-keyed findings from a `{"analysis": [...]}` document.
///
/// Returns `None` when no findings array can be located. Clause text comes
/// from the model when present, otherwise from the matching detected clause.
pub fn parse_risk_findings(
    value: &Value,
    clauses: &[Clause],
    provenance: Provenance,
) -> Option<Vec<ClauseFinding>> {
    let entries = ["analysis", "findings", "clauses"]
        .iter()
        .find_map(|k| value.get(*k).and_then(Value::as_array))?;
    let findings = entries
        .iter()
        .filter_map(|entry| {
            let clause_id = id_field(entry, &["clause_id", "id", "clause"])?;
            let clause_text = str_field(entry, &["clause_text", "text"])
                .map(String::from)
                .or_else(|| {
                    clauses
                        .iter()
                        .find(|c| c.id == clause_id)
                        .map(|c| c.text.clone())
                });
            let risks = entry
                .get("risks")
                .and_then(Value::as_array)
                .map(|rs| rs.iter().filter_map(|r| risk_item(r, false)).collect())
                .unwrap_or_default();
            Some(ClauseFinding {
                clause_id,
                clause_text,
                risks,
                provenance,
            })
        })
        .collect();
    Some(findings)
}

/// Sections from a `{"sections": [{"heading", "body"}]}` document.
pub fn parse_sections(value: &Value) -> Option<Vec<MemoSection>> {
    let sections: Vec<MemoSection> = value
        .get("sections")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|s| {
            let body = str_field(s, &["body", "content", "text"])?;
            Some(MemoSection {
                heading: str_field(s, &["heading", "title"]).unwrap_or_default().to_string(),
                body: body.to_string(),
            })
        })
        .collect();
    (!sections.is_empty()).then_some(sections)
}

/// A risk the reviewer says the draft missed.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingRisk {
    pub clause_id: Option<String>,
    pub risk: RiskItem,
}

/// Parsed tier-2 review.
#[derive(Debug, Clone, PartialEq)]
pub struct Critique {
    /// Clamped to 1–10.
    pub quality_score: Option<u8>,
    pub feedback: String,
    pub missing_risks: Vec<MissingRisk>,
    pub needs_improvement: bool,
    /// Reviewer's improved version, in the draft's own format.
    pub revised: Option<Value>,
}

impl Critique {
    /// Parse a review. Text without a JSON object is kept as unscored feedback.
    pub fn parse(text: &str) -> Self {
        let Some(v) = extract_json(text) else {
            return Self {
                quality_score: None,
                feedback: text.trim().to_string(),
                missing_risks: Vec::new(),
                needs_improvement: false,
                revised: None,
            };
        };

        let quality_score = ["quality_score", "overall_score", "score"]
            .iter()
            .find_map(|k| v.get(*k).and_then(Value::as_f64))
            .map(|s| s.round().clamp(1.0, 10.0) as u8);
        let missing_risks = v
            .get("missing_risks")
            .and_then(Value::as_array)
            .map(|rs| {
                rs.iter()
                    .filter_map(|r| {
                        Some(MissingRisk {
                            clause_id: id_field(r, &["clause_id", "id"]),
                            risk: risk_item(r, true)?,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let revised = ["revised", "revised_answer", "improved_analysis", "analysis"]
            .iter()
            .find_map(|k| v.get(*k))
            .filter(|r| !r.is_null())
            .map(|r| match r {
                Value::Array(_) => serde_json::json!({ "analysis": r }),
                other => other.clone(),
            });

        Self {
            quality_score,
            feedback: str_field(&v, &["feedback", "comments", "assessment"])
                .unwrap_or_default()
                .to_string(),
            missing_risks,
            needs_improvement: v
                .get("needs_improvement")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            revised,
        }
    }
}
