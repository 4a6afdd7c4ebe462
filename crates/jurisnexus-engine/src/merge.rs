//! The MERGING stage: model text in, the task's structured output out.
//!
//! The draft is always extracted first. A usable review then either
//! replaces it with the reviewer's revised version (when the reviewer asks
//! for improvement and supplies one that parses) or is folded into it as
//! added risks and an attached [`Review`]. An unusable review leaves the
//! draft extraction untouched.

use jurisnexus_ai::{Critique, MOCK_TAG, MissingRisk, extract_json};
use jurisnexus_ai::extract::{parse_risk_findings, parse_sections};
use jurisnexus_core::{
    Answer, Clause, ClauseFinding, FailureNotice, Memo, MemoSection, MergedOutput,
    ModelCallRecord, Provenance, Review, RiskReport, RiskSummary, TaskType,
};
use serde_json::Value;

/// Result of the MERGING stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    pub output: MergedOutput,
    pub quality_score: Option<u8>,
    pub notices: Vec<String>,
}

/// Structured form of a tier-1 draft on its own.
///
/// Never fails: text that does not parse into the expected shape is kept
/// as a narrative, a plain answer, or a single untitled section.
pub fn draft_output(
    task_type: TaskType,
    text: &str,
    clauses: &[Clause],
    provenance: Provenance,
) -> MergedOutput {
    let json = extract_json(text);
    match task_type {
        TaskType::ContractRisk => {
            match json.and_then(|v| parse_risk_findings(&v, clauses, provenance)) {
                Some(findings) => risk_report(findings, None),
                None => risk_report(Vec::new(), Some(text.trim().to_string())),
            }
        }
        TaskType::Consultation => MergedOutput::Answer(Answer {
            text: json
                .as_ref()
                .and_then(answer_field)
                .unwrap_or_else(|| text.trim().to_string()),
            provenance,
            review: None,
        }),
        TaskType::Drafting | TaskType::Litigation | TaskType::Research => {
            let sections = json.as_ref().and_then(parse_sections).unwrap_or_else(|| {
                vec![MemoSection {
                    heading: String::new(),
                    body: text.trim().to_string(),
                }]
            });
            MergedOutput::Memo(Memo {
                sections,
                provenance,
                review: None,
            })
        }
    }
}

/// The reviewer's revised version, if it parses into the task's shape.
fn refined_output(
    task_type: TaskType,
    revised: &Value,
    clauses: &[Clause],
    provenance: Provenance,
) -> Option<MergedOutput> {
    match task_type {
        TaskType::ContractRisk => parse_risk_findings(revised, clauses, provenance)
            .filter(|f| !f.is_empty())
            .map(|f| risk_report(f, None)),
        TaskType::Consultation => revised
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| answer_field(revised))
            .map(|text| {
                MergedOutput::Answer(Answer {
                    text,
                    provenance,
                    review: None,
                })
            }),
        TaskType::Drafting | TaskType::Litigation | TaskType::Research => {
            parse_sections(revised).map(|sections| {
                MergedOutput::Memo(Memo {
                    sections,
                    provenance,
                    review: None,
                })
            })
        }
    }
}

fn answer_field(v: &Value) -> Option<String> {
    ["answer", "text", "response"]
        .iter()
        .find_map(|k| v.get(*k).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn risk_report(findings: Vec<ClauseFinding>, narrative: Option<String>) -> MergedOutput {
    MergedOutput::RiskFindings(RiskReport {
        summary: RiskSummary::from_findings(&findings),
        findings,
        narrative,
        review: None,
    })
}

/// Add reviewer-found risks to the clause they name, or as a new finding.
fn fold_missing_risks(
    output: &mut MergedOutput,
    missing: &[MissingRisk],
    clauses: &[Clause],
    provenance: Provenance,
) {
    let MergedOutput::RiskFindings(report) = output else {
        return;
    };
    for m in missing {
        let clause_id = m.clause_id.clone().unwrap_or_else(|| "general".to_string());
        match report.findings.iter_mut().find(|f| f.clause_id == clause_id) {
            Some(finding) => finding.risks.push(m.risk.clone()),
            None => report.findings.push(ClauseFinding {
                clause_text: clauses
                    .iter()
                    .find(|c| c.id == clause_id)
                    .map(|c| c.text.clone()),
                clause_id,
                risks: vec![m.risk.clone()],
                provenance,
            }),
        }
    }
    report.summary = RiskSummary::from_findings(&report.findings);
}

fn attach_review(output: &mut MergedOutput, review: Review) {
    match output {
        MergedOutput::RiskFindings(r) => r.review = Some(review),
        MergedOutput::Answer(a) => a.review = Some(review),
        MergedOutput::Memo(m) => m.review = Some(review),
        MergedOutput::Failure(_) => {}
    }
}

/// Labelled failure output for a run that could not produce a draft.
pub fn failure(stage: &str, record: &ModelCallRecord) -> MergedOutput {
    MergedOutput::Failure(FailureNotice {
        stage: stage.to_string(),
        reason: record
            .error
            .clone()
            .unwrap_or_else(|| format!("{} returned no usable text", record.tier)),
    })
}

/// Merge a usable draft with an optional review.
pub fn merge(
    task_type: TaskType,
    clauses: &[Clause],
    draft: &ModelCallRecord,
    review: Option<&ModelCallRecord>,
) -> Merged {
    let mut output = draft_output(
        task_type,
        draft.text().unwrap_or_default(),
        clauses,
        draft.provenance(),
    );
    let mut quality_score = None;
    let mut notices = Vec::new();

    match review {
        None => {}
        Some(r) if !r.is_usable() => notices.push(format!(
            "tier-2 review unavailable ({}); showing the unrefined tier-1 analysis",
            r.error.as_deref().unwrap_or("no usable response")
        )),
        Some(r) => {
            let critique = Critique::parse(r.text().unwrap_or_default());
            let provenance = r.provenance();
            quality_score = critique.quality_score;
            let refined = critique
                .revised
                .as_ref()
                .filter(|_| critique.needs_improvement)
                .and_then(|v| refined_output(task_type, v, clauses, provenance));
            let was_refined = refined.is_some();
            match refined {
                Some(refined) => output = refined,
                None => fold_missing_risks(&mut output, &critique.missing_risks, clauses, provenance),
            }
            attach_review(
                &mut output,
                Review {
                    quality_score,
                    feedback: critique.feedback,
                    needs_improvement: critique.needs_improvement,
                    refined: was_refined,
                    provenance,
                },
            );
        }
    }

    for record in std::iter::once(draft).chain(review).filter(|r| r.is_mocked()) {
        notices.push(format!(
            "{MOCK_TAG} {} output is simulated; no model was called",
            record.tier
        ));
    }

    Merged {
        output,
        quality_score,
        notices,
    }
}
