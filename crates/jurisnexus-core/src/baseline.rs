//! Built-in prompt templates: one per task type and tier.
//!
//! These seed an empty template store and are the last-resort fallback of
//! template selection, so they must always render with the standard
//! parameter set (see [`TIER1_PARAMS`] and [`TIER2_PARAMS`]).

use crate::task::{TaskType, Tier};
use crate::template::{PromptTemplate, baseline_lineage};

/// Parameters the orchestrator supplies to every tier-1 template.
pub const TIER1_PARAMS: [&str; 7] = [
    "task_type",
    "language",
    "document",
    "clauses",
    "clause_count",
    "conversation",
    "question",
];

/// Parameters supplied to tier-2 templates: tier-1's set plus the draft.
pub const TIER2_PARAMS: [&str; 8] = [
    "task_type",
    "language",
    "document",
    "clauses",
    "clause_count",
    "conversation",
    "question",
    "draft",
];

const RISK_TIER1: &str = r#"You are a contract lawyer. Identify the legal risks in each clause of the {language} contract below.

Clauses ({clause_count}):
{clauses}

Full text:
{document}

Reply with JSON only:
{
  "analysis": [
    {
      "clause_id": "clause identifier",
      "clause_text": "clause text",
      "risks": [
        {
          "risk_description": "what can go wrong",
          "severity": "high | medium | low",
          "legal_basis": "statute or doctrine",
          "recommendation": "how to fix the clause"
        }
      ]
    }
  ]
}
"#;

const CONSULT_TIER1: &str = r#"You are a legal adviser answering a client in {language}.

Earlier conversation:
{conversation}

Question:
{question}

Answer plainly, cite the governing law where you can, and say what the client should do next.
"#;

const DRAFTING_TIER1: &str = r#"You are drafting a legal document in {language} from the instructions below.

Instructions:
{document}

Reply with JSON only:
{"sections": [{"heading": "section heading", "body": "section text"}]}
"#;

const LITIGATION_TIER1: &str = r#"You are preparing a litigation strategy memo in {language} for the matter below.

Matter:
{document}

Cover the claims and defences, the evidence needed, procedural risks, and a recommended course of action.
Reply with JSON only:
{"sections": [{"heading": "section heading", "body": "section text"}]}
"#;

const RESEARCH_TIER1: &str = r#"You are a legal researcher. Write a research memo in {language} on the question below.

Question:
{question}

Cover the applicable statutes, leading cases, open issues, and a conclusion.
Reply with JSON only:
{"sections": [{"heading": "section heading", "body": "section text"}]}
"#;

const REVIEW_FORMAT: &str = r#"Reply with JSON only:
{
  "quality_score": 1-10,
  "feedback": "overall assessment",
  "missing_risks": [
    {"clause_id": "clause identifier", "risk_description": "missed risk", "severity": "high | medium | low", "recommendation": "fix"}
  ],
  "needs_improvement": true,
  "revised": "optional improved version in the same format as the draft"
}
"#;

fn review_body(task_label: &str, source_block: &str) -> String {
    format!(
        "You are a senior lawyer reviewing a junior colleague's {task_label} ({{task_type}}, {{language}}).\n\n\
         {source_block}\n\nDraft:\n{{draft}}\n\n\
         Check accuracy, missed issues, and whether the conclusions follow from the law.\n\
         If the draft needs work, include a revised version.\n\n{REVIEW_FORMAT}"
    )
}

fn body(task_type: TaskType, tier: Tier) -> String {
    match (task_type, tier) {
        (TaskType::ContractRisk, Tier::Tier1) => RISK_TIER1.to_string(),
        (TaskType::Consultation, Tier::Tier1) => CONSULT_TIER1.to_string(),
        (TaskType::Drafting, Tier::Tier1) => DRAFTING_TIER1.to_string(),
        (TaskType::Litigation, Tier::Tier1) => LITIGATION_TIER1.to_string(),
        (TaskType::Research, Tier::Tier1) => RESEARCH_TIER1.to_string(),
        (TaskType::ContractRisk, Tier::Tier2) => review_body(
            "contract risk analysis",
            "Contract clauses ({clause_count}):\n{clauses}",
        ),
        (TaskType::Consultation, Tier::Tier2) => review_body(
            "answer to a client",
            "Earlier conversation:\n{conversation}\n\nQuestion:\n{question}",
        ),
        (TaskType::Drafting, Tier::Tier2) => {
            review_body("drafted document", "Instructions:\n{document}")
        }
        (TaskType::Litigation, Tier::Tier2) => {
            review_body("litigation strategy memo", "Matter:\n{document}")
        }
        (TaskType::Research, Tier::Tier2) => {
            review_body("research memo", "Question:\n{question}")
        }
    }
}

/// The built-in template for `(task_type, tier)`, version 1 of its baseline lineage.
pub fn baseline(task_type: TaskType, tier: Tier) -> PromptTemplate {
    let mut template = PromptTemplate::root(
        baseline_lineage(task_type, tier),
        task_type,
        tier,
        body(task_type, tier),
    );
    template.change_note = Some("built-in baseline".to_string());
    template
}

/// Every built-in template.
pub fn all_baselines() -> Vec<PromptTemplate> {
    TaskType::ALL
        .into_iter()
        .flat_map(|t| [baseline(t, Tier::Tier1), baseline(t, Tier::Tier2)])
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn every_baseline_renders_with_standard_params() {
        for template in all_baselines() {
            let names: &[&str] = match template.tier {
                Tier::Tier1 => &TIER1_PARAMS,
                Tier::Tier2 => &TIER2_PARAMS,
            };
            let params: HashMap<&str, String> =
                names.iter().map(|n| (*n, format!("<{n}>"))).collect();
            let rendered = template
                .render(&params)
                .unwrap_or_else(|e| panic!("{} failed: {e}", template.template_id));
            assert!(!rendered.contains("{draft}"));
        }
    }

    #[test]
    fn tier2_baselines_include_draft() {
        for t in TaskType::ALL {
            assert!(baseline(t, Tier::Tier2).placeholders().contains("draft"));
            assert!(!baseline(t, Tier::Tier1).placeholders().contains("draft"));
        }
    }

    #[test]
    fn ten_distinct_baselines() {
        let all = all_baselines();
        assert_eq!(all.len(), 10);
        let ids: std::collections::BTreeSet<_> = all.iter().map(|t| &t.template_id).collect();
        assert_eq!(ids.len(), 10);
        assert!(ids.contains(&"research.tier1.baseline@v1".to_string()));
    }
}
