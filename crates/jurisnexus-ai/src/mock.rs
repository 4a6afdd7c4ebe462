//! Deterministic stand-in for a real model.
//!
//! Output depends only on the request's task type, tier, and clause ids, and
//! every text field starts with [`MOCK_TAG`] so simulated output cannot be
//! mistaken for a genuine analysis.

use async_trait::async_trait;
use jurisnexus_core::{TaskType, Tier};
use serde_json::{Value, json};

use crate::CallError;
use crate::backend::{ModelBackend, ModelRequest};

pub const MOCK_TAG: &str = "[MOCK]";

#[derive(Debug, Clone, Copy, Default)]
pub struct MockBackend;

impl MockBackend {
    pub fn respond(&self, request: &ModelRequest) -> String {
        let value = match request.tier {
            Tier::Tier1 => draft(request),
            Tier::Tier2 => review(request),
        };
        match value {
            Value::String(s) => s,
            other => other.to_string(),
        }
    }
}

fn draft(request: &ModelRequest) -> Value {
    match request.task_type {
        TaskType::ContractRisk => {
            let analysis: Vec<Value> = request
                .clause_ids
                .iter()
                .map(|id| {
                    json!({
                        "clause_id": id,
                        "risks": [{
                            "risk_description": format!("{MOCK_TAG} simulated risk for clause {id}; no model was called"),
                            "severity": "medium",
                            "legal_basis": format!("{MOCK_TAG} no legal basis cited"),
                            "recommendation": format!("{MOCK_TAG} have a lawyer review clause {id}"),
                        }],
                    })
                })
                .collect();
            json!({ "analysis": analysis })
        }
        TaskType::Consultation => Value::String(format!(
            "{MOCK_TAG} Simulated answer. The model backend is unavailable, so this reply is a placeholder and not legal advice."
        )),
        TaskType::Drafting | TaskType::Litigation | TaskType::Research => json!({
            "sections": [
                {
                    "heading": format!("{MOCK_TAG} {}", request.task_type),
                    "body": format!("{MOCK_TAG} Simulated {} output; no model was called.", request.task_type),
                }
            ]
        }),
    }
}

fn review(_request: &ModelRequest) -> Value {
    json!({
        "quality_score": 7,
        "feedback": format!("{MOCK_TAG} Simulated review; the draft was not assessed by a model."),
        "missing_risks": [],
        "needs_improvement": false,
    })
}

#[async_trait]
impl ModelBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn is_simulated(&self) -> bool {
        true
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String, CallError> {
        Ok(self.respond(request))
    }
}
