//! The capability every model backend provides, live or simulated.

use async_trait::async_trait;
use jurisnexus_core::{TaskType, Tier};

use crate::CallError;

/// Everything a backend needs to produce one completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub prompt: String,
    pub task_type: TaskType,
    pub tier: Tier,
    /// Clause ids the response should be keyed by. Used only by simulated backends.
    pub clause_ids: Vec<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ModelRequest {
    pub fn new(prompt: impl Into<String>, task_type: TaskType, tier: Tier) -> Self {
        Self {
            prompt: prompt.into(),
            task_type,
            tier,
            clause_ids: Vec::new(),
            max_tokens: 4_096,
            temperature: 0.3,
        }
    }

    pub fn with_clause_ids(mut self, clause_ids: Vec<String>) -> Self {
        self.clause_ids = clause_ids;
        self
    }
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    /// `true` for backends that never call a real model.
    fn is_simulated(&self) -> bool {
        false
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String, CallError>;
}
