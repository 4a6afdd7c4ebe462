//! Multi-turn consultation sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::result::PipelineResult;

/// One user message and the pipeline run that answered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub turn_index: usize,
    pub user_message: String,
    pub result: PipelineResult,
}

impl Turn {
    pub fn reply(&self) -> String {
        self.result.merged_output.reply_text()
    }
}

/// Ordered turns. Appends only; context is always the most recent turns in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub session_id: String,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// Set by an explicit close; sessions are never expired implicitly.
    pub closed_at: Option<DateTime<Utc>>,
}

impl ConversationSession {
    pub fn new() -> Self {
        Self::with_id(format!("sess_{}", Uuid::new_v4().simple()))
    }

    pub fn with_id(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            turns: Vec::new(),
            created_at: now,
            last_active_at: now,
            closed_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    /// Append a completed exchange and return the stored turn.
    pub fn push(&mut self, user_message: impl Into<String>, result: PipelineResult) -> &Turn {
        self.last_active_at = result.finalized_at.max(self.last_active_at);
        self.turns.push(Turn {
            turn_index: self.turns.len(),
            user_message: user_message.into(),
            result,
        });
        &self.turns[self.turns.len() - 1]
    }

    /// The last `window` turns, oldest first.
    pub fn recent(&self, window: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(window);
        &self.turns[start..]
    }

    /// Context block for the next prompt: the last `window` turns as
    /// `User:` / `Assistant:` lines. Empty when there is no history.
    pub fn context(&self, window: usize) -> String {
        self.recent(window)
            .iter()
            .map(|t| format!("User: {}\nAssistant: {}", t.user_message, t.reply()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{Answer, CallStatus, MergedOutput, ModelCallRecord, Outcome, Provenance};
    use crate::task::{TaskType, Tier};

    fn answered(text: &str) -> PipelineResult {
        let now = Utc::now();
        PipelineResult {
            task_id: format!("task_{text}"),
            task_type: TaskType::Consultation,
            tier1_record: ModelCallRecord {
                tier: Tier::Tier1,
                template_id: "t@v1".into(),
                prompt_text: String::new(),
                response_text: Some(text.into()),
                error: None,
                latency_ms: 0,
                status: CallStatus::Ok,
                attempts: 1,
                cached: false,
                started_at: now,
            },
            tier2_record: None,
            merged_output: MergedOutput::Answer(Answer {
                text: text.into(),
                provenance: Provenance::Model,
                review: None,
            }),
            outcome: Outcome::Success,
            quality_score: None,
            notices: Vec::new(),
            started_at: now,
            finalized_at: now,
        }
    }

    #[test]
    fn context_keeps_last_turns_in_order() {
        let mut s = ConversationSession::new();
        for i in 0..5 {
            s.push(format!("q{i}"), answered(&format!("a{i}")));
        }
        assert_eq!(
            s.context(2),
            "User: q3\nAssistant: a3\nUser: q4\nAssistant: a4"
        );
        assert_eq!(s.recent(10).len(), 5);
        assert_eq!(s.turns[4].turn_index, 4);
    }

    #[test]
    fn empty_session_has_empty_context() {
        let s = ConversationSession::new();
        assert_eq!(s.context(6), "");
        assert!(s.session_id.starts_with("sess_"));
        assert!(!s.is_closed());
    }
}
