//! Session log: conversation turns persisted as events so a later process
//! can pick a session up where the last one left off.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use jurisnexus_core::{ConversationSession, Turn};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::StoreError;
use crate::log::{AppendLog, Keyed, MemoryLog};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Opened {
        session_id: String,
        at: DateTime<Utc>,
    },
    Turn {
        session_id: String,
        turn: Box<Turn>,
    },
    Closed {
        session_id: String,
        at: DateTime<Utc>,
    },
    /// Drops the session and its history from every later replay.
    Deleted {
        session_id: String,
        at: DateTime<Utc>,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Opened { session_id, .. }
            | Self::Turn { session_id, .. }
            | Self::Closed { session_id, .. }
            | Self::Deleted { session_id, .. } => session_id,
        }
    }
}

impl Keyed for SessionEvent {
    fn key(&self) -> &str {
        self.session_id()
    }
}

pub struct SessionLog {
    log: Box<dyn AppendLog<SessionEvent>>,
}

impl SessionLog {
    pub fn new(log: Box<dyn AppendLog<SessionEvent>>) -> Self {
        Self { log }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryLog::new()))
    }

    pub fn append(&self, event: &SessionEvent) -> Result<(), StoreError> {
        self.log.append(event)
    }

    /// Rebuild every live session from the log, in order of first
    /// appearance. Deleted sessions are left out.
    ///
    /// A turn whose index does not follow the session's last turn is
    /// dropped with a warning rather than reordering history.
    pub fn replay(&self) -> Result<Vec<ConversationSession>, StoreError> {
        let mut order = Vec::new();
        let mut sessions: HashMap<String, ConversationSession> = HashMap::new();
        for event in self.log.scan()? {
            let id = event.session_id().to_string();
            if let SessionEvent::Deleted { .. } = event {
                sessions.remove(&id);
                order.retain(|o| *o != id);
                continue;
            }
            let session = sessions.entry(id.clone()).or_insert_with(|| {
                order.push(id.clone());
                ConversationSession::with_id(id.clone())
            });
            match event {
                SessionEvent::Opened { at, .. } => {
                    session.created_at = at;
                    session.last_active_at = session.last_active_at.max(at);
                }
                SessionEvent::Turn { turn, .. } => {
                    if turn.turn_index != session.turns.len() {
                        warn!(
                            session_id = %id,
                            turn_index = turn.turn_index,
                            expected = session.turns.len(),
                            "skipping out-of-order session turn"
                        );
                        continue;
                    }
                    let turn = *turn;
                    session.push(turn.user_message, turn.result);
                }
                SessionEvent::Closed { at, .. } => {
                    session.closed_at.get_or_insert(at);
                }
                SessionEvent::Deleted { .. } => {}
            }
        }
        Ok(order
            .into_iter()
            .filter_map(|id| sessions.remove(&id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use jurisnexus_core::{
        Answer, CallStatus, MergedOutput, ModelCallRecord, Outcome, PipelineResult, Provenance,
        TaskType, Tier,
    };
    use tempfile::TempDir;

    use super::*;
    use crate::log::JsonlLog;

    fn result(reply: &str) -> PipelineResult {
        let now = Utc::now();
        PipelineResult {
            task_id: format!("task_{reply}"),
            task_type: TaskType::Consultation,
            tier1_record: ModelCallRecord {
                tier: Tier::Tier1,
                template_id: "consultation.tier1.baseline@v1".into(),
                prompt_text: "p".into(),
                response_text: Some(reply.into()),
                error: None,
                latency_ms: 1,
                status: CallStatus::Ok,
                attempts: 1,
                cached: false,
                started_at: now,
            },
            tier2_record: None,
            merged_output: MergedOutput::Answer(Answer {
                text: reply.into(),
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

    fn turn(index: usize, message: &str, reply: &str) -> SessionEvent {
        SessionEvent::Turn {
            session_id: "sess_a".into(),
            turn: Box::new(Turn {
                turn_index: index,
                user_message: message.into(),
                result: result(reply),
            }),
        }
    }

    #[test]
    fn replay_restores_turns_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.jsonl");
        {
            let log = SessionLog::new(Box::new(JsonlLog::<SessionEvent>::open(&path).unwrap()));
            log.append(&SessionEvent::Opened {
                session_id: "sess_a".into(),
                at: Utc::now(),
            })
            .unwrap();
            log.append(&turn(0, "Is a verbal lease valid?", "Generally yes."))
                .unwrap();
            log.append(&turn(1, "For five years?", "Needs writing."))
                .unwrap();
        }

        let log = SessionLog::new(Box::new(JsonlLog::<SessionEvent>::open(&path).unwrap()));
        let sessions = log.replay().unwrap();
        assert_eq!(sessions.len(), 1);
        let s = &sessions[0];
        assert_eq!(s.turns.len(), 2);
        assert_eq!(s.turns[1].user_message, "For five years?");
        assert!(!s.is_closed());
    }

    #[test]
    fn out_of_order_turn_is_skipped_and_close_is_kept() {
        let log = SessionLog::in_memory();
        log.append(&turn(0, "q1", "a1")).unwrap();
        log.append(&turn(2, "q3", "a3")).unwrap();
        log.append(&SessionEvent::Closed {
            session_id: "sess_a".into(),
            at: Utc::now(),
        })
        .unwrap();

        let sessions = log.replay().unwrap();
        assert_eq!(sessions[0].turns.len(), 1);
        assert!(sessions[0].is_closed());
    }

    #[test]
    fn deleted_session_is_not_replayed() {
        let log = SessionLog::in_memory();
        log.append(&turn(0, "q1", "a1")).unwrap();
        log.append(&SessionEvent::Opened {
            session_id: "sess_b".into(),
            at: Utc::now(),
        })
        .unwrap();
        log.append(&SessionEvent::Deleted {
            session_id: "sess_a".into(),
            at: Utc::now(),
        })
        .unwrap();

        let sessions = log.replay().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, "sess_b");
    }
}
