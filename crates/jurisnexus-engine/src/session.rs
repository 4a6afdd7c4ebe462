//! Consultation sessions: multi-turn Q&A on top of the same two-tier pipeline.
//!
//! Each turn runs a consultation task whose prompts carry the most recent
//! turns of the session as context. Turns within one session are serialised;
//! different sessions proceed independently. Every state change is appended
//! to the session log, so a later process picks sessions up where this one
//! left off. Nothing here expires sessions; the caller owns that policy and
//! ends a session with [`SessionManager::close_session`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use jurisnexus_core::config::SessionConfig;
use jurisnexus_core::{AnalysisTask, ConversationSession, PipelineResult, TaskType};
use jurisnexus_store::{SessionEvent, SessionLog};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::orchestrator::{Orchestrator, RunContext};
use crate::{EngineError, blocking};

type Shared = Arc<AsyncMutex<ConversationSession>>;

#[derive(Debug, Clone, Serialize)]
pub struct SessionReply {
    pub session_id: String,
    pub turn_index: usize,
    pub result: PipelineResult,
}

/// One row of [`SessionManager::list`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub turns: usize,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub closed: bool,
}

impl From<&ConversationSession> for SessionSummary {
    fn from(s: &ConversationSession) -> Self {
        Self {
            session_id: s.session_id.clone(),
            turns: s.turns.len(),
            created_at: s.created_at,
            last_active_at: s.last_active_at,
            closed: s.is_closed(),
        }
    }
}

pub struct SessionManager {
    orchestrator: Arc<Orchestrator>,
    log: Arc<SessionLog>,
    sessions: Mutex<HashMap<String, Shared>>,
    window: usize,
}

impl SessionManager {
    /// Build a manager, restoring every session recorded in `log`.
    pub fn open(
        orchestrator: Arc<Orchestrator>,
        log: Arc<SessionLog>,
        config: &SessionConfig,
    ) -> Result<Self, EngineError> {
        let restored = log.replay()?;
        if !restored.is_empty() {
            info!(sessions = restored.len(), "restored consultation sessions");
        }
        let sessions = restored
            .into_iter()
            .map(|s| (s.session_id.clone(), Arc::new(AsyncMutex::new(s))))
            .collect();
        Ok(Self {
            orchestrator,
            log,
            sessions: Mutex::new(sessions),
            window: config.context_window,
        })
    }

    /// Answer `message` within `session_id`, or within a new session when
    /// `session_id` is `None`.
    pub async fn turn(
        &self,
        session_id: Option<&str>,
        message: &str,
    ) -> Result<SessionReply, EngineError> {
        let (shared, created) = match session_id {
            Some(id) => (self.lookup(id)?, false),
            None => (self.create()?, true),
        };
        let mut session = shared.lock().await;
        let id = session.session_id.clone();
        if session.is_closed() {
            return Err(EngineError::SessionClosed(id));
        }
        if created {
            self.append(SessionEvent::Opened {
                session_id: id.clone(),
                at: session.created_at,
            })
            .await?;
        }

        let context = RunContext {
            conversation: session.context(self.window),
            question: Some(message.to_string()),
            session_id: Some(id.clone()),
        };
        let task = AnalysisTask::from_text(TaskType::Consultation, message);
        let result = self.orchestrator.analyze_with(task, context).await;

        let turn = session.push(message, result).clone();
        info!(
            session_id = %id,
            turn_index = turn.turn_index,
            outcome = %turn.result.outcome,
            "session turn complete"
        );
        let reply = SessionReply {
            session_id: id.clone(),
            turn_index: turn.turn_index,
            result: turn.result.clone(),
        };
        self.append(SessionEvent::Turn {
            session_id: id,
            turn: Box::new(turn),
        })
        .await?;
        Ok(reply)
    }

    /// A snapshot of the session's history.
    pub async fn get(&self, session_id: &str) -> Result<ConversationSession, EngineError> {
        let shared = self.lookup(session_id)?;
        let session = shared.lock().await;
        Ok(session.clone())
    }

    /// Mark a session closed. Further turns are rejected; history stays readable.
    pub async fn close_session(&self, session_id: &str) -> Result<(), EngineError> {
        let shared = self.lookup(session_id)?;
        let mut session = shared.lock().await;
        if session.is_closed() {
            return Ok(());
        }
        let at = Utc::now();
        self.append(SessionEvent::Closed {
            session_id: session_id.to_string(),
            at,
        })
        .await?;
        session.closed_at = Some(at);
        info!(%session_id, turns = session.turns.len(), "session closed");
        Ok(())
    }

    /// Remove a session and its history. Waits for an in-flight turn on the
    /// session to finish first.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), EngineError> {
        let shared = self.lookup(session_id)?;
        let mut session = shared.lock().await;
        let at = Utc::now();
        self.append(SessionEvent::Deleted {
            session_id: session_id.to_string(),
            at,
        })
        .await?;
        // Turns already queued on this session's lock see it as closed.
        session.closed_at.get_or_insert(at);
        self.map()?.remove(session_id);
        info!(%session_id, turns = session.turns.len(), "session deleted");
        Ok(())
    }

    /// Every known session, most recently created first.
    pub async fn list(&self) -> Result<Vec<SessionSummary>, EngineError> {
        let shared: Vec<Shared> = self.map()?.values().cloned().collect();
        let mut summaries = Vec::with_capacity(shared.len());
        for s in shared {
            summaries.push(SessionSummary::from(&*s.lock().await));
        }
        summaries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(summaries)
    }

    /// Ids of every known session, open or closed.
    pub fn session_ids(&self) -> Result<Vec<String>, EngineError> {
        let mut ids: Vec<String> = self.map()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn map(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Shared>>, EngineError> {
        self.sessions
            .lock()
            .map_err(|e| EngineError::Other(format!("session table poisoned: {e}")))
    }

    fn lookup(&self, session_id: &str) -> Result<Shared, EngineError> {
        self.map()?
            .get(session_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))
    }

    fn create(&self) -> Result<Shared, EngineError> {
        let session = ConversationSession::new();
        let id = session.session_id.clone();
        let shared = Arc::new(AsyncMutex::new(session));
        self.map()?.insert(id.clone(), shared.clone());
        info!(session_id = %id, "session opened");
        Ok(shared)
    }

    async fn append(&self, event: SessionEvent) -> Result<(), EngineError> {
        let log = self.log.clone();
        blocking(move || Ok(log.append(&event)?)).await
    }
}
