//! [`JurisEngine`]: the surface a presentation layer talks to.
//!
//! Built once at startup from a [`JurisConfig`]. Configuration problems
//! surface here and nowhere later; after construction every analysis call
//! yields a [`PipelineResult`], whatever the models do.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use jurisnexus_ai::ModelClient;
use jurisnexus_core::{
    AnalysisTask, ConversationSession, DocumentProfile, FeedbackRecord, JurisConfig,
    MergedOutput, PipelineResult, Rating, TaskType, Tier,
};
use jurisnexus_store::{
    ExampleKind, FeedbackStats, Improvement, LearningEntry, LearningStats, TemplateStore,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::optimizer::{OptimizerHandle, PassReport, TemplateOptimizer};
use crate::orchestrator::{Orchestrator, RunContext};
use crate::recorder::LearningRecorder;
use crate::selector::TemplateSelector;
use crate::session::{SessionManager, SessionReply, SessionSummary};
use crate::storage::Stores;
use crate::{EngineError, blocking, ratings};

/// Learning-log and feedback summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub learning: LearningStats,
    pub feedback: FeedbackStats,
    /// Ratings attributed to each template id.
    pub per_template: BTreeMap<String, FeedbackStats>,
}

pub struct JurisEngine {
    config: JurisConfig,
    stores: Stores,
    tier1: Arc<ModelClient>,
    tier2: Arc<ModelClient>,
    orchestrator: Arc<Orchestrator>,
    recorder: Arc<LearningRecorder>,
    sessions: SessionManager,
    optimizer: Arc<TemplateOptimizer>,
    background: Mutex<Option<OptimizerHandle>>,
}

impl JurisEngine {
    /// Validate `config`, open storage and build both tier clients, reading
    /// credentials from the process environment.
    pub async fn open(config: JurisConfig) -> Result<Self, EngineError> {
        Self::open_with(config, |name| std::env::var(name).ok()).await
    }

    /// [`JurisEngine::open`] with an injected environment lookup.
    pub async fn open_with(
        config: JurisConfig,
        env: impl Fn(&str) -> Option<String> + Send + Sync,
    ) -> Result<Self, EngineError> {
        config.validate_with(&env)?;
        let tier1 = ModelClient::from_config(Tier::Tier1, &config.tier1, &env)?;
        let tier2 = ModelClient::from_config(Tier::Tier2, &config.tier2, &env)?;
        let storage = config.storage.clone();
        let stores = blocking(move || Stores::open(&storage)).await?;
        Self::with_clients(config, stores, tier1, tier2)
    }

    /// Assemble an engine from already-built parts. Must be called inside a
    /// Tokio runtime.
    pub fn with_clients(
        config: JurisConfig,
        stores: Stores,
        tier1: ModelClient,
        tier2: ModelClient,
    ) -> Result<Self, EngineError> {
        let (tier1, tier2) = (Arc::new(tier1), Arc::new(tier2));
        let selector = Arc::new(TemplateSelector::new(
            stores.templates.clone(),
            stores.feedback.clone(),
            stores.learning.clone(),
            config.selector.clone(),
        ));
        let recorder = Arc::new(LearningRecorder::spawn(
            stores.learning.clone(),
            config.pipeline.quality_success_threshold,
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            tier1.clone(),
            tier2.clone(),
            selector,
            recorder.clone(),
            config.pipeline.clone(),
        ));
        let sessions =
            SessionManager::open(orchestrator.clone(), stores.sessions.clone(), &config.session)?;

        let mut optimizer = TemplateOptimizer::new(
            stores.templates.clone(),
            stores.feedback.clone(),
            stores.learning.clone(),
            config.optimizer.clone(),
        );
        if !tier2.is_simulated() {
            optimizer = optimizer.with_rewriter(tier2.clone());
        }

        info!(
            storage = ?config.storage.backend,
            critique = config.pipeline.critique_enabled,
            "engine ready"
        );
        Ok(Self {
            config,
            stores,
            tier1,
            tier2,
            orchestrator,
            recorder,
            sessions,
            optimizer: Arc::new(optimizer),
            background: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &JurisConfig {
        &self.config
    }

    pub fn templates(&self) -> &Arc<TemplateStore> {
        &self.stores.templates
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    fn client(&self, tier: Tier) -> &Arc<ModelClient> {
        match tier {
            Tier::Tier1 => &self.tier1,
            Tier::Tier2 => &self.tier2,
        }
    }

    /// Switch one tier in or out of mock mode without restarting. Turning
    /// mock off also lifts a mock mode forced by repeated failures. A tier
    /// that was started in mock mode has no live backend and stays simulated.
    pub fn set_mock(&self, tier: Tier, mock: bool) {
        self.client(tier).set_mock(mock);
    }

    pub fn is_simulated(&self, tier: Tier) -> bool {
        self.client(tier).is_simulated()
    }

    // ── Analysis ──

    /// Analyse `text` as `task_type`. Without a profile one is derived from the text.
    pub async fn analyze(
        &self,
        text: &str,
        task_type: TaskType,
        profile: Option<DocumentProfile>,
    ) -> PipelineResult {
        let task = match profile {
            Some(profile) => AnalysisTask::new(task_type, text, profile),
            None => AnalysisTask::from_text(task_type, text),
        };
        self.analyze_task(task).await
    }

    pub async fn analyze_task(&self, task: AnalysisTask) -> PipelineResult {
        self.orchestrator.analyze(task).await
    }

    /// Like [`JurisEngine::analyze_task`], but give up waiting once `cancel`
    /// resolves. The run is still finalized and recorded.
    pub async fn analyze_until(
        &self,
        task: AnalysisTask,
        cancel: impl Future<Output = ()>,
    ) -> Result<PipelineResult, EngineError> {
        self.orchestrator
            .analyze_until(task, RunContext::default(), cancel)
            .await
    }

    /// Run independent tasks concurrently. Results come back in input order.
    pub async fn analyze_batch(&self, tasks: Vec<AnalysisTask>) -> Vec<PipelineResult> {
        join_all(tasks.into_iter().map(|task| self.analyze_task(task))).await
    }

    // ── Sessions ──

    pub async fn turn(
        &self,
        session_id: Option<&str>,
        message: &str,
    ) -> Result<SessionReply, EngineError> {
        self.sessions.turn(session_id, message).await
    }

    pub async fn session(&self, session_id: &str) -> Result<ConversationSession, EngineError> {
        self.sessions.get(session_id).await
    }

    pub async fn close_session(&self, session_id: &str) -> Result<(), EngineError> {
        self.sessions.close_session(session_id).await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), EngineError> {
        self.sessions.delete_session(session_id).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, EngineError> {
        self.sessions.list().await
    }

    pub fn session_ids(&self) -> Result<Vec<String>, EngineError> {
        self.sessions.session_ids()
    }

    // ── Learning log ──

    /// The most recent recorded runs, newest first.
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<LearningEntry>, EngineError> {
        self.recorder.recent(limit).await
    }

    /// Recent successful or failed runs, newest first.
    pub async fn examples(
        &self,
        kind: ExampleKind,
        limit: usize,
    ) -> Result<Vec<LearningEntry>, EngineError> {
        self.recorder.examples(kind, limit).await
    }

    /// Store a corrected output for a recorded run. The original entry is
    /// left as it was.
    pub async fn record_improvement(
        &self,
        task_id: &str,
        output: MergedOutput,
        note: Option<String>,
    ) -> Result<Improvement, EngineError> {
        if !self.recorder.contains(task_id).await? {
            return Err(EngineError::UnknownTask(task_id.to_string()));
        }
        let improvement = Improvement::new(task_id, output, note);
        let log = self.stores.improvements.clone();
        let appended = improvement.clone();
        blocking(move || Ok(log.append(&appended)?)).await?;
        info!(%task_id, "improvement recorded");
        Ok(improvement)
    }

    pub async fn improvements(&self, task_id: &str) -> Result<Vec<Improvement>, EngineError> {
        let log = self.stores.improvements.clone();
        let task_id = task_id.to_string();
        blocking(move || Ok(log.for_task(&task_id)?)).await
    }

    // ── Feedback and optimisation ──

    /// Record an expert rating for a finished task.
    pub async fn submit_feedback(
        &self,
        task_id: &str,
        rating: u8,
        comments: Option<String>,
        reviewer_id: Option<String>,
    ) -> Result<FeedbackRecord, EngineError> {
        let rating = Rating::new(rating)?;
        if !self.recorder.contains(task_id).await? {
            return Err(EngineError::UnknownTask(task_id.to_string()));
        }
        let mut record = FeedbackRecord::new(task_id, rating, comments);
        if let Some(reviewer) = reviewer_id {
            record = record.with_reviewer(reviewer);
        }

        let store = self.stores.feedback.clone();
        let submitted = record.clone();
        blocking(move || Ok(store.submit(submitted)?)).await?;
        info!(
            %task_id,
            feedback_id = %record.feedback_id,
            rating = record.rating.value(),
            "feedback recorded"
        );

        match self.background.lock() {
            Ok(guard) => {
                if let Some(handle) = guard.as_ref() {
                    handle.feedback_submitted();
                }
            }
            Err(e) => warn!(error = %e, "optimizer handle poisoned; skipping trigger"),
        }
        Ok(record)
    }

    /// Run one optimizer pass now.
    pub async fn optimize(&self) -> Result<PassReport, EngineError> {
        self.recorder.flush().await;
        self.optimizer.run_pass().await
    }

    /// Start background optimisation on the configured schedule. Stops when
    /// the engine is dropped. Calling it again has no effect.
    pub fn start_optimizer(&self) -> Result<(), EngineError> {
        let mut slot = self
            .background
            .lock()
            .map_err(|e| EngineError::Other(format!("optimizer handle poisoned: {e}")))?;
        if slot.is_none() {
            *slot = Some(self.optimizer.clone().spawn());
            info!(
                interval_secs = self.config.optimizer.interval_secs,
                feedback_trigger = self.config.optimizer.feedback_trigger,
                "background optimizer started"
            );
        }
        Ok(())
    }

    pub async fn stats(&self) -> Result<EngineStats, EngineError> {
        let entries = self.recorder.entries().await?;
        let learning =
            LearningStats::compute(&entries, self.config.pipeline.quality_success_threshold);
        let store = self.stores.feedback.clone();
        let feedback = blocking(move || Ok(store.all()?)).await?;

        let all_ratings: Vec<Rating> = feedback.iter().map(|f| f.rating).collect();
        let index = self.stores.learning.template_index()?;
        let per_template = ratings::by_template(&feedback, &index)
            .into_iter()
            .map(|(id, fb)| (id, FeedbackStats::from_ratings(&fb.ratings)))
            .collect();
        Ok(EngineStats {
            learning,
            feedback: FeedbackStats::from_ratings(&all_ratings),
            per_template,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use jurisnexus_ai::RetryPolicy;
    use jurisnexus_ai::testing::ScriptedBackend;
    use jurisnexus_core::config::OptimizerConfig;
    use jurisnexus_core::{Answer, CoreError, Outcome, Provenance};

    use super::*;

    const CONTRACT: &str = "Article 1. Seller may terminate at any time.\nArticle 2. Buyer indemnifies seller without limit.\nArticle 3. Disputes go to the seller's home court.";

    async fn mock_engine() -> JurisEngine {
        JurisEngine::open_with(JurisConfig::mock(), |_| None).await.unwrap()
    }

    #[tokio::test]
    async fn mock_engine_analyzes_and_records() {
        let engine = mock_engine().await;
        let result = engine.analyze(CONTRACT, TaskType::ContractRisk, None).await;
        assert_eq!(result.outcome, Outcome::FullMock);
        let MergedOutput::RiskFindings(report) = &result.merged_output else {
            panic!("expected risk findings, got {:?}", result.merged_output);
        };
        assert_eq!(report.findings.len(), 3);

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.learning.total_runs, 1);
        assert_eq!(stats.learning.mocked_calls, 2);
        assert_eq!(stats.feedback.count, 0);
    }

    #[tokio::test]
    async fn live_tier_without_credentials_fails_at_open() {
        let mut config = JurisConfig::mock();
        config.tier2.mock = false;
        config.tier2.endpoint = Some("https://models.example/v1".into());
        config.tier2.api_key = None;
        let err = JurisEngine::open_with(config, |_| None).await.err().unwrap();
        assert!(matches!(err, EngineError::Core(CoreError::Config(_))));
    }

    #[tokio::test]
    async fn feedback_requires_known_task_and_valid_rating() {
        let engine = mock_engine().await;
        let err = engine
            .submit_feedback("task_nope", 4, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownTask(_)));

        let result = engine.analyze("What is a lien?", TaskType::Consultation, None).await;
        let err = engine
            .submit_feedback(&result.task_id, 6, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::InvalidRating(6))));

        let record = engine
            .submit_feedback(&result.task_id, 4, Some("clear".into()), Some("rev_1".into()))
            .await
            .unwrap();
        assert_eq!(record.reviewer_id.as_deref(), Some("rev_1"));
        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.feedback.count, 1);
        assert_eq!(stats.per_template.len(), 2);
    }

    #[tokio::test]
    async fn repeated_low_ratings_revise_the_tier2_template() {
        let engine = mock_engine().await;
        let min = engine.config().optimizer.min_samples;
        for _ in 0..min {
            let result = engine.analyze(CONTRACT, TaskType::ContractRisk, None).await;
            assert_eq!(
                result.tier2_record.as_ref().unwrap().template_id,
                "contract_risk.tier2.baseline@v1"
            );
            engine
                .submit_feedback(&result.task_id, 1, Some("Missed the forum clause".into()), None)
                .await
                .unwrap();
        }

        let report = engine.optimize().await.unwrap();
        let revision = report
            .revisions
            .iter()
            .find(|r| r.retired == "contract_risk.tier2.baseline@v1")
            .unwrap();
        assert_eq!(revision.created, "contract_risk.tier2.baseline@v2");

        let retired = engine
            .templates()
            .get("contract_risk.tier2.baseline@v1")
            .unwrap()
            .unwrap();
        assert!(retired.retired_at.is_some());

        let next = engine.analyze(CONTRACT, TaskType::ContractRisk, None).await;
        let tier2 = next.tier2_record.unwrap();
        assert_eq!(tier2.template_id, "contract_risk.tier2.baseline@v2");
        assert!(tier2.prompt_text.contains("Missed the forum clause"));
    }

    #[tokio::test]
    async fn feedback_count_wakes_background_optimizer() {
        let mut config = JurisConfig::mock();
        config.optimizer = OptimizerConfig {
            min_samples: 2,
            feedback_trigger: 2,
            interval_secs: 0,
            ..OptimizerConfig::default()
        };
        let engine = JurisEngine::open_with(config, |_| None).await.unwrap();
        engine.start_optimizer().unwrap();
        for _ in 0..2 {
            let result = engine
                .analyze("Is this NDA enforceable?", TaskType::Consultation, None)
                .await;
            engine.submit_feedback(&result.task_id, 1, None, None).await.unwrap();
        }

        let mut head = 1;
        for _ in 0..100 {
            head = engine
                .templates()
                .head("consultation.tier1.baseline")
                .unwrap()
                .unwrap()
                .version;
            if head == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(head, 2);
    }

    #[tokio::test]
    async fn batch_runs_every_task_once() {
        let engine = mock_engine().await;
        let tasks: Vec<AnalysisTask> = ["Draft an NDA.", "Draft a lease.", "Draft a will."]
            .into_iter()
            .map(|t| AnalysisTask::from_text(TaskType::Drafting, t))
            .collect();
        let ids: Vec<String> = tasks.iter().map(|t| t.task_id.clone()).collect();
        let results = engine.analyze_batch(tasks).await;
        let got: Vec<String> = results.iter().map(|r| r.task_id.clone()).collect();
        assert_eq!(got, ids);
        assert_eq!(engine.stats().await.unwrap().learning.total_runs, 3);
    }

    #[tokio::test]
    async fn scripted_clients_drive_consultation_turns() {
        let policy = RetryPolicy {
            timeout: Duration::from_secs(5),
            max_retries: 0,
            backoff_base: Duration::from_millis(1),
        };
        let tier1 = ModelClient::new(
            Tier::Tier1,
            Arc::new(ScriptedBackend::always("File within thirty days.")),
            policy,
        );
        let tier2 = ModelClient::new(
            Tier::Tier2,
            Arc::new(ScriptedBackend::always(
                r#"{"quality_score": 9, "feedback": "Good.", "missing_risks": [], "needs_improvement": false}"#,
            )),
            policy,
        );
        let engine =
            JurisEngine::with_clients(JurisConfig::mock(), Stores::in_memory(), tier1, tier2)
                .unwrap();

        let reply = engine.turn(None, "When must I appeal?").await.unwrap();
        assert_eq!(reply.result.outcome, Outcome::Success);
        assert_eq!(reply.result.quality_score, Some(9));
        assert_eq!(reply.result.merged_output.reply_text(), "File within thirty days.");
        assert_eq!(engine.session_ids().unwrap(), vec![reply.session_id.clone()]);

        engine.close_session(&reply.session_id).await.unwrap();
        assert!(engine.session(&reply.session_id).await.unwrap().is_closed());
    }

    #[tokio::test]
    async fn mock_mode_toggles_per_tier_at_runtime() {
        let policy = RetryPolicy {
            timeout: Duration::from_secs(5),
            max_retries: 0,
            backoff_base: Duration::from_millis(1),
        };
        let backend = Arc::new(ScriptedBackend::always("Yes, with notice."));
        let tier1 = ModelClient::new(Tier::Tier1, backend.clone(), policy);
        let engine = JurisEngine::with_clients(
            JurisConfig::mock(),
            Stores::in_memory(),
            tier1,
            ModelClient::mocked(Tier::Tier2),
        )
        .unwrap();

        engine.set_mock(Tier::Tier1, true);
        assert!(engine.is_simulated(Tier::Tier1));
        let mocked = engine.analyze("Can I sublet?", TaskType::Consultation, None).await;
        assert_eq!(mocked.outcome, Outcome::FullMock);
        assert_eq!(backend.calls(), 0);

        engine.set_mock(Tier::Tier1, false);
        engine.set_mock(Tier::Tier2, false);
        assert!(engine.is_simulated(Tier::Tier2));
        let live = engine.analyze("Can I sublet?", TaskType::Consultation, None).await;
        assert_eq!(live.outcome, Outcome::Success);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn improvements_and_examples_come_from_the_learning_log() {
        let engine = mock_engine().await;
        let answer = MergedOutput::Answer(Answer {
            text: "A lien is a security interest.".into(),
            provenance: Provenance::Model,
            review: None,
        });
        let err = engine
            .record_improvement("task_nope", answer.clone(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownTask(_)));

        let first = engine.analyze("What is a lien?", TaskType::Consultation, None).await;
        let second = engine.analyze("What is a tort?", TaskType::Consultation, None).await;
        let recent = engine.recent_runs(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].task_id(), second.task_id);

        let all = engine.examples(ExampleKind::Success, 10).await.unwrap().len()
            + engine.examples(ExampleKind::Failure, 10).await.unwrap().len();
        assert_eq!(all, 2);

        let improved = engine
            .record_improvement(&first.task_id, answer, Some("shorter".into()))
            .await
            .unwrap();
        assert_eq!(improved.task_id, first.task_id);
        let stored = engine.improvements(&first.task_id).await.unwrap();
        assert_eq!(stored, vec![improved]);
        assert!(engine.improvements(&second.task_id).await.unwrap().is_empty());
    }
}
