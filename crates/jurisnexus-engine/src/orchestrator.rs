//! Dual-tier orchestrator.
//!
//! One pipeline run is an explicit state machine:
//!
//! ```text
//! Drafting ──▶ Critiquing ──▶ Merging ──▶ Finalized
//!    │                          ▲
//!    ├──────────────────────────┘   (critique disabled)
//!    └──▶ Failed                    (tier 1 unusable)
//! ```
//!
//! Tier 1 is mandatory; a tier-1 failure ends the run without a tier-2
//! call. Tier 2 is best effort: if it fails, the run still finalizes with
//! the tier-1 draft and outcome `partial_tier2_failure`. Each run is
//! recorded exactly once, after it finalizes, whatever its outcome.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use jurisnexus_ai::{InvokeOptions, ModelClient};
use jurisnexus_core::baseline::{TIER1_PARAMS, TIER2_PARAMS};
use jurisnexus_core::clause::format_clauses;
use jurisnexus_core::config::PipelineConfig;
use jurisnexus_core::{
    AnalysisTask, Clause, ModelCallRecord, Outcome, PipelineResult, TaskType, Tier,
    split_into_clauses,
};
use jurisnexus_store::LearningEntry;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::merge::{self, Merged};
use crate::recorder::LearningRecorder;
use crate::selector::TemplateSelector;
use crate::{EngineError, blocking};

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Drafting,
    Critiquing,
    Merging,
    Finalized,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized | Self::Failed)
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Drafting => "drafting",
            Self::Critiquing => "critiquing",
            Self::Merging => "merging",
            Self::Finalized => "finalized",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where to go after the tier-1 call.
pub fn after_drafting(draft: &ModelCallRecord, critique_enabled: bool) -> Stage {
    if !draft.is_usable() {
        Stage::Failed
    } else if critique_enabled {
        Stage::Critiquing
    } else {
        Stage::Merging
    }
}

/// Outcome of a run given its records.
pub fn classify(tier1: &ModelCallRecord, tier2: Option<&ModelCallRecord>) -> Outcome {
    match tier2 {
        _ if !tier1.is_usable() => Outcome::Failed,
        Some(r) if !r.is_usable() => Outcome::PartialTier2Failure,
        Some(r) if r.is_mocked() && tier1.is_mocked() => Outcome::FullMock,
        _ => Outcome::Success,
    }
}

/// Conversation context and bookkeeping for a run that belongs to a session.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Prior turns, already rendered.
    pub conversation: String,
    /// The current user message, if different from the task text.
    pub question: Option<String>,
    pub session_id: Option<String>,
}

/// Flags a run as abandoned when dropped while still armed.
struct AbandonOnDrop(Option<Arc<AtomicBool>>);

impl AbandonOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        if let Some(flag) = self.0.take() {
            flag.store(true, Ordering::Release);
        }
    }
}

pub struct Orchestrator {
    tier1: Arc<ModelClient>,
    tier2: Arc<ModelClient>,
    selector: Arc<TemplateSelector>,
    recorder: Arc<LearningRecorder>,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        tier1: Arc<ModelClient>,
        tier2: Arc<ModelClient>,
        selector: Arc<TemplateSelector>,
        recorder: Arc<LearningRecorder>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            tier1,
            tier2,
            selector,
            recorder,
            config,
        }
    }

    pub fn recorder(&self) -> &Arc<LearningRecorder> {
        &self.recorder
    }

    /// Run and record a standalone task.
    pub async fn analyze(self: &Arc<Self>, task: AnalysisTask) -> PipelineResult {
        self.analyze_with(task, RunContext::default()).await
    }

    /// Run and record a task with conversation context.
    ///
    /// The run executes on its own Tokio task. If the caller drops this
    /// future before the run finalizes, the run still completes and is
    /// recorded with `caller_cancelled` set.
    pub async fn analyze_with(
        self: &Arc<Self>,
        task: AnalysisTask,
        context: RunContext,
    ) -> PipelineResult {
        let (task_id, task_type) = (task.task_id.clone(), task.task_type);
        let (run, abandoned) = self.spawn_run(task, context);
        let guard = AbandonOnDrop(Some(abandoned));
        let joined = run.await;
        guard.disarm();
        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                warn!(%task_id, error = %e, "pipeline task did not complete");
                self.aborted(task_id, task_type, e.to_string())
            }
        }
    }

    /// Run and record a task, but stop waiting once `cancel` resolves.
    ///
    /// On cancellation the caller gets [`EngineError::Cancelled`] while the
    /// run continues in the background and is recorded with
    /// `caller_cancelled` set.
    pub async fn analyze_until(
        self: &Arc<Self>,
        task: AnalysisTask,
        context: RunContext,
        cancel: impl Future<Output = ()>,
    ) -> Result<PipelineResult, EngineError> {
        let task_id = task.task_id.clone();
        let (mut run, abandoned) = self.spawn_run(task, context);

        tokio::select! {
            biased;
            joined = &mut run => Ok(joined?),
            () = cancel => {
                abandoned.store(true, Ordering::Release);
                info!(%task_id, "caller cancelled; run continues in background");
                Err(EngineError::Cancelled(task_id))
            }
        }
    }

    /// Start the pipeline plus its recording on a detached task. Setting the
    /// returned flag before the run finalizes marks the entry as abandoned.
    fn spawn_run(
        self: &Arc<Self>,
        task: AnalysisTask,
        context: RunContext,
    ) -> (JoinHandle<PipelineResult>, Arc<AtomicBool>) {
        let abandoned = Arc::new(AtomicBool::new(false));
        let this = Arc::clone(self);
        let flag = abandoned.clone();
        let run = tokio::spawn(async move {
            let result = this.run(&task, &context).await;
            let cancelled = flag.load(Ordering::Acquire);
            this.record(task, result.clone(), context.session_id, cancelled);
            result
        });
        (run, abandoned)
    }

    /// Result handed back when the pipeline task was torn down before it
    /// finalized (runtime shutdown).
    fn aborted(&self, task_id: String, task_type: TaskType, reason: String) -> PipelineResult {
        let now = Utc::now();
        let tier1 = self.tier1.unsent("", String::new(), reason);
        PipelineResult {
            task_id,
            task_type,
            merged_output: merge::failure(Stage::Drafting.as_str(), &tier1),
            tier1_record: tier1,
            tier2_record: None,
            outcome: Outcome::Failed,
            quality_score: None,
            notices: vec!["the pipeline task stopped before finalizing".to_string()],
            started_at: now,
            finalized_at: now,
        }
    }

    fn record(
        &self,
        task: AnalysisTask,
        result: PipelineResult,
        session_id: Option<String>,
        caller_cancelled: bool,
    ) {
        let mut entry = LearningEntry::new(task, result);
        entry.session_id = session_id;
        entry.caller_cancelled = caller_cancelled;
        self.recorder.record(entry);
    }

    /// Execute the pipeline without recording it.
    pub async fn run(&self, task: &AnalysisTask, context: &RunContext) -> PipelineResult {
        let started_at = Utc::now();
        let clauses = split_into_clauses(&task.input_text);
        let mut params = params(task, &clauses, context);
        let clause_ids = response_clause_ids(task, &clauses);

        let mut stage = Stage::Drafting;
        let mut tier1: Option<ModelCallRecord> = None;
        let mut tier2: Option<ModelCallRecord> = None;
        let mut merged: Option<Merged> = None;

        while !stage.is_terminal() {
            stage = match stage {
                Stage::Drafting => {
                    let record = self.call(&self.tier1, task, &params, &clause_ids).await;
                    let next = after_drafting(&record, self.config.critique_enabled);
                    if let Some(text) = record.text() {
                        params.insert("draft", text.to_string());
                    }
                    tier1 = Some(record);
                    next
                }
                Stage::Critiquing => {
                    let record = self.call(&self.tier2, task, &params, &clause_ids).await;
                    if !record.is_usable() {
                        warn!(
                            task_id = %task.task_id,
                            status = ?record.status,
                            error = record.error.as_deref().unwrap_or(""),
                            "tier-2 failed, falling back to tier-1 draft"
                        );
                    }
                    tier2 = Some(record);
                    Stage::Merging
                }
                Stage::Merging => {
                    if let Some(draft) = &tier1 {
                        merged = Some(merge::merge(
                            task.task_type,
                            &clauses,
                            draft,
                            tier2.as_ref(),
                        ));
                    }
                    Stage::Finalized
                }
                Stage::Finalized | Stage::Failed => stage,
            };
        }

        let tier1 = match tier1 {
            Some(r) => r,
            None => self.tier1.unsent("", String::new(), "tier 1 was never called".into()),
        };
        let outcome = classify(&tier1, tier2.as_ref());
        let Merged {
            output,
            quality_score,
            notices,
        } = match merged {
            Some(m) => m,
            None => Merged {
                output: merge::failure(Stage::Drafting.as_str(), &tier1),
                quality_score: None,
                notices: vec!["tier-1 draft failed; no analysis was produced".to_string()],
            },
        };

        let result = PipelineResult {
            task_id: task.task_id.clone(),
            task_type: task.task_type,
            tier1_record: tier1,
            tier2_record: tier2,
            merged_output: output,
            outcome,
            quality_score,
            notices,
            started_at,
            finalized_at: Utc::now(),
        };
        info!(
            task_id = %result.task_id,
            task_type = %result.task_type,
            %outcome,
            stage = %stage,
            quality = ?result.quality_score,
            duration_ms = result.duration_ms(),
            "pipeline run finalized"
        );
        result
    }

    /// Select, render, and invoke one tier. Selection and render failures
    /// become failed records without a model call.
    async fn call(
        &self,
        client: &ModelClient,
        task: &AnalysisTask,
        params: &HashMap<&'static str, String>,
        clause_ids: &[String],
    ) -> ModelCallRecord {
        let tier = client.tier();
        let selector = self.selector.clone();
        let (task_type, profile) = (task.task_type, task.document_profile.clone());
        let template = match blocking(move || selector.select(task_type, tier, &profile)).await {
            Ok(t) => t,
            Err(e) => {
                warn!(task_id = %task.task_id, %tier, error = %e, "template selection failed");
                return client.unsent("", String::new(), format!("template selection failed: {e}"));
            }
        };

        let supplied: HashMap<&str, String> = params
            .iter()
            .filter(|&(k, _)| allowed(tier).contains(k))
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        let prompt = match template.render(&supplied) {
            Ok(p) => p,
            Err(e) => {
                warn!(
                    task_id = %task.task_id,
                    %tier,
                    template_id = %template.template_id,
                    error = %e,
                    "template render failed"
                );
                return client.unsent(&template.template_id, String::new(), e.to_string());
            }
        };

        let request = client
            .request(prompt, task.task_type)
            .with_clause_ids(clause_ids.to_vec());
        client
            .invoke(&template.template_id, &request, InvokeOptions::default())
            .await
    }
}

fn allowed(tier: Tier) -> &'static [&'static str] {
    match tier {
        Tier::Tier1 => &TIER1_PARAMS,
        Tier::Tier2 => &TIER2_PARAMS,
    }
}

/// The standard parameter set, minus the draft.
fn params(
    task: &AnalysisTask,
    clauses: &[Clause],
    context: &RunContext,
) -> HashMap<&'static str, String> {
    let clause_block = if clauses.is_empty() {
        "(no numbered clauses detected)".to_string()
    } else {
        format_clauses(clauses)
    };
    let conversation = if context.conversation.is_empty() {
        "(no prior conversation)".to_string()
    } else {
        context.conversation.clone()
    };
    HashMap::from([
        ("task_type", task.task_type.to_string()),
        ("language", task.document_profile.language.clone()),
        ("document", task.input_text.clone()),
        ("clauses", clause_block),
        ("clause_count", task.document_profile.clause_count.to_string()),
        ("conversation", conversation),
        (
            "question",
            context
                .question
                .clone()
                .unwrap_or_else(|| task.input_text.clone()),
        ),
    ])
}

/// Clause ids a simulated response is keyed by: the detected clauses when
/// they agree with the profile, otherwise `clause_1..=clause_count`.
fn response_clause_ids(task: &AnalysisTask, clauses: &[Clause]) -> Vec<String> {
    if clauses.len() == task.document_profile.clause_count {
        clauses.iter().map(|c| c.id.clone()).collect()
    } else {
        (1..=task.document_profile.clause_count)
            .map(|i| format!("clause_{i}"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use jurisnexus_ai::testing::ScriptedBackend;
    use jurisnexus_ai::{CallError, RetryPolicy};
    use jurisnexus_core::baseline::all_baselines;
    use jurisnexus_core::config::SelectorConfig;
    use jurisnexus_core::{
        CallStatus, DocumentProfile, MergedOutput, PromptTemplate, Provenance, TaskType,
    };
    use jurisnexus_store::{FeedbackStore, LearningLog, TemplateStore};

    use super::*;
    use crate::merge::draft_output;

    const CONTRACT: &str = "Article 1. Seller may terminate at any time.\nArticle 2. Buyer indemnifies seller without limit.";
    const DRAFT: &str = r#"{"analysis": [{"clause_id": "Article 1", "risks": [{"risk_description": "Unilateral termination", "severity": "high", "recommendation": "Add notice"}]}]}"#;
    const REVIEW: &str = r#"{"quality_score": 8, "feedback": "Sound.", "missing_risks": [], "needs_improvement": false}"#;

    struct Harness {
        orchestrator: Arc<Orchestrator>,
        recorder: Arc<LearningRecorder>,
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(5),
            max_retries: 0,
            backoff_base: Duration::from_millis(1),
        }
    }

    fn live(tier: Tier, backend: &Arc<ScriptedBackend>) -> ModelClient {
        ModelClient::new(tier, backend.clone(), policy())
    }

    fn harness_with(
        templates: TemplateStore,
        tier1: ModelClient,
        tier2: ModelClient,
        config: PipelineConfig,
    ) -> Harness {
        let learning = Arc::new(LearningLog::in_memory());
        let selector = Arc::new(TemplateSelector::new(
            Arc::new(templates),
            Arc::new(FeedbackStore::in_memory()),
            learning.clone(),
            SelectorConfig::default(),
        ));
        let recorder = Arc::new(LearningRecorder::spawn(learning, config.quality_success_threshold));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(tier1),
            Arc::new(tier2),
            selector,
            recorder.clone(),
            config,
        ));
        Harness {
            orchestrator,
            recorder,
        }
    }

    fn harness(tier1: ModelClient, tier2: ModelClient) -> Harness {
        let templates = TemplateStore::in_memory();
        templates.seed(all_baselines()).unwrap();
        harness_with(templates, tier1, tier2, PipelineConfig::default())
    }

    fn contract_task() -> AnalysisTask {
        AnalysisTask::from_text(TaskType::ContractRisk, CONTRACT)
    }

    #[tokio::test]
    async fn tier1_failure_fails_without_calling_tier2() {
        let b1 = Arc::new(ScriptedBackend::always_failing(CallError::Transient("connection reset".into())));
        let b2 = Arc::new(ScriptedBackend::always(REVIEW));
        let h = harness(live(Tier::Tier1, &b1), live(Tier::Tier2, &b2));

        let result = h.orchestrator.analyze(contract_task()).await;
        assert_eq!(result.outcome, Outcome::Failed);
        assert_eq!(result.tier1_record.status, CallStatus::Error);
        assert!(result.tier2_record.is_none());
        assert_eq!(b2.calls(), 0);
        let MergedOutput::Failure(f) = &result.merged_output else {
            panic!("expected failure output");
        };
        assert_eq!(f.stage, "drafting");
        assert!(f.reason.contains("connection reset"));
        assert_eq!(h.recorder.entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tier2_failure_returns_tier1_output() {
        let b1 = Arc::new(ScriptedBackend::always(DRAFT));
        let b2 = Arc::new(ScriptedBackend::always_failing(CallError::UpstreamRejection("400 bad request".into())));
        let h = harness(live(Tier::Tier1, &b1), live(Tier::Tier2, &b2));

        let task = contract_task();
        let clauses = split_into_clauses(&task.input_text);
        let result = h.orchestrator.analyze(task).await;
        assert_eq!(result.outcome, Outcome::PartialTier2Failure);
        assert_eq!(
            result.merged_output,
            draft_output(TaskType::ContractRisk, DRAFT, &clauses, Provenance::Model)
        );
        assert!(result.notices.iter().any(|n| n.contains("unrefined tier-1")));
        assert_eq!(h.recorder.entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tier2_sees_the_draft_and_scores_it() {
        let b1 = Arc::new(ScriptedBackend::always(DRAFT));
        let b2 = Arc::new(ScriptedBackend::always(REVIEW));
        let h = harness(live(Tier::Tier1, &b1), live(Tier::Tier2, &b2));

        let result = h.orchestrator.analyze(contract_task()).await;
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.quality_score, Some(8));
        assert!(b2.prompts()[0].contains("Unilateral termination"));
        assert!(b1.prompts()[0].contains("Buyer indemnifies seller without limit."));
        assert_eq!(
            result.tier1_record.template_id,
            "contract_risk.tier1.baseline@v1"
        );
    }

    #[tokio::test]
    async fn ten_clause_contract_in_full_mock() {
        let h = harness(ModelClient::mocked(Tier::Tier1), ModelClient::mocked(Tier::Tier2));
        let task = AnalysisTask::new(
            TaskType::ContractRisk,
            "合約全文",
            DocumentProfile::new("zh", 5_000, 10),
        );
        let result = h.orchestrator.analyze(task).await;

        assert_eq!(result.outcome, Outcome::FullMock);
        let MergedOutput::RiskFindings(report) = &result.merged_output else {
            panic!("expected risk findings");
        };
        assert_eq!(report.findings.len(), 10);
        assert!(report.findings.iter().all(|f| f.provenance == Provenance::Mocked));
        assert_eq!(report.findings[0].clause_id, "clause_1");
        assert_eq!(result.notices.len(), 2);

        let entries = h.recorder.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].result.outcome, Outcome::FullMock);
    }

    #[tokio::test]
    async fn mock_tier2_over_live_tier1_is_success() {
        let b1 = Arc::new(ScriptedBackend::always(DRAFT));
        let h = harness(live(Tier::Tier1, &b1), ModelClient::mocked(Tier::Tier2));
        let result = h.orchestrator.analyze(contract_task()).await;
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.tier2_record.unwrap().status, CallStatus::Mocked);
    }

    #[tokio::test]
    async fn critique_disabled_skips_tier2() {
        let templates = TemplateStore::in_memory();
        templates.seed(all_baselines()).unwrap();
        let b2 = Arc::new(ScriptedBackend::always(REVIEW));
        let config = PipelineConfig {
            critique_enabled: false,
            ..PipelineConfig::default()
        };
        let h = harness_with(templates, ModelClient::mocked(Tier::Tier1), live(Tier::Tier2, &b2), config);

        let result = h.orchestrator.analyze(contract_task()).await;
        assert_eq!(result.outcome, Outcome::Success);
        assert!(result.tier2_record.is_none());
        assert_eq!(b2.calls(), 0);
        let MergedOutput::RiskFindings(report) = &result.merged_output else {
            panic!("expected risk findings");
        };
        assert!(report.findings.iter().all(|f| f.provenance == Provenance::Mocked));
    }

    #[tokio::test]
    async fn unrenderable_template_fails_without_model_call() {
        let templates = TemplateStore::in_memory();
        templates
            .add_version(
                PromptTemplate::root(
                    "contract_risk.tier1.custom",
                    TaskType::ContractRisk,
                    Tier::Tier1,
                    "Analyse {document} against {jurisdiction}.",
                ),
                None,
            )
            .unwrap();
        let b1 = Arc::new(ScriptedBackend::always(DRAFT));
        let b2 = Arc::new(ScriptedBackend::always(REVIEW));
        let h = harness_with(
            templates,
            live(Tier::Tier1, &b1),
            live(Tier::Tier2, &b2),
            PipelineConfig::default(),
        );

        let result = h.orchestrator.analyze(contract_task()).await;
        assert_eq!(result.outcome, Outcome::Failed);
        assert_eq!(result.tier1_record.template_id, "contract_risk.tier1.custom@v1");
        assert_eq!(result.tier1_record.attempts, 0);
        assert!(result.tier1_record.error.as_deref().unwrap().contains("jurisdiction"));
        assert_eq!(b1.calls(), 0);
        assert_eq!(b2.calls(), 0);
    }

    #[tokio::test]
    async fn one_entry_per_task_whatever_the_outcome() {
        let b1 = Arc::new(
            ScriptedBackend::new()
                .reply(DRAFT)
                .fail(CallError::UpstreamRejection("refused".into()))
                .reply(DRAFT),
        );
        let b2 = Arc::new(
            ScriptedBackend::new()
                .reply(REVIEW)
                .fail(CallError::Timeout("slow".into())),
        );
        let h = harness(live(Tier::Tier1, &b1), live(Tier::Tier2, &b2));

        let mut outcomes = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let task = contract_task();
            ids.push(task.task_id.clone());
            outcomes.push(h.orchestrator.analyze(task).await.outcome);
        }
        assert_eq!(
            outcomes,
            vec![Outcome::Success, Outcome::Failed, Outcome::PartialTier2Failure]
        );
        let entries = h.recorder.entries().await.unwrap();
        let recorded: Vec<_> = entries.iter().map(|e| e.task_id().to_string()).collect();
        assert_eq!(recorded, ids);
    }

    #[tokio::test]
    async fn cancelled_caller_still_gets_recorded() {
        let b1 = Arc::new(ScriptedBackend::new().delayed_reply(Duration::from_millis(200), DRAFT));
        let b2 = Arc::new(ScriptedBackend::always(REVIEW));
        let h = harness(live(Tier::Tier1, &b1), live(Tier::Tier2, &b2));

        let task = contract_task();
        let task_id = task.task_id.clone();
        let err = h
            .orchestrator
            .analyze_until(task, RunContext::default(), tokio::time::sleep(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled(ref id) if *id == task_id));

        let mut recorded = Vec::new();
        for _ in 0..100 {
            recorded = h.recorder.for_task(&task_id).await.unwrap();
            if !recorded.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].caller_cancelled);
        assert_eq!(recorded[0].result.outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn dropped_caller_future_is_still_recorded() {
        let b1 = Arc::new(ScriptedBackend::new().delayed_reply(Duration::from_millis(200), DRAFT));
        let b2 = Arc::new(ScriptedBackend::always(REVIEW));
        let h = harness(live(Tier::Tier1, &b1), live(Tier::Tier2, &b2));

        let task = contract_task();
        let task_id = task.task_id.clone();
        let waited =
            tokio::time::timeout(Duration::from_millis(20), h.orchestrator.analyze(task)).await;
        assert!(waited.is_err());

        let mut recorded = Vec::new();
        for _ in 0..100 {
            recorded = h.recorder.for_task(&task_id).await.unwrap();
            if !recorded.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].caller_cancelled);
        assert_eq!(recorded[0].result.outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn uncancelled_run_returns_result() {
        let h = harness(ModelClient::mocked(Tier::Tier1), ModelClient::mocked(Tier::Tier2));
        let result = h
            .orchestrator
            .analyze_until(contract_task(), RunContext::default(), std::future::pending())
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::FullMock);
        let entries = h.recorder.entries().await.unwrap();
        assert!(!entries[0].caller_cancelled);
    }

    #[test]
    fn transitions_and_outcomes() {
        let ok = ModelClient::mocked(Tier::Tier1).unsent("t", String::new(), "x".into());
        assert_eq!(after_drafting(&ok, true), Stage::Failed);

        let mut draft = ok.clone();
        draft.status = CallStatus::Ok;
        draft.response_text = Some("text".into());
        assert_eq!(after_drafting(&draft, true), Stage::Critiquing);
        assert_eq!(after_drafting(&draft, false), Stage::Merging);

        let mut mocked = draft.clone();
        mocked.status = CallStatus::Mocked;
        assert_eq!(classify(&draft, None), Outcome::Success);
        assert_eq!(classify(&draft, Some(&ok)), Outcome::PartialTier2Failure);
        assert_eq!(classify(&mocked, Some(&mocked)), Outcome::FullMock);
        assert_eq!(classify(&mocked, None), Outcome::Success);
        assert_eq!(classify(&ok, Some(&mocked)), Outcome::Failed);
    }
}
