//! Template optimizer.
//!
//! Works out-of-band on persisted history only. A pass snapshots feedback
//! and the learning log, finds active templates whose mean rating sits
//! below the threshold with enough samples, and adds a revised version of
//! each. [`TemplateStore::add_version`] retires the old version in the same
//! write and rejects it if the lineage moved since the snapshot, so passes
//! never need to lock out selection.
//!
//! The revision appends a "Reviewer guidance" section built from the most
//! frequent comments on low ratings. With a rewriter client configured the
//! model is asked to rework the body instead, and its rewrite is kept only
//! if it uses exactly the same placeholders.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use jurisnexus_ai::{InvokeOptions, ModelClient};
use jurisnexus_core::config::OptimizerConfig;
use jurisnexus_core::template::placeholders_in;
use jurisnexus_core::{PromptTemplate, Rating};
use jurisnexus_store::{FeedbackStore, LearningLog, StoreError, TemplateStore};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tracing::{debug, info, warn};

use crate::ratings::{self, TemplateFeedback};
use crate::{EngineError, blocking};

const GUIDANCE_HEADING: &str = "Reviewer guidance:";

/// Ratings at or below this count as low when mining comments.
const LOW_RATING: u8 = 2;

/// One template replaced during a pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Revision {
    pub retired: String,
    pub created: String,
    pub mean_rating: f64,
    pub samples: usize,
    pub rewritten: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassReport {
    /// Active templates with at least one rating.
    pub examined: usize,
    pub revisions: Vec<Revision>,
    /// Revisions dropped because the lineage head moved mid-pass.
    pub conflicts: usize,
}

pub struct TemplateOptimizer {
    templates: Arc<TemplateStore>,
    feedback: Arc<FeedbackStore>,
    learning: Arc<LearningLog>,
    config: OptimizerConfig,
    rewriter: Option<Arc<ModelClient>>,
}

impl TemplateOptimizer {
    pub fn new(
        templates: Arc<TemplateStore>,
        feedback: Arc<FeedbackStore>,
        learning: Arc<LearningLog>,
        config: OptimizerConfig,
    ) -> Self {
        Self {
            templates,
            feedback,
            learning,
            config,
            rewriter: None,
        }
    }

    pub fn with_rewriter(mut self, rewriter: Arc<ModelClient>) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub async fn run_pass(&self) -> Result<PassReport, EngineError> {
        let (templates, feedback, learning) = (
            self.templates.clone(),
            self.feedback.clone(),
            self.learning.clone(),
        );
        let (active, grouped) = blocking(move || {
            let active: Vec<PromptTemplate> = templates
                .all()?
                .into_iter()
                .filter(PromptTemplate::is_active)
                .collect();
            let grouped = ratings::by_template(&feedback.all()?, &learning.template_index()?);
            Ok((active, grouped))
        })
        .await?;

        let mut report = PassReport::default();
        for template in active {
            let Some(fb) = grouped.get(&template.template_id) else {
                continue;
            };
            report.examined += 1;
            let samples = fb.ratings.len();
            let Some(mean) = jurisnexus_store::feedback::mean(&fb.ratings) else {
                continue;
            };
            if samples < self.config.min_samples || mean >= self.config.rating_threshold {
                debug!(
                    template_id = %template.template_id,
                    samples,
                    mean,
                    "template within tolerance"
                );
                continue;
            }

            let guidance = guidance(fb, self.config.max_guidance_items);
            let (body, rewritten) = match self.rewrite(&template, &guidance).await {
                Some(body) => (body, true),
                None => (with_guidance(&template.body, &guidance, mean), false),
            };
            let note = format!(
                "mean rating {mean:.2} over {samples} ratings{}",
                if rewritten { "; model rewrite" } else { "" }
            );
            let revised = template.derive(body, note);
            let created = revised.template_id.clone();
            let expected = Some(template.version);

            let store = self.templates.clone();
            match blocking(move || Ok(store.add_version(revised, expected)?)).await {
                Ok(_) => {
                    info!(
                        retired = %template.template_id,
                        created = %created,
                        mean,
                        samples,
                        rewritten,
                        "template revised"
                    );
                    report.revisions.push(Revision {
                        retired: template.template_id.clone(),
                        created,
                        mean_rating: mean,
                        samples,
                        rewritten,
                    });
                }
                Err(EngineError::Store(StoreError::Conflict { lineage, .. })) => {
                    warn!(%lineage, "lineage moved during pass, skipping revision");
                    report.conflicts += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Ask the rewriter for a revised body. `None` if there is no rewriter,
    /// the call fails, or the rewrite changes the placeholder set.
    async fn rewrite(&self, template: &PromptTemplate, guidance: &[String]) -> Option<String> {
        let client = self.rewriter.as_ref()?;
        let prompt = format!(
            "Improve the following prompt template for a legal analysis model. \
             Keep every placeholder in curly braces exactly as written and add no new ones. \
             Reply with the revised template only.\n\n\
             Reviewer complaints:\n{}\n\nTemplate:\n{}",
            bullet_list(guidance),
            template.body
        );
        let request = client.request(prompt, template.task_type);
        let record = client
            .invoke(&template.template_id, &request, InvokeOptions::default())
            .await;
        if !record.is_usable() || record.is_mocked() {
            return None;
        }
        let body = record.text()?.trim().to_string();
        if placeholders_in(&body) == template.placeholders() {
            Some(body)
        } else {
            warn!(
                template_id = %template.template_id,
                "rewrite changed placeholders, using guidance revision"
            );
            None
        }
    }

    /// Run passes in the background: every `interval_secs` (if non-zero)
    /// and whenever [`OptimizerHandle::feedback_submitted`] has been called
    /// `feedback_trigger` times since the last pass.
    pub fn spawn(self: Arc<Self>) -> OptimizerHandle {
        let trigger = Arc::new(Notify::new());
        let wake = trigger.clone();
        let period = (self.config.interval_secs > 0)
            .then(|| Duration::from_secs(self.config.interval_secs));
        let every = self.config.feedback_trigger;

        let task = tokio::spawn(async move {
            let mut ticker = period.map(|p| tokio::time::interval_at(Instant::now() + p, p));
            loop {
                tokio::select! {
                    () = tick(&mut ticker) => debug!("periodic optimizer pass"),
                    () = wake.notified() => debug!("feedback-triggered optimizer pass"),
                }
                match self.run_pass().await {
                    Ok(report) if !report.revisions.is_empty() => info!(
                        revisions = report.revisions.len(),
                        conflicts = report.conflicts,
                        "optimizer pass complete"
                    ),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "optimizer pass failed"),
                }
            }
        });

        OptimizerHandle {
            trigger,
            every,
            pending: AtomicUsize::new(0),
            task,
        }
    }
}

/// Handle to a background optimizer. Dropping it stops the loop.
pub struct OptimizerHandle {
    trigger: Arc<Notify>,
    /// `0` disables feedback-count triggering.
    every: usize,
    pending: AtomicUsize,
    task: JoinHandle<()>,
}

impl OptimizerHandle {
    /// Count one feedback submission, waking the optimizer every `every` calls.
    pub fn feedback_submitted(&self) {
        if self.every == 0 {
            return;
        }
        let n = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        if n >= self.every {
            self.pending.store(0, Ordering::Release);
            self.trigger.notify_one();
        }
    }

    /// Request a pass now.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }
}

impl Drop for OptimizerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Most frequent comments on low ratings, most common first, ties in
/// order of first appearance.
fn guidance(fb: &TemplateFeedback, limit: usize) -> Vec<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (rating, comment) in &fb.comments {
        if rating.value() > LOW_RATING {
            continue;
        }
        let comment = comment.trim();
        let key = comment.to_lowercase();
        match index.get(&key) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(key, counts.len());
                counts.push((comment.to_string(), 1));
            }
        }
    }
    // Stable sort keeps first-seen order among equal counts.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.into_iter().take(limit).map(|(c, _)| c).collect()
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "- (no specific comments)".to_string();
    }
    items
        .iter()
        .map(|i| format!("- {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `body` with its guidance section replaced by one built from `items`.
fn with_guidance(body: &str, items: &[String], mean: f64) -> String {
    let base = match body.find(GUIDANCE_HEADING) {
        Some(i) => body[..i].trim_end(),
        None => body.trim_end(),
    };
    let mut lines = vec![format!(
        "- Reviewers rated recent output {mean:.1}/{}. Cite the legal basis for every point and give concrete recommendations.",
        Rating::MAX
    )];
    lines.extend(items.iter().map(|i| format!("- Address this reviewer concern: {i}")));
    format!("{base}\n\n{GUIDANCE_HEADING}\n{}", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use jurisnexus_ai::RetryPolicy;
    use jurisnexus_ai::testing::ScriptedBackend;
    use jurisnexus_core::baseline::all_baselines;
    use jurisnexus_core::{TaskType, Tier};

    use super::*;
    use crate::ratings::fixtures::{index, rate, run};

    const RISK_T1: &str = "contract_risk.tier1.baseline@v1";
    const RISK_T2: &str = "contract_risk.tier2.baseline@v1";

    struct Fixture {
        templates: Arc<TemplateStore>,
        feedback: Arc<FeedbackStore>,
        learning: Arc<LearningLog>,
    }

    impl Fixture {
        fn new() -> Self {
            let templates = Arc::new(TemplateStore::in_memory());
            templates.seed(all_baselines()).unwrap();
            Self {
                templates,
                feedback: Arc::new(FeedbackStore::in_memory()),
                learning: Arc::new(LearningLog::in_memory()),
            }
        }

        fn optimizer(&self, config: OptimizerConfig) -> TemplateOptimizer {
            TemplateOptimizer::new(
                self.templates.clone(),
                self.feedback.clone(),
                self.learning.clone(),
                config,
            )
        }

        fn rated_run(&self, rating: u8, comment: Option<&str>) {
            let entry = run(TaskType::ContractRisk, RISK_T1, Some(RISK_T2));
            self.learning.append(&entry).unwrap();
            self.feedback.submit(rate(&entry, rating, comment)).unwrap();
        }
    }

    fn config() -> OptimizerConfig {
        OptimizerConfig {
            min_samples: 3,
            rating_threshold: 3.0,
            ..OptimizerConfig::default()
        }
    }

    #[tokio::test]
    async fn low_ratings_past_min_samples_revise_and_retire() {
        let f = Fixture::new();
        for _ in 0..3 {
            f.rated_run(1, Some("Misses statutory citations"));
        }
        let report = f.optimizer(config()).run_pass().await.unwrap();

        let t2 = report.revisions.iter().find(|r| r.retired == RISK_T2).unwrap();
        assert_eq!(t2.created, "contract_risk.tier2.baseline@v2");
        assert_eq!(t2.samples, 3);
        assert_eq!(t2.mean_rating, 1.0);
        assert!(!t2.rewritten);

        let v1 = f.templates.get(RISK_T2).unwrap().unwrap();
        assert!(!v1.is_active());
        let v2 = f.templates.get(&t2.created).unwrap().unwrap();
        assert!(v2.is_active());
        assert_eq!(v2.derived_from.as_deref(), Some(RISK_T2));
        assert_eq!(v2.placeholders(), v1.placeholders());
        assert!(v2.body.contains("Misses statutory citations"));

        let active = f.templates.active_for(TaskType::ContractRisk, Tier::Tier2).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].template_id, t2.created);
    }

    #[tokio::test]
    async fn too_few_samples_or_good_mean_leave_templates_alone() {
        let f = Fixture::new();
        f.rated_run(1, None);
        f.rated_run(1, None);
        let report = f.optimizer(config()).run_pass().await.unwrap();
        assert!(report.revisions.is_empty());
        assert_eq!(report.examined, 2);

        f.rated_run(5, None);
        f.rated_run(5, None);
        f.rated_run(5, None);
        let report = f.optimizer(config()).run_pass().await.unwrap();
        assert!(report.revisions.is_empty());
    }

    #[tokio::test]
    async fn second_pass_does_not_revise_again() {
        let f = Fixture::new();
        for _ in 0..3 {
            f.rated_run(2, None);
        }
        let optimizer = f.optimizer(config());
        assert_eq!(optimizer.run_pass().await.unwrap().revisions.len(), 2);
        let again = optimizer.run_pass().await.unwrap();
        assert!(again.revisions.is_empty());
        assert_eq!(again.examined, 0);
    }

    #[test]
    fn guidance_prefers_frequent_low_rating_comments() {
        let entry = run(TaskType::Research, "r@v1", None);
        let feedback = vec![
            rate(&entry, 1, Some("too vague")),
            rate(&entry, 2, Some("No citations")),
            rate(&entry, 5, Some("great")),
            rate(&entry, 1, Some("no citations")),
        ];
        let grouped = ratings::by_template(&feedback, &index(&[entry]));
        let items = guidance(&grouped["r@v1"], 3);
        assert_eq!(items, vec!["No citations".to_string(), "too vague".to_string()]);
        assert_eq!(guidance(&grouped["r@v1"], 1).len(), 1);
    }

    #[test]
    fn guidance_section_is_replaced_not_stacked() {
        let once = with_guidance("Analyse {document}.", &["be brief".into()], 2.0);
        let twice = with_guidance(&once, &["cite cases".into()], 1.5);
        assert_eq!(twice.matches(GUIDANCE_HEADING).count(), 1);
        assert!(twice.contains("cite cases"));
        assert!(!twice.contains("be brief"));
        assert!(twice.starts_with("Analyse {document}."));
    }

    fn rewriter(reply: &str) -> Arc<ModelClient> {
        let policy = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        Arc::new(ModelClient::new(
            Tier::Tier2,
            Arc::new(ScriptedBackend::always(reply)),
            policy,
        ))
    }

    #[tokio::test]
    async fn rewrite_kept_only_when_placeholders_match() {
        let f = Fixture::new();
        let original = f.templates.get(RISK_T1).unwrap().unwrap();
        let placeholders: Vec<String> = original
            .placeholders()
            .into_iter()
            .map(|p| format!("{{{p}}}"))
            .collect();
        let good = format!("Careful review, citing statutes.\n{}", placeholders.join("\n"));
        for _ in 0..3 {
            f.rated_run(1, None);
        }

        let report = f
            .optimizer(config())
            .with_rewriter(rewriter(&good))
            .run_pass()
            .await
            .unwrap();
        let t1 = report.revisions.iter().find(|r| r.retired == RISK_T1).unwrap();
        assert!(t1.rewritten);
        assert_eq!(f.templates.get(&t1.created).unwrap().unwrap().body, good);

        let f = Fixture::new();
        for _ in 0..3 {
            f.rated_run(1, None);
        }
        let report = f
            .optimizer(config())
            .with_rewriter(rewriter("Just analyse {document}."))
            .run_pass()
            .await
            .unwrap();
        assert!(report.revisions.iter().all(|r| !r.rewritten));
    }

    #[tokio::test]
    async fn feedback_trigger_wakes_background_pass() {
        let f = Fixture::new();
        for _ in 0..3 {
            f.rated_run(1, None);
        }
        let optimizer = Arc::new(f.optimizer(OptimizerConfig {
            interval_secs: 0,
            feedback_trigger: 2,
            ..config()
        }));
        let handle = optimizer.spawn();
        handle.feedback_submitted();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(f.templates.head("contract_risk.tier2.baseline").unwrap().unwrap().version == 1);

        handle.feedback_submitted();
        let mut version = 1;
        for _ in 0..100 {
            version = f
                .templates
                .head("contract_risk.tier2.baseline")
                .unwrap()
                .unwrap()
                .version;
            if version == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(version, 2);
    }
}
