//! Template selection.
//!
//! Among the active templates for a `(task_type, tier)` pair that fit the
//! document's language, pick the one with the highest rolling mean rating.
//! Ties go to the higher version, then to the smaller template id, so the
//! choice is a pure function of store contents and feedback history.
//!
//! With no ratings for any candidate the built-in baseline lineage wins
//! (cold start). Unrated candidates competing with rated ones are scored at
//! a configurable prior.

use std::sync::Arc;

use jurisnexus_core::baseline::baseline;
use jurisnexus_core::template::baseline_lineage;
use jurisnexus_core::config::SelectorConfig;
use jurisnexus_core::{DocumentProfile, PromptTemplate, TaskType, Tier};
use jurisnexus_store::{FeedbackStore, LearningLog, TemplateStore};
use tracing::debug;

use crate::EngineError;
use crate::ratings;

pub struct TemplateSelector {
    templates: Arc<TemplateStore>,
    feedback: Arc<FeedbackStore>,
    learning: Arc<LearningLog>,
    config: SelectorConfig,
}

impl TemplateSelector {
    pub fn new(
        templates: Arc<TemplateStore>,
        feedback: Arc<FeedbackStore>,
        learning: Arc<LearningLog>,
        config: SelectorConfig,
    ) -> Self {
        Self {
            templates,
            feedback,
            learning,
            config,
        }
    }

    pub fn select(
        &self,
        task_type: TaskType,
        tier: Tier,
        profile: &DocumentProfile,
    ) -> Result<PromptTemplate, EngineError> {
        let candidates: Vec<PromptTemplate> = self
            .templates
            .active_for(task_type, tier)?
            .into_iter()
            .filter(|t| t.fits_language(&profile.language))
            .collect();
        if candidates.is_empty() {
            return self.fallback(task_type, tier);
        }

        let feedback = self.feedback.all()?;
        let grouped = if feedback.is_empty() {
            Default::default()
        } else {
            ratings::by_template(&feedback, &self.learning.template_index()?)
        };
        let means: Vec<Option<f64>> = candidates
            .iter()
            .map(|t| {
                grouped
                    .get(&t.template_id)
                    .and_then(|fb| fb.rolling_mean(self.config.rolling_window))
            })
            .collect();

        let chosen = if means.iter().all(Option::is_none) {
            let lineage = baseline_lineage(task_type, tier);
            candidates
                .iter()
                .find(|t| t.lineage == lineage)
                .or_else(|| rank(candidates.iter().map(|t| (0.0, t))))
        } else {
            let prior = self.config.unrated_prior;
            rank(
                candidates
                    .iter()
                    .zip(&means)
                    .map(|(t, m)| (m.unwrap_or(prior), t)),
            )
        };
        match chosen {
            Some(t) => {
                debug!(
                    %task_type,
                    %tier,
                    template_id = %t.template_id,
                    rated = means.iter().any(Option::is_some),
                    "selected template"
                );
                Ok(t.clone())
            }
            None => self.fallback(task_type, tier),
        }
    }

    /// No active template fits: take the baseline lineage's head from the
    /// store, or the built-in baseline if the store has never seen it.
    fn fallback(&self, task_type: TaskType, tier: Tier) -> Result<PromptTemplate, EngineError> {
        let lineage = baseline_lineage(task_type, tier);
        Ok(self
            .templates
            .head(&lineage)?
            .unwrap_or_else(|| baseline(task_type, tier)))
    }
}

/// Highest score, then highest version, then smallest id.
fn rank<'a>(
    scored: impl Iterator<Item = (f64, &'a PromptTemplate)>,
) -> Option<&'a PromptTemplate> {
    scored
        .min_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa)
                .then_with(|| b.version.cmp(&a.version))
                .then_with(|| a.template_id.cmp(&b.template_id))
        })
        .map(|(_, t)| t)
}
