//! Attribution of expert ratings to the templates that produced a result.
//!
//! Feedback is given per task; the learning log says which template ids a
//! task's model calls used. Joining the two yields each template's ratings
//! in submission order, which both selection and optimisation work from.

use std::collections::HashMap;

use jurisnexus_core::{FeedbackRecord, Rating};
use jurisnexus_store::TemplateIndex;

/// Ratings and comments attributed to one template, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateFeedback {
    pub ratings: Vec<Rating>,
    /// `(rating, comment)` for every rating that came with a comment.
    pub comments: Vec<(Rating, String)>,
}

impl TemplateFeedback {
    /// Mean of the most recent `window` ratings.
    pub fn rolling_mean(&self, window: usize) -> Option<f64> {
        let start = self.ratings.len().saturating_sub(window.max(1));
        jurisnexus_store::feedback::mean(&self.ratings[start..])
    }
}

/// Group `feedback` by template id through the learning log's index.
///
/// A rating counts once for every template its task used, so a run rated
/// 1 marks down both its tier-1 and tier-2 templates. Feedback for a task
/// absent from `templates_of` is ignored.
pub fn by_template(
    feedback: &[FeedbackRecord],
    templates_of: &TemplateIndex,
) -> HashMap<String, TemplateFeedback> {
    let mut grouped: HashMap<String, TemplateFeedback> = HashMap::new();
    for record in feedback {
        let Some(template_ids) = templates_of.get(record.task_id.as_str()) else {
            continue;
        };
        for template_id in template_ids {
            let slot = grouped.entry(template_id.clone()).or_default();
            slot.ratings.push(record.rating);
            if let Some(comment) = &record.comments {
                slot.comments.push((record.rating, comment.clone()));
            }
        }
    }
    grouped
}
