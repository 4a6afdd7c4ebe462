use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CoreError;

/// A user rating on the 1–5 scale. Out-of-range values cannot be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: u8) -> Result<Self, CoreError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(CoreError::InvalidRating(value))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Rating {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Rating> for u8 {
    fn from(r: Rating) -> u8 {
        r.0
    }
}

/// User feedback on one finalized task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub feedback_id: String,
    pub task_id: String,
    pub rating: Rating,
    pub comments: Option<String>,
    pub reviewer_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FeedbackRecord {
    pub fn new(task_id: impl Into<String>, rating: Rating, comments: Option<String>) -> Self {
        Self {
            feedback_id: format!("fb_{}", Uuid::new_v4().simple()),
            task_id: task_id.into(),
            rating,
            comments: comments.filter(|c| !c.trim().is_empty()),
            reviewer_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_reviewer(mut self, reviewer_id: impl Into<String>) -> Self {
        self.reviewer_id = Some(reviewer_id.into());
        self
    }
}
