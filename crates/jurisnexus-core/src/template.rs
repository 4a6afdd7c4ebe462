//! Versioned prompt templates.
//!
//! A template is identified per version as `{lineage}@v{version}`. All
//! versions derived from the same root share a lineage. Placeholders are
//! `{name}` tokens where `name` is lowercase ASCII, digits, or `_`; any other
//! brace (JSON examples in the body, for instance) is left untouched.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::CoreError;
use crate::task::{TaskType, Tier};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z0-9_]+)\}").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub template_id: String,
    pub lineage: String,
    pub task_type: TaskType,
    pub tier: Tier,
    pub version: u32,
    pub body: String,
    /// Restricts the template to documents in this language. `None` fits any.
    pub language: Option<String>,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
    pub derived_from: Option<String>,
    pub change_note: Option<String>,
}

impl PromptTemplate {
    /// First version of a new lineage.
    pub fn root(
        lineage: impl Into<String>,
        task_type: TaskType,
        tier: Tier,
        body: impl Into<String>,
    ) -> Self {
        let lineage = lineage.into();
        Self {
            template_id: version_id(&lineage, 1),
            lineage,
            task_type,
            tier,
            version: 1,
            body: body.into(),
            language: None,
            created_at: Utc::now(),
            retired_at: None,
            derived_from: None,
            change_note: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Next version in the same lineage. The receiver is left untouched.
    pub fn derive(&self, body: impl Into<String>, change_note: impl Into<String>) -> Self {
        let version = self.version + 1;
        Self {
            template_id: version_id(&self.lineage, version),
            lineage: self.lineage.clone(),
            task_type: self.task_type,
            tier: self.tier,
            version,
            body: body.into(),
            language: self.language.clone(),
            created_at: Utc::now(),
            retired_at: None,
            derived_from: Some(self.template_id.clone()),
            change_note: Some(change_note.into()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.retired_at.is_none()
    }

    /// `true` when this template may be used for a document in `language`.
    pub fn fits_language(&self, language: &str) -> bool {
        self.language
            .as_deref()
            .is_none_or(|l| l.eq_ignore_ascii_case(language))
    }

    /// Distinct placeholder names in the body.
    pub fn placeholders(&self) -> BTreeSet<String> {
        placeholders_in(&self.body)
    }

    /// Substitute every placeholder. Fails on the first one without a value.
    pub fn render(&self, params: &HashMap<&str, String>) -> Result<String, CoreError> {
        if let Some(missing) = self
            .placeholders()
            .into_iter()
            .find(|p| !params.contains_key(p.as_str()))
        {
            return Err(CoreError::MissingPlaceholder {
                template_id: self.template_id.clone(),
                placeholder: missing,
            });
        }
        Ok(PLACEHOLDER
            .replace_all(&self.body, |caps: &regex::Captures<'_>| {
                params[&caps[1]].clone()
            })
            .into_owned())
    }
}

/// Template id for a given lineage and version.
pub fn version_id(lineage: &str, version: u32) -> String {
    format!("{lineage}@v{version}")
}

/// Lineage of the built-in template for a task type and tier.
pub fn baseline_lineage(task_type: TaskType, tier: Tier) -> String {
    format!("{}.{}.baseline", task_type.as_str(), tier)
}

pub fn placeholders_in(body: &str) -> BTreeSet<String> {
    PLACEHOLDER
        .captures_iter(body)
        .map(|c| c[1].to_string())
        .collect()
}
