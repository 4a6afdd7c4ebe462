//! Versioned prompt template store.
//!
//! The persisted form is an event log: a template is `Added` once and may
//! later be `Retired`. Nothing is edited or deleted, so every template id
//! ever referenced by a model call stays resolvable. An in-memory index is
//! rebuilt from the log on open and kept in step with every append.
//!
//! Writers use optimistic versioning: [`TemplateStore::add_version`] names
//! the lineage head it was derived from, and the write is rejected with
//! [`StoreError::Conflict`] if another writer moved the head first.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use jurisnexus_core::{PromptTemplate, TaskType, Tier};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::StoreError;
use crate::log::{AppendLog, Keyed, MemoryLog};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TemplateEvent {
    Added { template: PromptTemplate },
    Retired { template_id: String, at: DateTime<Utc> },
}

impl Keyed for TemplateEvent {
    fn key(&self) -> &str {
        match self {
            Self::Added { template } => &template.template_id,
            Self::Retired { template_id, .. } => template_id,
        }
    }
}

#[derive(Default)]
struct Index {
    by_id: HashMap<String, PromptTemplate>,
    /// Template ids per lineage, ascending by version.
    lineages: BTreeMap<String, Vec<String>>,
    generation: u64,
}

impl Index {
    fn apply(&mut self, event: TemplateEvent) {
        match event {
            TemplateEvent::Added { template } => {
                let lineage = template.lineage.clone();
                let id = template.template_id.clone();
                self.by_id.insert(id.clone(), template);
                let by_id = &self.by_id;
                let ids = self.lineages.entry(lineage).or_default();
                ids.push(id);
                ids.sort_by_key(|id| by_id.get(id).map(|t| t.version));
            }
            TemplateEvent::Retired { template_id, at } => {
                if let Some(t) = self.by_id.get_mut(&template_id) {
                    t.retired_at.get_or_insert(at);
                }
            }
        }
        self.generation += 1;
    }

    fn head(&self, lineage: &str) -> Option<&PromptTemplate> {
        self.lineages
            .get(lineage)
            .and_then(|ids| ids.last())
            .and_then(|id| self.by_id.get(id))
    }
}

pub struct TemplateStore {
    log: Box<dyn AppendLog<TemplateEvent>>,
    index: RwLock<Index>,
}

impl TemplateStore {
    /// Open a store over `log`, replaying its events.
    pub fn open(log: Box<dyn AppendLog<TemplateEvent>>) -> Result<Self, StoreError> {
        let mut index = Index::default();
        for event in log.scan()? {
            index.apply(event);
        }
        info!(templates = index.by_id.len(), "template store opened");
        Ok(Self {
            log,
            index: RwLock::new(index),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            log: Box::new(MemoryLog::new()),
            index: RwLock::new(Index::default()),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Index>, StoreError> {
        self.index
            .read()
            .map_err(|e| StoreError::Other(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Index>, StoreError> {
        self.index
            .write()
            .map_err(|e| StoreError::Other(format!("lock poisoned: {e}")))
    }

    fn append(&self, index: &mut Index, event: TemplateEvent) -> Result<(), StoreError> {
        self.log.append(&event)?;
        index.apply(event);
        Ok(())
    }

    /// Fetch any version by id, retired or not.
    pub fn get(&self, template_id: &str) -> Result<Option<PromptTemplate>, StoreError> {
        Ok(self.read()?.by_id.get(template_id).cloned())
    }

    /// Active templates for `(task_type, tier)`, ordered by id.
    pub fn active_for(
        &self,
        task_type: TaskType,
        tier: Tier,
    ) -> Result<Vec<PromptTemplate>, StoreError> {
        let index = self.read()?;
        let mut active: Vec<_> = index
            .by_id
            .values()
            .filter(|t| t.task_type == task_type && t.tier == tier && t.is_active())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.template_id.cmp(&b.template_id));
        Ok(active)
    }

    /// Every version of a lineage, oldest first.
    pub fn lineage(&self, lineage: &str) -> Result<Vec<PromptTemplate>, StoreError> {
        let index = self.read()?;
        Ok(index
            .lineages
            .get(lineage)
            .into_iter()
            .flatten()
            .filter_map(|id| index.by_id.get(id).cloned())
            .collect())
    }

    /// Latest version of a lineage.
    pub fn head(&self, lineage: &str) -> Result<Option<PromptTemplate>, StoreError> {
        Ok(self.read()?.head(lineage).cloned())
    }

    pub fn all(&self) -> Result<Vec<PromptTemplate>, StoreError> {
        let index = self.read()?;
        let mut all: Vec<_> = index.by_id.values().cloned().collect();
        all.sort_by(|a, b| a.template_id.cmp(&b.template_id));
        Ok(all)
    }

    /// Counter bumped by every applied event.
    pub fn generation(&self) -> Result<u64, StoreError> {
        Ok(self.read()?.generation)
    }

    /// Add `template` as the next version of its lineage and retire every
    /// other active version of that lineage.
    ///
    /// `expected_head` is the head version the caller derived from (`None`
    /// for a brand-new lineage). The write fails with a conflict if the head
    /// has moved or if `template.version` does not follow it.
    pub fn add_version(
        &self,
        template: PromptTemplate,
        expected_head: Option<u32>,
    ) -> Result<PromptTemplate, StoreError> {
        let mut index = self.write()?;
        let found = index.head(&template.lineage).map(|t| t.version);
        if found != expected_head || template.version != expected_head.map_or(1, |v| v + 1) {
            return Err(StoreError::Conflict {
                lineage: template.lineage.clone(),
                expected: expected_head,
                found,
            });
        }

        let to_retire: Vec<String> = index
            .lineages
            .get(&template.lineage)
            .into_iter()
            .flatten()
            .filter(|id| index.by_id.get(*id).is_some_and(|t| t.is_active()))
            .cloned()
            .collect();

        self.append(
            &mut index,
            TemplateEvent::Added {
                template: template.clone(),
            },
        )?;
        let now = Utc::now();
        for template_id in to_retire {
            info!(%template_id, replaced_by = %template.template_id, "retiring template");
            self.append(&mut index, TemplateEvent::Retired { template_id, at: now })?;
        }
        Ok(template)
    }

    /// Add each template whose lineage is not yet present. Returns how many were added.
    pub fn seed(&self, templates: Vec<PromptTemplate>) -> Result<usize, StoreError> {
        let mut index = self.write()?;
        let mut added = 0;
        for template in templates {
            if index.lineages.contains_key(&template.lineage) {
                continue;
            }
            self.append(&mut index, TemplateEvent::Added { template })?;
            added += 1;
        }
        if added > 0 {
            info!(added, "seeded templates");
        }
        Ok(added)
    }
}
