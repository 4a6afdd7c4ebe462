//! The learning log: one entry per finalized pipeline run.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use jurisnexus_core::{AnalysisTask, CallStatus, MergedOutput, Outcome, PipelineResult};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::StoreError;
use crate::log::{AppendLog, Keyed, MemoryLog};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEntry {
    pub entry_id: String,
    pub recorded_at: DateTime<Utc>,
    pub task: AnalysisTask,
    /// Carries both model call records.
    pub result: PipelineResult,
    /// The caller stopped waiting before the run finalized.
    pub caller_cancelled: bool,
    pub session_id: Option<String>,
}

impl LearningEntry {
    pub fn new(task: AnalysisTask, result: PipelineResult) -> Self {
        Self {
            entry_id: format!("run_{}", Uuid::new_v4().simple()),
            recorded_at: Utc::now(),
            task,
            result,
            caller_cancelled: false,
            session_id: None,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.result.task_id
    }

    /// Template ids used by this run, tier 1 first.
    pub fn template_ids(&self) -> impl Iterator<Item = &str> {
        self.result.records().map(|r| r.template_id.as_str())
    }

    /// Scored runs succeed at or above `quality_threshold`; unscored runs
    /// succeed when their outcome is `success`.
    pub fn is_success(&self, quality_threshold: u8) -> bool {
        match self.result.quality_score {
            Some(q) => self.result.outcome != Outcome::Failed && q >= quality_threshold,
            None => self.result.outcome == Outcome::Success,
        }
    }
}

/// Which side of the success threshold an example run falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExampleKind {
    Success,
    Failure,
}

impl ExampleKind {
    pub fn of(entry: &LearningEntry, quality_threshold: u8) -> Self {
        if entry.is_success(quality_threshold) {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

impl Keyed for LearningEntry {
    fn key(&self) -> &str {
        self.task_id()
    }
}

/// Task id to the template ids its run used, tier 1 first.
pub type TemplateIndex = HashMap<String, Vec<String>>;

/// The learning log plus an in-memory index of which templates each task
/// used. Rating attribution and task lookups are served from the index;
/// only full-entry queries read the log.
pub struct LearningLog {
    log: Box<dyn AppendLog<LearningEntry>>,
    index: RwLock<TemplateIndex>,
}

impl LearningLog {
    /// Open over `log`, indexing every entry already in it.
    pub fn open(log: Box<dyn AppendLog<LearningEntry>>) -> Result<Self, StoreError> {
        let index: TemplateIndex = log
            .scan()?
            .iter()
            .map(|e| (e.task_id().to_string(), index_row(e)))
            .collect();
        info!(runs = index.len(), "learning log opened");
        Ok(Self {
            log,
            index: RwLock::new(index),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            log: Box::new(MemoryLog::new()),
            index: RwLock::new(HashMap::new()),
        }
    }

    pub fn append(&self, entry: &LearningEntry) -> Result<(), StoreError> {
        let mut index = self
            .index
            .write()
            .map_err(|e| StoreError::Other(format!("lock poisoned: {e}")))?;
        self.log.append(entry)?;
        index.insert(entry.task_id().to_string(), index_row(entry));
        Ok(())
    }

    pub fn entries(&self) -> Result<Vec<LearningEntry>, StoreError> {
        self.log.scan()
    }

    pub fn for_task(&self, task_id: &str) -> Result<Vec<LearningEntry>, StoreError> {
        if !self.contains(task_id)? {
            return Ok(Vec::new());
        }
        self.log.find(task_id)
    }

    /// Whether a run for `task_id` has been recorded.
    pub fn contains(&self, task_id: &str) -> Result<bool, StoreError> {
        Ok(self.read()?.contains_key(task_id))
    }

    /// Snapshot of the task-to-templates index.
    pub fn template_index(&self) -> Result<TemplateIndex, StoreError> {
        Ok(self.read()?.clone())
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.read()?.is_empty())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, TemplateIndex>, StoreError> {
        self.index
            .read()
            .map_err(|e| StoreError::Other(format!("lock poisoned: {e}")))
    }
}

fn index_row(entry: &LearningEntry) -> Vec<String> {
    entry.template_ids().map(str::to_string).collect()
}

// ── Improvements ──

/// A corrected output for a recorded run, kept beside the original entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Improvement {
    pub task_id: String,
    pub recorded_at: DateTime<Utc>,
    pub output: MergedOutput,
    pub note: Option<String>,
}

impl Improvement {
    pub fn new(task_id: impl Into<String>, output: MergedOutput, note: Option<String>) -> Self {
        Self {
            task_id: task_id.into(),
            recorded_at: Utc::now(),
            output,
            note,
        }
    }
}

impl Keyed for Improvement {
    fn key(&self) -> &str {
        &self.task_id
    }
}

/// Append-only improvements, any number per task.
pub struct ImprovementLog {
    log: Box<dyn AppendLog<Improvement>>,
}

impl ImprovementLog {
    pub fn new(log: Box<dyn AppendLog<Improvement>>) -> Self {
        Self { log }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryLog::new()))
    }

    pub fn append(&self, improvement: &Improvement) -> Result<(), StoreError> {
        self.log.append(improvement)
    }

    /// Improvements for one task, oldest first.
    pub fn for_task(&self, task_id: &str) -> Result<Vec<Improvement>, StoreError> {
        self.log.find(task_id)
    }
}

/// Aggregate view of the learning log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningStats {
    pub total_runs: usize,
    pub by_outcome: BTreeMap<String, usize>,
    pub success_count: usize,
    pub failure_count: usize,
    /// Percentage, 0–100.
    pub success_rate: f64,
    pub average_quality: Option<f64>,
    /// Mean quality over the most recent scored runs.
    pub recent_quality: Option<f64>,
    pub mocked_calls: usize,
    pub cached_calls: usize,
    pub cancelled_runs: usize,
}

impl LearningStats {
    pub const RECENT_WINDOW: usize = 5;

    /// `entries` must be in append order.
    pub fn compute(entries: &[LearningEntry], quality_threshold: u8) -> Self {
        let mut by_outcome = BTreeMap::new();
        let mut success_count = 0;
        let mut mocked_calls = 0;
        let mut cached_calls = 0;
        let mut cancelled_runs = 0;
        let mut scores = Vec::new();

        for entry in entries {
            *by_outcome
                .entry(entry.result.outcome.as_str().to_string())
                .or_insert(0) += 1;
            if entry.is_success(quality_threshold) {
                success_count += 1;
            }
            if entry.caller_cancelled {
                cancelled_runs += 1;
            }
            for record in entry.result.records() {
                if record.status == CallStatus::Mocked {
                    mocked_calls += 1;
                }
                if record.cached {
                    cached_calls += 1;
                }
            }
            if let Some(q) = entry.result.quality_score {
                scores.push(f64::from(q));
            }
        }

        let total_runs = entries.len();
        let recent = &scores[scores.len().saturating_sub(Self::RECENT_WINDOW)..];
        Self {
            total_runs,
            by_outcome,
            success_count,
            failure_count: total_runs - success_count,
            success_rate: if total_runs == 0 {
                0.0
            } else {
                success_count as f64 * 100.0 / total_runs as f64
            },
            average_quality: average(&scores),
            recent_quality: average(recent),
            mocked_calls,
            cached_calls,
            cancelled_runs,
        }
    }
}

fn average(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

#[cfg(test)]
mod tests {
    use jurisnexus_core::{
        Answer, MergedOutput, ModelCallRecord, Provenance, TaskType, Tier,
    };
    use tempfile::TempDir;

    use super::*;
    use crate::log::JsonlLog;

    fn record(tier: Tier, status: CallStatus) -> ModelCallRecord {
        ModelCallRecord {
            tier,
            template_id: format!("consultation.{tier}.baseline@v1"),
            prompt_text: "p".into(),
            response_text: Some("r".into()),
            error: None,
            latency_ms: 1,
            status,
            attempts: 1,
            cached: false,
            started_at: Utc::now(),
        }
    }

    fn entry(outcome: Outcome, quality: Option<u8>, status: CallStatus) -> LearningEntry {
        let task = AnalysisTask::from_text(TaskType::Consultation, "q");
        let now = Utc::now();
        let result = PipelineResult {
            task_id: task.task_id.clone(),
            task_type: task.task_type,
            tier1_record: record(Tier::Tier1, status),
            tier2_record: Some(record(Tier::Tier2, status)),
            merged_output: MergedOutput::Answer(Answer {
                text: "a".into(),
                provenance: Provenance::Model,
                review: None,
            }),
            outcome,
            quality_score: quality,
            notices: Vec::new(),
            started_at: now,
            finalized_at: now,
        };
        LearningEntry::new(task, result)
    }

    #[test]
    fn stats_over_mixed_runs() {
        let entries = vec![
            entry(Outcome::Success, Some(8), CallStatus::Ok),
            entry(Outcome::Success, Some(5), CallStatus::Ok),
            entry(Outcome::FullMock, Some(7), CallStatus::Mocked),
            entry(Outcome::Failed, None, CallStatus::Error),
        ];
        let stats = LearningStats::compute(&entries, 7);
        assert_eq!(stats.total_runs, 4);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.failure_count, 2);
        assert_eq!(stats.success_rate, 50.0);
        assert_eq!(stats.average_quality, Some(20.0 / 3.0));
        assert_eq!(stats.mocked_calls, 2);
        assert_eq!(stats.by_outcome["success"], 2);
        assert_eq!(stats.by_outcome["failed"], 1);
    }

    #[test]
    fn recent_quality_uses_last_five_scores() {
        let mut entries: Vec<_> = (0..5)
            .map(|_| entry(Outcome::Success, Some(2), CallStatus::Ok))
            .collect();
        entries.extend((0..5).map(|_| entry(Outcome::Success, Some(9), CallStatus::Ok)));
        let stats = LearningStats::compute(&entries, 7);
        assert_eq!(stats.recent_quality, Some(9.0));
        assert_eq!(stats.average_quality, Some(5.5));
    }

    #[test]
    fn empty_log_stats() {
        let stats = LearningStats::compute(&[], 7);
        assert_eq!(stats.total_runs, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.average_quality, None);
    }

    #[test]
    fn entries_keyed_by_task() {
        let dir = TempDir::new().unwrap();
        let log = LearningLog::open(Box::new(
            JsonlLog::<LearningEntry>::open(&dir.path().join("learning.jsonl")).unwrap(),
        ))
        .unwrap();
        let e = entry(Outcome::Success, Some(8), CallStatus::Ok);
        log.append(&e).unwrap();
        log.append(&entry(Outcome::Failed, None, CallStatus::Timeout))
            .unwrap();
        let found = log.for_task(e.task_id()).unwrap();
        assert_eq!(found, vec![e]);
        assert_eq!(log.entries().unwrap().len(), 2);
        assert!(log.for_task("task_missing").unwrap().is_empty());
    }

    #[test]
    fn example_kind_follows_quality_threshold() {
        let good = entry(Outcome::Success, Some(8), CallStatus::Ok);
        let weak = entry(Outcome::Success, Some(5), CallStatus::Ok);
        let failed = entry(Outcome::Failed, None, CallStatus::Error);
        assert_eq!(ExampleKind::of(&good, 7), ExampleKind::Success);
        assert_eq!(ExampleKind::of(&weak, 7), ExampleKind::Failure);
        assert_eq!(ExampleKind::of(&failed, 7), ExampleKind::Failure);
    }

    #[test]
    fn improvements_accumulate_per_task() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("improvements.jsonl");
        let e = entry(Outcome::Success, Some(6), CallStatus::Ok);
        {
            let log = ImprovementLog::new(Box::new(JsonlLog::<Improvement>::open(&path).unwrap()));
            log.append(&Improvement::new(e.task_id(), e.result.merged_output.clone(), None))
                .unwrap();
            log.append(&Improvement::new(
                e.task_id(),
                e.result.merged_output.clone(),
                Some("cite the statute".into()),
            ))
            .unwrap();
            log.append(&Improvement::new("task_other", e.result.merged_output.clone(), None))
                .unwrap();
        }
        let log = ImprovementLog::new(Box::new(JsonlLog::<Improvement>::open(&path).unwrap()));
        let found = log.for_task(e.task_id()).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].note.as_deref(), Some("cite the statute"));
    }

    #[test]
    fn template_index_is_rebuilt_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("learning.jsonl");
        let e = entry(Outcome::Success, Some(8), CallStatus::Ok);
        {
            let log =
                LearningLog::open(Box::new(JsonlLog::<LearningEntry>::open(&path).unwrap()))
                    .unwrap();
            log.append(&e).unwrap();
        }
        let log =
            LearningLog::open(Box::new(JsonlLog::<LearningEntry>::open(&path).unwrap())).unwrap();
        assert_eq!(log.len().unwrap(), 1);
        assert!(log.contains(e.task_id()).unwrap());
        let index = log.template_index().unwrap();
        assert_eq!(
            index[e.task_id()],
            vec![
                "consultation.tier1.baseline@v1".to_string(),
                "consultation.tier2.baseline@v1".to_string(),
            ]
        );

        let later = entry(Outcome::Failed, None, CallStatus::Error);
        log.append(&later).unwrap();
        assert!(log.contains(later.task_id()).unwrap());
        assert_eq!(log.len().unwrap(), 2);
    }
}
