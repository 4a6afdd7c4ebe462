//! Learning recorder: the fire-and-forget sink every finalized run goes to.
//!
//! [`LearningRecorder::record`] hands the entry to a single writer task over
//! an unbounded channel and returns immediately. The writer appends entries
//! one at a time, so concurrent runs never interleave within the log.
//! [`LearningRecorder::flush`] waits until everything queued before it has
//! been written.

use std::sync::Arc;

use jurisnexus_store::{ExampleKind, LearningEntry, LearningLog, LearningStats};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::EngineError;

enum Command {
    Record(Box<LearningEntry>),
    Flush(oneshot::Sender<()>),
}

pub struct LearningRecorder {
    tx: mpsc::UnboundedSender<Command>,
    log: Arc<LearningLog>,
    quality_threshold: u8,
}

impl LearningRecorder {
    /// Start the writer task. Must be called from within a Tokio runtime.
    pub fn spawn(log: Arc<LearningLog>, quality_threshold: u8) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(log.clone(), rx));
        Self {
            tx,
            log,
            quality_threshold,
        }
    }

    pub fn record(&self, entry: LearningEntry) {
        debug!(
            task_id = %entry.task_id(),
            outcome = %entry.result.outcome,
            "queueing learning entry"
        );
        if let Err(mpsc::error::SendError(Command::Record(entry))) =
            self.tx.send(Command::Record(Box::new(entry)))
        {
            // Writer is gone; append inline.
            warn!(task_id = %entry.task_id(), "recorder writer stopped, appending inline");
            if let Err(e) = self.log.append(&entry) {
                error!(task_id = %entry.task_id(), error = %e, "failed to record run");
            }
        }
    }

    /// Wait for every entry queued so far to reach the log.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    pub fn log(&self) -> &Arc<LearningLog> {
        &self.log
    }

    /// Every recorded run, after a flush.
    pub async fn entries(&self) -> Result<Vec<LearningEntry>, EngineError> {
        self.flush().await;
        let log = self.log.clone();
        crate::blocking(move || Ok(log.entries()?)).await
    }

    /// Runs recorded for one task, after a flush.
    pub async fn for_task(&self, task_id: &str) -> Result<Vec<LearningEntry>, EngineError> {
        self.flush().await;
        let log = self.log.clone();
        let task_id = task_id.to_string();
        crate::blocking(move || Ok(log.for_task(&task_id)?)).await
    }

    /// The `limit` most recent runs, newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<LearningEntry>, EngineError> {
        let mut entries = self.entries().await?;
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }

    /// The `limit` most recent runs on the `kind` side of the success
    /// threshold, newest first.
    pub async fn examples(
        &self,
        kind: ExampleKind,
        limit: usize,
    ) -> Result<Vec<LearningEntry>, EngineError> {
        let entries = self.entries().await?;
        Ok(entries
            .into_iter()
            .rev()
            .filter(|e| ExampleKind::of(e, self.quality_threshold) == kind)
            .take(limit)
            .collect())
    }

    /// Whether a run for `task_id` has been recorded, after a flush.
    pub async fn contains(&self, task_id: &str) -> Result<bool, EngineError> {
        self.flush().await;
        Ok(self.log.contains(task_id)?)
    }

    pub async fn stats(&self) -> Result<LearningStats, EngineError> {
        let entries = self.entries().await?;
        Ok(LearningStats::compute(&entries, self.quality_threshold))
    }
}

async fn write_loop(log: Arc<LearningLog>, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Record(entry) => {
                let log = log.clone();
                let task_id = entry.task_id().to_string();
                match tokio::task::spawn_blocking(move || log.append(&entry)).await {
                    Ok(Ok(())) => debug!(%task_id, "run recorded"),
                    Ok(Err(e)) => error!(%task_id, error = %e, "failed to record run"),
                    Err(e) => error!(%task_id, error = %e, "recorder write task panicked"),
                }
            }
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use jurisnexus_core::TaskType;

    use super::*;
    use crate::ratings::fixtures::run;

    #[tokio::test]
    async fn flush_makes_queued_entries_visible() {
        let recorder = LearningRecorder::spawn(Arc::new(LearningLog::in_memory()), 7);
        let entries: Vec<_> = (0..20)
            .map(|_| run(TaskType::Research, "r@v1", None))
            .collect();
        for e in &entries {
            recorder.record(e.clone());
        }
        let stored = recorder.entries().await.unwrap();
        assert_eq!(stored.len(), 20);
        assert_eq!(stored[19].task_id(), entries[19].task_id());
    }

    #[tokio::test]
    async fn concurrent_records_are_all_kept() {
        let recorder = Arc::new(LearningRecorder::spawn(Arc::new(LearningLog::in_memory()), 7));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let recorder = recorder.clone();
                tokio::spawn(async move {
                    for _ in 0..10 {
                        recorder.record(run(TaskType::Drafting, "d@v1", None));
                    }
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        let stats = recorder.stats().await.unwrap();
        assert_eq!(stats.total_runs, 80);
        assert_eq!(stats.by_outcome.get("success"), Some(&80));
    }

    #[tokio::test]
    async fn examples_and_recent_are_newest_first() {
        let recorder = LearningRecorder::spawn(Arc::new(LearningLog::in_memory()), 7);
        let scored = |q: u8| {
            let mut e = run(TaskType::Consultation, "c@v1", Some("c2@v1"));
            e.result.quality_score = Some(q);
            e
        };
        let runs = [scored(9), scored(3), scored(8), scored(2), scored(7)];
        for e in &runs {
            recorder.record(e.clone());
        }

        let ids = |entries: Vec<LearningEntry>| -> Vec<String> {
            entries.iter().map(|e| e.task_id().to_string()).collect()
        };
        let good = recorder.examples(ExampleKind::Success, 2).await.unwrap();
        assert_eq!(ids(good), vec![runs[4].task_id(), runs[2].task_id()]);
        let bad = recorder.examples(ExampleKind::Failure, 10).await.unwrap();
        assert_eq!(ids(bad), vec![runs[3].task_id(), runs[1].task_id()]);
        let recent = recorder.recent(3).await.unwrap();
        assert_eq!(
            ids(recent),
            vec![runs[4].task_id(), runs[3].task_id(), runs[2].task_id()]
        );
    }

    #[tokio::test]
    async fn lookup_by_task() {
        let recorder = LearningRecorder::spawn(Arc::new(LearningLog::in_memory()), 7);
        let e = run(TaskType::Litigation, "l@v1", Some("l2@v1"));
        recorder.record(e.clone());
        recorder.record(run(TaskType::Litigation, "l@v1", None));
        let found = recorder.for_task(e.task_id()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entry_id, e.entry_id);
        assert!(recorder.contains(e.task_id()).await.unwrap());
        assert!(!recorder.contains("task_never_run").await.unwrap());
    }
}
