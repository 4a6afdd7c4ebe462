//! Expert feedback store and rating statistics.

use std::fmt;
use std::sync::RwLock;

use jurisnexus_core::{FeedbackRecord, Rating};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::StoreError;
use crate::log::{AppendLog, Keyed, MemoryLog};

impl Keyed for FeedbackRecord {
    fn key(&self) -> &str {
        &self.task_id
    }
}

/// Append-only feedback. Reads are served from an in-memory copy so a
/// caller can take a consistent snapshot with [`FeedbackStore::all`].
pub struct FeedbackStore {
    log: Box<dyn AppendLog<FeedbackRecord>>,
    records: RwLock<Vec<FeedbackRecord>>,
}

impl FeedbackStore {
    pub fn open(log: Box<dyn AppendLog<FeedbackRecord>>) -> Result<Self, StoreError> {
        let records = log.scan()?;
        info!(feedback = records.len(), "feedback store opened");
        Ok(Self {
            log,
            records: RwLock::new(records),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            log: Box::new(MemoryLog::new()),
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn submit(&self, record: FeedbackRecord) -> Result<(), StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|e| StoreError::Other(format!("lock poisoned: {e}")))?;
        self.log.append(&record)?;
        info!(
            feedback_id = %record.feedback_id,
            task_id = %record.task_id,
            rating = record.rating.value(),
            "feedback recorded"
        );
        records.push(record);
        Ok(())
    }

    pub fn for_task(&self, task_id: &str) -> Result<Vec<FeedbackRecord>, StoreError> {
        Ok(self
            .read()?
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect())
    }

    /// Snapshot of every record in submission order.
    pub fn all(&self) -> Result<Vec<FeedbackRecord>, StoreError> {
        Ok(self.read()?.clone())
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.read()?.is_empty())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<FeedbackRecord>>, StoreError> {
        self.records
            .read()
            .map_err(|e| StoreError::Other(format!("lock poisoned: {e}")))
    }
}

// ── Statistics ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Improving => "improving",
            Self::Declining => "declining",
            Self::Stable => "stable",
        })
    }
}

/// Summary of a set of ratings in chronological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub count: usize,
    pub mean: Option<f64>,
    /// Count of ratings 1 through 5.
    pub distribution: [usize; 5],
    pub trend: Trend,
}

impl FeedbackStats {
    /// Trend needs at least this many ratings; fewer is always `stable`.
    pub const TREND_MIN_SAMPLES: usize = 5;
    const TREND_MARGIN: f64 = 0.5;

    /// `ratings` must be oldest first.
    pub fn from_ratings(ratings: &[Rating]) -> Self {
        let mut distribution = [0; 5];
        for r in ratings {
            distribution[usize::from(r.value() - Rating::MIN)] += 1;
        }
        let trend = if ratings.len() >= Self::TREND_MIN_SAMPLES {
            let (early, late) = ratings.split_at(ratings.len() / 2);
            let (early, late) = (mean(early).unwrap_or(0.0), mean(late).unwrap_or(0.0));
            if late > early + Self::TREND_MARGIN {
                Trend::Improving
            } else if late < early - Self::TREND_MARGIN {
                Trend::Declining
            } else {
                Trend::Stable
            }
        } else {
            Trend::Stable
        };
        Self {
            count: ratings.len(),
            mean: mean(ratings),
            distribution,
            trend,
        }
    }
}

pub fn mean(ratings: &[Rating]) -> Option<f64> {
    if ratings.is_empty() {
        return None;
    }
    let sum: u32 = ratings.iter().map(|r| u32::from(r.value())).sum();
    Some(f64::from(sum) / ratings.len() as f64)
}
