//! Opening the persistent stores from [`StorageConfig`].

use std::path::Path;
use std::sync::Arc;

use jurisnexus_core::baseline::all_baselines;
use jurisnexus_core::config::StorageConfig;
use jurisnexus_core::{FeedbackRecord, StorageBackend};
use jurisnexus_store::{
    FeedbackStore, Improvement, ImprovementLog, JsonlLog, LearningEntry, LearningLog,
    SessionEvent, SessionLog, StoreError, TemplateEvent, TemplateStore,
};
use tracing::info;

use crate::EngineError;

/// Every store the engine reads and writes, shared between components.
#[derive(Clone)]
pub struct Stores {
    pub templates: Arc<TemplateStore>,
    pub feedback: Arc<FeedbackStore>,
    pub learning: Arc<LearningLog>,
    pub improvements: Arc<ImprovementLog>,
    pub sessions: Arc<SessionLog>,
}

impl Stores {
    /// Open the configured backend and seed any missing baseline lineages.
    pub fn open(config: &StorageConfig) -> Result<Self, EngineError> {
        let stores = match config.backend {
            StorageBackend::Memory => Self::in_memory(),
            StorageBackend::Jsonl => Self::jsonl(&config.data_dir)?,
            StorageBackend::Duckdb => Self::duckdb(&config.data_dir)?,
        };
        let seeded = stores.templates.seed(all_baselines())?;
        info!(
            backend = ?config.backend,
            data_dir = %config.data_dir.display(),
            seeded,
            "stores opened"
        );
        Ok(stores)
    }

    pub fn in_memory() -> Self {
        Self {
            templates: Arc::new(TemplateStore::in_memory()),
            feedback: Arc::new(FeedbackStore::in_memory()),
            learning: Arc::new(LearningLog::in_memory()),
            improvements: Arc::new(ImprovementLog::in_memory()),
            sessions: Arc::new(SessionLog::in_memory()),
        }
    }

    fn jsonl(dir: &Path) -> Result<Self, StoreError> {
        let templates = JsonlLog::<TemplateEvent>::open(&dir.join("templates.jsonl"))?;
        let feedback = JsonlLog::<FeedbackRecord>::open(&dir.join("feedback.jsonl"))?;
        let learning = JsonlLog::<LearningEntry>::open(&dir.join("learning.jsonl"))?;
        let improvements = JsonlLog::<Improvement>::open(&dir.join("improvements.jsonl"))?;
        let sessions = JsonlLog::<SessionEvent>::open(&dir.join("sessions.jsonl"))?;
        Ok(Self {
            templates: Arc::new(TemplateStore::open(Box::new(templates))?),
            feedback: Arc::new(FeedbackStore::open(Box::new(feedback))?),
            learning: Arc::new(LearningLog::open(Box::new(learning))?),
            improvements: Arc::new(ImprovementLog::new(Box::new(improvements))),
            sessions: Arc::new(SessionLog::new(Box::new(sessions))),
        })
    }

    #[cfg(feature = "duckdb")]
    fn duckdb(dir: &Path) -> Result<Self, EngineError> {
        let db = jurisnexus_store::DuckDb::open_persistent(&dir.join("jurisnexus.duckdb"))?;
        Ok(Self {
            templates: Arc::new(TemplateStore::open(Box::new(
                db.log::<TemplateEvent>("templates")?,
            ))?),
            feedback: Arc::new(FeedbackStore::open(Box::new(
                db.log::<FeedbackRecord>("feedback")?,
            ))?),
            learning: Arc::new(LearningLog::open(Box::new(
                db.log::<LearningEntry>("learning")?,
            ))?),
            improvements: Arc::new(ImprovementLog::new(Box::new(
                db.log::<Improvement>("improvements")?,
            ))),
            sessions: Arc::new(SessionLog::new(Box::new(
                db.log::<SessionEvent>("sessions")?,
            ))),
        })
    }

    #[cfg(not(feature = "duckdb"))]
    fn duckdb(_dir: &Path) -> Result<Self, EngineError> {
        Err(jurisnexus_core::CoreError::Config(
            "storage.backend = \"duckdb\" requires building with the duckdb feature".into(),
        )
        .into())
    }
}
