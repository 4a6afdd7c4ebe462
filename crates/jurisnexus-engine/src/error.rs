use jurisnexus_core::CoreError;
use jurisnexus_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The caller stopped waiting. The run itself still finalizes and is recorded.
    #[error("caller cancelled task {0}")]
    Cancelled(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("session {0} is closed")]
    SessionClosed(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Other(String),
}
