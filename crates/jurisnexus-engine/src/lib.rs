//! Orchestration layer: template selection and optimisation, the two-tier
//! pipeline, run recording, consultation sessions, and the [`JurisEngine`]
//! facade that ties them to configuration and storage.

mod error;
pub use error::EngineError;

pub mod engine;
pub mod merge;
pub mod optimizer;
pub mod orchestrator;
pub mod ratings;
pub mod recorder;
pub mod selector;
pub mod session;
pub mod storage;

pub use engine::{EngineStats, JurisEngine};
pub use optimizer::{OptimizerHandle, PassReport, Revision, TemplateOptimizer};
pub use orchestrator::{Orchestrator, RunContext, Stage};
pub use recorder::LearningRecorder;
pub use selector::TemplateSelector;
pub use session::{SessionManager, SessionReply, SessionSummary};
pub use storage::Stores;

/// Run synchronous store work off the async executor.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
