pub mod baseline;
pub mod clause;
pub mod config;
pub mod error;
pub mod feedback;
pub mod result;
pub mod session;
pub mod task;
pub mod template;

pub use clause::{Clause, split_into_clauses};
pub use config::{ApiStyle, JurisConfig, StorageBackend, TierConfig};
pub use error::CoreError;
pub use feedback::{FeedbackRecord, Rating};
pub use result::{
    Answer, CallStatus, ClauseFinding, FailureNotice, Memo, MemoSection, MergedOutput,
    ModelCallRecord, Outcome, PipelineResult, Provenance, Review, RiskItem, RiskReport,
    RiskSummary, Severity,
};
pub use session::{ConversationSession, Turn};
pub use task::{AnalysisTask, DocumentProfile, TaskType, Tier};
pub use template::PromptTemplate;
