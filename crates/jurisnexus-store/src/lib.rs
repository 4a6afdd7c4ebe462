//! Storage layer: append-only logs backing the template store, the feedback
//! store, the learning log, and conversation sessions. JSONL files by
//! default, DuckDB optionally.

mod error;
pub use error::StoreError;

pub mod feedback;
pub mod learning;
pub mod log;
pub mod sessions;
pub mod templates;

pub use feedback::{FeedbackStats, FeedbackStore, Trend};
pub use learning::{
    ExampleKind, Improvement, ImprovementLog, LearningEntry, LearningLog, LearningStats,
    TemplateIndex,
};
pub use log::{AppendLog, JsonlLog, Keyed, MemoryLog};
pub use sessions::{SessionEvent, SessionLog};
pub use templates::{TemplateEvent, TemplateStore};

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::{DuckDb, DuckLog};
