use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialisation error: {0}")]
    Json(#[from] serde_json::Error),

    /// The lineage head moved between snapshot and write.
    #[error("version conflict on {lineage}: expected head {expected:?}, found {found:?}")]
    Conflict {
        lineage: String,
        expected: Option<u32>,
        found: Option<u32>,
    },

    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
