use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),

    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("unknown model tier: {0}")]
    UnknownTier(u8),

    #[error("template {template_id} references unsupplied placeholder {{{placeholder}}}")]
    MissingPlaceholder {
        template_id: String,
        placeholder: String,
    },

    /// Fatal at startup; never surfaced per request.
    #[error("configuration error: {0}")]
    Config(String),
}
