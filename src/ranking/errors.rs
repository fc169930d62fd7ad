use crate::ranking::types::CandidateOutcome;
use crate::semantic::{EmbeddingError, IndexError, VectorStorageError};

/// Errors surfaced by [`RankingService`](super::RankingService).
///
/// Per-candidate extraction failures are not errors of the call; they are
/// reported as skipped [`CandidateOutcome`]s.
#[derive(Debug, thiserror::Error)]
pub enum RankError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no usable resumes: none of {} candidates could be indexed", outcomes.len())]
    NoUsableInput { outcomes: Vec<CandidateOutcome> },

    #[error("embedding provider error: {0}")]
    Provider(#[from] EmbeddingError),

    /// Vectors of different sizes met in one index. This means the
    /// embedding provider changed under a live index and is a
    /// configuration bug, not a recoverable condition.
    #[error("index dimension mismatch: index holds {expected}-d vectors, got {got}-d")]
    IndexDimensionMismatch { expected: usize, got: usize },

    #[error("index error: {0}")]
    Index(IndexError),

    #[error("index storage error: {0}")]
    Storage(#[from] VectorStorageError),

    #[error("ranking cancelled before {stage}")]
    Cancelled { stage: &'static str },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<IndexError> for RankError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::DimensionMismatch { expected, got } => {
                Self::IndexDimensionMismatch { expected, got }
            }
            other => Self::Index(other),
        }
    }
}

impl RankError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}
