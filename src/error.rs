//! Error taxonomy for story generation and retrieval.

use axum::http::StatusCode;
use thiserror::Error;

use crate::schema::JobStatus;

pub type StoryResult<T> = std::result::Result<T, StoryError>;

#[derive(Debug, Error)]
pub enum StoryError {
    /// Model output did not match the expected nested story shape.
    #[error("{path}: {reason}")]
    SchemaValidation { path: String, reason: String },

    /// The language model call failed or returned unusable content.
    #[error("{0}")]
    ModelCall(String),

    #[error("{0}")]
    Store(#[from] rusqlite::Error),

    /// A persisted story has no node flagged as root.
    #[error("story {story_id} has no root node")]
    MissingRoot { story_id: i64 },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("job cannot move from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// A blocking store task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

impl StoryError {
    pub fn schema(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaValidation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable name of the error class, used as the prefix of job error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SchemaValidation { .. } => "SchemaValidationError",
            Self::ModelCall(_) => "ModelCallError",
            Self::Store(_) | Self::Task(_) => "StoreError",
            Self::MissingRoot { .. } => "MissingRootError",
            Self::NotFound { .. } => "NotFoundError",
            Self::InvalidTransition { .. } => "InvalidTransitionError",
        }
    }

    /// Message recorded on a failed job: `kind: message`.
    pub fn job_message(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::SchemaValidation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ModelCall(_) => StatusCode::BAD_GATEWAY,
            Self::Store(_)
            | Self::MissingRoot { .. }
            | Self::InvalidTransition { .. }
            | Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tokio::task::JoinError> for StoryError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
