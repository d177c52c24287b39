//! Pipeline error taxonomy.
//!
//! | Kind        | Effect on a run                                       |
//! |-------------|-------------------------------------------------------|
//! | Load        | fatal, before any backend call                        |
//! | Checkpoint  | fatal, nothing more can be recorded                   |
//! | Config      | fatal                                                 |
//! | Validation  | one strict retry, then the key is left for a later run |
//! | Backend     | transport retries inside the client, then key failure |

use std::fmt;

use batching::{CheckpointError, LoadError, PackError};
use thiserror::Error;

/// Failure talking to the inference backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend returned no content")]
    EmptyResponse,

    #[error("backend is not configured: {0}")]
    NotConfigured(String),
}

impl BackendError {
    /// Worth another transport attempt: timeouts, connection errors, 429 and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::EmptyResponse | Self::NotConfigured(_) => false,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Which backend step produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ChunkSummary,
    ProjectSummary,
    TagBatch,
    TagSingle,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChunkSummary => write!(f, "chunk_summary"),
            Self::ProjectSummary => write!(f, "project_summary"),
            Self::TagBatch => write!(f, "tag_batch"),
            Self::TagSingle => write!(f, "tag_single"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DigestError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Any response that does not match its expected shape.
    #[error("{stage} response failed validation: {reason}")]
    Validation { stage: Stage, reason: String },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl DigestError {
    pub fn validation(stage: Stage, reason: impl Into<String>) -> Self {
        Self::Validation {
            stage,
            reason: reason.into(),
        }
    }

    /// Eligible for the strict-instruction retry.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}
