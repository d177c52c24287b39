//! Error types for loading, checkpointing and export.
//!
//! Only [`LoadError::MissingColumns`] and I/O failures are fatal to a run.
//! Row-level problems are counted in [`crate::LoadReport`] instead.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to read or validate the input table.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open input {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read header row of {path}: {source}")]
    Header {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("input is missing required columns {missing:?} (found {found:?})")]
    MissingColumns {
        missing: Vec<&'static str>,
        found: Vec<String>,
    },
}

/// Failure to read or append a checkpoint log.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize checkpoint record for key {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure while writing project packs.
#[derive(Debug, Error)]
pub enum PackError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("failed to write pack file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode pack for project {project_id}: {source}")]
    Encode {
        project_id: String,
        #[source]
        source: serde_json::Error,
    },
}
