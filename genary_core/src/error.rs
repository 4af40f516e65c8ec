use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in '{path}': {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Snapshot parsed as JSON but does not have the expected layout.
    #[error("malformed snapshot: {0}")]
    Shape(String),

    #[error("could not resolve a timestamp for '{0}'")]
    Timestamp(String),

    /// A required upstream file is absent and the operation has no fallback.
    #[error("required input missing: {0}")]
    MissingInput(String),
}

impl ArchiveError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArchiveError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<String>, source: serde_json::Error) -> Self {
        ArchiveError::Json {
            path: path.into(),
            source,
        }
    }

    /// True for errors that a bulk walk counts and moves past.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ArchiveError::Json { .. } | ArchiveError::Shape(_) | ArchiveError::Timestamp(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
