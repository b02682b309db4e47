use crate::utils::validation::ValidationError;
use thiserror::Error;

/// Failures surfaced by the upload core.
///
/// `Storage` and `Finalize` stay separate so operators can tell an ingestion
/// fault from a commit fault.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("File '{0}' already exists or is being uploaded")]
    DuplicateName(String),

    #[error("Upload of '{0}' is closed to further chunks")]
    SessionClosed(String),

    #[error("Storage error on '{target}': {source}")]
    Storage {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to commit '{filename}': {source}")]
    Finalize {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No upload or committed file named '{0}'")]
    NotFound(String),

    #[error("Invalid filename: {0}")]
    InvalidFilename(#[from] ValidationError),

    #[error("Chunk of {size} bytes exceeds the {limit} byte limit")]
    ChunkTooLarge { size: usize, limit: usize },

    #[error("Upload of '{filename}' exceeds the {limit} byte limit")]
    FileTooLarge { filename: String, limit: u64 },
}

impl UploadError {
    /// Stable machine-readable code for API clients
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::DuplicateName(_) => "DUPLICATE_NAME",
            UploadError::SessionClosed(_) => "SESSION_CLOSED",
            UploadError::Storage { .. } => "STORAGE_ERROR",
            UploadError::Finalize { .. } => "FINALIZE_ERROR",
            UploadError::NotFound(_) => "NOT_FOUND",
            UploadError::InvalidFilename(e) => e.code,
            UploadError::ChunkTooLarge { .. } => "CHUNK_TOO_LARGE",
            UploadError::FileTooLarge { .. } => "FILE_TOO_LARGE",
        }
    }

    pub(crate) fn storage(target: &str, source: std::io::Error) -> Self {
        UploadError::Storage {
            target: target.to_string(),
            source,
        }
    }
}
