use crate::services::error::UploadError;
use crate::services::storage::{CommittedFile, StorageService};
use std::io;
use std::sync::Arc;

/// Read-only view of the committed namespace. Staging is never visible here.
pub struct NamespaceLister {
    storage: Arc<dyn StorageService>,
}

impl NamespaceLister {
    pub fn new(storage: Arc<dyn StorageService>) -> Self {
        Self { storage }
    }

    /// Committed filenames, sorted by name.
    pub async fn list(&self) -> Result<Vec<String>, UploadError> {
        self.storage
            .list_committed()
            .await
            .map_err(|e| UploadError::storage("committed namespace", e))
    }

    /// Opens a committed file for download.
    pub async fn open(&self, filename: &str) -> Result<CommittedFile, UploadError> {
        match self.storage.open_committed(filename).await {
            Ok(file) => Ok(file),
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::InvalidInput) => {
                Err(UploadError::NotFound(filename.to_string()))
            }
            Err(e) => Err(UploadError::storage(filename, e)),
        }
    }
}
