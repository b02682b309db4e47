use crate::services::error::UploadError;
use crate::services::registry::{SessionProgress, SessionRegistry, SessionState, UploadSession};
use crate::services::storage::StorageService;
use std::sync::Arc;

/// Promotes a fully received upload into the committed namespace.
pub struct Finalizer {
    storage: Arc<dyn StorageService>,
    registry: Arc<SessionRegistry>,
}

impl Finalizer {
    pub fn new(storage: Arc<dyn StorageService>, registry: Arc<SessionRegistry>) -> Self {
        Self { storage, registry }
    }

    /// Commits `session`. The caller holds the session lock (`progress`), so
    /// no chunk can land between the last append and the rename.
    ///
    /// On failure the staging artifact is kept (renamed aside) for inspection
    /// and the filename is released.
    pub async fn finalize(
        &self,
        session: &UploadSession,
        progress: &mut SessionProgress,
    ) -> Result<SessionState, UploadError> {
        let filename = session.filename();

        if progress.state != SessionState::Finalizing || !progress.last_chunk_seen {
            return Err(UploadError::SessionClosed(filename.to_string()));
        }

        match self.storage.promote(session.staging(), filename).await {
            Ok(()) => {
                progress.state = SessionState::Committed;
                progress.touch();
                self.registry.release(filename, session.id());
                tracing::info!(
                    "Committed '{}' ({} bytes, session {})",
                    filename,
                    progress.bytes_written,
                    session.id()
                );
                Ok(SessionState::Committed)
            }
            Err(source) => {
                progress.state = SessionState::Failed;
                tracing::error!(
                    "Failed to commit '{}' (session {}): {}",
                    filename,
                    session.id(),
                    source
                );

                if let Err(e) = self.storage.retain_failed(session.staging()).await {
                    tracing::warn!(
                        "Could not set aside staging data for '{}': {}",
                        filename,
                        e
                    );
                }
                self.registry.release(filename, session.id());

                Err(UploadError::Finalize {
                    filename: filename.to_string(),
                    source,
                })
            }
        }
    }
}
