use crate::config::UploadConfig;
use crate::services::error::UploadError;
use crate::services::finalizer::Finalizer;
use crate::services::registry::{
    RegistryError, SessionHandle, SessionProgress, SessionRegistry, SessionSnapshot,
    SessionState, UploadSession,
};
use crate::services::storage::StorageService;
use crate::utils::validation::sanitize_filename;
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

/// One inbound chunk as handed over by the transport
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub filename: String,
    pub payload: Bytes,
    pub is_last_chunk: bool,
    /// Session id from an earlier ack; pins the chunk to that upload
    pub upload_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChunkAck {
    pub filename: String,
    pub upload_id: Uuid,
    pub bytes_written: u64,
    pub committed: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Availability {
    pub filename: String,
    pub available: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    pub aborted_sessions: usize,
    pub orphans_removed: usize,
}

/// Chunk ingestion: session acquisition, serialized appends, and the
/// hand-off to the finalizer on the last chunk.
pub struct UploadService {
    storage: Arc<dyn StorageService>,
    registry: Arc<SessionRegistry>,
    finalizer: Finalizer,
    config: UploadConfig,
}

impl UploadService {
    pub fn new(
        storage: Arc<dyn StorageService>,
        registry: Arc<SessionRegistry>,
        config: UploadConfig,
    ) -> Self {
        let finalizer = Finalizer::new(storage.clone(), registry.clone());
        Self {
            storage,
            registry,
            finalizer,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Appends one chunk in arrival order; commits the file when the chunk is
    /// flagged last. Chunks for one filename must arrive serially.
    pub async fn ingest(&self, chunk: ChunkRequest) -> Result<ChunkAck, UploadError> {
        let filename = sanitize_filename(&chunk.filename)?;

        if chunk.payload.len() > self.config.max_chunk_size {
            return Err(UploadError::ChunkTooLarge {
                size: chunk.payload.len(),
                limit: self.config.max_chunk_size,
            });
        }

        let session = self.acquire(&filename, chunk.upload_id).await?;
        let mut progress = session.lock().await;

        // The session may have closed while we waited on its lock
        if !progress.state.accepts_chunks() {
            tracing::warn!(
                "Rejected chunk for '{}': session {} is {:?}",
                filename,
                session.id(),
                progress.state
            );
            return Err(UploadError::SessionClosed(filename));
        }

        let expected = progress.bytes_written + chunk.payload.len() as u64;
        if expected > self.config.max_file_size {
            tracing::warn!(
                "Upload of '{}' exceeds {} bytes, abandoning session {}",
                filename,
                self.config.max_file_size,
                session.id()
            );
            self.abandon(&session, &mut progress, SessionState::Failed)
                .await;
            return Err(UploadError::FileTooLarge {
                filename,
                limit: self.config.max_file_size,
            });
        }

        let staged = match self.storage.append(session.staging(), &chunk.payload).await {
            Ok(staged) => staged,
            Err(e) => {
                tracing::error!(
                    "Staging write failed for '{}' (session {}): {}",
                    filename,
                    session.id(),
                    e
                );
                self.abandon(&session, &mut progress, SessionState::Failed)
                    .await;
                return Err(UploadError::storage(&filename, e));
            }
        };

        if staged != expected {
            tracing::error!(
                "Staged length for '{}' is {} bytes, expected {}",
                filename,
                staged,
                expected
            );
            self.abandon(&session, &mut progress, SessionState::Failed)
                .await;
            return Err(UploadError::storage(
                &filename,
                std::io::Error::other(format!(
                    "staged length {} does not match expected {}",
                    staged, expected
                )),
            ));
        }

        progress.bytes_written = expected;
        progress.state = SessionState::Receiving;
        progress.touch();

        if chunk.is_last_chunk {
            progress.last_chunk_seen = true;
            progress.state = SessionState::Finalizing;
            self.finalizer.finalize(&session, &mut progress).await?;
        }

        Ok(ChunkAck {
            filename,
            upload_id: session.id(),
            bytes_written: progress.bytes_written,
            committed: progress.state == SessionState::Committed,
        })
    }

    /// Finds the live session for `filename` or reserves a new one.
    async fn acquire(
        &self,
        filename: &str,
        upload_id: Option<Uuid>,
    ) -> Result<SessionHandle, UploadError> {
        match self.registry.get(filename) {
            Ok(session) => {
                if upload_id.is_some_and(|id| id != session.id()) {
                    tracing::warn!(
                        "Chunk for '{}' names upload {:?} but session {} owns it",
                        filename,
                        upload_id,
                        session.id()
                    );
                    return Err(UploadError::DuplicateName(filename.to_string()));
                }
                Ok(session)
            }
            Err(RegistryError::NotFound(_)) if upload_id.is_some() => {
                // The referenced upload is gone: finished, failed or reaped
                let committed = self
                    .storage
                    .committed_exists(filename)
                    .await
                    .map_err(|e| UploadError::storage(filename, e))?;
                Err(if committed {
                    UploadError::SessionClosed(filename.to_string())
                } else {
                    UploadError::NotFound(filename.to_string())
                })
            }
            Err(RegistryError::NotFound(_)) => self.reserve_uncommitted(filename).await,
            Err(RegistryError::AlreadyExists(_)) => {
                Err(UploadError::DuplicateName(filename.to_string()))
            }
        }
    }

    /// Reserves `filename`, then checks the committed namespace. The name is
    /// claimed in the registry before the disk is consulted, so a finalize
    /// that releases its entry can never slip between the check and the
    /// reservation. The new session stays locked during the check; chunks
    /// that joined it meanwhile find it closed if the name turns out taken.
    async fn reserve_uncommitted(&self, filename: &str) -> Result<SessionHandle, UploadError> {
        let session = self.registry.reserve(filename).map_err(|e| {
            tracing::warn!("Rejected upload of '{}': {}", filename, e);
            UploadError::DuplicateName(filename.to_string())
        })?;

        let committed = {
            let mut progress = session.lock().await;
            let committed = self.storage.committed_exists(filename).await;
            if !matches!(committed, Ok(false)) {
                progress.state = SessionState::Aborted;
                self.registry.release(filename, session.id());
            }
            committed
        };

        match committed {
            Ok(false) => Ok(session),
            Ok(true) => {
                tracing::warn!(
                    "Rejected upload of '{}': name already committed",
                    filename
                );
                Err(UploadError::DuplicateName(filename.to_string()))
            }
            Err(e) => Err(UploadError::storage(filename, e)),
        }
    }

    /// Ends a session without committing: staging data is deleted and the
    /// filename released.
    async fn abandon(
        &self,
        session: &UploadSession,
        progress: &mut SessionProgress,
        state: SessionState,
    ) {
        progress.state = state;
        progress.touch();
        if let Err(e) = self.storage.discard(session.staging()).await {
            tracing::warn!(
                "Could not delete staging data for '{}' (session {}): {}",
                session.filename(),
                session.id(),
                e
            );
        }
        self.registry.release(session.filename(), session.id());
    }

    /// Side-effect free name check against sessions and the committed namespace.
    pub async fn check_available(&self, filename: &str) -> Result<Availability, UploadError> {
        let filename = sanitize_filename(filename)?;
        let available = self.registry.is_available(&filename)
            && !self
                .storage
                .committed_exists(&filename)
                .await
                .map_err(|e| UploadError::storage(&filename, e))?;

        Ok(Availability {
            filename,
            available,
        })
    }

    pub async fn pending_sessions(&self) -> Vec<SessionSnapshot> {
        let mut snapshots = Vec::new();
        for session in self.registry.sessions() {
            snapshots.push(session.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        snapshots
    }

    /// Aborts sessions idle for longer than `timeout`, then clears staging
    /// artifacts no session owns (left behind by a crash).
    pub async fn reap_stale(&self, timeout: Duration) -> ReapReport {
        let mut report = ReapReport::default();
        let now = Utc::now();

        for session in self.registry.sessions() {
            // Locked means a chunk is being written right now
            let Some(mut progress) = session.try_lock() else {
                continue;
            };
            if !progress.state.accepts_chunks() {
                continue;
            }
            let idle = now
                .signed_duration_since(progress.last_activity_at)
                .to_std()
                .unwrap_or_default();
            if idle < timeout {
                continue;
            }

            tracing::warn!(
                "Aborting idle upload of '{}' (session {}, {} bytes, idle {:?})",
                session.filename(),
                session.id(),
                progress.bytes_written,
                idle
            );
            self.abandon(&session, &mut progress, SessionState::Aborted)
                .await;
            report.aborted_sessions += 1;
        }

        let live = self.registry.live_staging_ids();
        match self.storage.sweep_staging(timeout, &live).await {
            Ok(removed) => report.orphans_removed = removed,
            Err(e) => tracing::error!("Staging sweep failed: {}", e),
        }

        report
    }
}
