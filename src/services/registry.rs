use crate::services::storage::StagingHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Reserved,
    Receiving,
    Finalizing,
    Committed,
    Failed,
    Aborted,
}

impl SessionState {
    /// States that still own the filename
    pub fn is_live(self) -> bool {
        matches!(
            self,
            SessionState::Reserved | SessionState::Receiving | SessionState::Finalizing
        )
    }

    pub fn accepts_chunks(self) -> bool {
        matches!(self, SessionState::Reserved | SessionState::Receiving)
    }
}

/// Mutable part of a session. Held behind the per-session lock, which also
/// serializes staging writes for the filename.
#[derive(Debug)]
pub struct SessionProgress {
    pub state: SessionState,
    pub bytes_written: u64,
    pub last_chunk_seen: bool,
    pub last_activity_at: DateTime<Utc>,
}

impl SessionProgress {
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }
}

/// One in-progress file assembly
#[derive(Debug)]
pub struct UploadSession {
    id: Uuid,
    filename: String,
    staging: StagingHandle,
    created_at: DateTime<Utc>,
    progress: AsyncMutex<SessionProgress>,
}

pub type SessionHandle = Arc<UploadSession>;

impl UploadSession {
    fn new(filename: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            staging: StagingHandle::new(),
            created_at: now,
            progress: AsyncMutex::new(SessionProgress {
                state: SessionState::Reserved,
                bytes_written: 0,
                last_chunk_seen: false,
                last_activity_at: now,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn staging(&self) -> &StagingHandle {
        &self.staging
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Waits for exclusive access; chunk writes hold this across their I/O.
    pub async fn lock(&self) -> AsyncMutexGuard<'_, SessionProgress> {
        self.progress.lock().await
    }

    /// Non-blocking variant for the reaper: a busy session is not idle.
    pub fn try_lock(&self) -> Option<AsyncMutexGuard<'_, SessionProgress>> {
        self.progress.try_lock().ok()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let progress = self.lock().await;
        SessionSnapshot {
            upload_id: self.id,
            filename: self.filename.clone(),
            state: progress.state,
            bytes_written: progress.bytes_written,
            last_chunk_seen: progress.last_chunk_seen,
            created_at: self.created_at,
            last_activity_at: progress.last_activity_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionSnapshot {
    pub upload_id: Uuid,
    pub filename: String,
    pub state: SessionState,
    pub bytes_written: u64,
    pub last_chunk_seen: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("'{0}' already has an active upload")]
    AlreadyExists(String),

    #[error("no active upload for '{0}'")]
    NotFound(String),
}

/// Filename → session map; the single point of filename-level exclusivity.
///
/// Every method takes the map-wide lock for a handful of pointer updates and
/// never performs I/O while holding it.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions_guard(&self) -> MutexGuard<'_, HashMap<String, SessionHandle>> {
        // Critical sections cannot leave the map half-updated, so a poisoned
        // lock still guards consistent data.
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a `Reserved` session unless a live session owns `filename`.
    /// Whether the name is already committed on disk is the caller's check.
    pub fn reserve(&self, filename: &str) -> Result<SessionHandle, RegistryError> {
        let session = {
            let mut sessions = self.sessions_guard();
            if sessions.contains_key(filename) {
                return Err(RegistryError::AlreadyExists(filename.to_string()));
            }
            let session = Arc::new(UploadSession::new(filename));
            sessions.insert(filename.to_string(), Arc::clone(&session));
            session
        };

        tracing::info!(
            "Reserved upload session {} for '{}'",
            session.id,
            filename
        );
        Ok(session)
    }

    pub fn get(&self, filename: &str) -> Result<SessionHandle, RegistryError> {
        self.sessions_guard()
            .get(filename)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(filename.to_string()))
    }

    /// Removes the entry for `filename` if it still belongs to `session_id`.
    /// A stale release cannot evict a newer session for the same name.
    pub fn release(&self, filename: &str, session_id: Uuid) -> bool {
        let mut sessions = self.sessions_guard();
        match sessions.get(filename) {
            Some(current) if current.id == session_id => {
                sessions.remove(filename);
                true
            }
            _ => false,
        }
    }

    /// True when no live session owns `filename`
    pub fn is_available(&self, filename: &str) -> bool {
        !self.sessions_guard().contains_key(filename)
    }

    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.sessions_guard().values().cloned().collect()
    }

    /// Staging ids owned by registered sessions
    pub fn live_staging_ids(&self) -> HashSet<Uuid> {
        self.sessions_guard()
            .values()
            .map(|s| s.staging.id())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions_guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_is_exclusive() {
        let registry = SessionRegistry::new();
        let session = registry.reserve("a.bin").unwrap();
        assert_eq!(session.filename(), "a.bin");
        assert_eq!(
            registry.reserve("a.bin").unwrap_err(),
            RegistryError::AlreadyExists("a.bin".to_string())
        );
        assert!(registry.reserve("b.bin").is_ok());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_get_and_release() {
        let registry = SessionRegistry::new();
        assert_eq!(
            registry.get("a.bin").unwrap_err(),
            RegistryError::NotFound("a.bin".to_string())
        );

        let session = registry.reserve("a.bin").unwrap();
        assert_eq!(registry.get("a.bin").unwrap().id(), session.id());
        assert!(registry.release("a.bin", session.id()));
        assert!(registry.is_empty());
        assert!(registry.is_available("a.bin"));
    }

    #[test]
    fn test_stale_release_keeps_newer_session() {
        let registry = SessionRegistry::new();
        let old = registry.reserve("a.bin").unwrap();
        assert!(registry.release("a.bin", old.id()));

        let new = registry.reserve("a.bin").unwrap();
        assert!(!registry.release("a.bin", old.id()));
        assert_eq!(registry.get("a.bin").unwrap().id(), new.id());
    }

    #[test]
    fn test_released_name_can_be_reserved_again() {
        let registry = SessionRegistry::new();
        let session = registry.reserve("a.bin").unwrap();
        assert!(!registry.is_available("a.bin"));

        registry.release("a.bin", session.id());
        assert!(registry.is_available("a.bin"));
        let again = registry.reserve("a.bin").unwrap();
        assert_ne!(again.id(), session.id());
    }

    #[test]
    fn test_concurrent_reserve_yields_one_winner() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.reserve("race.bin").is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_new_session_starts_reserved() {
        let registry = SessionRegistry::new();
        let session = registry.reserve("a.bin").unwrap();
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.state, SessionState::Reserved);
        assert_eq!(snapshot.bytes_written, 0);
        assert!(!snapshot.last_chunk_seen);
        assert!(
            registry
                .live_staging_ids()
                .contains(&session.staging().id())
        );
    }
}
