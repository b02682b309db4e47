use async_trait::async_trait;
use std::collections::HashSet;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use uuid::Uuid;

const PART_EXTENSION: &str = "part";
const FAILED_EXTENSION: &str = "failed";

/// Opaque reference to the staging artifact owned by one upload session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StagingHandle {
    id: Uuid,
}

impl StagingHandle {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Default for StagingHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A committed file opened for reading
pub struct CommittedFile {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub size: u64,
}

/// Durable storage for both the staging area and the committed namespace.
///
/// Staging artifacts are addressed only through a [`StagingHandle`]; committed
/// files only by their client-visible name. Nothing here enforces per-filename
/// exclusivity, that is the session registry's job.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Appends `data` to the staging artifact, creating it on first use.
    /// Returns the staged length after the write.
    async fn append(&self, handle: &StagingHandle, data: &[u8]) -> io::Result<u64>;

    /// Makes the staging artifact appear as `filename` in the committed
    /// namespace in one atomic step. Fails with `AlreadyExists` rather than
    /// overwriting, even if the target shows up concurrently.
    async fn promote(&self, handle: &StagingHandle, filename: &str) -> io::Result<()>;

    /// Deletes the staging artifact. Missing artifacts are not an error.
    async fn discard(&self, handle: &StagingHandle) -> io::Result<()>;

    /// Keeps a staging artifact for inspection, out of the reaper's reach.
    async fn retain_failed(&self, handle: &StagingHandle) -> io::Result<()>;

    async fn committed_exists(&self, filename: &str) -> io::Result<bool>;

    /// Names in the committed namespace, sorted.
    async fn list_committed(&self) -> io::Result<Vec<String>>;

    async fn open_committed(&self, filename: &str) -> io::Result<CommittedFile>;

    /// Removes staging artifacts untouched for `older_than` that belong to no
    /// live session. Returns how many were removed.
    async fn sweep_staging(
        &self,
        older_than: Duration,
        live: &HashSet<Uuid>,
    ) -> io::Result<usize>;
}

/// Local-filesystem storage; staging and committed dirs must share a filesystem.
pub struct LocalStorageService {
    upload_dir: PathBuf,
    staging_dir: PathBuf,
}

impl LocalStorageService {
    pub async fn new(
        upload_dir: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
    ) -> io::Result<Self> {
        let upload_dir = upload_dir.into();
        let staging_dir = staging_dir.into();
        fs::create_dir_all(&upload_dir).await?;
        fs::create_dir_all(&staging_dir).await?;
        Ok(Self {
            upload_dir,
            staging_dir,
        })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    fn staging_path(&self, handle: &StagingHandle, extension: &str) -> PathBuf {
        self.staging_dir
            .join(format!("{}.{}", handle.id.simple(), extension))
    }

    fn committed_path(&self, filename: &str) -> io::Result<PathBuf> {
        let mut components = Path::new(filename).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if !filename.starts_with('.') => {
                Ok(self.upload_dir.join(filename))
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' is not a plain file name", filename),
            )),
        }
    }
}

fn already_committed(filename: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("'{}' already exists in the committed namespace", filename),
    )
}

#[async_trait]
impl StorageService for LocalStorageService {
    async fn append(&self, handle: &StagingHandle, data: &[u8]) -> io::Result<u64> {
        let path = self.staging_path(handle, PART_EXTENSION);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(data).await?;
        // Chunk is acknowledged only once it is on disk
        file.sync_data().await?;
        Ok(file.metadata().await?.len())
    }

    async fn promote(&self, handle: &StagingHandle, filename: &str) -> io::Result<()> {
        let source = self.staging_path(handle, PART_EXTENSION);
        let dest = self.committed_path(filename)?;

        // link(2) never replaces an existing entry, unlike rename(2)
        match fs::hard_link(&source, &dest).await {
            Ok(()) => {
                if let Err(e) = fs::remove_file(&source).await {
                    // Committed already; the sweep removes the stray name later
                    tracing::warn!(
                        "Could not unlink staging name {}: {}",
                        source.display(),
                        e
                    );
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(already_committed(filename)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Unsupported | io::ErrorKind::PermissionDenied
                ) =>
            {
                // No hard links on this filesystem: the registry is the only writer
                if fs::try_exists(&dest).await? {
                    return Err(already_committed(filename));
                }
                fs::rename(&source, &dest).await
            }
            Err(e) => Err(e),
        }
    }

    async fn discard(&self, handle: &StagingHandle) -> io::Result<()> {
        match fs::remove_file(self.staging_path(handle, PART_EXTENSION)).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    async fn retain_failed(&self, handle: &StagingHandle) -> io::Result<()> {
        fs::rename(
            self.staging_path(handle, PART_EXTENSION),
            self.staging_path(handle, FAILED_EXTENSION),
        )
        .await
    }

    async fn committed_exists(&self, filename: &str) -> io::Result<bool> {
        fs::try_exists(self.committed_path(filename)?).await
    }

    async fn list_committed(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.upload_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            names.push(name);
        }

        names.sort();
        Ok(names)
    }

    async fn open_committed(&self, filename: &str) -> io::Result<CommittedFile> {
        let file = fs::File::open(self.committed_path(filename)?).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("'{}' is not a file", filename),
            ));
        }
        Ok(CommittedFile {
            reader: Box::new(file),
            size: metadata.len(),
        })
    }

    async fn sweep_staging(
        &self,
        older_than: Duration,
        live: &HashSet<Uuid>,
    ) -> io::Result<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(older_than)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.staging_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PART_EXTENSION) {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                continue;
            };
            if live.contains(&id) {
                continue;
            }

            let modified = entry.metadata().await?.modified()?;
            if modified <= cutoff {
                match fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(removed)
    }
}
