use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the chunked upload core and its HTTP adapter
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Committed namespace: files visible to listing and download (default: ./files)
    pub upload_dir: PathBuf,

    /// Staging area for in-progress uploads (default: <upload_dir>/.staging).
    /// Must live on the same filesystem as `upload_dir` for rename to be atomic.
    pub staging_dir: PathBuf,

    /// Maximum assembled file size in bytes (default: 4 GB)
    pub max_file_size: u64,

    /// Maximum size of a single chunk payload in bytes (default: 16 MB)
    pub max_chunk_size: usize,

    /// Idle time after which an unfinished session is reclaimed (default: 1 hour)
    pub session_timeout: Duration,

    /// How often the reaper looks for stale sessions (default: 5 minutes)
    pub reaper_interval: Duration,

    /// Listen address (default: 0.0.0.0:3000)
    pub bind_addr: SocketAddr,
}

impl Default for UploadConfig {
    fn default() -> Self {
        let upload_dir = PathBuf::from("./files");
        Self {
            staging_dir: upload_dir.join(".staging"),
            upload_dir,
            max_file_size: 4 * 1024 * 1024 * 1024, // 4 GB
            max_chunk_size: 16 * 1024 * 1024,      // 16 MB
            session_timeout: Duration::from_secs(3600),
            reaper_interval: Duration::from_secs(300),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
        }
    }
}

impl UploadConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        let upload_dir = env::var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or(default.upload_dir);

        // Staging follows the upload dir unless pinned explicitly
        let staging_dir = env::var("STAGING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| upload_dir.join(".staging"));

        Self {
            upload_dir,
            staging_dir,

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            max_chunk_size: env::var("MAX_CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_chunk_size),

            session_timeout: env::var("SESSION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.session_timeout),

            reaper_interval: env::var("REAPER_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.reaper_interval),

            bind_addr: env::var("BIND_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.bind_addr),
        }
    }

    /// Create config rooted at `root` (small limits, short timeouts)
    pub fn development(root: &Path) -> Self {
        let upload_dir = root.join("files");
        Self {
            staging_dir: upload_dir.join(".staging"),
            upload_dir,
            max_file_size: 64 * 1024 * 1024,
            max_chunk_size: 1024 * 1024,
            session_timeout: Duration::from_secs(60),
            reaper_interval: Duration::from_secs(5),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }

    /// Request body limit for the chunk endpoint, chunk plus multipart framing
    pub fn body_limit(&self) -> usize {
        self.max_chunk_size + 64 * 1024
    }
}
