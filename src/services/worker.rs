use crate::services::upload_service::UploadService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

/// Periodically reclaims abandoned upload sessions and orphaned staging data.
pub struct BackgroundWorker {
    uploads: Arc<UploadService>,
    session_timeout: Duration,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl BackgroundWorker {
    pub fn new(
        uploads: Arc<UploadService>,
        session_timeout: Duration,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            uploads,
            session_timeout,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            "🚀 Session reaper started (timeout {:?}, every {:?})",
            self.session_timeout,
            self.interval
        );

        // Leftovers from a previous process go first
        self.perform_cleanup().await;

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Session reaper shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.perform_cleanup().await;
                }
            }
        }
    }

    async fn perform_cleanup(&self) {
        tracing::debug!("🧹 Looking for stale upload sessions...");
        let report = self.uploads.reap_stale(self.session_timeout).await;

        if report.aborted_sessions > 0 || report.orphans_removed > 0 {
            tracing::info!(
                "✅ Reaped {} idle session(s), removed {} orphaned staging file(s)",
                report.aborted_sessions,
                report.orphans_removed
            );
        }
    }
}
