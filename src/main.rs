use clap::Parser;
use dotenvy::dotenv;
use rust_chunk_backend::config::UploadConfig;
use rust_chunk_backend::services::storage::LocalStorageService;
use rust_chunk_backend::services::worker::BackgroundWorker;
use rust_chunk_backend::{AppState, create_app};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Chunked upload server; flags override the environment.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (keeps the host from BIND_ADDR)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory holding committed files
    #[arg(long)]
    upload_dir: Option<PathBuf>,

    /// Directory holding in-progress uploads
    #[arg(long)]
    staging_dir: Option<PathBuf>,
}

impl Args {
    fn apply(self, mut config: UploadConfig) -> UploadConfig {
        if let Some(port) = self.port {
            config.bind_addr = SocketAddr::new(config.bind_addr.ip(), port);
        }
        if let Some(dir) = self.upload_dir {
            if self.staging_dir.is_none() && std::env::var("STAGING_DIR").is_err() {
                config.staging_dir = dir.join(".staging");
            }
            config.upload_dir = dir;
        }
        if let Some(dir) = self.staging_dir {
            config.staging_dir = dir;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    // Initialize tracing with EnvFilter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_chunk_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting chunked upload server...");

    let config = args.apply(UploadConfig::from_env());
    info!(
        "📁 Files: {} | Staging: {} | Max chunk={}MB, Max file={}MB, Session timeout={:?}",
        config.upload_dir.display(),
        config.staging_dir.display(),
        config.max_chunk_size / 1024 / 1024,
        config.max_file_size / 1024 / 1024,
        config.session_timeout
    );

    let storage = Arc::new(LocalStorageService::new(&config.upload_dir, &config.staging_dir).await?);
    let state = AppState::new(storage, config.clone());

    // Setup Shutdown Channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Start Session Reaper
    let worker = BackgroundWorker::new(
        state.uploads.clone(),
        config.session_timeout,
        config.reaper_interval,
        shutdown_rx,
    );
    let worker_handle = tokio::spawn(worker.run());

    let app = create_app(state);

    info!("✅ Server ready at http://{}", config.bind_addr);
    info!("📖 Swagger UI: http://{}/swagger-ui", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = worker_handle.await;
    info!("🛑 Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
