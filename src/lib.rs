pub mod api;
pub mod config;
pub mod services;
pub mod utils;

use crate::api::middleware::request_id::{REQUEST_ID_HEADER, request_id_middleware};
use crate::config::UploadConfig;
use crate::services::namespace::NamespaceLister;
use crate::services::registry::SessionRegistry;
use crate::services::storage::StorageService;
use crate::services::upload_service::UploadService;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upload::upload_chunk,
        api::handlers::upload::check_file,
        api::handlers::upload::list_sessions,
        api::handlers::files::list_files,
        api::handlers::files::download_file,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::upload::ChunkUploadForm,
            api::handlers::upload::CheckFileRequest,
            api::handlers::files::FileListResponse,
            api::handlers::health::HealthResponse,
            services::upload_service::ChunkAck,
            services::upload_service::Availability,
            services::registry::SessionSnapshot,
            services::registry::SessionState,
        )
    ),
    tags(
        (name = "upload", description = "Chunked upload endpoints"),
        (name = "files", description = "Committed file endpoints"),
        (name = "system", description = "Service status")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub uploads: Arc<UploadService>,
    pub namespace: Arc<NamespaceLister>,
    pub config: UploadConfig,
}

impl AppState {
    /// Wires the upload core around `storage` with a fresh session registry.
    pub fn new(storage: Arc<dyn StorageService>, config: UploadConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        Self {
            uploads: Arc::new(UploadService::new(
                storage.clone(),
                registry,
                config.clone(),
            )),
            namespace: Arc::new(NamespaceLister::new(storage)),
            config,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/upload",
            post(api::handlers::upload::upload_chunk)
                .layer(DefaultBodyLimit::max(state.config.body_limit())),
        )
        .route("/upload/sessions", get(api::handlers::upload::list_sessions))
        .route("/check-file", post(api::handlers::upload::check_file))
        .route("/files", get(api::handlers::files::list_files))
        .route("/files/:filename", get(api::handlers::files::download_file))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get(REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown");
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                })
                .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                    tracing::info!("📥 {} {}", request.method(), request.uri());
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        tracing::info!(
                            "📤 Finished in {:?} with status {}",
                            latency,
                            response.status()
                        );
                    },
                ),
        )
        // Outermost, so the trace span already sees the minted id
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}
