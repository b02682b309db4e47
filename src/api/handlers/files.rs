use crate::AppState;
use crate::api::error::AppError;
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct FileListResponse {
    pub files: Vec<String>,
}

#[utoipa::path(
    get,
    path = "/files",
    responses(
        (status = 200, description = "Committed files", body = FileListResponse)
    ),
    tag = "files"
)]
pub async fn list_files(State(state): State<AppState>) -> Result<Json<FileListResponse>, AppError> {
    let files = state.namespace.list().await?;
    Ok(Json(FileListResponse { files }))
}

#[utoipa::path(
    get,
    path = "/files/{filename}",
    params(
        ("filename" = String, Path, description = "Committed file name")
    ),
    responses(
        (status = 200, description = "File download stream"),
        (status = 404, description = "File not found")
    ),
    tag = "files"
)]
pub async fn download_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let file = state.namespace.open(&filename).await?;

    let body = Body::from_stream(ReaderStream::new(file.reader));
    let headers = [
        (
            header::CONTENT_TYPE,
            "application/octet-stream".to_string(),
        ),
        (header::CONTENT_LENGTH, file.size.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename.replace('"', "_")),
        ),
    ];

    Ok((headers, body).into_response())
}
