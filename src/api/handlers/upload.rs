use crate::AppState;
use crate::api::error::AppError;
use crate::services::registry::SessionSnapshot;
use crate::services::upload_service::{Availability, ChunkAck, ChunkRequest};
use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
};
use bytes::Bytes;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Multipart layout of a chunk delivery (documentation only)
#[derive(ToSchema)]
pub struct ChunkUploadForm {
    /// Committed name of the file being assembled
    pub filename: String,
    /// `true` on the final chunk; triggers the commit
    pub is_last_chunk: Option<bool>,
    /// `upload_id` from an earlier acknowledgement
    pub upload_id: Option<Uuid>,
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

#[derive(Deserialize, ToSchema, Validate)]
pub struct CheckFileRequest {
    #[validate(length(min = 1, max = 1024, message = "Filename is required"))]
    pub filename: String,
}

/// Fields collected from one multipart chunk request.
///
/// Accepts the plain fields (`filename`, `isLastChunk`, `uploadId`) and the
/// ones resumable.js sends on its own (`resumableFilename`,
/// `resumableChunkNumber`, `resumableTotalChunks`).
#[derive(Default, Debug)]
struct ChunkForm {
    filename: Option<String>,
    resumable_filename: Option<String>,
    is_last_chunk: Option<bool>,
    chunk_number: Option<u64>,
    total_chunks: Option<u64>,
    upload_id: Option<Uuid>,
    payload: Option<Bytes>,
}

impl ChunkForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = ChunkForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?
        {
            let name = field.name().unwrap_or_default().to_string();

            if name == "file" {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                form.payload = Some(data);
                continue;
            }

            let value = field
                .text()
                .await
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            form.set(&name, value.trim())?;
        }

        Ok(form)
    }

    fn set(&mut self, name: &str, value: &str) -> Result<(), AppError> {
        match name {
            "filename" => self.filename = Some(value.to_string()),
            "resumableFilename" => self.resumable_filename = Some(value.to_string()),
            "isLastChunk" => self.is_last_chunk = Some(parse_flag(value)),
            "resumableChunkNumber" => self.chunk_number = Some(parse_number(name, value)?),
            "resumableTotalChunks" => self.total_chunks = Some(parse_number(name, value)?),
            "uploadId" if !value.is_empty() => {
                let id = Uuid::parse_str(value)
                    .map_err(|_| AppError::BadRequest("Invalid uploadId".to_string()))?;
                self.upload_id = Some(id);
            }
            _ => {}
        }
        Ok(())
    }

    fn into_request(self) -> Result<ChunkRequest, AppError> {
        let filename = self
            .filename
            .filter(|f| !f.is_empty())
            .or(self.resumable_filename)
            .ok_or_else(|| AppError::BadRequest("No filename provided".to_string()))?;
        let payload = self
            .payload
            .ok_or_else(|| AppError::BadRequest("No file provided".to_string()))?;

        let is_last_chunk = match (self.is_last_chunk, self.chunk_number, self.total_chunks) {
            (Some(flag), _, _) => flag,
            (None, Some(number), Some(total)) => number >= total,
            _ => false,
        };

        Ok(ChunkRequest {
            filename,
            payload,
            is_last_chunk,
            upload_id: self.upload_id,
        })
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn parse_number(name: &str, value: &str) -> Result<u64, AppError> {
    value
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid {}", name)))
}

#[utoipa::path(
    post,
    path = "/upload",
    request_body(content = ChunkUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Chunk stored; committed when it was the last", body = ChunkAck),
        (status = 400, description = "Malformed request or filename"),
        (status = 409, description = "Filename taken or upload already closed"),
        (status = 413, description = "Chunk or file too large"),
        (status = 500, description = "Storage or commit failure")
    ),
    tag = "upload"
)]
pub async fn upload_chunk(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ChunkAck>, AppError> {
    let request = ChunkForm::read(multipart).await?.into_request()?;
    tracing::debug!(
        "Chunk for '{}': {} bytes, last={}",
        request.filename,
        request.payload.len(),
        request.is_last_chunk
    );

    let ack = state.uploads.ingest(request).await?;
    Ok(Json(ack))
}

#[utoipa::path(
    post,
    path = "/check-file",
    request_body = CheckFileRequest,
    responses(
        (status = 200, description = "Filename available", body = Availability),
        (status = 409, description = "Filename taken", body = Availability),
        (status = 400, description = "Invalid filename")
    ),
    tag = "upload"
)]
pub async fn check_file(
    State(state): State<AppState>,
    Json(req): Json<CheckFileRequest>,
) -> Result<(StatusCode, Json<Availability>), AppError> {
    req.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let availability = state.uploads.check_available(&req.filename).await?;
    let status = if availability.available {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    Ok((status, Json(availability)))
}

#[utoipa::path(
    get,
    path = "/upload/sessions",
    responses(
        (status = 200, description = "Uploads in progress", body = Vec<SessionSnapshot>)
    ),
    tag = "upload"
)]
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSnapshot>> {
    Json(state.uploads.pending_sessions().await)
}
