//! Handlers for completed files: listing, direct download, and deletion.
//! Downloads stream from disk to avoid buffering whole artifacts in memory.

use crate::{
    errors::AppError,
    handlers::{AppState, parse_file_id},
    models::file::FileRecord,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use serde_json::{Value, json};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// GET `/files` — every session, newest first.
pub async fn list_files(
    State(state): State<AppState>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    let files = state.transfer.list_files().await?;
    Ok(Json(files))
}

/// GET `/download/{file_id}` — stream a completed artifact.
pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Response, AppError> {
    let file_id = parse_file_id(&file_id)?;
    let (file, handle) = state.transfer.artifact_reader(file_id).await?;
    Ok(artifact_response(&file, handle))
}

/// DELETE `/files/{file_id}` — drop the session, its storage, and every
/// share link derived from it.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let file_id = parse_file_id(&file_id)?;
    state.transfer.delete_file(file_id).await?;
    Ok(Json(json!({ "file_id": file_id })))
}

/// Build a streaming attachment response for a merged artifact.
pub(crate) fn artifact_response(file: &FileRecord, handle: File) -> Response {
    let stream = ReaderStream::new(handle);
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&file.file_size.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    // The filename is validated at session creation, so quoting it is safe.
    let disposition = format!("attachment; filename=\"{}\"", file.filename);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(hash) = file.file_hash.as_ref() {
        let quoted = format!("\"{}\"", hash);
        if let Ok(value) = HeaderValue::from_str(&quoted) {
            headers.insert(header::ETAG, value);
        }
    }

    response
}
