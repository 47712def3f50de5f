//! Handlers for the chunked-upload flow: declare, send chunks, poll, merge.
//! Chunk bodies are streamed to the service without buffering whole chunks
//! in memory.

use crate::{
    errors::AppError,
    handlers::{AppState, parse_file_id},
};
use axum::{
    Json,
    extract::{Multipart, Path, State},
};
use futures::stream;
use serde::Deserialize;
use serde_json::{Value, json};
use std::io;

const MEGABYTE: f64 = (1024 * 1024) as f64;

/// Body of `POST /upload/start`. Sizes are fractional megabytes.
#[derive(Debug, Deserialize)]
pub struct StartUploadReq {
    pub filename: String,
    pub file_size: f64,
    pub chunk_size: f64,
}

/// POST `/upload/start` — declare a new upload session.
///
/// Converts the megabyte sizes to bytes at this boundary; everything behind
/// it works in bytes.
pub async fn start_upload(
    State(state): State<AppState>,
    Json(req): Json<StartUploadReq>,
) -> Result<Json<Value>, AppError> {
    if !req.file_size.is_finite() || !req.chunk_size.is_finite() {
        return Err(AppError::bad_request(
            "file_size and chunk_size must be finite numbers",
        ));
    }
    let file_size = (req.file_size * MEGABYTE) as i64;
    let chunk_size = (req.chunk_size * MEGABYTE) as i64;

    let (file_id, total_chunks) = state
        .transfer
        .start_upload(&req.filename, file_size, chunk_size)
        .await?;

    Ok(Json(json!({
        "file_id": file_id,
        "total_chunks": total_chunks
    })))
}

/// POST `/upload/chunk` — multipart body with `file_id`, `chunk_index`, and
/// the binary `chunk` field.
///
/// The metadata fields must precede the chunk payload so the payload can be
/// streamed straight to disk as it arrives.
pub async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let mut file_id = None;
    let mut chunk_index: Option<i64> = None;
    let mut stored = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(err.to_string()))?;
                file_id = Some(parse_file_id(&text)?);
            }
            Some("chunk_index") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(err.to_string()))?;
                let index = text.trim().parse().map_err(|_| {
                    AppError::bad_request(format!("invalid chunk_index `{}`", text))
                })?;
                chunk_index = Some(index);
            }
            Some("chunk") => {
                let (Some(id), Some(index)) = (file_id, chunk_index) else {
                    return Err(AppError::bad_request(
                        "file_id and chunk_index must precede the chunk field",
                    ));
                };
                let payload = stream::unfold(field, |mut field| async move {
                    match field.chunk().await {
                        Ok(Some(data)) => Some((Ok(data), field)),
                        Ok(None) => None,
                        Err(err) => Some((Err(io::Error::other(err)), field)),
                    }
                });
                state.transfer.record_chunk(id, index, payload).await?;
                stored = Some(index);
            }
            _ => {}
        }
    }

    let chunk_index =
        stored.ok_or_else(|| AppError::bad_request("multipart field `chunk` is required"))?;
    Ok(Json(json!({ "chunk_index": chunk_index })))
}

/// GET `/upload/status/{file_id}` — uploaded vs. missing chunk indices.
pub async fn upload_status(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let file_id = parse_file_id(&file_id)?;
    let status = state.transfer.status(file_id).await?;

    Ok(Json(json!({
        "file_id": file_id,
        "total_chunks": status.total_chunks,
        "uploaded_chunks": status.uploaded_chunks,
        "missing_chunks": status.missing_chunks,
        "status": status.status
    })))
}

/// POST `/upload/merge/{file_id}` — assemble the artifact and return its
/// content hash. A 400 carrying `missing_chunks` tells the client what to
/// upload before retrying.
pub async fn merge_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let file_id = parse_file_id(&file_id)?;
    let file_hash = state.transfer.merge(file_id).await?;

    Ok(Json(json!({
        "file_id": file_id,
        "file_hash": file_hash
    })))
}
