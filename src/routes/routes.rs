//! Defines routes for the chunked-transfer API.
//!
//! ## Structure
//! - **Upload flow**
//!   - `POST /upload/start`            — declare a session, get the chunk layout
//!   - `POST /upload/chunk`            — send one chunk (multipart, any order)
//!   - `GET  /upload/status/{file_id}` — uploaded vs. missing indices
//!   - `POST /upload/merge/{file_id}`  — assemble and hash the artifact
//!
//! - **Completed files**
//!   - `GET    /files`            — list sessions newest-first
//!   - `GET    /download/{file_id}` — stream a completed artifact
//!   - `DELETE /files/{file_id}`  — delete session, storage, and share links
//!
//! - **Share links**
//!   - `POST /share/create/{file_id}`   — issue a token + one-time password
//!   - `GET  /share/download/{token}`   — redeem with `?password=`
//!
//! The chunk route disables the default body limit; the service clamps each
//! chunk to its declared length instead.

use crate::handlers::{
    AppState,
    file_handlers::{delete_file, download_file, list_files},
    health_handlers::{healthz, readyz},
    share_handlers::{create_share, redeem_share},
    upload_handlers::{merge_file, start_upload, upload_chunk, upload_status},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

/// Build and return the router for all transfer and share routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // upload flow
        .route("/upload/start", post(start_upload))
        .route(
            "/upload/chunk",
            post(upload_chunk).layer(DefaultBodyLimit::disable()),
        )
        .route("/upload/status/{file_id}", get(upload_status))
        .route("/upload/merge/{file_id}", post(merge_file))
        // completed files
        .route("/files", get(list_files))
        .route("/files/{file_id}", delete(delete_file))
        .route("/download/{file_id}", get(download_file))
        // share links
        .route("/share/create/{file_id}", post(create_share))
        .route("/share/download/{token}", get(redeem_share))
}
