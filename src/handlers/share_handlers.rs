//! Handlers for password-protected share links.

use crate::{
    errors::AppError,
    handlers::{AppState, file_handlers::artifact_response, parse_file_id},
    services::share_service::IssuedShare,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    response::Response,
};
use serde::Deserialize;

const DEFAULT_EXPIRE_MINUTES: i64 = 60;
const DEFAULT_MAX_DOWNLOADS: i64 = 5;

/// Query params accepted by `POST /share/create/{file_id}`.
#[derive(Debug, Deserialize)]
pub struct CreateShareQuery {
    pub expire_minutes: Option<i64>,
    pub max_downloads: Option<i64>,
}

/// Query params accepted by `GET /share/download/{token}`.
#[derive(Debug, Deserialize)]
pub struct RedeemQuery {
    pub password: String,
}

/// POST `/share/create/{file_id}` — issue a share link for a completed
/// file. The response is the only place the plaintext password ever
/// appears.
pub async fn create_share(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Query(query): Query<CreateShareQuery>,
) -> Result<Json<IssuedShare>, AppError> {
    let file_id = parse_file_id(&file_id)?;
    let expire_minutes = query.expire_minutes.unwrap_or(DEFAULT_EXPIRE_MINUTES);
    let max_downloads = query.max_downloads.unwrap_or(DEFAULT_MAX_DOWNLOADS);

    let issued = state
        .shares
        .create_share(file_id, Some(expire_minutes), Some(max_downloads))
        .await?;

    Ok(Json(issued))
}

/// GET `/share/download/{token}?password=` — redeem a share link and
/// stream the artifact. Each success consumes one download from the quota.
pub async fn redeem_share(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<RedeemQuery>,
) -> Result<Response, AppError> {
    let (file, handle) = state.shares.redeem(&token, &query.password).await?;
    Ok(artifact_response(&file, handle))
}
