//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks DB connectivity and disk I/O

use crate::handlers::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, path::PathBuf};
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness probe — always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Runs a lightweight query against SQLite (`SELECT 1`).
/// 2. Performs best-effort write/read/delete probes against both storage
///    roots (chunk staging and merged files).
///
/// Returns JSON describing each check. HTTP 200 when all checks pass,
/// HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let sqlite_check = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.transfer.db)
        .await
    {
        Ok(1) => CheckStatus { ok: true, error: None },
        Ok(v) => CheckStatus {
            ok: false,
            error: Some(format!("unexpected result: {}", v)),
        },
        Err(e) => CheckStatus {
            ok: false,
            error: Some(format!("error: {}", e)),
        },
    };
    let chunks_check = probe_dir(state.transfer.chunks_root()).await;
    let files_check = probe_dir(state.transfer.files_root()).await;

    let overall_ok = sqlite_check.ok && chunks_check.ok && files_check.ok;

    let mut checks = HashMap::new();
    checks.insert("sqlite", sqlite_check);
    checks.insert("chunks_dir", chunks_check);
    checks.insert("files_dir", files_check);

    let body = ReadyResponse {
        status: if overall_ok { "ok".into() } else { "error".into() },
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// Write, read back, and remove a probe file under `dir`.
async fn probe_dir(dir: PathBuf) -> CheckStatus {
    let probe_path = dir.join(format!(".readyz-{}", Uuid::new_v4()));
    let result = match fs::write(&probe_path, b"readyz").await {
        Ok(()) => match fs::read(&probe_path).await {
            Ok(bytes) if bytes == b"readyz" => Ok(()),
            Ok(_) => Err("probe file content mismatch".to_string()),
            Err(e) => Err(format!("could not read probe file: {}", e)),
        },
        Err(e) => Err(format!("could not write probe file: {}", e)),
    };
    let _ = fs::remove_file(&probe_path).await;

    match result {
        Ok(()) => CheckStatus { ok: true, error: None },
        Err(error) => CheckStatus {
            ok: false,
            error: Some(error),
        },
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
