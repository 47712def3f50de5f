//! HTTP handlers for the transfer service, grouped by concern: the upload
//! flow, completed-file management, share links, and health probes.

use crate::{
    errors::AppError,
    services::{share_service::ShareService, transfer_service::TransferService},
};
use uuid::Uuid;

pub mod file_handlers;
pub mod health_handlers;
pub mod share_handlers;
pub mod upload_handlers;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub transfer: TransferService,
    pub shares: ShareService,
}

/// Parse a client-supplied session id.
///
/// Malformed ids map to the same not-found error as unknown ids, so the two
/// cases are indistinguishable from outside.
pub(crate) fn parse_file_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::not_found(format!("file `{}` not found", raw)))
}
