//! Represents a password-protected share link for a completed file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A time- and usage-bounded credential granting download access to one
/// merged artifact.
///
/// The token string is unguessable and globally unique. Only the SHA-256 of
/// the one-time password is stored; the plaintext is returned to the issuer
/// exactly once. The `file_id` back-reference is weak: deleting the file
/// removes every link derived from it.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ShareLink {
    /// URL-safe random token identifying this link.
    pub share_token: String,

    /// Session whose artifact this link exposes.
    pub file_id: Uuid,

    /// SHA-256 (hex) of the one-time password.
    pub password_hash: String,

    /// Instant after which the link is permanently inert. `None` never
    /// expires.
    pub expires_at: Option<DateTime<Utc>>,

    /// Successful redemptions so far. Starts at zero.
    pub download_count: i64,

    /// Redemption cap. `None` is unlimited.
    pub max_downloads: Option<i64>,

    /// When the link was issued.
    pub created_at: DateTime<Utc>,
}
