//! Represents one uploaded chunk of an in-progress upload session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Completion record for a single chunk, keyed by `(file_id, chunk_index)`.
///
/// Rows are write-once: a chunk is recorded on its first successful upload
/// and a retry of the same index is accepted without rewriting anything.
/// All rows for a session are dropped when it merges or is deleted.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ChunkRow {
    /// Owning upload session.
    pub file_id: Uuid,

    /// Position of this chunk within the file, in `[0, total_chunks)`.
    pub chunk_index: i64,

    /// Whether the chunk payload is durably on disk.
    pub uploaded: bool,

    /// Bytes actually written for this chunk.
    pub size: i64,

    /// SHA-256 (hex) of the chunk payload.
    pub chunk_hash: Option<String>,

    /// When the chunk was first recorded.
    pub created_at: DateTime<Utc>,
}
