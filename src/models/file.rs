//! Represents one chunked upload session and, once merged, its final file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle state of an upload session.
///
/// `Uploading` sessions accept chunks; `Completed` sessions own a merged
/// artifact and a content hash; `Failed` is terminal and reserved for
/// out-of-band administrative use.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Uploading,
    Completed,
    Failed,
}

/// A single logical file moving through the chunked-transfer pipeline.
///
/// The record is created when the client declares the upload, mutated by
/// chunk writes and the merge, and removed by an explicit delete or the
/// janitor. Sizes are bytes; the chunk layout is fixed at creation.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    /// Opaque session identifier handed to the client at upload start.
    pub file_id: Uuid,

    /// Original filename declared by the client (sanitized).
    pub filename: String,

    /// Declared total size in bytes.
    pub file_size: i64,

    /// Size of every chunk except possibly the last, in bytes.
    /// Clamped to `file_size` at creation.
    pub chunk_size: i64,

    /// `ceil(file_size / chunk_size)`, fixed for the session lifetime.
    pub total_chunks: i64,

    /// Current lifecycle state.
    pub status: FileStatus,

    /// SHA-256 (hex) of the merged artifact. Set only once completed.
    pub file_hash: Option<String>,

    /// When the session was declared. Never changes.
    pub created_at: DateTime<Utc>,

    /// Bumped on every chunk write and state change.
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// Expected byte length of the chunk at `index`.
    ///
    /// Every chunk is `chunk_size` bytes except the final one, which holds
    /// whatever remains of the declared file size.
    pub fn expected_chunk_len(&self, index: i64) -> i64 {
        if index == self.total_chunks - 1 {
            self.file_size - self.chunk_size * (self.total_chunks - 1)
        } else {
            self.chunk_size
        }
    }
}
