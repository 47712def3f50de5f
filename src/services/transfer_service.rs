//! src/services/transfer_service.rs
//!
//! TransferService — the chunked-upload state machine backed by SQLite for
//! session/chunk metadata and local disk for payloads. Chunk bytes live
//! under `base_path/chunks/{file_id}/{index}.part` until the merge, merged
//! artifacts under `base_path/files/{file_id}_{filename}`.

use crate::models::{
    chunk::ChunkRow,
    file::{FileRecord, FileStatus},
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::{
    collections::{BTreeSet, HashMap},
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::{Arc, Mutex as StdMutex},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
    sync::Mutex as AsyncMutex,
};
use tracing::debug;
use uuid::Uuid;

/// Snapshot of an upload session's chunk bookkeeping.
#[derive(Debug)]
pub struct UploadStatus {
    pub total_chunks: i64,
    pub uploaded_chunks: Vec<i64>,
    pub missing_chunks: Vec<i64>,
    pub status: FileStatus,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("file `{0}` not found")]
    FileNotFound(Uuid),
    #[error("chunk index {index} outside [0, {total})")]
    ChunkOutOfRange { index: i64, total: i64 },
    #[error("upload incomplete, {} chunks missing", .0.len())]
    IncompleteUpload(Vec<i64>),
    #[error("file not completed yet")]
    NotCompleted,
    #[error("merged file missing from storage")]
    ArtifactMissing,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type TransferResult<T> = Result<T, TransferError>;

const MAX_FILENAME_LEN: usize = 255;
const COPY_BUF_LEN: usize = 1024 * 1024;

/// TransferService drives a session from creation to a merged, hashed file:
/// - Start an upload (insert metadata, allocate a chunk directory)
/// - Record chunks (stream bytes to disk, write-once per index)
/// - Report status (uploaded vs. missing indices)
/// - Merge (concatenate chunks in order, hash, promote to artifact)
/// - Serve, list, and delete completed files
///
/// All operations may run concurrently; per-index write races resolve
/// through an exclusive link-into-place commit, and merges for the same
/// session serialize on a per-session guard.
#[derive(Clone)]
pub struct TransferService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk; chunks and merged files are stored beneath it.
    pub base_path: PathBuf,

    merge_guards: Arc<StdMutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

impl TransferService {
    /// Create a new TransferService backed by the provided SQLite pool and
    /// using `base_path` as the root directory for chunk and file payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            merge_guards: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Basic filename validation to avoid trivial path traversal vectors.
    ///
    /// The filename becomes part of the artifact path and of the
    /// Content-Disposition header, so separators, parent references, quotes,
    /// and control bytes are all rejected.
    fn ensure_filename_safe(&self, name: &str) -> TransferResult<()> {
        if name.is_empty() || name.len() > MAX_FILENAME_LEN {
            return Err(TransferError::InvalidArgument(
                "filename must be between 1 and 255 bytes".into(),
            ));
        }
        if name.contains('/') || name.contains("..") {
            return Err(TransferError::InvalidArgument(
                "filename cannot contain path separators or `..`".into(),
            ));
        }
        if name
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'"' || b == b'\0')
        {
            return Err(TransferError::InvalidArgument(
                "filename contains forbidden characters".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn chunks_root(&self) -> PathBuf {
        self.base_path.join("chunks")
    }

    pub(crate) fn files_root(&self) -> PathBuf {
        self.base_path.join("files")
    }

    /// Directory holding the chunk payloads of one session.
    pub(crate) fn chunk_dir(&self, file_id: Uuid) -> PathBuf {
        self.chunks_root().join(file_id.to_string())
    }

    fn chunk_path(&self, file_id: Uuid, index: i64) -> PathBuf {
        self.chunk_dir(file_id).join(format!("{}.part", index))
    }

    /// Final resting place of a merged artifact.
    pub(crate) fn artifact_path(&self, file: &FileRecord) -> PathBuf {
        self.files_root()
            .join(format!("{}_{}", file.file_id, file.filename))
    }

    /// Fetch a session record if it exists.
    pub(crate) async fn try_fetch_file(
        &self,
        file_id: Uuid,
    ) -> Result<Option<FileRecord>, sqlx::Error> {
        sqlx::query_as::<_, FileRecord>(
            "SELECT file_id, filename, file_size, chunk_size, total_chunks, status,
                    file_hash, created_at, updated_at
             FROM files WHERE file_id = ?",
        )
        .bind(file_id)
        .fetch_optional(&*self.db)
        .await
    }

    async fn fetch_file(&self, file_id: Uuid) -> TransferResult<FileRecord> {
        self.try_fetch_file(file_id)
            .await?
            .ok_or(TransferError::FileNotFound(file_id))
    }

    /// Per-session mutual-exclusion guard for the merge critical section.
    fn merge_guard(&self, file_id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut guards = self
            .merge_guards
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guards.entry(file_id).or_default().clone()
    }

    fn drop_merge_guard(&self, file_id: Uuid) {
        let mut guards = self
            .merge_guards
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guards.remove(&file_id);
    }

    /// Declare a new upload session.
    ///
    /// Sizes are bytes and must be positive. `chunk_size` is clamped to the
    /// file size, and the chunk layout is fixed from here on. Returns the
    /// fresh session id and the number of chunks the client must send.
    pub async fn start_upload(
        &self,
        filename: &str,
        file_size: i64,
        chunk_size: i64,
    ) -> TransferResult<(Uuid, i64)> {
        self.ensure_filename_safe(filename)?;
        if file_size <= 0 || chunk_size <= 0 {
            return Err(TransferError::InvalidArgument(
                "file_size and chunk_size must be greater than zero".into(),
            ));
        }

        let chunk_size = chunk_size.min(file_size);
        let total_chunks = (file_size + chunk_size - 1) / chunk_size;
        let file_id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO files (file_id, filename, file_size, chunk_size, total_chunks,
                                status, file_hash, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, NULL, ?, ?)",
        )
        .bind(file_id)
        .bind(filename)
        .bind(file_size)
        .bind(chunk_size)
        .bind(total_chunks)
        .bind(FileStatus::Uploading)
        .bind(now)
        .bind(now)
        .execute(&*self.db)
        .await?;

        fs::create_dir_all(self.chunk_dir(file_id)).await?;
        debug!("started upload {} ({} chunks)", file_id, total_chunks);

        Ok((file_id, total_chunks))
    }

    /// Stream one chunk to disk and record it, write-once per index.
    ///
    /// Retries are idempotent: a chunk that is already recorded, or a
    /// session that already completed, is accepted as a no-op. At most the
    /// expected length for the index is written; surplus bytes from the
    /// client are discarded. Two racing writers for the same index resolve
    /// through the exclusive link-into-place commit and both report success.
    pub async fn record_chunk<S>(
        &self,
        file_id: Uuid,
        chunk_index: i64,
        payload: S,
    ) -> TransferResult<()>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let file = self.fetch_file(file_id).await?;
        if chunk_index < 0 || chunk_index >= file.total_chunks {
            return Err(TransferError::ChunkOutOfRange {
                index: chunk_index,
                total: file.total_chunks,
            });
        }
        if file.status == FileStatus::Completed {
            return Ok(());
        }

        let recorded = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(1) FROM chunks WHERE file_id = ? AND chunk_index = ? AND uploaded = 1",
        )
        .bind(file_id)
        .bind(chunk_index)
        .fetch_one(&*self.db)
        .await?;
        if recorded > 0 {
            return Ok(());
        }

        let expected = file.expected_chunk_len(chunk_index);
        let dir = self.chunk_dir(file_id);
        fs::create_dir_all(&dir).await?;
        let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut out = File::create(&tmp_path).await?;

        let mut written: i64 = 0;
        let mut digest = Sha256::new();
        pin_mut!(payload);
        while let Some(next) = payload.next().await {
            let data = match next {
                Ok(data) => data,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(TransferError::Io(err));
                }
            };
            let remain = expected - written;
            if remain <= 0 {
                break;
            }
            let take = data.len().min(remain as usize);
            digest.update(&data[..take]);
            if let Err(err) = out.write_all(&data[..take]).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(TransferError::Io(err));
            }
            written += take as i64;
        }
        if let Err(err) = out.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(TransferError::Io(err));
        }
        if let Err(err) = out.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(TransferError::Io(err));
        }
        drop(out);

        // Commit by linking the finished temp file into place. The link is
        // an atomic reserve-or-skip: exactly one writer per index succeeds,
        // and a loser of the race still reports success to its client.
        let final_path = self.chunk_path(file_id, chunk_index);
        match fs::hard_link(&tmp_path, &final_path).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                debug!("chunk {} of {} already on disk", chunk_index, file_id);
            }
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(TransferError::Io(err));
            }
        }
        let _ = fs::remove_file(&tmp_path).await;

        let now = Utc::now();
        let chunk_hash = format!("{:x}", digest.finalize());
        sqlx::query(
            "INSERT INTO chunks (file_id, chunk_index, uploaded, size, chunk_hash, created_at)
             VALUES (?, ?, 1, ?, ?, ?)
             ON CONFLICT(file_id, chunk_index) DO NOTHING",
        )
        .bind(file_id)
        .bind(chunk_index)
        .bind(written)
        .bind(&chunk_hash)
        .bind(now)
        .execute(&*self.db)
        .await?;

        sqlx::query("UPDATE files SET updated_at = ? WHERE file_id = ?")
            .bind(now)
            .bind(file_id)
            .execute(&*self.db)
            .await?;

        Ok(())
    }

    /// Report which chunk indices are uploaded and which are still missing.
    /// Both lists are sorted ascending.
    pub async fn status(&self, file_id: Uuid) -> TransferResult<UploadStatus> {
        let file = self.fetch_file(file_id).await?;

        let rows = sqlx::query_as::<_, ChunkRow>(
            "SELECT file_id, chunk_index, uploaded, size, chunk_hash, created_at
             FROM chunks WHERE file_id = ? AND uploaded = 1
             ORDER BY chunk_index ASC",
        )
        .bind(file_id)
        .fetch_all(&*self.db)
        .await?;

        let uploaded_chunks: Vec<i64> = rows.iter().map(|row| row.chunk_index).collect();
        let present: BTreeSet<i64> = uploaded_chunks.iter().copied().collect();
        let missing_chunks = (0..file.total_chunks)
            .filter(|index| !present.contains(index))
            .collect();

        Ok(UploadStatus {
            total_chunks: file.total_chunks,
            uploaded_chunks,
            missing_chunks,
            status: file.status,
        })
    }

    /// Concatenate all chunks in index order into the artifact, hashing the
    /// byte stream as it is written, and promote the session to completed.
    ///
    /// Idempotent: an already-completed session returns its stored hash
    /// without touching chunk storage. A session with missing chunks fails
    /// with `IncompleteUpload` carrying the sorted missing indices, which the
    /// client resolves by uploading them and retrying. Chunk storage is
    /// reclaimed once the artifact is durable.
    pub async fn merge(&self, file_id: Uuid) -> TransferResult<String> {
        let file = self.fetch_file(file_id).await?;
        if file.status == FileStatus::Completed {
            if let Some(hash) = file.file_hash.as_ref() {
                return Ok(hash.clone());
            }
        }

        let guard = self.merge_guard(file_id);
        let _held = guard.lock().await;

        // Re-check under the guard: a concurrent merge may have finished
        // while this call waited.
        let file = self.fetch_file(file_id).await?;
        if file.status == FileStatus::Completed {
            if let Some(hash) = file.file_hash.as_ref() {
                return Ok(hash.clone());
            }
        }

        let status = self.status(file_id).await?;
        if !status.missing_chunks.is_empty() {
            return Err(TransferError::IncompleteUpload(status.missing_chunks));
        }

        fs::create_dir_all(self.files_root()).await?;
        let artifact_path = self.artifact_path(&file);
        let tmp_path = self
            .files_root()
            .join(format!(".tmp-{}", Uuid::new_v4()));

        let hash = match self.concat_chunks(&file, &tmp_path).await {
            Ok(hash) => hash,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };

        if let Err(err) = fs::rename(&tmp_path, &artifact_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&artifact_path).await?;
                fs::rename(&tmp_path, &artifact_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(TransferError::Io(err));
            }
        }

        let now = Utc::now();
        let db_result: Result<(), sqlx::Error> = async {
            let mut tx = self.db.begin().await?;
            sqlx::query(
                "UPDATE files SET status = ?, file_hash = ?, updated_at = ? WHERE file_id = ?",
            )
            .bind(FileStatus::Completed)
            .bind(&hash)
            .bind(now)
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM chunks WHERE file_id = ?")
                .bind(file_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await
        }
        .await;
        if let Err(err) = db_result {
            let _ = fs::remove_file(&artifact_path).await;
            return Err(TransferError::Sqlx(err));
        }

        // Chunk payloads are never needed again once merged.
        if let Err(err) = fs::remove_dir_all(self.chunk_dir(file_id)).await {
            if err.kind() != ErrorKind::NotFound {
                debug!(
                    "failed to remove chunk directory for {} after merge: {}",
                    file_id, err
                );
            }
        }

        debug!("merged {} into {}", file_id, artifact_path.display());
        Ok(hash)
    }

    /// Stream every chunk of `file` in ascending index order into `tmp_path`,
    /// fsync it, and return the hex SHA-256 of the concatenated bytes.
    async fn concat_chunks(&self, file: &FileRecord, tmp_path: &Path) -> TransferResult<String> {
        let mut merged = File::create(tmp_path).await?;
        let mut digest = Sha256::new();
        let mut buf = vec![0u8; COPY_BUF_LEN];

        for index in 0..file.total_chunks {
            let mut part = File::open(self.chunk_path(file.file_id, index)).await?;
            loop {
                let n = part.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                digest.update(&buf[..n]);
                merged.write_all(&buf[..n]).await?;
            }
        }

        merged.flush().await?;
        merged.sync_all().await?;
        Ok(format!("{:x}", digest.finalize()))
    }

    /// Fetch a completed file for reading.
    ///
    /// Returns metadata and an opened File handle ready for streaming out.
    /// Returns ArtifactMissing if the record is completed but the physical
    /// file is gone (storage inconsistency, surfaced rather than repaired).
    pub async fn artifact_reader(&self, file_id: Uuid) -> TransferResult<(FileRecord, File)> {
        let file = self.fetch_file(file_id).await?;
        if file.status != FileStatus::Completed {
            return Err(TransferError::NotCompleted);
        }

        let path = self.artifact_path(&file);
        let handle = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                TransferError::ArtifactMissing
            } else {
                TransferError::Io(err)
            }
        })?;

        Ok((file, handle))
    }

    /// All sessions, newest first.
    pub async fn list_files(&self) -> TransferResult<Vec<FileRecord>> {
        let files = sqlx::query_as::<_, FileRecord>(
            "SELECT file_id, filename, file_size, chunk_size, total_chunks, status,
                    file_hash, created_at, updated_at
             FROM files ORDER BY created_at DESC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(files)
    }

    /// Remove a session and everything derived from it: chunk directory,
    /// merged artifact, share links, chunk rows, and the record itself.
    ///
    /// Storage removal is best-effort; missing paths are swallowed so a
    /// repeated or racing delete still converges on nothing left behind.
    pub async fn delete_file(&self, file_id: Uuid) -> TransferResult<()> {
        let file = self.fetch_file(file_id).await?;

        if let Err(err) = fs::remove_dir_all(self.chunk_dir(file_id)).await {
            if err.kind() != ErrorKind::NotFound {
                debug!("could not remove chunk directory for {}: {}", file_id, err);
            }
        }
        match fs::remove_file(self.artifact_path(&file)).await {
            Ok(()) => debug!("removed artifact for {}", file_id),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => debug!("could not remove artifact for {}: {}", file_id, err),
        }

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM share_links WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM files WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.drop_merge_guard(file_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_util::transfer_service;
    use futures::stream;

    fn one_shot(data: Vec<u8>) -> impl Stream<Item = io::Result<Bytes>> + Send {
        stream::iter(vec![Ok(Bytes::from(data))])
    }

    fn pieces(parts: Vec<Vec<u8>>) -> impl Stream<Item = io::Result<Bytes>> + Send {
        stream::iter(parts.into_iter().map(|p| Ok(Bytes::from(p))))
    }

    fn sha256_hex(data: &[u8]) -> String {
        format!("{:x}", Sha256::digest(data))
    }

    #[tokio::test]
    async fn chunk_layout_math() {
        let (service, _dir) = transfer_service().await;

        // 10 MB file in 3 MB chunks: four chunks, 1 MB tail.
        let mb = 1024 * 1024;
        let (file_id, total) = service.start_upload("big.bin", 10 * mb, 3 * mb).await.unwrap();
        assert_eq!(total, 4);
        let file = service.try_fetch_file(file_id).await.unwrap().unwrap();
        assert_eq!(file.expected_chunk_len(0), 3 * mb);
        assert_eq!(file.expected_chunk_len(3), mb);

        // Chunk size larger than the file clamps down to one chunk.
        let (clamped_id, clamped_total) =
            service.start_upload("small.bin", 10, 64).await.unwrap();
        assert_eq!(clamped_total, 1);
        let clamped = service.try_fetch_file(clamped_id).await.unwrap().unwrap();
        assert_eq!(clamped.chunk_size, 10);
    }

    #[tokio::test]
    async fn start_upload_rejects_bad_input() {
        let (service, _dir) = transfer_service().await;

        for (name, size, chunk) in [
            ("ok.bin", 0, 4),
            ("ok.bin", 10, 0),
            ("ok.bin", -1, 4),
            ("", 10, 4),
            ("../escape", 10, 4),
            ("a/b.bin", 10, 4),
        ] {
            let result = service.start_upload(name, size, chunk).await;
            assert!(
                matches!(result, Err(TransferError::InvalidArgument(_))),
                "{:?} should be rejected",
                (name, size, chunk)
            );
        }
    }

    #[tokio::test]
    async fn chunk_bounds_and_unknown_session() {
        let (service, _dir) = transfer_service().await;
        let (file_id, _) = service.start_upload("f.bin", 10, 4).await.unwrap();

        let result = service.record_chunk(file_id, 3, one_shot(vec![0u8; 4])).await;
        assert!(matches!(
            result,
            Err(TransferError::ChunkOutOfRange { index: 3, total: 3 })
        ));
        let result = service.record_chunk(file_id, -1, one_shot(vec![0u8; 4])).await;
        assert!(matches!(result, Err(TransferError::ChunkOutOfRange { .. })));

        let result = service
            .record_chunk(Uuid::new_v4(), 0, one_shot(vec![0u8; 4]))
            .await;
        assert!(matches!(result, Err(TransferError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn chunk_upload_is_idempotent() {
        let (service, _dir) = transfer_service().await;
        let (file_id, _) = service.start_upload("f.bin", 10, 4).await.unwrap();

        service
            .record_chunk(file_id, 0, one_shot(b"aaaa".to_vec()))
            .await
            .unwrap();
        // Retry with different bytes: accepted, but the first write stands.
        service
            .record_chunk(file_id, 0, one_shot(b"bbbb".to_vec()))
            .await
            .unwrap();

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM chunks WHERE file_id = ? AND chunk_index = 0")
                .bind(file_id)
                .fetch_one(&*service.db)
                .await
                .unwrap();
        assert_eq!(count, 1);

        let on_disk = std::fs::read(service.chunk_dir(file_id).join("0.part")).unwrap();
        assert_eq!(on_disk, b"aaaa");
    }

    #[tokio::test]
    async fn racing_writers_for_one_index_both_succeed() {
        let (service, _dir) = transfer_service().await;
        let (file_id, _) = service.start_upload("f.bin", 8, 4).await.unwrap();

        let (a, b) = tokio::join!(
            service.record_chunk(file_id, 0, one_shot(b"aaaa".to_vec())),
            service.record_chunk(file_id, 0, one_shot(b"bbbb".to_vec())),
        );
        a.unwrap();
        b.unwrap();

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM chunks WHERE file_id = ? AND chunk_index = 0")
                .bind(file_id)
                .fetch_one(&*service.db)
                .await
                .unwrap();
        assert_eq!(count, 1);

        // Whichever writer linked first owns the chunk; the other's bytes
        // were discarded with its temp file.
        let on_disk = std::fs::read(service.chunk_dir(file_id).join("0.part")).unwrap();
        assert!(on_disk == b"aaaa" || on_disk == b"bbbb");
    }

    #[tokio::test]
    async fn surplus_bytes_are_discarded() {
        let (service, _dir) = transfer_service().await;
        // 10 bytes in 4-byte chunks: expected sizes 4, 4, 2.
        let (file_id, _) = service.start_upload("f.bin", 10, 4).await.unwrap();

        service
            .record_chunk(file_id, 2, one_shot(b"zzzzz".to_vec()))
            .await
            .unwrap();

        let on_disk = std::fs::read(service.chunk_dir(file_id).join("2.part")).unwrap();
        assert_eq!(on_disk, b"zz");

        let size: i64 =
            sqlx::query_scalar("SELECT size FROM chunks WHERE file_id = ? AND chunk_index = 2")
                .bind(file_id)
                .fetch_one(&*service.db)
                .await
                .unwrap();
        assert_eq!(size, 2);
    }

    #[tokio::test]
    async fn status_tracks_uploaded_and_missing() {
        let (service, _dir) = transfer_service().await;
        let (file_id, total) = service.start_upload("f.bin", 10, 3).await.unwrap();
        assert_eq!(total, 4);

        service
            .record_chunk(file_id, 2, one_shot(b"ggg".to_vec()))
            .await
            .unwrap();
        service
            .record_chunk(file_id, 0, one_shot(b"aaa".to_vec()))
            .await
            .unwrap();

        let status = service.status(file_id).await.unwrap();
        assert_eq!(status.total_chunks, 4);
        assert_eq!(status.uploaded_chunks, vec![0, 2]);
        assert_eq!(status.missing_chunks, vec![1, 3]);
        assert_eq!(status.status, FileStatus::Uploading);

        assert!(matches!(
            service.status(Uuid::new_v4()).await,
            Err(TransferError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn merge_reports_missing_chunks() {
        let (service, _dir) = transfer_service().await;
        let (file_id, _) = service.start_upload("f.bin", 10, 3).await.unwrap();

        for (index, data) in [(0, b"aaa".to_vec()), (1, b"bbb".to_vec()), (2, b"ccc".to_vec())] {
            service.record_chunk(file_id, index, one_shot(data)).await.unwrap();
        }

        match service.merge(file_id).await {
            Err(TransferError::IncompleteUpload(missing)) => assert_eq!(missing, vec![3]),
            other => panic!("expected IncompleteUpload, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn merge_concatenates_in_index_order() {
        let (service, _dir) = transfer_service().await;
        let (file_id, _) = service.start_upload("f.bin", 10, 3).await.unwrap();

        // Upload out of order; the artifact must still be index-ordered.
        service.record_chunk(file_id, 3, one_shot(b"j".to_vec())).await.unwrap();
        service
            .record_chunk(file_id, 1, pieces(vec![b"d".to_vec(), b"ef".to_vec()]))
            .await
            .unwrap();
        service.record_chunk(file_id, 0, one_shot(b"abc".to_vec())).await.unwrap();
        service.record_chunk(file_id, 2, one_shot(b"ghi".to_vec())).await.unwrap();

        let hash = service.merge(file_id).await.unwrap();
        assert_eq!(hash, sha256_hex(b"abcdefghij"));

        let file = service.try_fetch_file(file_id).await.unwrap().unwrap();
        assert_eq!(file.status, FileStatus::Completed);
        let artifact = std::fs::read(service.artifact_path(&file)).unwrap();
        assert_eq!(artifact, b"abcdefghij");

        // Chunk storage and rows are reclaimed at merge time.
        assert!(!service.chunk_dir(file_id).exists());
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM chunks WHERE file_id = ?")
            .bind(file_id)
            .fetch_one(&*service.db)
            .await
            .unwrap();
        assert_eq!(rows, 0);

        // Second merge is the fast path: chunks are gone, hash is stable.
        let again = service.merge(file_id).await.unwrap();
        assert_eq!(again, hash);

        // Late chunk retries after completion are accepted as no-ops.
        service.record_chunk(file_id, 0, one_shot(b"xxx".to_vec())).await.unwrap();
        assert!(!service.chunk_dir(file_id).exists());
    }

    #[tokio::test]
    async fn download_requires_completion() {
        let (service, _dir) = transfer_service().await;
        let (file_id, _) = service.start_upload("f.bin", 4, 4).await.unwrap();

        assert!(matches!(
            service.artifact_reader(file_id).await,
            Err(TransferError::NotCompleted)
        ));

        service.record_chunk(file_id, 0, one_shot(b"data".to_vec())).await.unwrap();
        service.merge(file_id).await.unwrap();
        let (file, _handle) = service.artifact_reader(file_id).await.unwrap();

        // A completed record whose artifact vanished is a surfaced fault.
        std::fs::remove_file(service.artifact_path(&file)).unwrap();
        assert!(matches!(
            service.artifact_reader(file_id).await,
            Err(TransferError::ArtifactMissing)
        ));
    }

    #[tokio::test]
    async fn list_files_newest_first() {
        let (service, _dir) = transfer_service().await;
        let (first, _) = service.start_upload("first.bin", 4, 4).await.unwrap();
        let (second, _) = service.start_upload("second.bin", 4, 4).await.unwrap();

        // Separate the creation instants explicitly.
        sqlx::query("UPDATE files SET created_at = ? WHERE file_id = ?")
            .bind(Utc::now() - chrono::Duration::minutes(5))
            .bind(first)
            .execute(&*service.db)
            .await
            .unwrap();

        let files = service.list_files().await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].file_id, second);
        assert_eq!(files[1].file_id, first);
    }

    #[tokio::test]
    async fn delete_removes_everything() {
        let (service, _dir) = transfer_service().await;
        let (file_id, _) = service.start_upload("f.bin", 4, 4).await.unwrap();
        service.record_chunk(file_id, 0, one_shot(b"data".to_vec())).await.unwrap();
        service.merge(file_id).await.unwrap();
        let file = service.try_fetch_file(file_id).await.unwrap().unwrap();

        service.delete_file(file_id).await.unwrap();

        assert!(!service.chunk_dir(file_id).exists());
        assert!(!service.artifact_path(&file).exists());
        assert!(service.try_fetch_file(file_id).await.unwrap().is_none());
        assert!(matches!(
            service.delete_file(file_id).await,
            Err(TransferError::FileNotFound(_))
        ));
    }
}
