//! src/services/janitor.rs
//!
//! Janitor — background reclamation of uploads that were started but never
//! merged. Runs on a timer; the first sweep fires immediately at startup.

use crate::models::file::{FileRecord, FileStatus};
use chrono::Utc;
use std::{io::ErrorKind, time::Duration};
use tokio::fs;
use tracing::{info, warn};

use super::transfer_service::TransferService;

/// Periodically scans for abandoned upload sessions and reclaims their
/// chunk storage and metadata. A session is abandoned when it is not
/// completed and its creation instant is older than the age threshold.
/// Completed files are never touched; they have no chunk storage left and
/// are removed only by an explicit delete.
pub struct Janitor {
    transfer: TransferService,
    interval: Duration,
    max_age: chrono::Duration,
}

impl Janitor {
    pub fn new(transfer: TransferService, interval: Duration, max_age_hours: u64) -> Self {
        Self {
            transfer,
            interval,
            max_age: chrono::Duration::hours(max_age_hours as i64),
        }
    }

    /// Sweep forever on the configured interval. The first tick fires
    /// immediately, so abandoned sessions from a previous run are reclaimed
    /// at startup.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            match self.sweep().await {
                Ok(0) => {}
                Ok(reclaimed) => info!("janitor reclaimed {} abandoned uploads", reclaimed),
                Err(err) => warn!("janitor sweep failed: {}", err),
            }
        }
    }

    /// One reclamation pass. Per-item failures are tolerated so one bad
    /// entry does not abort the batch; returns how many sessions were
    /// reclaimed.
    pub async fn sweep(&self) -> Result<u64, sqlx::Error> {
        let cutoff = Utc::now() - self.max_age;
        let abandoned = sqlx::query_as::<_, FileRecord>(
            "SELECT file_id, filename, file_size, chunk_size, total_chunks, status,
                    file_hash, created_at, updated_at
             FROM files WHERE status != ? AND created_at < ?",
        )
        .bind(FileStatus::Completed)
        .bind(cutoff)
        .fetch_all(&*self.transfer.db)
        .await?;

        let mut reclaimed = 0u64;
        for file in &abandoned {
            match self.reclaim(file).await {
                Ok(()) => reclaimed += 1,
                Err(err) => warn!("janitor skipping {}: {}", file.file_id, err),
            }
        }
        Ok(reclaimed)
    }

    async fn reclaim(&self, file: &FileRecord) -> Result<(), sqlx::Error> {
        let chunk_dir = self.transfer.chunk_dir(file.file_id);
        if let Err(err) = fs::remove_dir_all(&chunk_dir).await {
            if err.kind() != ErrorKind::NotFound {
                warn!("janitor could not remove {}: {}", chunk_dir.display(), err);
            }
        }

        sqlx::query("DELETE FROM chunks WHERE file_id = ?")
            .bind(file.file_id)
            .execute(&*self.transfer.db)
            .await?;
        sqlx::query("DELETE FROM files WHERE file_id = ?")
            .bind(file.file_id)
            .execute(&*self.transfer.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_util::transfer_service;
    use bytes::Bytes;
    use futures::stream;
    use std::io;
    use uuid::Uuid;

    async fn backdate(transfer: &TransferService, file_id: Uuid, hours: i64) {
        sqlx::query("UPDATE files SET created_at = ? WHERE file_id = ?")
            .bind(Utc::now() - chrono::Duration::hours(hours))
            .bind(file_id)
            .execute(&*transfer.db)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sweep_reclaims_only_old_incomplete_sessions() {
        let (transfer, _dir) = transfer_service().await;
        let janitor = Janitor::new(transfer.clone(), Duration::from_secs(3600), 6);

        // Old, incomplete: reclaimed.
        let (stale, _) = transfer.start_upload("stale.bin", 8, 4).await.unwrap();
        transfer
            .record_chunk(
                stale,
                0,
                stream::iter(vec![io::Result::Ok(Bytes::from_static(b"aaaa"))]),
            )
            .await
            .unwrap();
        backdate(&transfer, stale, 48).await;

        // Old but completed: kept.
        let (done, _) = transfer.start_upload("done.bin", 4, 4).await.unwrap();
        transfer
            .record_chunk(
                done,
                0,
                stream::iter(vec![io::Result::Ok(Bytes::from_static(b"data"))]),
            )
            .await
            .unwrap();
        transfer.merge(done).await.unwrap();
        backdate(&transfer, done, 48).await;

        // Fresh and incomplete: kept.
        let (fresh, _) = transfer.start_upload("fresh.bin", 8, 4).await.unwrap();

        let reclaimed = janitor.sweep().await.unwrap();
        assert_eq!(reclaimed, 1);

        assert!(transfer.try_fetch_file(stale).await.unwrap().is_none());
        assert!(!transfer.chunk_dir(stale).exists());
        let orphans: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM chunks WHERE file_id = ?")
            .bind(stale)
            .fetch_one(&*transfer.db)
            .await
            .unwrap();
        assert_eq!(orphans, 0);

        assert!(transfer.try_fetch_file(done).await.unwrap().is_some());
        assert!(transfer.try_fetch_file(fresh).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_is_a_noop_when_nothing_is_stale() {
        let (transfer, _dir) = transfer_service().await;
        let janitor = Janitor::new(transfer.clone(), Duration::from_secs(3600), 6);

        transfer.start_upload("young.bin", 8, 4).await.unwrap();
        assert_eq!(janitor.sweep().await.unwrap(), 0);
    }
}
