//! src/services/share_service.rs
//!
//! ShareService — issues and validates password-protected share links for
//! completed files. Links are bounded by an optional expiry instant and an
//! optional redemption cap; only the password's hash is ever persisted.

use crate::models::{
    file::{FileRecord, FileStatus},
    share::ShareLink,
};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Duration, Utc};
use rand::{RngCore, rngs::OsRng};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::io::{self, ErrorKind};
use thiserror::Error;
use tokio::fs::File;
use tracing::debug;
use uuid::Uuid;

use super::transfer_service::TransferService;

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("invalid share link")]
    LinkNotFound,
    #[error("share link expired")]
    Expired,
    #[error("max downloads reached")]
    QuotaExceeded,
    #[error("wrong password")]
    WrongPassword,
    #[error("file `{0}` not found")]
    FileNotFound(Uuid),
    #[error("file not completed yet")]
    NotReady,
    #[error("merged file missing from storage")]
    ArtifactMissing,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ShareResult<T> = Result<T, ShareError>;

const TOKEN_ENTROPY_BYTES: usize = 32;
const PASSWORD_ENTROPY_BYTES: usize = 8;

/// Everything the issuer gets back for a freshly created link.
///
/// `password` is the plaintext one-time password; this struct is the only
/// place it ever exists, so the caller must hand it to the recipient now.
#[derive(Debug, Serialize)]
pub struct IssuedShare {
    pub file_id: Uuid,
    pub share_token: String,
    pub password: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_downloads: Option<i64>,
}

/// ShareService gates download access to merged artifacts:
/// - Issue a link against a completed file (token + one-time password)
/// - Redeem a link, enforcing existence, expiry, quota, and password in
///   that order, counting the redemption atomically with the quota check
#[derive(Clone)]
pub struct ShareService {
    transfer: TransferService,
}

impl ShareService {
    pub fn new(transfer: TransferService) -> Self {
        Self { transfer }
    }

    fn db(&self) -> &SqlitePool {
        &self.transfer.db
    }

    /// Issue a share link for a completed file.
    ///
    /// `expire_minutes = None` never expires; `max_downloads = None` is
    /// unlimited. Fails with `NotReady` while the file is still uploading.
    pub async fn create_share(
        &self,
        file_id: Uuid,
        expire_minutes: Option<i64>,
        max_downloads: Option<i64>,
    ) -> ShareResult<IssuedShare> {
        let file = self
            .transfer
            .try_fetch_file(file_id)
            .await?
            .ok_or(ShareError::FileNotFound(file_id))?;
        if file.status != FileStatus::Completed {
            return Err(ShareError::NotReady);
        }

        let share_token = random_token(TOKEN_ENTROPY_BYTES);
        let password = random_token(PASSWORD_ENTROPY_BYTES);
        let expires_at = expire_minutes.map(|minutes| Utc::now() + Duration::minutes(minutes));

        sqlx::query(
            "INSERT INTO share_links (share_token, file_id, password_hash, expires_at,
                                      download_count, max_downloads, created_at)
             VALUES (?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(&share_token)
        .bind(file_id)
        .bind(sha256_hex(&password))
        .bind(expires_at)
        .bind(max_downloads)
        .bind(Utc::now())
        .execute(self.db())
        .await?;

        debug!("issued share link for {}", file_id);
        Ok(IssuedShare {
            file_id,
            share_token,
            password,
            expires_at,
            max_downloads,
        })
    }

    /// Redeem a share link and open its artifact for streaming.
    ///
    /// Checks run strictly as existence, expiry, quota, then password, so a
    /// guesser cannot use password probes to learn whether a link merely
    /// expired. The redemption count increments atomically with a quota
    /// re-check; under concurrent redeemers of the final slot, exactly one
    /// wins.
    pub async fn redeem(&self, token: &str, password: &str) -> ShareResult<(FileRecord, File)> {
        let link = sqlx::query_as::<_, ShareLink>(
            "SELECT share_token, file_id, password_hash, expires_at,
                    download_count, max_downloads, created_at
             FROM share_links WHERE share_token = ?",
        )
        .bind(token)
        .fetch_optional(self.db())
        .await?
        .ok_or(ShareError::LinkNotFound)?;

        if let Some(expires_at) = link.expires_at {
            if Utc::now() > expires_at {
                return Err(ShareError::Expired);
            }
        }
        if let Some(max) = link.max_downloads {
            if link.download_count >= max {
                return Err(ShareError::QuotaExceeded);
            }
        }
        if sha256_hex(password) != link.password_hash {
            return Err(ShareError::WrongPassword);
        }

        let file = self
            .transfer
            .try_fetch_file(link.file_id)
            .await?
            .ok_or(ShareError::FileNotFound(link.file_id))?;
        let artifact_path = self.transfer.artifact_path(&file);
        let handle = File::open(&artifact_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ShareError::ArtifactMissing
            } else {
                ShareError::Io(err)
            }
        })?;

        let counted = sqlx::query(
            "UPDATE share_links SET download_count = download_count + 1
             WHERE share_token = ?
               AND (max_downloads IS NULL OR download_count < max_downloads)",
        )
        .bind(token)
        .execute(self.db())
        .await?;
        if counted.rows_affected() == 0 {
            // A concurrent redeemer took the final slot between the read
            // above and this increment.
            return Err(ShareError::QuotaExceeded);
        }

        Ok((file, handle))
    }
}

/// URL-safe random string carrying `n` bytes of entropy.
fn random_token(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    OsRng.fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn sha256_hex(value: &str) -> String {
    format!("{:x}", Sha256::digest(value.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_util::transfer_service;
    use bytes::Bytes;
    use futures::stream;

    async fn completed_file(transfer: &TransferService) -> Uuid {
        let (file_id, _) = transfer.start_upload("shared.bin", 4, 4).await.unwrap();
        transfer
            .record_chunk(
                file_id,
                0,
                stream::iter(vec![io::Result::Ok(Bytes::from_static(b"data"))]),
            )
            .await
            .unwrap();
        transfer.merge(file_id).await.unwrap();
        file_id
    }

    #[tokio::test]
    async fn create_requires_completed_file() {
        let (transfer, _dir) = transfer_service().await;
        let shares = ShareService::new(transfer.clone());

        assert!(matches!(
            shares.create_share(Uuid::new_v4(), Some(60), Some(5)).await,
            Err(ShareError::FileNotFound(_))
        ));

        let (uploading, _) = transfer.start_upload("wip.bin", 4, 4).await.unwrap();
        assert!(matches!(
            shares.create_share(uploading, Some(60), Some(5)).await,
            Err(ShareError::NotReady)
        ));
    }

    #[tokio::test]
    async fn plaintext_password_is_not_persisted() {
        let (transfer, _dir) = transfer_service().await;
        let shares = ShareService::new(transfer.clone());
        let file_id = completed_file(&transfer).await;

        let issued = shares.create_share(file_id, Some(60), Some(5)).await.unwrap();

        let stored: String =
            sqlx::query_scalar("SELECT password_hash FROM share_links WHERE share_token = ?")
                .bind(&issued.share_token)
                .fetch_one(&*transfer.db)
                .await
                .unwrap();
        assert_ne!(stored, issued.password);
        assert_eq!(stored, sha256_hex(&issued.password));
    }

    #[tokio::test]
    async fn redeem_checks_in_order() {
        let (transfer, _dir) = transfer_service().await;
        let shares = ShareService::new(transfer.clone());
        let file_id = completed_file(&transfer).await;

        assert!(matches!(
            shares.redeem("no-such-token", "pw").await,
            Err(ShareError::LinkNotFound)
        ));

        // Expired wins over a wrong password: probing must not reveal more.
        let expired = shares.create_share(file_id, Some(0), Some(1)).await.unwrap();
        assert!(matches!(
            shares.redeem(&expired.share_token, "wrong").await,
            Err(ShareError::Expired)
        ));
        // And over a correct one.
        assert!(matches!(
            shares.redeem(&expired.share_token, &expired.password).await,
            Err(ShareError::Expired)
        ));

        // Quota exhaustion wins over a wrong password on a live link.
        let capped = shares.create_share(file_id, Some(60), Some(1)).await.unwrap();
        shares.redeem(&capped.share_token, &capped.password).await.unwrap();
        assert!(matches!(
            shares.redeem(&capped.share_token, "wrong").await,
            Err(ShareError::QuotaExceeded)
        ));
        assert!(matches!(
            shares.redeem(&capped.share_token, &capped.password).await,
            Err(ShareError::QuotaExceeded)
        ));

        let live = shares.create_share(file_id, Some(60), Some(5)).await.unwrap();
        assert!(matches!(
            shares.redeem(&live.share_token, "wrong").await,
            Err(ShareError::WrongPassword)
        ));
    }

    #[tokio::test]
    async fn redeem_counts_downloads() {
        let (transfer, _dir) = transfer_service().await;
        let shares = ShareService::new(transfer.clone());
        let file_id = completed_file(&transfer).await;

        let issued = shares.create_share(file_id, None, None).await.unwrap();
        assert!(issued.expires_at.is_none());

        for _ in 0..3 {
            shares.redeem(&issued.share_token, &issued.password).await.unwrap();
        }

        let count: i64 =
            sqlx::query_scalar("SELECT download_count FROM share_links WHERE share_token = ?")
                .bind(&issued.share_token)
                .fetch_one(&*transfer.db)
                .await
                .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn concurrent_redeemers_cannot_exceed_quota() {
        let (transfer, _dir) = transfer_service().await;
        let shares = ShareService::new(transfer.clone());
        let file_id = completed_file(&transfer).await;

        let issued = shares.create_share(file_id, Some(60), Some(1)).await.unwrap();

        let (a, b) = tokio::join!(
            shares.redeem(&issued.share_token, &issued.password),
            shares.redeem(&issued.share_token, &issued.password),
        );
        let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        for result in [a, b] {
            if let Err(err) = result {
                assert!(matches!(err, ShareError::QuotaExceeded));
            }
        }

        let count: i64 =
            sqlx::query_scalar("SELECT download_count FROM share_links WHERE share_token = ?")
                .bind(&issued.share_token)
                .fetch_one(&*transfer.db)
                .await
                .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn missing_artifact_is_surfaced() {
        let (transfer, _dir) = transfer_service().await;
        let shares = ShareService::new(transfer.clone());
        let file_id = completed_file(&transfer).await;
        let file = transfer.try_fetch_file(file_id).await.unwrap().unwrap();

        let issued = shares.create_share(file_id, Some(60), Some(5)).await.unwrap();
        std::fs::remove_file(transfer.artifact_path(&file)).unwrap();

        assert!(matches!(
            shares.redeem(&issued.share_token, &issued.password).await,
            Err(ShareError::ArtifactMissing)
        ));
    }

    #[tokio::test]
    async fn deleting_the_file_invalidates_its_links() {
        let (transfer, _dir) = transfer_service().await;
        let shares = ShareService::new(transfer.clone());
        let file_id = completed_file(&transfer).await;

        let issued = shares.create_share(file_id, Some(60), Some(5)).await.unwrap();
        transfer.delete_file(file_id).await.unwrap();

        assert!(matches!(
            shares.redeem(&issued.share_token, &issued.password).await,
            Err(ShareError::LinkNotFound)
        ));
    }
}
