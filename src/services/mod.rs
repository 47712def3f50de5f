//! Service layer: the chunked-transfer state machine, the share-link
//! registry, and the background janitor.

pub mod janitor;
pub mod share_service;
pub mod transfer_service;

#[cfg(test)]
pub(crate) mod test_util {
    use super::transfer_service::TransferService;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;
    use tempfile::TempDir;

    const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

    /// Fresh service over an in-memory database and a throwaway storage root.
    /// The TempDir must be kept alive for the duration of the test.
    pub(crate) async fn transfer_service() -> (TransferService, TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        for stmt in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(stmt).execute(&pool).await.expect("apply schema");
        }
        let service = TransferService::new(Arc::new(pool), dir.path().join("storage"));
        (service, dir)
    }
}
