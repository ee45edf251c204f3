#![allow(async_fn_in_trait)]

use crate::error::StorageResult;
use crate::models::RawData;
use sqlx::SqlitePool;

/// Repository trait for RawData entity operations
///
/// A raw-data row is created for every extracted frame, decodable or not.
/// `mark_unprocessed` is the single mutation the gateway performs: a frame
/// whose results could not all be persisted is flagged for operator review
/// and replay.
pub trait RawDataRepository: Send + Sync {
    /// Create a new raw data row
    async fn create(&self, raw: &RawData) -> StorageResult<i64>;

    /// Clear the processed flag on a stored frame
    async fn mark_unprocessed(&self, id: i64) -> StorageResult<()>;

    /// Find a raw data row by ID
    async fn find_by_id(&self, id: i64) -> StorageResult<Option<RawData>>;

    /// Most recent frames for a device
    async fn find_by_device(&self, device_id: i64, limit: i64) -> StorageResult<Vec<RawData>>;

    /// Frames that failed processing, oldest first, for replay
    async fn find_unprocessed(&self, limit: i64) -> StorageResult<Vec<RawData>>;
}

/// SQLite implementation of RawDataRepository
pub struct SqliteRawDataRepository {
    pool: SqlitePool,
}

impl SqliteRawDataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl RawDataRepository for SqliteRawDataRepository {
    async fn create(&self, raw: &RawData) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO raw_data (conn_addr, device_id, payload, processed, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&raw.conn_addr)
        .bind(raw.device_id)
        .bind(&raw.payload)
        .bind(raw.processed)
        .bind(raw.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn mark_unprocessed(&self, id: i64) -> StorageResult<()> {
        sqlx::query("UPDATE raw_data SET processed = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: i64) -> StorageResult<Option<RawData>> {
        let raw = sqlx::query_as::<_, RawData>(
            r#"
            SELECT id, conn_addr, device_id, payload, processed, created_at
            FROM raw_data
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(raw)
    }

    async fn find_by_device(&self, device_id: i64, limit: i64) -> StorageResult<Vec<RawData>> {
        let rows = sqlx::query_as::<_, RawData>(
            r#"
            SELECT id, conn_addr, device_id, payload, processed, created_at
            FROM raw_data
            WHERE device_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn find_unprocessed(&self, limit: i64) -> StorageResult<Vec<RawData>> {
        let rows = sqlx::query_as::<_, RawData>(
            r#"
            SELECT id, conn_addr, device_id, payload, processed, created_at
            FROM raw_data
            WHERE processed = 0
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Database;
    use crate::models::{Device, DeviceModel};
    use crate::repositories::device::{DeviceRepository, SqliteDeviceRepository};
    use crate::repositories::device_model::{DeviceModelRepository, SqliteDeviceModelRepository};

    async fn setup() -> (Database, i64) {
        let db = Database::in_memory().await.unwrap();
        let model_id = SqliteDeviceModelRepository::new(db.pool().clone())
            .create(&DeviceModel::new("BS-240", "astm"))
            .await
            .unwrap();
        let device_id = SqliteDeviceRepository::new(db.pool().clone())
            .create(&Device::new("chem-1", model_id, "SN-001", "10.0.0.21"))
            .await
            .unwrap();
        (db, device_id)
    }

    #[tokio::test]
    async fn test_create_and_read_back() {
        let (db, device_id) = setup().await;
        let repo = SqliteRawDataRepository::new(db.pool().clone());

        let id = repo
            .create(&RawData::new("10.0.0.21", device_id, "H|frame", true))
            .await
            .unwrap();

        let raw = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(raw.conn_addr, "10.0.0.21");
        assert_eq!(raw.payload, "H|frame");
        assert!(raw.processed);
    }

    #[tokio::test]
    async fn test_mark_unprocessed_persists() {
        let (db, device_id) = setup().await;
        let repo = SqliteRawDataRepository::new(db.pool().clone());

        let id = repo
            .create(&RawData::new("10.0.0.21", device_id, "H|frame", true))
            .await
            .unwrap();
        repo.mark_unprocessed(id).await.unwrap();

        let raw = repo.find_by_id(id).await.unwrap().unwrap();
        assert!(!raw.processed);

        let unprocessed = repo.find_unprocessed(10).await.unwrap();
        assert_eq!(unprocessed.len(), 1);
        assert_eq!(unprocessed[0].id, id);
    }

    #[tokio::test]
    async fn test_find_by_device_newest_first() {
        let (db, device_id) = setup().await;
        let repo = SqliteRawDataRepository::new(db.pool().clone());

        for payload in ["first", "second", "third"] {
            repo.create(&RawData::new("10.0.0.21", device_id, payload, true))
                .await
                .unwrap();
        }

        let rows = repo.find_by_device(device_id, 2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].payload, "third");
        assert_eq!(rows[1].payload, "second");
    }
}
