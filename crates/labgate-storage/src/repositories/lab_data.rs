#![allow(async_fn_in_trait)]

use crate::error::StorageResult;
use crate::models::LabData;
use sqlx::SqlitePool;

/// Repository trait for LabData entity operations
pub trait LabDataRepository: Send + Sync {
    /// Create a new lab data row
    async fn create(&self, lab: &LabData) -> StorageResult<i64>;

    /// Results decoded from one raw frame, in panel order
    async fn find_by_raw_data(&self, raw_data_id: i64) -> StorageResult<Vec<LabData>>;

    /// Results for one specimen on one device, in panel order
    async fn find_by_barcode(&self, device_id: i64, barcode: &str) -> StorageResult<Vec<LabData>>;

    /// Most recent results for a device
    async fn find_by_device(&self, device_id: i64, limit: i64) -> StorageResult<Vec<LabData>>;
}

/// SQLite implementation of LabDataRepository
pub struct SqliteLabDataRepository {
    pool: SqlitePool,
}

impl SqliteLabDataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const LAB_DATA_COLUMNS: &str =
    "id, raw_data_id, device_id, barcode, idx, param, result, unit, completed_at, created_at";

impl LabDataRepository for SqliteLabDataRepository {
    async fn create(&self, lab: &LabData) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO lab_data (
                raw_data_id, device_id, barcode, idx,
                param, result, unit, completed_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(lab.raw_data_id)
        .bind(lab.device_id)
        .bind(&lab.barcode)
        .bind(lab.index)
        .bind(&lab.param)
        .bind(&lab.result)
        .bind(&lab.unit)
        .bind(lab.completed_at)
        .bind(lab.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn find_by_raw_data(&self, raw_data_id: i64) -> StorageResult<Vec<LabData>> {
        let rows = sqlx::query_as::<_, LabData>(&format!(
            "SELECT {LAB_DATA_COLUMNS} FROM lab_data WHERE raw_data_id = ? ORDER BY idx"
        ))
        .bind(raw_data_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn find_by_barcode(&self, device_id: i64, barcode: &str) -> StorageResult<Vec<LabData>> {
        let rows = sqlx::query_as::<_, LabData>(&format!(
            "SELECT {LAB_DATA_COLUMNS} FROM lab_data WHERE device_id = ? AND barcode = ? ORDER BY idx"
        ))
        .bind(device_id)
        .bind(barcode)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn find_by_device(&self, device_id: i64, limit: i64) -> StorageResult<Vec<LabData>> {
        let rows = sqlx::query_as::<_, LabData>(&format!(
            "SELECT {LAB_DATA_COLUMNS} FROM lab_data WHERE device_id = ? ORDER BY id DESC LIMIT ?"
        ))
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
