#![allow(async_fn_in_trait)]

use crate::error::StorageResult;
use crate::models::DeviceModel;
use sqlx::SqlitePool;

/// Repository trait for DeviceModel entity operations
pub trait DeviceModelRepository: Send + Sync {
    /// Create a new device model
    async fn create(&self, model: &DeviceModel) -> StorageResult<i64>;

    /// Find a device model by ID
    async fn find_by_id(&self, id: i64) -> StorageResult<Option<DeviceModel>>;

    /// Find a device model by its unique name
    async fn find_by_name(&self, name: &str) -> StorageResult<Option<DeviceModel>>;

    /// List all device models
    async fn find_all(&self) -> StorageResult<Vec<DeviceModel>>;
}

/// SQLite implementation of DeviceModelRepository
pub struct SqliteDeviceModelRepository {
    pool: SqlitePool,
}

impl SqliteDeviceModelRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl DeviceModelRepository for SqliteDeviceModelRepository {
    async fn create(&self, model: &DeviceModel) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO device_models (name, driver, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&model.name)
        .bind(&model.driver)
        .bind(model.created_at)
        .bind(model.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn find_by_id(&self, id: i64) -> StorageResult<Option<DeviceModel>> {
        let model = sqlx::query_as::<_, DeviceModel>(
            "SELECT id, name, driver, created_at, updated_at FROM device_models WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(model)
    }

    async fn find_by_name(&self, name: &str) -> StorageResult<Option<DeviceModel>> {
        let model = sqlx::query_as::<_, DeviceModel>(
            "SELECT id, name, driver, created_at, updated_at FROM device_models WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(model)
    }

    async fn find_all(&self) -> StorageResult<Vec<DeviceModel>> {
        let models = sqlx::query_as::<_, DeviceModel>(
            "SELECT id, name, driver, created_at, updated_at FROM device_models ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Database;

    #[tokio::test]
    async fn test_create_and_find_device_model() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteDeviceModelRepository::new(db.pool().clone());

        let id = repo
            .create(&DeviceModel::new("BS-240", "astm"))
            .await
            .unwrap();
        assert!(id > 0);

        let by_id = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(by_id.name, "BS-240");
        assert_eq!(by_id.driver, "astm");

        let by_name = repo.find_by_name("BS-240").await.unwrap().unwrap();
        assert_eq!(by_name.id, id);
    }

    #[tokio::test]
    async fn test_find_missing_model_returns_none() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteDeviceModelRepository::new(db.pool().clone());

        assert!(repo.find_by_id(999).await.unwrap().is_none());
        assert!(repo.find_by_name("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_model_name_rejected() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteDeviceModelRepository::new(db.pool().clone());

        repo.create(&DeviceModel::new("Combilyzer", "text_combilyzer_13_human"))
            .await
            .unwrap();
        let err = repo
            .create(&DeviceModel::new("Combilyzer", "astm"))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::StorageError::Database(_)));
    }
}
