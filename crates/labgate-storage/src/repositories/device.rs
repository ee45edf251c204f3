#![allow(async_fn_in_trait)]

use crate::error::StorageResult;
use crate::models::Device;
use sqlx::SqlitePool;

/// Repository trait for Device entity operations
pub trait DeviceRepository: Send + Sync {
    /// Create a new device
    async fn create(&self, device: &Device) -> StorageResult<i64>;

    /// Find a device by ID
    async fn find_by_id(&self, id: i64) -> StorageResult<Option<Device>>;

    /// Find the device provisioned at a network address, the routing
    /// lookup for inbound traffic
    async fn find_by_net_address(&self, net_address: &str) -> StorageResult<Option<Device>>;

    /// List all devices
    async fn find_all(&self) -> StorageResult<Vec<Device>>;
}

/// SQLite implementation of DeviceRepository
pub struct SqliteDeviceRepository {
    pool: SqlitePool,
}

impl SqliteDeviceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl DeviceRepository for SqliteDeviceRepository {
    async fn create(&self, device: &Device) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO devices (name, device_model_id, serial, net_address, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&device.name)
        .bind(device.device_model_id)
        .bind(&device.serial)
        .bind(&device.net_address)
        .bind(device.created_at)
        .bind(device.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn find_by_id(&self, id: i64) -> StorageResult<Option<Device>> {
        let device = sqlx::query_as::<_, Device>(
            r#"
            SELECT id, name, device_model_id, serial, net_address, created_at, updated_at
            FROM devices
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(device)
    }

    async fn find_by_net_address(&self, net_address: &str) -> StorageResult<Option<Device>> {
        let device = sqlx::query_as::<_, Device>(
            r#"
            SELECT id, name, device_model_id, serial, net_address, created_at, updated_at
            FROM devices
            WHERE net_address = ?
            "#,
        )
        .bind(net_address)
        .fetch_optional(&self.pool)
        .await?;

        Ok(device)
    }

    async fn find_all(&self) -> StorageResult<Vec<Device>> {
        let devices = sqlx::query_as::<_, Device>(
            r#"
            SELECT id, name, device_model_id, serial, net_address, created_at, updated_at
            FROM devices
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(devices)
    }
}
