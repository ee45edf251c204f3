//! Persisted record types.

use chrono::{DateTime, Utc};
use labgate_core::LabResult;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An instrument family and the protocol driver it speaks.
///
/// `driver` is the registry key resolved (after normalization) to a
/// concrete protocol driver.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeviceModel {
    pub id: i64,
    pub name: String,
    pub driver: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceModel {
    pub fn new(name: impl Into<String>, driver: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            driver: driver.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A provisioned instrument.
///
/// `net_address` is the routing key: inbound TCP payloads resolve to their
/// device by the peer address of the connection. `serial` identifies the
/// instrument to the LIS query endpoint.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub name: String,
    pub device_model_id: i64,
    pub serial: String,
    pub net_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    pub fn new(
        name: impl Into<String>,
        device_model_id: i64,
        serial: impl Into<String>,
        net_address: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            device_model_id,
            serial: serial.into(),
            net_address: net_address.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One extracted protocol frame, stored verbatim.
///
/// Always created, even when decoding fails (`processed = false`), so no
/// instrument transmission is ever silently lost.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RawData {
    pub id: i64,
    pub conn_addr: String,
    pub device_id: i64,
    pub payload: String,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl RawData {
    pub fn new(
        conn_addr: impl Into<String>,
        device_id: i64,
        payload: impl Into<String>,
        processed: bool,
    ) -> Self {
        Self {
            id: 0,
            conn_addr: conn_addr.into(),
            device_id,
            payload: payload.into(),
            processed,
            created_at: Utc::now(),
        }
    }
}

/// One decoded analyte result.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LabData {
    pub id: i64,
    pub raw_data_id: i64,
    pub device_id: i64,
    pub barcode: String,
    /// 1-based position of the result within its panel.
    #[sqlx(rename = "idx")]
    pub index: i64,
    pub param: String,
    pub result: String,
    pub unit: String,
    pub completed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl LabData {
    /// Tag a decoded result with its raw-frame and device back-references.
    pub fn from_result(result: &LabResult, raw_data_id: i64, device_id: i64) -> Self {
        Self {
            id: 0,
            raw_data_id,
            device_id,
            barcode: result.barcode.clone(),
            index: i64::from(result.index),
            param: result.param.clone(),
            result: result.result.clone(),
            unit: result.unit.clone(),
            completed_at: result.completed_at,
            created_at: Utc::now(),
        }
    }
}
