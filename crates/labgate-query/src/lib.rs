//! HTTP callback used by the ASTM query/answer flow.
//!
//! When an analyzer asks which tests to run for a sample (an ASTM `Q`
//! frame), the gateway forwards the question to the LIS over HTTP: the
//! request carries the barcode and the instrument serial, and the response
//! lists the ordered indicators the instrument should process. Only the
//! indicator names feed back into the ASTM answer messages.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors returned by the query callback.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Transport-level failure (connect, timeout, body read)
    #[error("query request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The LIS answered with a non-success status
    #[error("query endpoint returned HTTP {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    barcode: &'a str,
    hardware_sn: &'a str,
}

/// One ordered indicator in the LIS response.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryIndicator {
    pub indicator: String,
    #[serde(default)]
    pub material: i64,
    #[serde(default)]
    pub dilution: String,
    #[serde(default)]
    pub barcode: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    indicators: Vec<QueryIndicator>,
}

/// Client for the LIS device-query endpoint, bound to one instrument.
///
/// Cheap to construct per message: the underlying `reqwest::Client` pools
/// connections internally.
#[derive(Debug, Clone)]
pub struct DeviceQueryService {
    client: reqwest::Client,
    query_host: String,
    device_serial: String,
}

impl DeviceQueryService {
    pub fn new(query_host: impl Into<String>, device_serial: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            query_host: query_host.into(),
            device_serial: device_serial.into(),
        }
    }

    /// Ask the LIS which indicators to answer for a barcode.
    ///
    /// Returns the indicators in response order; the ASTM driver emits one
    /// answer order per entry.
    pub async fn query(&self, barcode: &str) -> Result<Vec<QueryIndicator>, QueryError> {
        let request = QueryRequest {
            barcode,
            hardware_sn: &self.device_serial,
        };

        let response = self
            .client
            .post(&self.query_host)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(QueryError::Status(response.status()));
        }

        let body: QueryResponse = response.json().await?;
        debug!(
            barcode,
            indicators = body.indicators.len(),
            "device query answered"
        );

        Ok(body.indicators)
    }
}
