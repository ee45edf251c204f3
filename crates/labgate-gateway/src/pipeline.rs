//! The device message pipeline: the single consumer of all inbound
//! instrument traffic.
//!
//! For every payload the pipeline resolves the owning device by the
//! connection's address, builds the configured protocol driver, applies
//! the driver's character substitutions, extracts complete frames with the
//! per-connection scanner, and for each frame: decodes it, persists the
//! raw frame (always) and the decoded results, and runs the driver's
//! post-decode actions.
//!
//! One task owns the whole pipeline, so persistence needs no locking, at
//! the cost of head-of-line blocking during handshakes; the ASTM ACK
//! waits are hard-bounded for that reason.
//!
//! # Error policy
//!
//! - decode failure: the frame is stored with `processed = false`, the
//!   connection stays open;
//! - device/driver resolution or raw-frame write failure: the payload is
//!   dropped with a log entry, the connection stays open;
//! - a result write failure marks the frame unprocessed but sibling
//!   results are still written;
//! - a handshake failure after persistence is logged only; stored
//!   results stay valid.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use labgate_network::{ConnectionHandle, ConnectionRegistry, Inbound};
use labgate_protocol::driver::{Decoded, Driver, ProtocolDriver, Sidecar};
use labgate_protocol::{FrameScanner, resolve_driver};
use labgate_query::DeviceQueryService;
use labgate_storage::repositories::{
    DeviceModelRepository, DeviceRepository, LabDataRepository, RawDataRepository,
    SqliteDeviceModelRepository, SqliteDeviceRepository, SqliteLabDataRepository,
    SqliteRawDataRepository,
};
use labgate_storage::{Database, Device, LabData, RawData};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Single-consumer message pipeline.
pub struct Pipeline {
    db: Database,
    registry: Arc<ConnectionRegistry>,
    query_host: String,
    /// Per-connection framing state, keyed like the registry.
    scanners: HashMap<String, FrameScanner>,
}

impl Pipeline {
    pub fn new(db: Database, registry: Arc<ConnectionRegistry>, query_host: String) -> Self {
        Self {
            db,
            registry,
            query_host,
            scanners: HashMap::new(),
        }
    }

    /// Drain the fan-in channel until every sender is gone.
    ///
    /// Each payload is processed end to end before the next one is taken;
    /// failures are logged and never fatal to the loop.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Inbound>) {
        info!("device message pipeline started");

        while let Some(event) = rx.recv().await {
            match event {
                Inbound::Data { addr, bytes } => {
                    debug!(addr = %addr, len = bytes.len(), "received payload");
                    if let Err(e) = self.process_payload(&addr, &bytes).await {
                        warn!(addr = %addr, error = %format!("{e:#}"), "failed to process payload");
                    }
                }
                Inbound::Disconnected { addr } => {
                    self.scanners.remove(&addr);
                }
            }
        }

        info!("device message pipeline stopped");
    }

    async fn process_payload(&mut self, addr: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let conn = self
            .registry
            .lookup(addr)
            .with_context(|| format!("no live connection for address {addr}"))?;

        let device = SqliteDeviceRepository::new(self.db.pool().clone())
            .find_by_net_address(addr)
            .await?
            .with_context(|| format!("no device registered for address {addr}"))?;

        let model = SqliteDeviceModelRepository::new(self.db.pool().clone())
            .find_by_id(device.device_model_id)
            .await?
            .with_context(|| format!("device model {} missing", device.device_model_id))?;

        let query = DeviceQueryService::new(&self.query_host, &device.serial);
        let driver = resolve_driver(&model.driver, query)
            .with_context(|| format!("building driver for device {}", device.name))?;

        driver
            .send_acknowledgement(&conn)
            .await
            .with_context(|| format!("sending receipt ACK to {}", device.name))?;

        let mut text = String::from_utf8_lossy(bytes).into_owned();
        for (from, to) in driver.substitutions() {
            text = text.replace(from, to);
        }

        let scanner = self
            .scanners
            .entry(addr.to_string())
            .or_insert_with(|| FrameScanner::new(driver.frame_start(), driver.frame_end()));
        scanner.feed(&text);
        let frames = scanner.drain_frames();

        for frame in frames {
            self.handle_frame(&driver, &conn, &device, addr, &frame)
                .await?;
        }

        Ok(())
    }

    /// Decode, persist and follow up one extracted frame.
    async fn handle_frame(
        &self,
        driver: &ProtocolDriver,
        conn: &ConnectionHandle,
        device: &Device,
        addr: &str,
        frame: &str,
    ) -> anyhow::Result<()> {
        let (results, sidecar, decode_ok) = match driver.decode(frame) {
            Ok(Decoded { results, sidecar }) => (results, sidecar, true),
            Err(e) => {
                warn!(device = %device.name, error = %e, "failed to decode frame");
                (Vec::new(), Sidecar::None, false)
            }
        };

        // The raw frame is stored no matter what: it is the audit record
        // an operator replays after fixing whatever went wrong.
        let raw_repo = SqliteRawDataRepository::new(self.db.pool().clone());
        let raw_id = raw_repo
            .create(&RawData::new(addr, device.id, frame, decode_ok))
            .await
            .with_context(|| format!("storing raw frame from {}", device.name))?;

        let lab_repo = SqliteLabDataRepository::new(self.db.pool().clone());
        let mut processed = decode_ok;
        for result in &results {
            if let Err(e) = lab_repo
                .create(&LabData::from_result(result, raw_id, device.id))
                .await
            {
                warn!(
                    device = %device.name,
                    barcode = %result.barcode,
                    index = result.index,
                    error = %e,
                    "failed to store lab result"
                );
                if processed {
                    processed = false;
                    if let Err(e) = raw_repo.mark_unprocessed(raw_id).await {
                        warn!(raw_id, error = %e, "failed to flag frame unprocessed");
                    }
                }
            }
        }

        if processed {
            debug!(
                device = %device.name,
                results = results.len(),
                "frame processed"
            );
            if let Err(e) = driver.post_decode_actions(conn, &sidecar).await {
                // Stored results stay valid; only the follow-up failed.
                warn!(device = %device.name, error = %e, "post-decode actions failed");
            }
        }

        Ok(())
    }
}
