//! Persistence layer for the labgate gateway.
//!
//! SQLite-backed storage for the gateway's four record kinds:
//!
//! - [`DeviceModel`]: an instrument family and the protocol driver it
//!   speaks.
//! - [`Device`]: a provisioned instrument, routed by its unique network
//!   address.
//! - [`RawData`]: one row per extracted protocol frame, created even when
//!   decoding fails; the audit/replay record. The `processed` flag is the
//!   only value the gateway ever mutates after insert.
//! - [`LabData`]: one row per decoded result, back-referencing its raw
//!   frame and device.
//!
//! All data access goes through repository traits with native async
//! methods (Edition 2024), each with a SQLx implementation. The gateway
//! core only creates and reads; there are no delete or update paths beyond
//! [`RawDataRepository::mark_unprocessed`].

pub mod connection;
pub mod error;
pub mod models;
pub mod repositories;

pub use connection::{Database, DatabaseConfig};
pub use error::{StorageError, StorageResult};
pub use models::{Device, DeviceModel, LabData, RawData};
pub use repositories::{
    DeviceModelRepository, DeviceRepository, LabDataRepository, RawDataRepository,
    SqliteDeviceModelRepository, SqliteDeviceRepository, SqliteLabDataRepository,
    SqliteRawDataRepository,
};
