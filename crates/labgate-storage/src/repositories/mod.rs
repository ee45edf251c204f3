//! Repository traits and their SQLite implementations.

pub mod device;
pub mod device_model;
pub mod lab_data;
pub mod raw_data;

pub use device::{DeviceRepository, SqliteDeviceRepository};
pub use device_model::{DeviceModelRepository, SqliteDeviceModelRepository};
pub use lab_data::{LabDataRepository, SqliteLabDataRepository};
pub use raw_data::{RawDataRepository, SqliteRawDataRepository};
