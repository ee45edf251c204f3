use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One decoded analyte result, as produced by a protocol driver.
///
/// This is the wire-level value type shared between the decoders and the
/// persistence layer; the stored `LabData` row adds the device and raw-data
/// back-references on top of it.
///
/// `index` is the 1-based position of the result within its panel. For a
/// given device and barcode the indices follow source-message order:
/// decoders skip incomplete result rows without consuming an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabResult {
    /// Specimen identifier correlating the result to a sample.
    pub barcode: String,

    /// 1-based position of this result within the panel.
    pub index: u32,

    /// Parameter (analyte) name, e.g. `GLU`.
    pub param: String,

    /// Result value as transmitted, uninterpreted.
    pub result: String,

    /// Unit of measurement as transmitted.
    pub unit: String,

    /// When the instrument completed the measurement.
    pub completed_at: DateTime<Utc>,
}
