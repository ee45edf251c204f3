//! HumaReader HS ELISA reader.
//!
//! Same sentinel framing as the HumaLyzer dump, but records are separated
//! by a `B,` marker and one burst reports a single plate:
//!
//! ```text
//! B,2401,A,1,TSH,0,0,0,05,0.82
//! B,2401,A,2,TSH,0,0,0,06,1.15
//! TRANSFER FINISH
//! ```
//!
//! The specimen id is reconstructed from the plate id and well columns;
//! the reader transmits no units or timestamps.

use chrono::Utc;
use labgate_core::{LabResult, Result};
use labgate_network::ConnectionHandle;

use crate::driver::{Decoded, Driver, Sidecar};
use crate::text::{TRANSFER_FINISH, skip_leading_blanks};

/// Minimum comma-separated columns a record needs to be a result row.
const MIN_RECORD_FIELDS: usize = 9;

/// Driver for the "Text HumaReader HS" dialect.
#[derive(Debug, Default)]
pub struct HumaReaderDriver;

impl HumaReaderDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for HumaReaderDriver {
    fn frame_start(&self) -> &str {
        ""
    }

    fn frame_end(&self) -> &str {
        TRANSFER_FINISH
    }

    fn substitutions(&self) -> &[(&'static str, &'static str)] {
        &[]
    }

    fn decode(&self, frame: &str) -> Result<Decoded> {
        let all_records: Vec<&str> = frame.split("B,").collect();
        let records = skip_leading_blanks(&all_records);

        let completed_at = Utc::now();

        let mut results = Vec::new();
        for record in records {
            let record = record.trim();
            if record.is_empty() {
                continue;
            }

            let parts: Vec<&str> = record.split(',').collect();
            if parts.len() < MIN_RECORD_FIELDS {
                continue;
            }

            results.push(LabResult {
                // Plate id plus well column identify the specimen.
                barcode: format!("{}{}", parts[0], parts[7]),
                index: 1,
                param: parts[3].to_string(),
                result: parts[8].to_string(),
                unit: String::new(),
                completed_at,
            });
        }

        Ok(Decoded::results(results))
    }

    async fn send_acknowledgement(&self, _conn: &ConnectionHandle) -> Result<()> {
        Ok(())
    }

    async fn post_decode_actions(&self, _conn: &ConnectionHandle, _sidecar: &Sidecar) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> HumaReaderDriver {
        HumaReaderDriver::new()
    }

    #[test]
    fn test_decode_plate_records() {
        let frame = "B,2401,A,1,TSH,0,0,0,05,0.82\nB,2401,A,2,TSH,0,0,0,06,1.15\n";

        let decoded = driver().decode(frame).unwrap();
        assert_eq!(decoded.results.len(), 2);

        let first = &decoded.results[0];
        assert_eq!(first.barcode, "240105");
        assert_eq!(first.param, "TSH");
        assert_eq!(first.result, "0.82");
        assert_eq!(first.unit, "");
        assert_eq!(first.index, 1);

        let second = &decoded.results[1];
        assert_eq!(second.barcode, "240106");
        assert_eq!(second.result, "1.15");
        // Every well is a panel of one.
        assert_eq!(second.index, 1);
    }

    #[test]
    fn test_decode_skips_short_records() {
        let frame = "B,fragment\nB,2401,A,1,TSH,0,0,0,05,0.82\n";
        let decoded = driver().decode(frame).unwrap();
        assert_eq!(decoded.results.len(), 1);
        assert_eq!(decoded.results[0].result, "0.82");
    }

    #[test]
    fn test_decode_empty_frame_yields_nothing() {
        let decoded = driver().decode("").unwrap();
        assert!(decoded.results.is_empty());
    }
}
