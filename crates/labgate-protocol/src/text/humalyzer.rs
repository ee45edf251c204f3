//! HumaLyzer Primus (Human) photometer.
//!
//! The instrument dumps comma-separated result records with no start
//! marker; the burst ends with a `TRANSFER FINISH` sentinel line. Records
//! are separated by an `R` marker character:
//!
//! ```text
//! R 01,02,2024,025,12,240201012,GLU,95,mg/dL
//! R 01,02,2024,026,12,240201013,CHOL,180,mg/dL
//! TRANSFER FINISH
//! ```
//!
//! Fields are positional: sample id in column 6, parameter, value and unit
//! in columns 7-9. The dump carries no usable completion timestamp, so
//! results are stamped with the wall clock at decode time.

use chrono::Utc;
use labgate_core::{LabResult, Result};
use labgate_network::ConnectionHandle;

use crate::driver::{Decoded, Driver, Sidecar};
use crate::text::{TRANSFER_FINISH, skip_leading_blanks};

/// Minimum comma-separated columns a record needs to be a result row.
const MIN_RECORD_FIELDS: usize = 9;

/// Driver for the "Text HumaLyzer Primus Human" dialect.
#[derive(Debug, Default)]
pub struct HumalyzerDriver;

impl HumalyzerDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for HumalyzerDriver {
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
        let all_records: Vec<&str> = frame.split('R').collect();
        let records = skip_leading_blanks(&all_records);

        let completed_at = Utc::now();

        let mut results = Vec::new();
        for (i, record) in records.iter().enumerate() {
            let record = record.trim();
            if record.is_empty() {
                continue;
            }

            let parts: Vec<&str> = record.split(',').collect();
            if parts.len() < MIN_RECORD_FIELDS {
                continue;
            }

            results.push(LabResult {
                barcode: parts[5].to_string(),
                index: (i + 1) as u32,
                param: parts[6].to_string(),
                result: parts[7].to_string(),
                unit: parts[8].to_string(),
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

    fn driver() -> HumalyzerDriver {
        HumalyzerDriver::new()
    }

    #[test]
    fn test_decode_result_records() {
        let frame = "R 01,02,2024,025,12,240201012,GLU,95,mg/dL\nR 01,02,2024,026,12,240201013,CHOL,180,mg/dL\n";

        let decoded = driver().decode(frame).unwrap();
        assert_eq!(decoded.results.len(), 2);

        let first = &decoded.results[0];
        assert_eq!(first.barcode, "240201012");
        assert_eq!(first.index, 1);
        assert_eq!(first.param, "GLU");
        assert_eq!(first.result, "95");
        assert_eq!(first.unit, "mg/dL");

        let second = &decoded.results[1];
        assert_eq!(second.barcode, "240201013");
        assert_eq!(second.index, 2);
        assert_eq!(second.param, "CHOL");
    }

    #[test]
    fn test_decode_skips_short_records() {
        let frame = "R too,short\nR 01,02,2024,025,12,240201012,GLU,95,mg/dL\n";

        let decoded = driver().decode(frame).unwrap();
        assert_eq!(decoded.results.len(), 1);
        assert_eq!(decoded.results[0].param, "GLU");
        // The short record still consumed a position.
        assert_eq!(decoded.results[0].index, 2);
    }

    #[test]
    fn test_decode_empty_frame_yields_nothing() {
        let decoded = driver().decode("\n  \n").unwrap();
        assert!(decoded.results.is_empty());
    }

    #[test]
    fn test_no_handshake_hooks() {
        // Sentinel dialects never acknowledge; the marker pair reflects
        // that only the end sentinel frames a burst.
        let driver = driver();
        assert_eq!(driver.frame_start(), "");
        assert_eq!(driver.frame_end(), "TRANSFER FINISH");
    }
}
