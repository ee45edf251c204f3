//! Combilyzer 13 (Human) urine analyzer.
//!
//! One STX/ETX-framed report per specimen:
//!
//! ```text
//! Date:01-02-2024 09:30
//!
//!   ID:240201007
//! *LEU    neg
//!  GLU    50 mg/dL
//!  CRE    1.2(10)mg/mmol
//! ```
//!
//! Line 1 carries the measurement date, line 3 the specimen id; every
//! following non-blank line is one analyte with whitespace-separated
//! columns. Flagged parameters carry a `*` prefix, semi-quantitative rows
//! prepend `Normal` to the value, and the creatinine ratio row glues the
//! unit onto the value.

use chrono::{NaiveDateTime, Utc};
use labgate_core::constants::{ETX, STX};
use labgate_core::{Error, LabResult, Result};
use labgate_network::ConnectionHandle;

use crate::driver::{Decoded, Driver, Sidecar};
use crate::text::skip_leading_blanks;

const REPORT_DATE_FORMAT: &str = "%d-%m-%Y %H:%M";

/// Driver for the "Text Combilyzer 13 Human" dialect.
#[derive(Debug, Default)]
pub struct CombilyzerDriver;

impl CombilyzerDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for CombilyzerDriver {
    fn frame_start(&self) -> &str {
        STX
    }

    fn frame_end(&self) -> &str {
        ETX
    }

    fn substitutions(&self) -> &[(&'static str, &'static str)] {
        &[]
    }

    fn decode(&self, frame: &str) -> Result<Decoded> {
        let all_lines: Vec<&str> = frame.split('\n').collect();
        let lines = skip_leading_blanks(&all_lines);
        if lines.len() < 3 {
            return Err(Error::DecodeFailed("report shorter than its header".into()));
        }

        let id_line = lines[2].trim();
        let barcode = id_line.strip_prefix("ID:").unwrap_or(id_line).to_string();

        let date_line = lines[0].trim();
        let date_text = date_line.strip_prefix("Date:").unwrap_or(date_line);
        let completed_at = NaiveDateTime::parse_from_str(date_text, REPORT_DATE_FORMAT)
            .map_err(|_| Error::DecodeFailed(format!("invalid report date: {date_text}")))?
            .and_utc();

        let mut results = Vec::new();
        for (i, raw_line) in lines.iter().enumerate().skip(3) {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            let mut parts: Vec<&str> = line.split_whitespace().collect();
            // The ratio row glues value and unit together: "3.5mg/mmol".
            if parts.len() == 2 && parts[1].ends_with("mg/mmol") {
                parts = vec![parts[0], parts[1].trim_end_matches("mg/mmol"), "mg/mmol"];
            }

            results.push(LabResult {
                barcode: barcode.clone(),
                // Line-position index: the first analyte line is 1.
                index: (i - 2) as u32,
                param: parts[0].trim_start_matches('*').to_string(),
                result: extract_value(&parts),
                unit: if parts.len() > 2 {
                    parts[parts.len() - 1].to_string()
                } else {
                    String::new()
                },
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

/// Value column by part count; qualitative rows prepend `Normal`.
fn extract_value(parts: &[&str]) -> String {
    let value = match parts.len() {
        0 | 1 => String::new(),
        2 | 3 => parts[1].to_string(),
        4 => parts[2].to_string(),
        _ => parts[1..parts.len() - 1].join(" "),
    };

    value.trim_start_matches("Normal").to_string()
}
