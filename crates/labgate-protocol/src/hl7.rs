//! HL7 2.3.1 driver.
//!
//! Messages arrive framed between a vertical tab and a file separator.
//! Segments are CR-terminated and fields pipe-delimited, but HL7 lets
//! every message declare its own component / repetition / escape /
//! subcomponent characters in the MSH encoding field, so the parser reads
//! those first and uses them for the rest of the message (defaults
//! `^~\&`).
//!
//! Each segment's fields are named from a fixed, segment-type-specific
//! table; a field containing component or subcomponent delimiters is
//! decomposed into a nested `ComponentN` / `ComponentN.SubcomponentM`
//! structure. The MSH encoding-characters field itself stays literal.
//!
//! Result extraction pairs each OBR (order) with its OBX (observation)
//! segments: by matching Set ID when several OBRs are present, otherwise
//! every OBX belongs to the single OBR. The barcode prefers the SPM
//! specimen id (trying its component shapes) and falls back to the OBR
//! filler order number; the completion timestamp prefers the OBR
//! observation time, then the OBX observation and analysis times.
//!
//! Every successfully parsed message also yields a synthesized
//! acknowledgement (MSH echoed with the type replaced by `ACK`, plus an
//! `MSA|AA|<control id>` segment), which `post_decode_actions` writes
//! back over the connection.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use labgate_core::constants::{HL7_FRAME_END, HL7_FRAME_START, WIRE_TIMESTAMP_FORMAT};
use labgate_core::{Error, LabResult, Result};
use labgate_network::ConnectionHandle;
use tracing::debug;

use crate::driver::{Decoded, Driver, Sidecar};

/// A parsed HL7 field: either a literal value or a component breakdown.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Composite(HashMap<String, FieldValue>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            Self::Composite(_) => None,
        }
    }

    pub fn component(&self, name: &str) -> Option<&FieldValue> {
        match self {
            Self::Text(_) => None,
            Self::Composite(parts) => parts.get(name),
        }
    }
}

/// Named fields of one segment occurrence.
pub type SegmentFields = HashMap<String, FieldValue>;

/// A parsed HL7 message: segment occurrences grouped by segment type.
#[derive(Debug, Default)]
pub struct Hl7Message {
    pub segments: HashMap<String, Vec<SegmentFields>>,
}

impl Hl7Message {
    fn occurrences(&self, name: &str) -> &[SegmentFields] {
        self.segments.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Per-message delimiter set, negotiated via MSH.
#[derive(Debug, Clone, Copy)]
struct Delimiters {
    component: char,
    repetition: char,
    #[allow(dead_code)]
    escape: char,
    subcomponent: char,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
        }
    }
}

/// The field delimiter is fixed: MSH itself can only be found by splitting
/// on `|`.
const FIELD_DELIMITER: char = '|';

/// Driver for HL7 2.3.1 instruments.
#[derive(Debug, Default)]
pub struct Hl7Driver;

impl Hl7Driver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for Hl7Driver {
    fn frame_start(&self) -> &str {
        HL7_FRAME_START
    }

    fn frame_end(&self) -> &str {
        HL7_FRAME_END
    }

    fn substitutions(&self) -> &[(&'static str, &'static str)] {
        // Some serial-to-TCP bridges ship segments with an escaped CR.
        &[("\\r", "\n")]
    }

    fn decode(&self, frame: &str) -> Result<Decoded> {
        let (message, ack) = parse_message(frame)?;

        let ack = ack.ok_or_else(|| Error::DecodeFailed("message has no MSH segment".into()))?;
        let sidecar = Sidecar::Hl7Ack(format!("{HL7_FRAME_START}{ack}{HL7_FRAME_END}"));

        let obrs = message.occurrences("OBR");
        let obxs = message.occurrences("OBX");
        let pair_by_set_id = obrs.len() > 1;

        let mut results = Vec::new();
        for obr in obrs {
            for obx in obxs {
                if pair_by_set_id && !set_ids_match(obr, obx) {
                    continue;
                }

                results.push(LabResult {
                    barcode: barcode_of(obr, &message)?,
                    index: index_of(obx)?,
                    param: param_of(obx)?,
                    result: value_of(obx)?,
                    unit: unit_of(obx)?,
                    completed_at: completed_at_of(obr, obx)?,
                });
            }
        }

        debug!(results = results.len(), "decoded HL7 message");
        Ok(Decoded {
            results,
            sidecar,
        })
    }

    async fn send_acknowledgement(&self, _conn: &ConnectionHandle) -> Result<()> {
        // HL7 acknowledges with a full message, built during decode.
        Ok(())
    }

    async fn post_decode_actions(&self, conn: &ConnectionHandle, sidecar: &Sidecar) -> Result<()> {
        let Sidecar::Hl7Ack(ack) = sidecar else {
            return Ok(());
        };

        conn.send(ack.as_bytes())
            .await
            .map_err(|e| Error::Handshake(e.to_string()))
    }
}

/// Parse a framed-out HL7 message into segments, synthesizing the ACK for
/// the first MSH encountered.
fn parse_message(raw: &str) -> Result<(Hl7Message, Option<String>)> {
    let normalized = raw.replace("\r\n", "\r").replace('\n', "\r");

    let mut message = Hl7Message::default();
    let mut ack = None;
    let mut delimiters = Delimiters::default();

    for segment in normalized.split('\r') {
        if segment.len() < 3 {
            continue;
        }
        if segment.starts_with("MSH") {
            delimiters = parse_delimiters(segment);
        }

        let fields: Vec<&str> = segment.split(FIELD_DELIMITER).collect();
        let segment_name = fields[0].to_string();
        let definitions = field_definitions(&segment_name);

        let mut parsed = SegmentFields::new();
        for (i, field) in fields[1..].iter().enumerate() {
            let field_name = definitions
                .get(i)
                .copied()
                .unwrap_or("Unknown")
                .to_string();

            let is_encoding_chars = segment_name == "MSH" && field_name == "Encoding Characters";
            let has_structure = field.contains(delimiters.component)
                || field.contains(delimiters.repetition)
                || field.contains(delimiters.subcomponent);

            let value = if has_structure && !is_encoding_chars {
                parse_composite_field(field, delimiters, component_names(&segment_name, &field_name))
            } else {
                FieldValue::Text(field.to_string())
            };
            parsed.insert(field_name, value);
        }

        if segment_name == "MSH" && ack.is_none() {
            ack = Some(build_ack(&fields)?);
        }

        message
            .segments
            .entry(segment_name)
            .or_default()
            .push(parsed);
    }

    Ok((message, ack))
}

/// Read the delimiter set declared right after `MSH|`.
fn parse_delimiters(msh: &str) -> Delimiters {
    let defaults = Delimiters::default();
    let mut chars = msh.chars().skip(4);
    Delimiters {
        component: chars.next().unwrap_or(defaults.component),
        repetition: chars.next().unwrap_or(defaults.repetition),
        escape: chars.next().unwrap_or(defaults.escape),
        subcomponent: chars.next().unwrap_or(defaults.subcomponent),
    }
}

/// Decompose a field into named components and subcomponents.
fn parse_composite_field(
    field: &str,
    delimiters: Delimiters,
    component_names: &[&str],
) -> FieldValue {
    let mut parts = HashMap::new();

    for (i, component) in field.split(delimiters.component).enumerate() {
        let name = component_names
            .get(i)
            .map(|n| n.to_string())
            .unwrap_or_else(|| format!("Component{}", i + 1));

        let subcomponents: Vec<&str> = component.split(delimiters.subcomponent).collect();
        if subcomponents.len() > 1 {
            let mut nested = HashMap::new();
            for (j, subcomponent) in subcomponents.iter().enumerate() {
                nested.insert(
                    format!("{name}.Subcomponent{}", j + 1),
                    FieldValue::Text(subcomponent.to_string()),
                );
            }
            parts.insert(name, FieldValue::Composite(nested));
        } else {
            parts.insert(name, FieldValue::Text(component.to_string()));
        }
    }

    FieldValue::Composite(parts)
}

/// Build the acknowledgement for an MSH segment: the header echoed with
/// the message type replaced by `ACK`, followed by an MSA application
/// accept carrying the original control id.
fn build_ack(msh_fields: &[&str]) -> Result<String> {
    let definitions = field_definitions("MSH");

    let mut ack = String::from("MSH");
    let mut control_id = "";
    for (i, field_name) in definitions.iter().enumerate() {
        let value = *msh_fields
            .get(i + 1)
            .ok_or_else(|| Error::DecodeFailed(format!("MSH segment too short at {field_name}")))?;

        if *field_name == "Message Type" {
            ack.push_str("|ACK");
            continue;
        }
        if *field_name == "Message Control ID" {
            control_id = value;
        }
        ack.push(FIELD_DELIMITER);
        ack.push_str(value);
    }

    ack.push_str("\rMSA|AA|");
    ack.push_str(control_id);
    ack.push('\r');
    Ok(ack)
}

fn set_ids_match(obr: &SegmentFields, obx: &SegmentFields) -> bool {
    let obr_id = obr.get("Set ID - OBR").and_then(FieldValue::as_text);
    let obx_id = obx.get("Set ID - OBX").and_then(FieldValue::as_text);
    obr_id == obx_id
}

/// Specimen barcode: SPM specimen id in its observed component shapes,
/// then the OBR filler order number.
fn barcode_of(obr: &SegmentFields, message: &Hl7Message) -> Result<String> {
    for spm in message.occurrences("SPM") {
        let Some(specimen_id) = spm.get("Specimen ID") else {
            continue;
        };

        if let Some(text) = specimen_id.as_text() {
            return Ok(text.to_string());
        }

        if let Some(text) = specimen_id.component("Component1").and_then(FieldValue::as_text)
            && !text.is_empty()
        {
            return Ok(text.to_string());
        }

        if let Some(second) = specimen_id.component("Component2") {
            if let Some(text) = second.as_text() {
                if !text.is_empty() {
                    return Ok(text.to_string());
                }
            } else if let Some(text) = second
                .component("Component2.Subcomponent1")
                .and_then(FieldValue::as_text)
            {
                return Ok(text.to_string());
            }
        }
    }

    if let Some(text) = obr.get("Filler Order Number").and_then(FieldValue::as_text) {
        return Ok(text.to_string());
    }

    Err(Error::DecodeFailed("failed to get barcode".into()))
}

/// Result index: the instrument's OBX Set ID, which reflects
/// source-message order.
fn index_of(obx: &SegmentFields) -> Result<u32> {
    obx.get("Set ID - OBX")
        .and_then(FieldValue::as_text)
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| Error::DecodeFailed("failed to get result index".into()))
}

fn param_of(obx: &SegmentFields) -> Result<String> {
    let identifier = obx.get("Observation Identifier");

    let param = match identifier {
        Some(FieldValue::Text(text)) => text.as_str(),
        Some(composite @ FieldValue::Composite(_)) => composite
            .component("Component2")
            .and_then(FieldValue::as_text)
            .unwrap_or_default(),
        None => "",
    };

    if param.is_empty() {
        return Err(Error::DecodeFailed("failed to get param".into()));
    }
    Ok(param.trim_start_matches('*').to_string())
}

fn value_of(obx: &SegmentFields) -> Result<String> {
    match obx.get("Observation Value") {
        Some(FieldValue::Text(text)) => Ok(text.clone()),
        Some(composite @ FieldValue::Composite(_)) => composite
            .component("Type")
            .and_then(FieldValue::as_text)
            .map(str::to_string)
            .ok_or_else(|| Error::DecodeFailed("failed to get result".into())),
        None => Err(Error::DecodeFailed("failed to get result".into())),
    }
}

fn unit_of(obx: &SegmentFields) -> Result<String> {
    obx.get("Units")
        .and_then(FieldValue::as_text)
        .map(str::to_string)
        .ok_or_else(|| Error::DecodeFailed("failed to get unit".into()))
}

/// Completion timestamp preference: OBR observation time, then the OBX
/// observation and analysis times.
fn completed_at_of(obr: &SegmentFields, obx: &SegmentFields) -> Result<DateTime<Utc>> {
    let text = obr
        .get("Observation Date/Time")
        .and_then(FieldValue::as_text)
        .filter(|t| !t.is_empty())
        .or_else(|| {
            obx.get("Date/Time of the Observation")
                .and_then(FieldValue::as_text)
                .filter(|t| !t.is_empty())
        })
        .or_else(|| {
            obx.get("Date/Time of the Analysis")
                .and_then(FieldValue::as_text)
                .filter(|t| !t.is_empty())
        })
        .ok_or_else(|| Error::DecodeFailed("failed to get completed date".into()))?;

    NaiveDateTime::parse_from_str(text, WIRE_TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| Error::DecodeFailed(format!("invalid completion timestamp: {text}")))
}

/// Ordered field names per segment type (HL7 2.3.1, the segments these
/// instruments emit).
fn field_definitions(segment_name: &str) -> &'static [&'static str] {
    match segment_name {
        "MSH" => &[
            "Encoding Characters",
            "Sending Application",
            "Sending Facility",
            "Receiving Application",
            "Receiving Facility",
            "Date/Time of Message",
            "Security",
            "Message Type",
            "Message Control ID",
            "Processing ID",
            "Version ID",
        ],
        "PID" => &[
            "Set ID - PID",
            "Patient ID",
            "Patient Identifier List",
            "Alternate Patient ID - PID",
            "Patient Name",
            "Mother's Maiden Name",
            "Date/Time of Birth",
            "Sex",
            "Patient Alias",
            "Race",
            "Patient Address",
        ],
        "OBX" => &[
            "Set ID - OBX",
            "Value Type",
            "Observation Identifier",
            "Observation Sub-ID",
            "Observation Value",
            "Units",
            "References Range",
            "Abnormal Flags",
            "Probability",
            "Nature of Abnormal Test",
            "Observation Result Status",
            "Effective Date of Reference Range",
            "User Defined Access Checks",
            "Date/Time of the Observation",
            "Producer's ID",
            "Responsible Observer",
            "Observation Method",
            "Equipment Instance Identifier",
            "Date/Time of the Analysis",
        ],
        "OBR" => &[
            "Set ID - OBR",
            "Placer Order Number",
            "Filler Order Number",
            "Universal Service ID",
            "Priority",
            "Requested Date/Time",
            "Observation Date/Time",
            "Observation End Date/Time",
            "Collection Volume",
            "Collector Identifier",
            "Specimen Action Code",
            "Danger Code",
            "Relevant Clinical Info",
            "Specimen Received Date/Time",
            "Specimen Source",
            "Ordering Provider",
            "Order Callback Phone Number",
            "Placer Field 1",
            "Placer Field 2",
            "Filler Field 1",
            "Filler Field 2",
            "Results Rpt/Status Chng - Date/Time",
            "Charge to Practice",
            "Diagnostic Serv Sect ID",
            "Result Status",
            "Parent Result",
            "Quantity/Timing",
            "Result Copies To",
            "Parent",
            "Transportation Mode",
            "Reason for Study",
            "Principal Result Interpreter",
            "Assistant Result Interpreter",
            "Technician",
            "Transcriptionist",
            "Scheduled Date/Time",
            "Number of Sample Containers",
            "Transport Logistics of Collected Sample",
            "Collector's Comment",
            "Transport Arrangement Responsibility",
            "Transport Arranged",
            "Escort Required",
            "Planned Patient Transport Comment",
        ],
        "PV1" => &[
            "Set ID - PV1",
            "Patient Class",
            "Assigned Patient Location",
            "Admission Type",
            "Preadmit Number",
            "Prior Patient Location",
            "Attending Doctor",
            "Referring Doctor",
            "Consulting Doctor",
            "Hospital Service",
            "Temporary Location",
            "Preadmit Test Indicator",
            "Readmission Indicator",
            "Admit Source",
            "Ambulatory Status",
            "VIP Indicator",
            "Admitting Doctor",
            "Patient Type",
            "Visit Number",
            "Financial Class",
        ],
        "SPM" => &[
            "Set ID - SPM",
            "Specimen ID",
            "Specimen Parent IDs",
            "Specimen Type",
            "Specimen Type Modifier",
            "Specimen Additives",
            "Specimen Collection Method",
            "Specimen Source Site",
            "Specimen Source Site Modifier",
            "Specimen Collection Site",
            "Specimen Role",
            "Specimen Collection Amount",
            "Grouped Specimen Count",
            "Specimen Description",
            "Specimen Handling Code",
            "Specimen Risk Code",
            "Specimen Collection Date/Time",
            "Specimen Received Date/Time",
            "Specimen Expiration Date/Time",
            "Specimen Availability",
            "Specimen Reject Reason",
            "Specimen Quality",
            "Specimen Appropriateness",
            "Specimen Condition",
            "Specimen Child Role",
        ],
        "ORC" => &[
            "Order Control",
            "Placer Order Number",
            "Filler Order Number",
            "Placer Group Number",
            "Order Status",
            "Response Flag",
            "Quantity/Timing",
            "Parent",
            "Date/Time of Transaction",
            "Entered By",
            "Verified By",
            "Ordering Provider",
            "Enterer's Location",
            "Call Back Phone Number",
            "Order Effective Date/Time",
            "Order Control Code Reason",
            "Entering Organization",
            "Entering Device",
            "Action By",
        ],
        "NTE" => &[
            "Set ID - NTE",
            "Source of Comment",
            "Comment",
            "Comment Type",
            "Entered By",
            "Entered Date/Time",
            "Effective Start Date",
            "Expiration Date",
            "Comment Completion Date",
        ],
        _ => &[],
    }
}

/// Component names for fields whose components have well-known meanings.
fn component_names(segment_name: &str, field_name: &str) -> &'static [&'static str] {
    if segment_name == "OBX" && field_name == "Observation Value" {
        return &["Type", "Data", "Descriptor", "Unit"];
    }
    &[]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    fn driver() -> Hl7Driver {
        Hl7Driver::new()
    }

    fn oru_frame() -> String {
        [
            "MSH|^~\\&|Analyzer|Lab|LIS|Host|20240101120000||ORU^R01|MSG001|P|2.3.1",
            "PID|1|PAT01",
            "OBR|1||BAR123|^^^Panel|||20240101120000",
            "OBX|1|NM|^GLU|1|95|mg/dL|70-110|N|||F|||20240101120000",
            "OBX|2|NM|^CHOL|1|180|mg/dL|0-200|N|||F|||20240101120000",
        ]
        .join("\r")
    }

    #[test]
    fn test_decode_results_with_default_delimiters() {
        let decoded = driver().decode(&oru_frame()).unwrap();

        assert_eq!(decoded.results.len(), 2);
        let first = &decoded.results[0];
        assert_eq!(first.barcode, "BAR123");
        assert_eq!(first.index, 1);
        assert_eq!(first.param, "GLU");
        assert_eq!(first.result, "95");
        assert_eq!(first.unit, "mg/dL");
        assert_eq!(
            first.completed_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(decoded.results[1].param, "CHOL");
        assert_eq!(decoded.results[1].index, 2);
    }

    #[test]
    fn test_decode_uses_msh_declared_delimiters() {
        // Component delimiter is `*`, not the default caret.
        let frame = [
            "MSH|*~\\&|Analyzer|Lab|LIS|Host|20240101120000||ORU*R01|MSG002|P|2.3.1",
            "OBR|1||BAR456|Panel",
            "OBX|1|NM|GLU*Glucose|1|95|mg/dL|||||F|||20240101120000",
        ]
        .join("\r");

        let decoded = driver().decode(&frame).unwrap();
        assert_eq!(decoded.results.len(), 1);
        // Component2 of the identifier under the declared delimiter.
        assert_eq!(decoded.results[0].param, "Glucose");
    }

    #[test]
    fn test_decode_newline_segment_separators_are_normalized() {
        let frame = oru_frame().replace('\r', "\r\n");
        let decoded = driver().decode(&frame).unwrap();
        assert_eq!(decoded.results.len(), 2);

        let frame = oru_frame().replace('\r', "\n");
        let decoded = driver().decode(&frame).unwrap();
        assert_eq!(decoded.results.len(), 2);
    }

    #[test]
    fn test_barcode_prefers_spm_specimen_id() {
        let frame = [
            "MSH|^~\\&|Analyzer|Lab|LIS|Host|20240101120000||ORU^R01|MSG003|P|2.3.1",
            "SPM|1|^SPM-BARCODE||SER",
            "OBR|1||OBR-BARCODE|Panel|||20240101120000",
            "OBX|1|NM|^GLU|1|95|mg/dL|||||F",
        ]
        .join("\r");

        let decoded = driver().decode(&frame).unwrap();
        assert_eq!(decoded.results[0].barcode, "SPM-BARCODE");
    }

    #[test]
    fn test_barcode_from_spm_subcomponent_shape() {
        let frame = [
            "MSH|^~\\&|Analyzer|Lab|LIS|Host|20240101120000||ORU^R01|MSG004|P|2.3.1",
            "SPM|1|^SUB-BARCODE&tail||SER",
            "OBR|1||OBR-BARCODE|Panel|||20240101120000",
            "OBX|1|NM|^GLU|1|95|mg/dL|||||F",
        ]
        .join("\r");

        let decoded = driver().decode(&frame).unwrap();
        assert_eq!(decoded.results[0].barcode, "SUB-BARCODE");
    }

    #[test]
    fn test_barcode_falls_back_to_filler_order_number() {
        let decoded = driver().decode(&oru_frame()).unwrap();
        assert_eq!(decoded.results[0].barcode, "BAR123");
    }

    #[test]
    fn test_multiple_obr_pairing_by_set_id() {
        let frame = [
            "MSH|^~\\&|Analyzer|Lab|LIS|Host|20240101120000||ORU^R01|MSG005|P|2.3.1",
            "OBR|1||BAR-A|Panel|||20240101120000",
            "OBR|2||BAR-B|Panel|||20240101130000",
            "OBX|1|NM|^GLU|1|95|mg/dL|||||F",
            "OBX|2|NM|^UREA|1|30|mg/dL|||||F",
        ]
        .join("\r");

        let decoded = driver().decode(&frame).unwrap();
        assert_eq!(decoded.results.len(), 2);

        let glu = decoded.results.iter().find(|r| r.param == "GLU").unwrap();
        assert_eq!(glu.barcode, "BAR-A");
        let urea = decoded.results.iter().find(|r| r.param == "UREA").unwrap();
        assert_eq!(urea.barcode, "BAR-B");
    }

    #[test]
    fn test_timestamp_falls_back_to_obx_observation_time() {
        let frame = [
            "MSH|^~\\&|Analyzer|Lab|LIS|Host|20240101120000||ORU^R01|MSG006|P|2.3.1",
            "OBR|1||BAR123|Panel",
            "OBX|1|NM|^GLU|1|95|mg/dL|||||F|||20240102093000",
        ]
        .join("\r");

        let decoded = driver().decode(&frame).unwrap();
        assert_eq!(
            decoded.results[0].completed_at,
            Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_ack_echoes_header_with_ack_type() {
        let decoded = driver().decode(&oru_frame()).unwrap();

        let Sidecar::Hl7Ack(ack) = decoded.sidecar else {
            panic!("expected HL7 ACK sidecar");
        };
        assert_eq!(
            ack,
            "\x0bMSH|^~\\&|Analyzer|Lab|LIS|Host|20240101120000||ACK|MSG001|P|2.3.1\rMSA|AA|MSG001\r\x1c"
        );
    }

    #[test]
    fn test_message_without_msh_is_a_decode_error() {
        let frame = "OBR|1||BAR123|Panel\rOBX|1|NM|^GLU|1|95|mg/dL";
        let err = driver().decode(frame).unwrap_err();
        assert!(matches!(err, Error::DecodeFailed(_)));
    }

    #[test]
    fn test_short_msh_is_a_decode_error() {
        let frame = "MSH|^~\\&|Analyzer|Lab";
        let err = driver().decode(frame).unwrap_err();
        assert!(matches!(err, Error::DecodeFailed(_)));
    }

    #[test]
    fn test_message_without_results_still_yields_ack() {
        let frame = "MSH|^~\\&|Analyzer|Lab|LIS|Host|20240101120000||QRY^Q02|MSG007|P|2.3.1";
        let decoded = driver().decode(frame).unwrap();

        assert!(decoded.results.is_empty());
        assert!(matches!(decoded.sidecar, Sidecar::Hl7Ack(_)));
    }

    #[test]
    fn test_observation_value_composite_uses_type_component() {
        let frame = [
            "MSH|^~\\&|Analyzer|Lab|LIS|Host|20240101120000||ORU^R01|MSG008|P|2.3.1",
            "OBR|1||BAR123|Panel|||20240101120000",
            "OBX|1|CE|^GLU|1|POS^120^high|mg/dL|||||F",
        ]
        .join("\r");

        let decoded = driver().decode(&frame).unwrap();
        assert_eq!(decoded.results[0].result, "POS");
    }

    #[tokio::test]
    async fn test_post_decode_writes_ack_to_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let (handle, _control) =
            ConnectionHandle::new("127.0.0.1".to_string(), server.into_split().1);

        let sidecar = Sidecar::Hl7Ack("\x0bMSH|ACK\r\x1c".to_string());
        driver().post_decode_actions(&handle, &sidecar).await.unwrap();

        let mut buf = vec![0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"\x0bMSH|ACK\r\x1c");
    }
}
