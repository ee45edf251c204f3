//! ASTM driver.
//!
//! The analyzers covered here frame a transmission between ENQ and EOT and
//! separate records with STX. Records are pipe-delimited, components
//! caret-delimited; the first character(s) after STX name the record type
//! (`H` header, `P` patient, `O` order, `R` result, `C` comment, `L`
//! termination, `Q` query, `N` notification). Several logical messages may
//! share one transmission; every `H` record starts a new message.
//!
//! Two modes:
//!
//! - **Result mode**: each message's valid result records become
//!   [`LabResult`]s. The barcode comes from the order record's patient-name
//!   field (first caret component); results missing any of test id, value,
//!   units or timestamp are skipped without consuming an index.
//! - **Query mode**: a message containing a `Q` record makes the whole
//!   frame a query. Decoding yields no results; the sample id and message
//!   set travel in the sidecar, and [`post_decode_actions`] answers the
//!   instrument: it asks the LIS which indicators to run, reformats the
//!   query messages into answer messages, and writes them back framed with
//!   an XOR checksum, waiting for a single ACK byte after ENQ and after
//!   every message in strict request/response cadence.
//!
//! [`post_decode_actions`]: AstmDriver::post_decode_actions

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use labgate_core::constants::{
    ACK, ASTM_FRAME_END, ASTM_FRAME_START, CR, ETB, ETX, LF, STX, WIRE_TIMESTAMP_FORMAT,
};
use labgate_core::{Error, LabResult, Result};
use labgate_network::ConnectionHandle;
use labgate_query::{DeviceQueryService, QueryIndicator};
use tracing::debug;

use crate::driver::{Decoded, Driver, Sidecar};

/// How long to wait for the instrument's ACK byte during the answer
/// sequence. The wait is bounded so a hung instrument cannot stall the
/// shared pipeline consumer.
const ACK_WAIT: Duration = Duration::from_secs(5);

/// Header record of one ASTM message.
///
/// Only the fields the gateway actually reads are kept; the answer flow
/// echoes sender/receiver identity and the processing fields back to the
/// instrument.
#[derive(Debug, Clone, Default)]
pub struct AstmHeader {
    pub sender_id: String,
    pub sender_name: String,
    pub receiver_id: String,
    pub receiver_name: String,
    pub analyzer_type: String,
    pub version: String,
    pub control_id: String,
    pub message_type: String,
    pub processing_mode: String,
    pub processing_id: String,
    pub sequence_number: String,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct AstmPatient {
    pub id: String,
}

#[derive(Debug, Clone, Default)]
pub struct AstmOrder {
    pub id: String,
    pub patient_id: String,
    /// Carries the specimen barcode in its first caret component.
    pub patient_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct AstmResult {
    pub test_id: String,
    pub value: String,
    pub units: String,
    pub reference_range: String,
    pub status: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default)]
pub struct AstmQuery {
    pub query_type: String,
    pub sample_id: String,
    pub test_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct AstmNotification {
    pub kind: String,
    pub details: String,
}

/// One logical ASTM message: a header and the records that followed it.
#[derive(Debug, Clone, Default)]
pub struct AstmMessage {
    pub header: AstmHeader,
    pub patient: AstmPatient,
    pub order: AstmOrder,
    pub results: Vec<AstmResult>,
    pub comments: Vec<String>,
    pub termination_code: Option<String>,
    pub query: Option<AstmQuery>,
    pub notification: Option<AstmNotification>,
}

/// Driver for the ASTM dialect, bound to one device's query service.
#[derive(Debug)]
pub struct AstmDriver {
    query: DeviceQueryService,
}

impl AstmDriver {
    pub fn new(query: DeviceQueryService) -> Self {
        Self { query }
    }

    /// Answer an instrument query: LIS lookup, answer generation, framed
    /// writes with one ACK wait per message.
    async fn answer_query(
        &self,
        conn: &ConnectionHandle,
        sample_id: &str,
        messages: &[AstmMessage],
    ) -> Result<()> {
        let indicators = self
            .query
            .query(sample_id)
            .await
            .map_err(|e| Error::QueryService(e.to_string()))?;

        let answers = generate_answer_messages(messages, &indicators);
        debug!(
            sample_id,
            indicators = indicators.len(),
            answers = answers.len(),
            "answering instrument query"
        );

        conn.clear_control().await;

        self.send_and_await_ack(conn, ASTM_FRAME_START.as_bytes())
            .await?;

        for (i, text) in answers.iter().enumerate() {
            let framed = frame_answer(i + 1, text);
            self.send_and_await_ack(conn, framed.as_bytes()).await?;
        }

        conn.send(ASTM_FRAME_END.as_bytes())
            .await
            .map_err(|e| Error::Handshake(e.to_string()))?;

        Ok(())
    }

    async fn send_and_await_ack(&self, conn: &ConnectionHandle, bytes: &[u8]) -> Result<()> {
        conn.send(bytes)
            .await
            .map_err(|e| Error::Handshake(e.to_string()))?;

        let byte = conn
            .recv_control_byte(ACK_WAIT)
            .await
            .map_err(|e| Error::Handshake(e.to_string()))?;
        if byte != ACK {
            return Err(Error::Handshake(format!(
                "expected ACK from instrument, got 0x{byte:02X}"
            )));
        }
        Ok(())
    }
}

impl Driver for AstmDriver {
    fn frame_start(&self) -> &str {
        ASTM_FRAME_START
    }

    fn frame_end(&self) -> &str {
        ASTM_FRAME_END
    }

    fn substitutions(&self) -> &[(&'static str, &'static str)] {
        // Record terminators carry no information once records are split on
        // STX; stripping them first keeps checksum trailers out of content.
        &[("\r", ""), ("\n", "")]
    }

    fn decode(&self, frame: &str) -> Result<Decoded> {
        let messages = parse_messages(frame);

        if let Some(query) = messages.iter().find_map(|m| m.query.clone()) {
            return Ok(Decoded {
                results: Vec::new(),
                sidecar: Sidecar::AstmQuery {
                    sample_id: query.sample_id,
                    messages,
                },
            });
        }

        let mut results = Vec::new();
        for message in &messages {
            let barcode = message
                .order
                .patient_name
                .split('^')
                .next()
                .unwrap_or_default();

            let mut index = 0u32;
            for result in &message.results {
                if result.test_id.is_empty()
                    || result.value.is_empty()
                    || result.units.is_empty()
                    || result.timestamp.is_empty()
                {
                    continue;
                }

                let completed_at = parse_wire_timestamp(&result.timestamp).ok_or_else(|| {
                    Error::DecodeFailed(format!("invalid result timestamp: {}", result.timestamp))
                })?;

                index += 1;
                results.push(LabResult {
                    barcode: barcode.to_string(),
                    index,
                    param: result.test_id.clone(),
                    result: result.value.clone(),
                    unit: result.units.clone(),
                    completed_at,
                });
            }
        }

        Ok(Decoded::results(results))
    }

    async fn send_acknowledgement(&self, conn: &ConnectionHandle) -> Result<()> {
        conn.send(&[ACK])
            .await
            .map_err(|e| Error::Handshake(e.to_string()))
    }

    async fn post_decode_actions(&self, conn: &ConnectionHandle, sidecar: &Sidecar) -> Result<()> {
        let Sidecar::AstmQuery {
            sample_id,
            messages,
        } = sidecar
        else {
            return Ok(());
        };

        self.answer_query(conn, sample_id, messages).await
    }
}

/// Split a frame into logical messages.
///
/// Records are separated by STX and may carry a leading frame-sequence
/// digit; content runs until ETB or ETX (whichever comes first), which cuts
/// off checksum trailers. A new `H` record closes the current message.
pub fn parse_messages(frame: &str) -> Vec<AstmMessage> {
    let mut messages = Vec::new();
    let mut current: Option<AstmMessage> = None;

    for record in frame.split(STX) {
        let Some((kind, content)) = split_record(record) else {
            continue;
        };

        if kind == 'H' {
            if let Some(done) = current.take() {
                messages.push(done);
            }
            current = Some(AstmMessage {
                header: parse_header(content),
                ..Default::default()
            });
            continue;
        }

        let Some(message) = current.as_mut() else {
            // Records before the first header belong to no message.
            continue;
        };

        match kind {
            'P' => message.patient = parse_patient(content),
            'O' => message.order = parse_order(content),
            'R' => message.results.push(parse_result(content)),
            'C' => message.comments.push(parse_comment(content)),
            'L' => message.termination_code = Some(field(content, 1).to_string()),
            'Q' => message.query = Some(parse_query(content)),
            'N' => message.notification = Some(parse_notification(content)),
            _ => {}
        }
    }

    if let Some(done) = current.take() {
        messages.push(done);
    }

    messages
}

/// Identify a record's type character and cut its content at ETB/ETX.
///
/// The type is the second character when the record carries a sequence
/// digit (`1H|...`), otherwise the first (`H|...`).
fn split_record(record: &str) -> Option<(char, &str)> {
    if record.len() <= 2 {
        return None;
    }

    let bytes = record.as_bytes();
    let (kind, content_start) = if bytes[1] == b'|' {
        (bytes[0] as char, 1)
    } else {
        (bytes[1] as char, 2)
    };
    if !kind.is_ascii_uppercase() {
        return None;
    }

    let content_end = record
        .find(ETB)
        .or_else(|| record.find(ETX))
        .unwrap_or(record.len());
    let content = record.get(content_start..content_end)?;

    Some((kind, content))
}

/// Nth pipe-delimited field of a record's content, empty when absent.
fn field(content: &str, index: usize) -> &str {
    content.split('|').nth(index).unwrap_or_default()
}

fn component(value: &str, index: usize) -> &str {
    value.split('^').nth(index).unwrap_or_default()
}

fn parse_header(content: &str) -> AstmHeader {
    let sender = field(content, 4);
    let receiver = field(content, 9);
    let analyzer = field(content, 6);
    let processing = field(content, 10);

    let processing_mode = component(processing, 1);

    AstmHeader {
        sender_id: component(sender, 0).to_string(),
        sender_name: component(sender, 1).to_string(),
        receiver_id: component(receiver, 0).to_string(),
        receiver_name: component(receiver, 1).to_string(),
        analyzer_type: component(analyzer, 0).to_string(),
        version: component(analyzer, 1).to_string(),
        control_id: field(content, 8).to_string(),
        message_type: component(processing, 0).to_string(),
        processing_mode: if processing_mode.is_empty() {
            "REAL".to_string()
        } else {
            processing_mode.to_string()
        },
        processing_id: field(content, 11).to_string(),
        sequence_number: field(content, 12).to_string(),
        timestamp: parse_wire_timestamp(field(content, 13))
            .map(|dt| dt.naive_utc())
            .unwrap_or_else(|| Utc::now().naive_utc()),
    }
}

fn parse_patient(content: &str) -> AstmPatient {
    AstmPatient {
        id: field(content, 1).to_string(),
    }
}

fn parse_order(content: &str) -> AstmOrder {
    let patient_id = field(content, 2);
    let mut patient_name = field(content, 3);
    if patient_name.is_empty() {
        patient_name = patient_id;
    }

    AstmOrder {
        id: field(content, 1).to_string(),
        patient_id: patient_id.to_string(),
        patient_name: patient_name.to_string(),
    }
}

fn parse_result(content: &str) -> AstmResult {
    // Universal test id: the analyte code sits in the fourth caret
    // component (`^^^GLU`).
    let test_id = component(field(content, 2), 3);

    AstmResult {
        test_id: test_id.to_string(),
        value: field(content, 3).to_string(),
        units: field(content, 4).to_string(),
        reference_range: field(content, 5).to_string(),
        status: field(content, 6).to_string(),
        timestamp: field(content, 12).to_string(),
    }
}

fn parse_comment(content: &str) -> String {
    field(content, 3).to_string()
}

fn parse_query(content: &str) -> AstmQuery {
    AstmQuery {
        query_type: field(content, 1).to_string(),
        sample_id: field(content, 2).trim_matches('^').to_string(),
        test_id: field(content, 3).to_string(),
    }
}

fn parse_notification(content: &str) -> AstmNotification {
    AstmNotification {
        kind: field(content, 1).to_string(),
        details: field(content, 2).to_string(),
    }
}

fn parse_wire_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, WIRE_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// XOR checksum over record text, as two uppercase hex digits.
///
/// The checksum covers the bare record text: neither STX nor the frame
/// sequence digit is included, and the same rule is used when verifying.
pub fn checksum(text: &str) -> String {
    let sum = text.bytes().fold(0u8, |acc, b| acc ^ b);
    format!("{sum:02X}")
}

/// Wrap one answer record for transmission:
/// `STX <seq> <text> CR ETX <checksum> CR LF`.
pub fn frame_answer(seq: usize, text: &str) -> String {
    format!("{STX}{seq}{text}{CR}{ETX}{}{CR}{LF}", checksum(text))
}

/// Reformat the query messages into answer messages carrying the LIS
/// indicators.
///
/// The header is echoed with `TSREQ^REAL` rewritten to `TSDWN^REPLY`; each
/// indicator becomes one order record against the queried sample; the
/// termination record is echoed with a final-report flag.
pub fn generate_answer_messages(
    messages: &[AstmMessage],
    indicators: &[QueryIndicator],
) -> Vec<String> {
    let mut answers = Vec::new();

    for message in messages {
        let mut header = message.header.clone();
        if header.message_type == "TSREQ" && header.processing_mode == "REAL" {
            header.message_type = "TSDWN".to_string();
            header.processing_mode = "REPLY".to_string();
        }
        answers.push(format!(
            "H|\\^&|||{}|||||{}|{}^{}|{}|{}|{}",
            header.receiver_id,
            header.sender_id,
            header.message_type,
            header.processing_mode,
            header.processing_id,
            header.sequence_number,
            header.timestamp.format(WIRE_TIMESTAMP_FORMAT),
        ));

        if let Some(query) = &message.query {
            for (i, indicator) in indicators.iter().enumerate() {
                answers.push(format!(
                    "O|{}|{}||^^^{}^\\^^^555|R||||||A||||||||||||||O\\Q",
                    i + 1,
                    query.sample_id,
                    indicator.indicator,
                ));
            }
        }

        if let Some(code) = &message.termination_code {
            answers.push(format!("L|{code}|N"));
        }
    }

    answers
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn driver() -> AstmDriver {
        AstmDriver::new(DeviceQueryService::new("http://localhost/query", "SN-1"))
    }

    /// A result transmission as it reaches the decoder: ENQ/EOT removed by
    /// the framer, CR/LF removed by the substitutions.
    fn result_frame() -> String {
        [
            "1H|\\^&|||BS-240^1.0|||||Host|TSREQ^REAL|P|1|20240101120000",
            "2P|1",
            "3O|1|SAMPLE01|240101001^A|^^^GLU|R",
            "4R|1|^^^GLU|95|mg/dL|70-110|N|||||F|20240101120000",
            "5L|1|N",
        ]
        .join(STX)
    }

    #[test]
    fn test_decode_single_result() {
        let decoded = driver().decode(&result_frame()).unwrap();

        assert!(matches!(decoded.sidecar, Sidecar::None));
        assert_eq!(decoded.results.len(), 1);

        let result = &decoded.results[0];
        assert_eq!(result.barcode, "240101001");
        assert_eq!(result.index, 1);
        assert_eq!(result.param, "GLU");
        assert_eq!(result.result, "95");
        assert_eq!(result.unit, "mg/dL");
        assert_eq!(
            result.completed_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_decode_skips_incomplete_results_without_consuming_index() {
        let frame = [
            "1H|\\^&|||BS-240|||||Host|TSREQ^REAL|P|1|20240101120000",
            "2O|1|S1|B1|^^^GLU|R",
            // No units: skipped.
            "3R|1|^^^GLU|95||70-110|N|||||F|20240101120000",
            "4R|2|^^^CHOL|180|mg/dL|0-200|N|||||F|20240101120500",
            "5R|3|^^^TRIG|150|mg/dL|0-150|N|||||F|20240101121000",
        ]
        .join(STX);

        let decoded = driver().decode(&frame).unwrap();
        assert_eq!(decoded.results.len(), 2);
        assert_eq!(decoded.results[0].param, "CHOL");
        assert_eq!(decoded.results[0].index, 1);
        assert_eq!(decoded.results[1].param, "TRIG");
        assert_eq!(decoded.results[1].index, 2);
    }

    #[test]
    fn test_decode_multiple_messages_in_one_frame() {
        let frame = [
            "1H|\\^&|||A|||||Host|TSREQ^REAL|P|1|20240101120000",
            "2O|1|S1|BC-A|^^^GLU|R",
            "3R|1|^^^GLU|95|mg/dL||||||||20240101120000",
            "1H|\\^&|||A|||||Host|TSREQ^REAL|P|1|20240101130000",
            "2O|1|S2|BC-B|^^^UREA|R",
            "3R|1|^^^UREA|32|mg/dL||||||||20240101130000",
        ]
        .join(STX);

        let decoded = driver().decode(&frame).unwrap();
        assert_eq!(decoded.results.len(), 2);
        assert_eq!(decoded.results[0].barcode, "BC-A");
        assert_eq!(decoded.results[0].index, 1);
        assert_eq!(decoded.results[1].barcode, "BC-B");
        assert_eq!(decoded.results[1].index, 1);
    }

    #[test]
    fn test_decode_barcode_falls_back_to_patient_id_field() {
        let frame = [
            "1H|\\^&|||A|||||Host|TSREQ^REAL|P|1|20240101120000",
            "2O|1|FALLBACK||^^^GLU|R",
            "3R|1|^^^GLU|95|mg/dL||||||||20240101120000",
        ]
        .join(STX);

        let decoded = driver().decode(&frame).unwrap();
        assert_eq!(decoded.results[0].barcode, "FALLBACK");
    }

    #[test]
    fn test_decode_query_frame_yields_sidecar_and_no_results() {
        let frame = [
            "1H|\\^&|||BS-240|||||Host|TSREQ^REAL|P|1|20240101120000",
            "2Q|1|^SAMP123^|ALL||||||||O",
            "3L|1|N",
        ]
        .join(STX);

        let decoded = driver().decode(&frame).unwrap();
        assert!(decoded.results.is_empty());
        match decoded.sidecar {
            Sidecar::AstmQuery {
                sample_id,
                messages,
            } => {
                assert_eq!(sample_id, "SAMP123");
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].termination_code.as_deref(), Some("1"));
            }
            other => panic!("expected AstmQuery sidecar, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_bad_timestamp_is_a_decode_error() {
        let frame = [
            "1H|\\^&|||A|||||Host|TSREQ^REAL|P|1|20240101120000",
            "2O|1|S1|B1|^^^GLU|R",
            "3R|1|^^^GLU|95|mg/dL||||||||not-a-date",
        ]
        .join(STX);

        let err = driver().decode(&frame).unwrap_err();
        assert!(matches!(err, Error::DecodeFailed(_)));
    }

    #[test]
    fn test_decode_garbage_yields_empty_results_not_error() {
        // No header record at all: nothing decodes, nothing fails.
        let decoded = driver().decode("complete nonsense").unwrap();
        assert!(decoded.results.is_empty());
    }

    #[test]
    fn test_record_content_cut_at_etx_drops_checksum_trailer() {
        let frame = format!(
            "1H|\\^&|||A|||||Host|TSREQ^REAL|P|1|20240101120000{STX}2O|1|S1|B1|^^^GLU|R{STX}3R|1|^^^GLU|95|mg/dL||||||||20240101120000{ETX}4F"
        );

        let decoded = driver().decode(&frame).unwrap();
        assert_eq!(decoded.results.len(), 1);
        assert_eq!(decoded.results[0].param, "GLU");
        assert_eq!(
            decoded.results[0].completed_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_checksum_is_xor_of_record_text() {
        // XOR of "AB" = 0x41 ^ 0x42 = 0x03.
        assert_eq!(checksum("AB"), "03");
        assert_eq!(checksum(""), "00");
    }

    #[test]
    fn test_frame_answer_layout_and_checksum_roundtrip() {
        let framed = frame_answer(1, "L|1|N");

        assert!(framed.starts_with("\x021L|1|N\r\x03"));
        assert!(framed.ends_with("\r\n"));

        // Recompute the checksum from the framed text the way a receiver
        // would: text sits between the sequence digit and CR+ETX.
        let text_start = 2;
        let etx_pos = framed.find(ETX).unwrap();
        let text = &framed[text_start..etx_pos - 1];
        let transmitted = &framed[etx_pos + 1..etx_pos + 3];
        assert_eq!(checksum(text), transmitted);
    }

    #[test]
    fn test_generate_answer_messages_rewrites_header_and_orders() {
        let frame = [
            "1H|\\^&|||Analyzer|||||Host|TSREQ^REAL|P|1|20240101120000",
            "2Q|1|^SAMP123^|ALL||||||||O",
            "3L|1|N",
        ]
        .join(STX);
        let messages = parse_messages(&frame);

        let indicators = vec![
            QueryIndicator {
                indicator: "GLU".to_string(),
                material: 1,
                dilution: String::new(),
                barcode: String::new(),
            },
            QueryIndicator {
                indicator: "CHOL".to_string(),
                material: 1,
                dilution: String::new(),
                barcode: String::new(),
            },
        ];

        let answers = generate_answer_messages(&messages, &indicators);
        assert_eq!(answers.len(), 4);

        assert!(answers[0].starts_with("H|\\^&|||Host|||||Analyzer|TSDWN^REPLY|P|1|"));
        assert_eq!(answers[1], "O|1|SAMP123||^^^GLU^\\^^^555|R||||||A||||||||||||||O\\Q");
        assert_eq!(answers[2], "O|2|SAMP123||^^^CHOL^\\^^^555|R||||||A||||||||||||||O\\Q");
        assert_eq!(answers[3], "L|1|N");
    }

    #[test]
    fn test_parse_header_fields() {
        let frame = "1H|\\^&|||Mindray^BS-240|||||LIS-Host|TSREQ^REAL|P|7|20240102030405";
        let messages = parse_messages(frame);
        assert_eq!(messages.len(), 1);

        let header = &messages[0].header;
        assert_eq!(header.sender_id, "Mindray");
        assert_eq!(header.sender_name, "BS-240");
        assert_eq!(header.receiver_id, "LIS-Host");
        assert_eq!(header.message_type, "TSREQ");
        assert_eq!(header.processing_mode, "REAL");
        assert_eq!(header.processing_id, "P");
        assert_eq!(header.sequence_number, "7");
        assert_eq!(
            header.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap().naive_utc()
        );
    }

    #[test]
    fn test_records_without_sequence_digit_parse_too() {
        let frame = [
            "H|\\^&|||A|||||Host|TSREQ^REAL|P|1|20240101120000",
            "O|1|S1|B1|^^^GLU|R",
            "R|1|^^^GLU|95|mg/dL||||||||20240101120000",
        ]
        .join(STX);

        let decoded = driver().decode(&frame).unwrap();
        assert_eq!(decoded.results.len(), 1);
    }
}
