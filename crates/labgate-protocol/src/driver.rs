//! Driver capability contract and registry.
//!
//! Every instrument dialect implements [`Driver`]: it tells the framing
//! layer its frame markers and pre-frame character substitutions, decodes
//! one frame into results plus optional [`Sidecar`] handshake data, and
//! performs whatever acknowledgement the protocol requires. The pipeline
//! never learns protocol internals; it passes the sidecar back to the
//! driver opaquely.
//!
//! Drivers form a closed set behind the [`ProtocolDriver`] enum, resolved
//! once per inbound payload from the device model's configured driver name.
//! Adding a dialect means adding a variant here; the framer and the
//! pipeline stay untouched.

use labgate_core::{Error, LabResult, Result};
use labgate_network::ConnectionHandle;
use labgate_query::DeviceQueryService;

use crate::astm::{AstmDriver, AstmMessage};
use crate::hl7::Hl7Driver;
use crate::text::{CombilyzerDriver, HumaReaderDriver, HumalyzerDriver};

/// Protocol-specific handshake data produced by a decode and consumed by
/// the same driver's [`Driver::post_decode_actions`].
///
/// The pipeline carries this value without inspecting it.
#[derive(Debug, Clone)]
pub enum Sidecar {
    /// Nothing to do after persistence.
    None,
    /// An ASTM query frame: the instrument asks which tests to run for a
    /// sample. Carries the queried sample id and the full message set the
    /// answer is generated from.
    AstmQuery {
        sample_id: String,
        messages: Vec<AstmMessage>,
    },
    /// A pre-built HL7 acknowledgement, framed and ready to write back.
    Hl7Ack(String),
}

/// Outcome of decoding one frame.
#[derive(Debug)]
pub struct Decoded {
    /// Decoded results in source-message order. Empty for query frames and
    /// for messages that carry no result segments.
    pub results: Vec<LabResult>,
    /// Handshake data for [`Driver::post_decode_actions`].
    pub sidecar: Sidecar,
}

impl Decoded {
    pub fn results(results: Vec<LabResult>) -> Self {
        Self {
            results,
            sidecar: Sidecar::None,
        }
    }
}

/// Capability contract implemented by every protocol dialect.
pub trait Driver {
    /// Frame start marker handed to the framer; empty means "always inside
    /// a frame".
    fn frame_start(&self) -> &str;

    /// Frame end marker handed to the framer.
    fn frame_end(&self) -> &str;

    /// Literal substring replacements applied to the raw text before
    /// framing and decoding.
    fn substitutions(&self) -> &[(&'static str, &'static str)];

    /// Decode one complete frame.
    ///
    /// Never panics: malformed input maps to [`Error::DecodeFailed`] with
    /// an empty result set, so one bad frame cannot take down the pipeline
    /// or another connection.
    fn decode(&self, frame: &str) -> Result<Decoded>;

    /// Emit the protocol's content-independent acknowledgement immediately
    /// on receipt of a payload. A no-op for dialects without one.
    async fn send_acknowledgement(&self, conn: &ConnectionHandle) -> Result<()>;

    /// Content-dependent follow-up, run after the frame was persisted
    /// (answering an ASTM query, writing an HL7 ACK).
    async fn post_decode_actions(&self, conn: &ConnectionHandle, sidecar: &Sidecar) -> Result<()>;
}

/// Normalize a configured driver name for registry lookup.
///
/// Trims surrounding whitespace, lowercases, and strips `.`, ` ` and `_`,
/// so `"HL7 2.3.1"`, `"hl7_2.3.1"` and `"hl72.3.1"` all resolve alike.
pub fn normalize_driver_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '.' | ' ' | '_'))
        .collect()
}

/// The closed set of supported dialects.
#[derive(Debug)]
pub enum ProtocolDriver {
    Astm(AstmDriver),
    Hl7(Hl7Driver),
    Combilyzer(CombilyzerDriver),
    Humalyzer(HumalyzerDriver),
    HumaReader(HumaReaderDriver),
}

/// Resolve a configured driver name to a driver bound to one device's
/// query service.
///
/// Unrecognized names fail with [`Error::UnknownDriver`] carrying the name
/// as configured.
pub fn resolve_driver(name: &str, query: DeviceQueryService) -> Result<ProtocolDriver> {
    match normalize_driver_name(name).as_str() {
        "astm" => Ok(ProtocolDriver::Astm(AstmDriver::new(query))),
        "hl7231" => Ok(ProtocolDriver::Hl7(Hl7Driver::new())),
        "textcombilyzer13human" => Ok(ProtocolDriver::Combilyzer(CombilyzerDriver::new())),
        "texthumalyzerprimushuman" => Ok(ProtocolDriver::Humalyzer(HumalyzerDriver::new())),
        "texthumareaderhs" => Ok(ProtocolDriver::HumaReader(HumaReaderDriver::new())),
        _ => Err(Error::UnknownDriver(name.to_string())),
    }
}

/// Driver names accepted by [`resolve_driver`], in canonical spelling.
pub fn driver_names() -> &'static [&'static str] {
    &[
        "astm",
        "hl7_231",
        "text_combilyzer_13_human",
        "text_humalyzer_primus_human",
        "text_huma_reader_hs",
    ]
}

impl Driver for ProtocolDriver {
    fn frame_start(&self) -> &str {
        match self {
            Self::Astm(d) => d.frame_start(),
            Self::Hl7(d) => d.frame_start(),
            Self::Combilyzer(d) => d.frame_start(),
            Self::Humalyzer(d) => d.frame_start(),
            Self::HumaReader(d) => d.frame_start(),
        }
    }

    fn frame_end(&self) -> &str {
        match self {
            Self::Astm(d) => d.frame_end(),
            Self::Hl7(d) => d.frame_end(),
            Self::Combilyzer(d) => d.frame_end(),
            Self::Humalyzer(d) => d.frame_end(),
            Self::HumaReader(d) => d.frame_end(),
        }
    }

    fn substitutions(&self) -> &[(&'static str, &'static str)] {
        match self {
            Self::Astm(d) => d.substitutions(),
            Self::Hl7(d) => d.substitutions(),
            Self::Combilyzer(d) => d.substitutions(),
            Self::Humalyzer(d) => d.substitutions(),
            Self::HumaReader(d) => d.substitutions(),
        }
    }

    fn decode(&self, frame: &str) -> Result<Decoded> {
        match self {
            Self::Astm(d) => d.decode(frame),
            Self::Hl7(d) => d.decode(frame),
            Self::Combilyzer(d) => d.decode(frame),
            Self::Humalyzer(d) => d.decode(frame),
            Self::HumaReader(d) => d.decode(frame),
        }
    }

    async fn send_acknowledgement(&self, conn: &ConnectionHandle) -> Result<()> {
        match self {
            Self::Astm(d) => d.send_acknowledgement(conn).await,
            Self::Hl7(d) => d.send_acknowledgement(conn).await,
            Self::Combilyzer(d) => d.send_acknowledgement(conn).await,
            Self::Humalyzer(d) => d.send_acknowledgement(conn).await,
            Self::HumaReader(d) => d.send_acknowledgement(conn).await,
        }
    }

    async fn post_decode_actions(&self, conn: &ConnectionHandle, sidecar: &Sidecar) -> Result<()> {
        match self {
            Self::Astm(d) => d.post_decode_actions(conn, sidecar).await,
            Self::Hl7(d) => d.post_decode_actions(conn, sidecar).await,
            Self::Combilyzer(d) => d.post_decode_actions(conn, sidecar).await,
            Self::Humalyzer(d) => d.post_decode_actions(conn, sidecar).await,
            Self::HumaReader(d) => d.post_decode_actions(conn, sidecar).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn query() -> DeviceQueryService {
        DeviceQueryService::new("http://localhost/query", "SN-TEST")
    }

    #[rstest]
    #[case("HL7 2.3.1", "hl7231")]
    #[case("hl7_2.3.1", "hl7231")]
    #[case("hl72.3.1", "hl7231")]
    #[case("  ASTM ", "astm")]
    #[case("Text_Combilyzer_13_Human", "textcombilyzer13human")]
    fn test_normalize_driver_name(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_driver_name(input), expected);
    }

    #[rstest]
    #[case("astm")]
    #[case("HL7 2.3.1")]
    #[case("text combilyzer 1.3 Human")]
    #[case("text_humalyzer_primus_human")]
    #[case("Text Huma Reader HS")]
    fn test_resolve_known_drivers(#[case] name: &str) {
        assert!(resolve_driver(name, query()).is_ok());
    }

    #[test]
    fn test_resolve_unknown_driver_fails() {
        let err = resolve_driver("roche-cobas", query()).unwrap_err();
        assert!(matches!(err, Error::UnknownDriver(name) if name == "roche-cobas"));
    }

    #[test]
    fn test_resolved_markers_match_dialect() {
        let astm = resolve_driver("astm", query()).unwrap();
        assert_eq!(astm.frame_start(), "\x05");
        assert_eq!(astm.frame_end(), "\x04");

        let hl7 = resolve_driver("hl7_231", query()).unwrap();
        assert_eq!(hl7.frame_start(), "\x0b");
        assert_eq!(hl7.frame_end(), "\x1c");

        let huma = resolve_driver("text_huma_reader_hs", query()).unwrap();
        assert_eq!(huma.frame_start(), "");
        assert_eq!(huma.frame_end(), "TRANSFER FINISH");
    }
}
