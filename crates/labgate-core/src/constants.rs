//! Control characters used by the supported instrument protocols.
//!
//! The framing layer works on strings, so the frame markers are exposed as
//! one-character `&str` constants. Single-byte signalling characters that
//! travel outside any frame (the ACK/NAK handshake bytes) are exposed as
//! raw bytes.
//!
//! # Frame markers per protocol
//!
//! | Protocol        | Start        | End          |
//! |-----------------|--------------|--------------|
//! | ASTM            | ENQ (`0x05`) | EOT (`0x04`) |
//! | HL7 2.3.1       | VT (`0x0B`)  | FS (`0x1C`)  |
//! | Text (STX/ETX)  | STX (`0x02`) | ETX (`0x03`) |
//! | Text (sentinel) | *(none)*     | sentinel line |
//!
//! A driver with an empty start marker treats the whole stream as being
//! inside a frame; only the end marker delimits transmissions.

// ============================================================================
// ASTM (E1381/E1394 style)
// ============================================================================

/// ASTM transmission start marker (ENQ).
pub const ASTM_FRAME_START: &str = "\x05";

/// ASTM transmission end marker (EOT).
pub const ASTM_FRAME_END: &str = "\x04";

/// Start-of-text marker separating ASTM records within a transmission.
pub const STX: &str = "\x02";

/// End-of-text marker terminating an ASTM record before its checksum.
pub const ETX: &str = "\x03";

/// End-of-block marker for intermediate ASTM frames.
pub const ETB: &str = "\x17";

/// Positive acknowledgement byte, exchanged outside frames.
pub const ACK: u8 = 0x06;

/// Negative acknowledgement byte.
pub const NAK: u8 = 0x15;

// ============================================================================
// HL7 (MLLP-style block framing)
// ============================================================================

/// HL7 message start marker (vertical tab).
pub const HL7_FRAME_START: &str = "\x0B";

/// HL7 message end marker (file separator).
pub const HL7_FRAME_END: &str = "\x1C";

// ============================================================================
// Shared
// ============================================================================

/// Carriage return, the segment terminator in both ASTM and HL7.
pub const CR: &str = "\r";

/// Line feed.
pub const LF: &str = "\n";

/// Timestamp layout used by ASTM and HL7 result segments (`YYYYMMDDhhmmss`).
pub const WIRE_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
