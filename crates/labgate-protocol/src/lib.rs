//! Instrument protocol support for the labgate gateway.
//!
//! Laboratory analyzers speak legacy byte-oriented dialects over TCP. This
//! crate turns those streams into structured results in three layers:
//!
//! - [`FrameScanner`]: a per-connection state machine that extracts
//!   complete protocol frames from a stream whose markers may arrive split
//!   across reads.
//! - [`Driver`]: the capability contract every dialect implements, naming
//!   its frame markers, pre-frame character substitutions, decoding, and
//!   the acknowledgement behaviour the protocol requires.
//! - Concrete drivers: ASTM ([`astm`]), HL7 2.3.1 ([`hl7`]) and the
//!   simpler line-oriented vendor dialects ([`text`]).
//!
//! Drivers are resolved from a configured name via [`resolve_driver`];
//! adding a dialect means adding one [`ProtocolDriver`] variant, the
//! framing and pipeline layers stay untouched.

#![allow(async_fn_in_trait)]

pub mod astm;
pub mod driver;
pub mod framer;
pub mod hl7;
pub mod text;

pub use driver::{
    Decoded, Driver, ProtocolDriver, Sidecar, driver_names, normalize_driver_name, resolve_driver,
};
pub use framer::FrameScanner;
