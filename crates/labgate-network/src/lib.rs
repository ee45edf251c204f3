//! TCP transport for the labgate gateway.
//!
//! Laboratory analyzers connect as plain TCP clients, one socket per device.
//! This crate owns the accept loop, one reader task per connection, and the
//! registry of live connections; it knows nothing about the instrument
//! protocols themselves.
//!
//! # Architecture
//!
//! ```text
//! Analyzer A ──┐
//!              │  reader task per connection
//! Analyzer B ──┼──────> mpsc fan-in channel ──> single pipeline consumer
//!              │
//! Analyzer C ──┘        ConnectionRegistry (addr -> write handle)
//! ```
//!
//! Every read from a connection is forwarded as an [`Inbound::Data`] event
//! into one shared, unbounded channel, preserving arrival order. The
//! pipeline is the only consumer, which serializes all downstream work
//! without explicit locking.
//!
//! Writes back to an instrument (acknowledgements, ASTM query answers) go
//! through the [`ConnectionHandle`] held in the [`ConnectionRegistry`].
//! Single-byte reads are additionally teed into a per-connection control
//! channel so the pipeline can await an ACK/NAK byte mid-handshake without
//! competing with the reader task for the socket.

pub mod listener;
pub mod registry;

pub use listener::{DeviceListener, Inbound, NetworkError};
pub use registry::{ConnectionHandle, ConnectionRegistry};
