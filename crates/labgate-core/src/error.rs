use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Protocol errors
    #[error("failed to decode frame: {0}")]
    DecodeFailed(String),

    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    // Routing errors
    #[error("no device registered for address: {0}")]
    DeviceNotFound(String),

    #[error("no live connection for address: {0}")]
    ConnectionNotFound(String),

    // Handshake errors
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("query service error: {0}")]
    QueryService(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
