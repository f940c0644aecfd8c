//! I/O and session error types.

use thiserror::Error;

/// Result type for I/O and session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O and session error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid pipeline configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A worker thread could not be spawned or panicked.
    #[error("session worker '{0}' failed")]
    Worker(&'static str),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] specdaq_core::Error),

    /// Decoder error.
    #[error("decoder error: {0}")]
    DecoderError(#[from] specdaq_pixie::Error),

    /// Histogram sink error.
    #[error("sink error: {0}")]
    SinkError(#[from] specdaq_sink::Error),
}
