//! Histogram sink error types.

use thiserror::Error;

/// Result type for sink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Sink error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Add pattern selects the wrong number of channels.
    #[error("add pattern selects {found} channels, {expected} required")]
    InvalidPattern { expected: usize, found: usize },

    /// No engine for the declared dimensionality.
    #[error("unsupported histogram dimensionality: {0}")]
    UnsupportedDimensions(u16),

    /// Bit resolution outside 1..=16.
    #[error("invalid bit resolution: {0} (must be 1..=16)")]
    InvalidBits(u16),

    /// Malformed channel-data text.
    #[error("invalid channel data at token {position}: {token:?}")]
    ChannelData { position: usize, token: String },

    /// Dense matrix file that is not a square power-of-two grid.
    #[error("invalid matrix file: {0}")]
    InvalidMatrix(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] specdaq_core::Error),
}
