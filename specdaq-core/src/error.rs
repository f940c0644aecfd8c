//! Error types for specdaq-core.

use thiserror::Error;

/// Result type alias for specdaq operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for specdaq operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A field name that the hit model does not declare.
    #[error("unknown hit field: {0}")]
    UnknownField(String),

    /// Invalid bit width for a digitized value.
    #[error("invalid bit width: {0} (must be 1..=16)")]
    InvalidBits(u16),

    /// Invalid timebase (zero multiplier or divider).
    #[error("invalid timebase: {multiplier}/{divider} ns")]
    InvalidTimebase { multiplier: u32, divider: u32 },

    /// A spill that holds both raw words and decoded hits.
    #[error("spill holds {raw_bytes} raw bytes and {hits} decoded hits")]
    MixedSpill { raw_bytes: usize, hits: usize },

    /// Binary hit stream I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}
