//! Decoder error types.

use thiserror::Error;

/// Result type for decoder operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Decoder error types.
///
/// Every variant raised while walking a buffer ends decoding of that buffer;
/// hits from events completed before the error are kept.
#[derive(Error, Debug)]
pub enum Error {
    /// A read would run past the end of the buffer or of the current record.
    #[error("truncated data at word {offset}: need {needed} words, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Record word count outside the accepted range.
    #[error("invalid record length {words} at word {offset} (max {max})")]
    RecordLength {
        offset: usize,
        words: usize,
        max: usize,
    },

    /// Channel block word count too small to hold its header.
    #[error("invalid channel block length {words} at word {offset}")]
    ChannelLength { offset: usize, words: usize },

    /// Run type other than list mode.
    #[error("unsupported run type: {0:#06x}")]
    UnsupportedRunType(u16),

    /// List-mode sub-format outside 0..=3.
    #[error("unknown list-mode format: {0:#06x}")]
    UnknownFormat(u16),

    /// Invalid decoder configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed JSON configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] specdaq_core::Error),
}
