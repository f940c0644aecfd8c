//! specdaq-pixie: XIA Pixie-4 list-mode decoder.
//!
//! Turns raw list-mode buffers into timestamp-ordered [`Hit`]s.
//!
//! # Key Components
//!
//! - [`WordCursor`] - Bounds-checked reader over little-endian words
//! - [`RecordHeader`], [`EventHeader`], [`ChannelBlock`] - Buffer layout
//! - [`reconstruct_timestamp`] - 48-bit clock reassembly with overflow correction
//! - [`DecoderConfig`] - Channel topology and hit model, loadable from JSON
//! - [`decode_buffer`], [`decode_spill`], [`decode_spills`] - Decoding entry points
//!
//! # Buffer Layout
//!
//! ```text
//! record  := word_count module format time_hi time_mid time_lo event*
//! event   := pattern time_hi time_lo block{popcount(pattern & 0xF)}
//! block   := per-format channel words (see [`ListFormat`])
//! ```

pub mod builder;
mod config;
mod cursor;
mod decoder;
mod error;
mod record;
mod timestamp;

pub use config::{fields, ChannelTopology, DecoderConfig, DEFAULT_MAX_RECORD_WORDS};
pub use cursor::WordCursor;
pub use decoder::{decode_buffer, decode_spill, decode_spills, DecodeOutcome};
pub use error::{Error, Result};
pub use record::{
    ChannelBlock, EventHeader, ListFormat, RecordHeader, CHANNELS_PER_MODULE,
    CHANNEL_HEADER_WORDS, EVENT_HEADER_WORDS, RECORD_HEADER_WORDS,
};
pub use timestamp::{correct_high_word, reconstruct_timestamp};

// Re-export core types for convenience
pub use specdaq_core::{Hit, HitModel, Spill};
