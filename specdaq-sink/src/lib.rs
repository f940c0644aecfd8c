//! specdaq-sink: Histogram sinks for decoded list-mode data.
//!
//! Sinks group decoded hits into coincidence events, gate them and
//! accumulate them into sparse histograms that can be queried and exported
//! while acquisition is still running.
//!
//! # Key Components
//!
//! - [`Sink`] - Thread-safe histogram contract
//! - [`Spectrum`] - Shared implementation over an [`Engine`]
//! - [`Histogram1D`], [`Histogram2D`] - Concrete engines
//! - [`create_sink`] - Engine selection from [`Metadata`]
//! - [`channels`] - Run-length text codec
//! - [`export`] - `m`, `m4b`, `mat` and `tka` file codecs

pub mod channels;
mod error;
mod event;
pub mod export;
mod factory;
mod histogram1d;
mod histogram2d;
mod metadata;
mod sink;

pub use error::{Error, Result};
pub use event::{CoincidenceBuilder, Event};
pub use factory::{create_sink, output_formats, sink_from_file};
pub use histogram1d::{Engine1D, Histogram1D};
pub use histogram2d::{Engine2D, Histogram2D};
pub use metadata::{Metadata, DEFAULT_BITS, DEFAULT_COINC_WINDOW_NS};
pub use sink::{Engine, Entry, EntryStream, Sink, Spectrum};
