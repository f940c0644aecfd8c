//! Sink construction by dimensionality.

use std::path::Path;
use std::sync::Arc;

use crate::histogram1d::Histogram1D;
use crate::histogram2d::Histogram2D;
use crate::metadata::Metadata;
use crate::sink::Sink;
use crate::{Error, Result};

/// Creates and initializes the engine matching `metadata.dimensions`.
///
/// # Errors
/// Returns [`Error::UnsupportedDimensions`] for anything but 1 or 2 axes,
/// or the initialization error of the chosen engine.
pub fn create_sink(metadata: Metadata) -> Result<Arc<dyn Sink>> {
    match metadata.dimensions {
        1 => Ok(Arc::new(Histogram1D::with_metadata(metadata)?)),
        2 => Ok(Arc::new(Histogram2D::with_metadata(metadata)?)),
        d => Err(Error::UnsupportedDimensions(d)),
    }
}

/// Loads a histogram from an export file.
///
/// The engine is picked from the format: `tka` is 1D, `m4b` and `mat` are 2D.
/// Returns `Ok(None)` for formats nothing can read.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub fn sink_from_file(path: &Path, format: &str) -> Result<Option<Arc<dyn Sink>>> {
    let sink: Arc<dyn Sink> = match format {
        "tka" => Arc::new(Histogram1D::new()),
        "m4b" | "mat" => Arc::new(Histogram2D::new()),
        _ => return Ok(None),
    };
    Ok(sink.read_file(path, format)?.then_some(sink))
}

/// Export formats each dimensionality can write.
#[must_use]
pub fn output_formats(dimensions: u16) -> &'static [&'static str] {
    match dimensions {
        1 => &["tka"],
        2 => &["m", "m4b", "mat"],
        _ => &[],
    }
}
