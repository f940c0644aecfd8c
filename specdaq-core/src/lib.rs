//! specdaq-core: Core types for list-mode detector acquisition.
//!
//! This crate provides the event record model, spill batches with their
//! statistics snapshots, channel gate patterns and detector metadata shared
//! by the decoder, the histogram sinks and the acquisition pipeline.
//!

pub mod detector;
pub mod error;
pub mod hit;
pub mod pattern;
pub mod spill;
pub mod time;

pub use detector::{Calibration, Detector};
pub use error::{Error, Result};
pub use hit::{DigitizedValue, Hit, HitModel};
pub use pattern::Pattern;
pub use spill::{items, Spill, StatsType, StatsUpdate};
pub use time::{TimeBase, TimeStamp};
