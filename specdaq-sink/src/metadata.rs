//! Histogram configuration and bookkeeping.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use specdaq_core::{Detector, Pattern};

/// Default coincidence window in nanoseconds.
pub const DEFAULT_COINC_WINDOW_NS: f64 = 50.0;
/// Default bit resolution per axis.
pub const DEFAULT_BITS: u16 = 14;

/// Configuration and running totals of one histogram.
///
/// Owned by exactly one sink; [`crate::Sink::metadata`] hands out copies.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Metadata {
    /// Histogram name, also the export file stem.
    pub name: String,
    /// Engine type name (`"1D"`, `"2D"`), set by the sink.
    pub kind: String,
    /// Declared number of axes.
    pub dimensions: u16,
    /// Bits per axis; an axis has `2^bits` bins.
    pub bits: u16,
    /// Channels feeding the axes, in scan order.
    pub add_pattern: Pattern,
    /// Channels that must all be present in an event.
    pub coinc_pattern: Pattern,
    /// Channels that must all be absent from an event.
    pub anti_pattern: Pattern,
    /// Hits within this many nanoseconds of an event's first hit join it.
    pub coinc_window_ns: f64,
    /// Serve range reads from the cells touched since the previous read.
    pub buffered: bool,
    /// One detector per axis.
    pub detectors: Vec<Detector>,
    /// Events accumulated.
    pub total_count: u64,
    /// Highest coordinate seen on any axis.
    pub max_chan: u16,
    /// Result of the last symmetry check.
    pub symmetrized: Option<bool>,
    /// Live time per source channel, seconds.
    pub live_time: BTreeMap<i16, f64>,
    /// Real time per source channel, seconds.
    pub real_time: BTreeMap<i16, f64>,
    /// Wall-clock time of the first `Start` snapshot.
    pub start_time: Option<DateTime<Utc>>,
    /// Set by every mutation, cleared by the caller.
    pub changed: bool,
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new("histogram", 1)
    }
}

impl Metadata {
    /// Creates metadata for a histogram with `dimensions` axes.
    #[must_use]
    pub fn new(name: impl Into<String>, dimensions: u16) -> Self {
        Self {
            name: name.into(),
            kind: String::new(),
            dimensions,
            bits: DEFAULT_BITS,
            add_pattern: Pattern::default(),
            coinc_pattern: Pattern::default(),
            anti_pattern: Pattern::default(),
            coinc_window_ns: DEFAULT_COINC_WINDOW_NS,
            buffered: false,
            detectors: Vec::new(),
            total_count: 0,
            max_chan: 0,
            symmetrized: None,
            live_time: BTreeMap::new(),
            real_time: BTreeMap::new(),
            start_time: None,
            changed: false,
        }
    }

    /// Sets the bit resolution.
    #[must_use]
    pub fn with_bits(mut self, bits: u16) -> Self {
        self.bits = bits;
        self
    }

    /// Sets the add pattern from channel indices.
    #[must_use]
    pub fn with_channels(mut self, channels: &[usize]) -> Self {
        self.add_pattern = Pattern::from_channels(channels);
        self
    }

    /// Sets the add pattern.
    #[must_use]
    pub fn with_add_pattern(mut self, pattern: Pattern) -> Self {
        self.add_pattern = pattern;
        self
    }

    /// Sets the coincidence pattern.
    #[must_use]
    pub fn with_coinc_pattern(mut self, pattern: Pattern) -> Self {
        self.coinc_pattern = pattern;
        self
    }

    /// Sets the anti-coincidence pattern.
    #[must_use]
    pub fn with_anti_pattern(mut self, pattern: Pattern) -> Self {
        self.anti_pattern = pattern;
        self
    }

    /// Sets the coincidence window.
    #[must_use]
    pub fn with_coinc_window_ns(mut self, ns: f64) -> Self {
        self.coinc_window_ns = ns;
        self
    }

    /// Enables or disables buffered range reads.
    #[must_use]
    pub fn with_buffered(mut self, buffered: bool) -> Self {
        self.buffered = buffered;
        self
    }

    /// Sets the per-axis detectors.
    #[must_use]
    pub fn with_detectors(mut self, detectors: Vec<Detector>) -> Self {
        self.detectors = detectors;
        self
    }

    /// Bins per axis.
    #[must_use]
    pub fn resolution(&self) -> u32 {
        1u32 << self.bits.min(16)
    }

    /// Source channels feeding the axes, in axis order.
    #[must_use]
    pub fn axis_channels(&self) -> Vec<usize> {
        self.add_pattern.selected()
    }

    /// True when channel `chan` matters for event building.
    #[must_use]
    pub fn is_relevant(&self, chan: usize) -> bool {
        self.add_pattern.relevant(chan)
            || self.coinc_pattern.relevant(chan)
            || self.anti_pattern.relevant(chan)
    }
}
