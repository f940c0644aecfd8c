//! The histogram sink contract and its shared implementation.
//!
//! [`Spectrum`] owns everything common to every histogram (metadata,
//! coincidence building, gating, statistics bookkeeping, locking) and
//! delegates storage to an [`Engine`] chosen by dimensionality.

use std::ops::Range;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use specdaq_core::{items, Detector, DigitizedValue, Spill, StatsType, StatsUpdate};

use crate::event::{CoincidenceBuilder, Event};
use crate::metadata::Metadata;
use crate::{Error, Result};

/// One populated cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    /// One coordinate per axis.
    pub coords: Vec<u16>,
    /// Accumulated count.
    pub count: u64,
}

impl Entry {
    /// Creates an entry.
    #[must_use]
    pub fn new(coords: Vec<u16>, count: u64) -> Self {
        Self { coords, count }
    }
}

/// Finite, single-pass sequence of entries from a range query.
#[derive(Debug)]
pub struct EntryStream {
    inner: std::vec::IntoIter<Entry>,
}

impl EntryStream {
    pub(crate) fn new(entries: Vec<Entry>) -> Self {
        Self {
            inner: entries.into_iter(),
        }
    }
}

impl Iterator for EntryStream {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for EntryStream {}

/// Thread-safe histogram accumulating decoded spills.
///
/// Every method may be called from any thread. Mutations are serialized;
/// each read sees the state before or after any single mutation.
pub trait Sink: Send + Sync {
    /// Configures the histogram and clears its counts.
    ///
    /// # Errors
    /// Returns an error when the add pattern does not select one channel per
    /// axis, the dimensionality does not match the engine, or the bit
    /// resolution is out of range. Metadata is left untouched on error.
    fn initialize(&self, metadata: Metadata) -> Result<()>;

    /// Accumulates the hits of a decoded spill and merges its statistics.
    fn push_spill(&self, spill: &Spill);

    /// Closes pending coincidence events and accumulates them.
    fn flush(&self);

    /// Count at `coords`; zero for absent cells or a wrong arity.
    fn data_at(&self, coords: &[u16]) -> u64;

    /// Cells inside `[start, end)` on every axis.
    ///
    /// An empty `bounds` selects the whole histogram. In buffered mode only
    /// cells touched since the previous range read are returned.
    fn data_range(&self, bounds: &[Range<u32>]) -> EntryStream;

    /// Adds an entry's count to its cell.
    fn append(&self, entry: &Entry);

    /// Exports to `dir/<name>.<format>`.
    ///
    /// Returns `Ok(false)` for formats without a codec.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    fn write_file(&self, dir: &Path, format: &str) -> Result<bool>;

    /// Replaces the histogram with the contents of `path`.
    ///
    /// Returns `Ok(false)` for formats without a codec, leaving the
    /// histogram untouched.
    ///
    /// # Errors
    /// Returns an error if reading or parsing fails.
    fn read_file(&self, path: &Path, format: &str) -> Result<bool>;

    /// Snapshot of the metadata.
    fn metadata(&self) -> Metadata;

    /// Assigns detectors to axes.
    ///
    /// Exactly one per axis is taken as-is; a longer list is indexed by
    /// source channel and filtered through the add pattern.
    fn set_detectors(&self, detectors: &[Detector]);

    /// Clears counts and run bookkeeping, keeping the configuration.
    fn reset(&self);

    /// Run-length text form of the counts.
    fn channels_to_text(&self) -> String;

    /// Replaces the counts from run-length text, returning `max_chan`.
    ///
    /// `total_count` is recomputed from the decoded cells and any earlier
    /// symmetry result is dropped.
    ///
    /// # Errors
    /// Returns an error on malformed text; the counts are left untouched.
    fn channels_from_text(&self, text: &str) -> Result<u16>;

    /// Calibrated bin positions along axis `dimension`.
    fn axis_values(&self, dimension: usize) -> Vec<f64>;

    /// Checks mirror symmetry, recording the result in metadata.
    ///
    /// Returns `None` for engines without a notion of symmetry.
    fn check_symmetry(&self) -> Option<bool>;

    /// Clears the `changed` flag.
    fn reset_changed(&self);
}

/// Storage backend of a [`Spectrum`].
pub trait Engine: Send + Sync + Default {
    /// Type name recorded in metadata.
    const KIND: &'static str;
    /// Number of axes.
    const DIMENSIONS: u16;

    /// Takes axis routing and options from validated metadata.
    fn configure(&mut self, metadata: &Metadata);

    /// Accumulates one gated event. Returns false when the event carries
    /// none of the axis channels.
    fn add_event(&mut self, event: &Event, metadata: &mut Metadata) -> bool;

    /// Count at `coords` (arity already checked).
    fn count(&self, coords: &[u16]) -> u64;

    /// Cells inside `bounds` (one range per axis).
    fn entries(&self, bounds: &[Range<u32>]) -> Vec<Entry>;

    /// Adds `entry.count` to a cell (arity already checked).
    fn append(&mut self, entry: &Entry, metadata: &mut Metadata);

    /// Drops every count.
    fn clear(&mut self);

    /// Sum of every stored count.
    fn total(&self) -> u64;

    /// Run-length text of the counts.
    fn to_text(&self) -> String;

    /// Replaces counts from run-length text, returning `max_chan`.
    ///
    /// # Errors
    /// Returns an error on malformed text without modifying the counts.
    fn from_text(&mut self, text: &str) -> Result<u16>;

    /// Writes `format` into `dir`.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    fn write_file(&self, dir: &Path, format: &str, metadata: &Metadata) -> Result<bool>;

    /// Reads `format` from `path`, updating metadata to describe it.
    ///
    /// # Errors
    /// Returns an error if reading fails.
    fn read_file(&mut self, path: &Path, format: &str, metadata: &mut Metadata) -> Result<bool>;

    /// Mirror symmetry of the counts, if the engine has one.
    fn symmetric(&self) -> Option<bool> {
        None
    }
}

struct State<E> {
    metadata: Metadata,
    engine: E,
    builder: CoincidenceBuilder,
    initialized: bool,
}

/// A histogram: metadata, event building and an [`Engine`] behind a lock.
pub struct Spectrum<E: Engine> {
    state: RwLock<State<E>>,
}

impl<E: Engine> Default for Spectrum<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Engine> std::fmt::Debug for Spectrum<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("Spectrum")
            .field("kind", &E::KIND)
            .field("name", &state.metadata.name)
            .field("total_count", &state.metadata.total_count)
            .finish_non_exhaustive()
    }
}

impl<E: Engine> Spectrum<E> {
    /// Creates an uninitialized histogram.
    #[must_use]
    pub fn new() -> Self {
        let mut metadata = Metadata::new(String::new(), E::DIMENSIONS);
        metadata.kind = E::KIND.to_string();
        Self {
            state: RwLock::new(State {
                metadata,
                engine: E::default(),
                builder: CoincidenceBuilder::default(),
                initialized: false,
            }),
        }
    }

    /// Creates and initializes a histogram.
    ///
    /// # Errors
    /// See [`Sink::initialize`].
    pub fn with_metadata(metadata: Metadata) -> Result<Self> {
        let spectrum = Self::new();
        spectrum.initialize(metadata)?;
        Ok(spectrum)
    }

    fn read(&self) -> RwLockReadGuard<'_, State<E>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State<E>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn validate(metadata: &Metadata) -> Result<()> {
        if metadata.dimensions != E::DIMENSIONS {
            return Err(Error::UnsupportedDimensions(metadata.dimensions));
        }
        if metadata.bits == 0 || metadata.bits > 16 {
            return Err(Error::InvalidBits(metadata.bits));
        }
        let found = metadata.add_pattern.count();
        let expected = usize::from(E::DIMENSIONS);
        if found != expected {
            log::warn!(
                "invalid {} histogram '{}': add pattern selects {found} channels",
                E::KIND,
                metadata.name
            );
            return Err(Error::InvalidPattern { expected, found });
        }
        Ok(())
    }
}

impl<E: Engine> State<E> {
    fn accumulate(&mut self, events: Vec<Event>) {
        for event in events {
            if !event.passes(&self.metadata.coinc_pattern, &self.metadata.anti_pattern) {
                continue;
            }
            if self.engine.add_event(&event, &mut self.metadata) {
                self.metadata.total_count += 1;
                self.metadata.changed = true;
            }
        }
    }

    fn merge_stats(&mut self, stats: &StatsUpdate) {
        let Ok(chan) = usize::try_from(stats.source_channel) else {
            return;
        };
        if !self.metadata.add_pattern.relevant(chan) {
            return;
        }
        let meta = &mut self.metadata;
        if stats.stats_type == StatsType::Start && meta.start_time.is_none() {
            meta.start_time = stats.lab_time;
        }
        if let Some(live) = stats.item(items::LIVE_TIME) {
            meta.live_time.insert(stats.source_channel, live);
        }
        if let Some(real) = stats.item(items::NATIVE_TIME) {
            meta.real_time.insert(stats.source_channel, real);
        }
        meta.changed = true;
    }
}

impl<E: Engine> Sink for Spectrum<E> {
    fn initialize(&self, metadata: Metadata) -> Result<()> {
        Self::validate(&metadata)?;
        let mut metadata = metadata;
        metadata.kind = E::KIND.to_string();
        metadata
            .detectors
            .resize(usize::from(E::DIMENSIONS), Detector::default());

        let mut state = self.write();
        state.engine = E::default();
        state.engine.configure(&metadata);
        state.builder = CoincidenceBuilder::new(metadata.coinc_window_ns);
        state.metadata = metadata;
        state.initialized = true;
        Ok(())
    }

    fn push_spill(&self, spill: &Spill) {
        let mut state = self.write();
        if !state.initialized {
            log::debug!("{} histogram not initialized, spill ignored", E::KIND);
            return;
        }
        for hit in &spill.hits {
            let relevant = usize::try_from(hit.source_channel())
                .is_ok_and(|c| state.metadata.is_relevant(c));
            if relevant {
                let closed = state.builder.push(hit.clone());
                state.accumulate(closed);
            }
        }
        for stats in spill.stats.values() {
            state.merge_stats(stats);
        }
        if spill.is_stop() {
            let closed = state.builder.flush();
            state.accumulate(closed);
        }
    }

    fn flush(&self) {
        let mut state = self.write();
        let closed = state.builder.flush();
        state.accumulate(closed);
    }

    fn data_at(&self, coords: &[u16]) -> u64 {
        if coords.len() != usize::from(E::DIMENSIONS) {
            return 0;
        }
        self.read().engine.count(coords)
    }

    fn data_range(&self, bounds: &[Range<u32>]) -> EntryStream {
        let state = self.read();
        let dims = usize::from(E::DIMENSIONS);
        let full;
        let bounds = if bounds.len() == dims {
            bounds
        } else {
            full = vec![0..state.metadata.resolution(); dims];
            &full[..]
        };
        EntryStream::new(state.engine.entries(bounds))
    }

    fn append(&self, entry: &Entry) {
        if entry.coords.len() != usize::from(E::DIMENSIONS) || entry.count == 0 {
            return;
        }
        let mut state = self.write();
        let State {
            engine, metadata, ..
        } = &mut *state;
        engine.append(entry, metadata);
        metadata.total_count += entry.count;
        metadata.changed = true;
    }

    fn write_file(&self, dir: &Path, format: &str) -> Result<bool> {
        let state = self.read();
        state.engine.write_file(dir, format, &state.metadata)
    }

    fn read_file(&self, path: &Path, format: &str) -> Result<bool> {
        let mut state = self.write();
        let mut scratch = state.metadata.clone();
        if !state.engine.read_file(path, format, &mut scratch)? {
            return Ok(false);
        }
        scratch.kind = E::KIND.to_string();
        scratch.changed = true;
        state.engine.configure(&scratch);
        state.builder = CoincidenceBuilder::new(scratch.coinc_window_ns);
        state.metadata = scratch;
        state.initialized = true;
        Ok(true)
    }

    fn metadata(&self) -> Metadata {
        self.read().metadata.clone()
    }

    fn set_detectors(&self, detectors: &[Detector]) {
        let mut state = self.write();
        let meta = &mut state.metadata;
        let dims = usize::from(E::DIMENSIONS);
        meta.detectors.resize(dims, Detector::default());

        if detectors.len() == dims {
            meta.detectors = detectors.to_vec();
        } else if detectors.len() > dims {
            let picked: Vec<Detector> = detectors
                .iter()
                .enumerate()
                .filter(|(i, _)| meta.add_pattern.relevant(*i))
                .map(|(_, d)| d.clone())
                .take(dims)
                .collect();
            for (slot, det) in meta.detectors.iter_mut().zip(picked) {
                *slot = det;
            }
        }
        meta.changed = true;
    }

    fn reset(&self) {
        let mut state = self.write();
        state.engine.clear();
        let window = state.metadata.coinc_window_ns;
        state.builder = CoincidenceBuilder::new(window);
        let meta = &mut state.metadata;
        meta.total_count = 0;
        meta.max_chan = 0;
        meta.symmetrized = None;
        meta.live_time.clear();
        meta.real_time.clear();
        meta.start_time = None;
        meta.changed = true;
    }

    fn channels_to_text(&self) -> String {
        self.read().engine.to_text()
    }

    fn channels_from_text(&self, text: &str) -> Result<u16> {
        let mut state = self.write();
        let max_chan = state.engine.from_text(text)?;
        let total = state.engine.total();
        let meta = &mut state.metadata;
        meta.max_chan = max_chan;
        meta.total_count = total;
        meta.symmetrized = None;
        meta.changed = true;
        Ok(max_chan)
    }

    fn axis_values(&self, dimension: usize) -> Vec<f64> {
        let state = self.read();
        let meta = &state.metadata;
        if dimension >= usize::from(E::DIMENSIONS) {
            return Vec::new();
        }
        let bits = meta.bits;
        let detector = meta.detectors.get(dimension);
        (0..meta.resolution())
            .map(|bin| {
                let value = DigitizedValue::new(u16::try_from(bin).unwrap_or(u16::MAX), bits);
                detector.map_or_else(|| f64::from(value.raw()), |d| d.calibrate(value))
            })
            .collect()
    }

    fn check_symmetry(&self) -> Option<bool> {
        let mut state = self.write();
        let symmetric = state.engine.symmetric()?;
        state.metadata.symmetrized = Some(symmetric);
        Some(symmetric)
    }

    fn reset_changed(&self) {
        self.write().metadata.changed = false;
    }
}
