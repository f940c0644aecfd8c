//! Acquisition batches and per-channel statistics snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::hit::Hit;
use crate::{Error, Result};

/// Position of a statistics snapshot within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StatsType {
    /// First snapshot of a run.
    Start,
    /// Snapshot taken while the run is live.
    #[default]
    Running,
    /// Final snapshot of a run.
    Stop,
}

/// Well-known statistics item keys.
pub mod items {
    /// Fast trigger count.
    pub const TRIGGER_COUNT: &str = "trigger_count";
    /// Live time (seconds) net of slow-filter dead time.
    pub const LIVE_TIME: &str = "live_time";
    /// Live time (seconds) net of fast-trigger dead time.
    pub const LIVE_TRIGGER: &str = "live_trigger";
    /// Module real time (seconds).
    pub const NATIVE_TIME: &str = "native_time";
}

/// Statistics snapshot for one source channel.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StatsUpdate {
    /// Start/running/stop tag.
    pub stats_type: StatsType,
    /// Channel the snapshot belongs to.
    pub source_channel: i16,
    /// Named counters, keyed by [`items`] constants.
    pub items: BTreeMap<String, f64>,
    /// Wall-clock time the snapshot was taken.
    pub lab_time: Option<DateTime<Utc>>,
}

impl StatsUpdate {
    /// Creates an empty snapshot for a channel.
    #[must_use]
    pub fn new(source_channel: i16, stats_type: StatsType) -> Self {
        Self {
            stats_type,
            source_channel,
            ..Self::default()
        }
    }

    /// Sets a named counter.
    #[must_use]
    pub fn with_item(mut self, key: &str, value: f64) -> Self {
        self.items.insert(key.to_string(), value);
        self
    }

    /// Returns a named counter.
    #[must_use]
    pub fn item(&self, key: &str) -> Option<f64> {
        self.items.get(key).copied()
    }
}

/// One acquisition batch.
///
/// A spill arrives raw (buffer filled, no hits), leaves the decoder decoded
/// (buffer cleared, hits filled) and may carry only statistics at the
/// boundaries of a run.
#[derive(Debug, Clone, Default)]
pub struct Spill {
    /// Raw list-mode bytes, little-endian 16-bit words.
    pub raw: Vec<u8>,
    /// Decoded hits, timestamp-ordered within each hardware event.
    pub hits: Vec<Hit>,
    /// Statistics snapshots keyed by source channel.
    pub stats: BTreeMap<i16, StatsUpdate>,
    /// Capture time.
    pub time: DateTime<Utc>,
}

impl Spill {
    /// Creates an empty spill stamped now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            time: Utc::now(),
            ..Self::default()
        }
    }

    /// Creates a raw spill from list-mode bytes.
    #[must_use]
    pub fn from_raw(raw: Vec<u8>) -> Self {
        Self {
            raw,
            ..Self::new()
        }
    }

    /// Creates a statistics-only spill where every snapshot is tagged `stats_type`.
    #[must_use]
    pub fn with_stats<I>(stats: I, stats_type: StatsType) -> Self
    where
        I: IntoIterator<Item = StatsUpdate>,
    {
        let mut spill = Self::new();
        for mut s in stats {
            s.stats_type = stats_type;
            s.lab_time = Some(spill.time);
            spill.stats.insert(s.source_channel, s);
        }
        spill
    }

    /// True when raw bytes are waiting to be decoded.
    #[must_use]
    pub fn is_raw(&self) -> bool {
        !self.raw.is_empty()
    }

    /// True when the spill carries decoded hits.
    #[must_use]
    pub fn is_decoded(&self) -> bool {
        self.raw.is_empty() && !self.hits.is_empty()
    }

    /// True when any snapshot closes the run.
    #[must_use]
    pub fn is_stop(&self) -> bool {
        self.stats.values().any(|s| s.stats_type == StatsType::Stop)
    }

    /// Checks that raw bytes and decoded hits are not both populated.
    ///
    /// # Errors
    /// Returns [`Error::MixedSpill`] when both are present.
    pub fn validate(&self) -> Result<()> {
        if !self.raw.is_empty() && !self.hits.is_empty() {
            return Err(Error::MixedSpill {
                raw_bytes: self.raw.len(),
                hits: self.hits.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hit::HitModel;

    #[test]
    fn test_spill_states() {
        let raw = Spill::from_raw(vec![1, 0, 2, 0]);
        assert!(raw.is_raw());
        assert!(!raw.is_decoded());
        assert!(raw.validate().is_ok());

        let mut decoded = Spill::new();
        decoded.hits.push(Hit::new(0, &HitModel::default()));
        assert!(decoded.is_decoded());

        let mut mixed = decoded.clone();
        mixed.raw = vec![0, 0];
        assert!(mixed.validate().is_err());
    }

    #[test]
    fn test_stats_spill() {
        let spill = Spill::with_stats(
            [
                StatsUpdate::new(0, StatsType::Running).with_item(items::LIVE_TIME, 1.5),
                StatsUpdate::new(1, StatsType::Running),
            ],
            StatsType::Stop,
        );
        assert!(spill.is_stop());
        assert_eq!(spill.stats.len(), 2);
        assert_eq!(spill.stats[&0].item(items::LIVE_TIME), Some(1.5));
        assert_eq!(spill.stats[&1].lab_time, Some(spill.time));
    }
}
