//! Channel topology and decoder configuration.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use specdaq_core::{HitModel, TimeBase};

use crate::record::{CHANNELS_PER_MODULE, RECORD_HEADER_WORDS};
use crate::{Error, Result};

/// Largest record the Pixie-4 list-mode buffer can hold, in words.
pub const DEFAULT_MAX_RECORD_WORDS: usize = 8192;

/// Field names the decoder fills, in Pixie-4 default order.
pub mod fields {
    /// Pulse height.
    pub const ENERGY: &str = "energy";
    /// Front panel input state at the time of the event.
    pub const FRONT: &str = "front";
    /// XIA pulse shape analysis value.
    pub const XIA_PSA: &str = "XIA_PSA";
    /// User pulse shape analysis value.
    pub const USER_PSA: &str = "user_PSA";
}

/// Maps (module, channel) to source channel ids.
///
/// Ids below zero mark channels with no detector attached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTopology {
    modules: Vec<[i16; CHANNELS_PER_MODULE]>,
}

impl Default for ChannelTopology {
    fn default() -> Self {
        Self::sequential(1)
    }
}

impl ChannelTopology {
    /// Creates a topology from per-module channel tables.
    #[must_use]
    pub fn new(modules: Vec<[i16; CHANNELS_PER_MODULE]>) -> Self {
        Self { modules }
    }

    /// Numbers every channel of `modules` modules consecutively from zero.
    #[must_use]
    pub fn sequential(modules: usize) -> Self {
        let modules = (0..modules)
            .map(|m| {
                let mut row = [-1i16; CHANNELS_PER_MODULE];
                for (c, id) in row.iter_mut().enumerate() {
                    *id = i16::try_from(m * CHANNELS_PER_MODULE + c).unwrap_or(-1);
                }
                row
            })
            .collect();
        Self { modules }
    }

    /// Source id for a hardware channel, `-1` when unrouted.
    #[inline]
    #[must_use]
    pub fn source_id(&self, module: u16, chan: usize) -> i16 {
        self.modules
            .get(usize::from(module))
            .and_then(|row| row.get(chan))
            .copied()
            .unwrap_or(-1)
    }

    /// Per-module channel tables.
    #[must_use]
    pub fn modules(&self) -> &[[i16; CHANNELS_PER_MODULE]] {
        &self.modules
    }

    /// Number of modules.
    #[must_use]
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Routed source ids in module/channel order.
    #[must_use]
    pub fn source_ids(&self) -> Vec<i16> {
        self.modules
            .iter()
            .flat_map(|row| row.iter().copied())
            .filter(|id| *id >= 0)
            .collect()
    }
}

/// Everything the decoder needs besides the raw bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Module/channel routing.
    pub topology: ChannelTopology,
    /// Hit layout shared by every routed channel.
    pub model: HitModel,
    /// Records longer than this are rejected.
    pub max_record_words: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self::pixie4_defaults()
    }
}

// Intermediate structs for the JSON schema
#[derive(Deserialize, Default)]
#[serde(default)]
struct JsonConfig {
    modules: Option<Vec<Vec<i16>>>,
    model: JsonModel,
    max_record_words: Option<usize>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct JsonModel {
    timebase: JsonTimeBase,
    values: Option<Vec<JsonValue>>,
    trace_length: usize,
}

#[derive(Deserialize)]
#[serde(default)]
struct JsonTimeBase {
    multiplier: u32,
    divider: u32,
}

impl Default for JsonTimeBase {
    fn default() -> Self {
        let tb = TimeBase::pixie4();
        Self {
            multiplier: tb.multiplier,
            divider: tb.divider,
        }
    }
}

#[derive(Deserialize)]
struct JsonValue {
    name: String,
    bits: u16,
}

impl DecoderConfig {
    /// One Pixie-4 module, channels 0..4, the default hit model.
    #[must_use]
    pub fn pixie4_defaults() -> Self {
        Self {
            topology: ChannelTopology::default(),
            model: pixie4_model(TimeBase::pixie4(), 0),
            max_record_words: DEFAULT_MAX_RECORD_WORDS,
        }
    }

    /// Replaces the topology.
    #[must_use]
    pub fn with_topology(mut self, topology: ChannelTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Replaces the hit model.
    #[must_use]
    pub fn with_model(mut self, model: HitModel) -> Self {
        self.model = model;
        self
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let json_config: JsonConfig = serde_json::from_reader(reader)?;
        Self::from_json_config(json_config)
    }

    /// Load configuration from a JSON string.
    ///
    /// Missing keys fall back to [`Self::pixie4_defaults`].
    ///
    /// # Errors
    /// Returns an error on malformed JSON or an invalid configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let json_config: JsonConfig = serde_json::from_str(json)?;
        Self::from_json_config(json_config)
    }

    fn from_json_config(config: JsonConfig) -> Result<Self> {
        let topology = match config.modules {
            Some(rows) => {
                let mut modules = Vec::with_capacity(rows.len());
                for (m, row) in rows.into_iter().enumerate() {
                    if row.len() > CHANNELS_PER_MODULE {
                        return Err(Error::Config(format!(
                            "module {m} lists {} channels, at most {CHANNELS_PER_MODULE} allowed",
                            row.len()
                        )));
                    }
                    let mut ids = [-1i16; CHANNELS_PER_MODULE];
                    ids[..row.len()].copy_from_slice(&row);
                    modules.push(ids);
                }
                ChannelTopology::new(modules)
            }
            None => ChannelTopology::default(),
        };

        let timebase = TimeBase::new(config.model.timebase.multiplier, config.model.timebase.divider)?;
        let model = match config.model.values {
            Some(values) => {
                let mut model = HitModel::new(timebase).with_trace_length(config.model.trace_length);
                for v in values {
                    model.add_value(v.name, v.bits)?;
                }
                model
            }
            None => pixie4_model(timebase, config.model.trace_length),
        };

        let config = Self {
            topology,
            model,
            max_record_words: config.max_record_words.unwrap_or(DEFAULT_MAX_RECORD_WORDS),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration can decode anything at all.
    ///
    /// # Errors
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.max_record_words < RECORD_HEADER_WORDS {
            return Err(Error::Config(format!(
                "max_record_words {} is smaller than a record header",
                self.max_record_words
            )));
        }
        if self.model.index_of(fields::ENERGY).is_none() {
            return Err(Error::Config(format!(
                "hit model has no '{}' field",
                fields::ENERGY
            )));
        }
        let mut ids = self.topology.source_ids();
        let routed = ids.len();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != routed {
            return Err(Error::Config("source id routed from more than one channel".into()));
        }
        Ok(())
    }
}

fn pixie4_model(timebase: TimeBase, trace_length: usize) -> HitModel {
    let mut model = HitModel::new(timebase).with_trace_length(trace_length);
    for (name, bits) in [
        (fields::ENERGY, 16),
        (fields::FRONT, 1),
        (fields::XIA_PSA, 16),
        (fields::USER_PSA, 16),
    ] {
        // Widths are within 1..=16.
        let _ = model.add_value(name, bits);
    }
    model
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixie4_defaults() {
        let config = DecoderConfig::pixie4_defaults();
        assert_eq!(config.topology.module_count(), 1);
        assert_eq!(config.topology.source_id(0, 2), 2);
        assert_eq!(config.topology.source_id(1, 0), -1);
        assert_eq!(config.model.value_count(), 4);
        assert_eq!(config.model.index_of("front"), Some(1));
        assert_eq!(config.model.bits_of(1), Some(1));
        assert_eq!(config.model.timebase, TimeBase::pixie4());
        assert_eq!(config.max_record_words, DEFAULT_MAX_RECORD_WORDS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sequential_topology() {
        let topo = ChannelTopology::sequential(2);
        assert_eq!(topo.source_id(1, 3), 7);
        assert_eq!(topo.source_ids(), (0..8).collect::<Vec<i16>>());
    }

    #[test]
    fn test_json_loading() {
        let json = r#"{
            "modules": [[0, 1, -1, 3], [4]],
            "model": {
                "timebase": {"multiplier": 10, "divider": 1},
                "values": [{"name": "energy", "bits": 14}],
                "trace_length": 32
            },
            "max_record_words": 4096
        }"#;

        let config = DecoderConfig::from_json(json).expect("Failed to parse JSON");

        assert_eq!(config.topology.source_id(0, 2), -1);
        assert_eq!(config.topology.source_id(1, 0), 4);
        assert_eq!(config.topology.source_id(1, 1), -1);
        assert_eq!(config.model.value_count(), 1);
        assert_eq!(config.model.bits_of(0), Some(14));
        assert_eq!(config.model.trace_length, 32);
        assert_eq!(config.model.timebase.multiplier, 10);
        approx::assert_relative_eq!(config.model.timebase.tick_ns(), 10.0);
        assert_eq!(config.max_record_words, 4096);
    }

    #[test]
    fn test_json_partial_config() {
        let json = r#"{ "model": { "trace_length": 100 } }"#;
        let config = DecoderConfig::from_json(json).expect("Should parse partial config");

        assert_eq!(config.model.trace_length, 100);
        assert_eq!(config.model.value_count(), 4);
        assert_eq!(config.model.timebase, TimeBase::pixie4());
        assert_eq!(config.topology, ChannelTopology::default());
    }

    #[test]
    fn test_json_empty() {
        let config = DecoderConfig::from_json("{}").expect("Should parse minimal config");
        assert_eq!(config, DecoderConfig::pixie4_defaults());
    }

    #[test]
    fn test_too_many_channels_rejected() {
        let json = r#"{ "modules": [[0, 1, 2, 3, 4]] }"#;
        assert!(matches!(DecoderConfig::from_json(json), Err(Error::Config(_))));
    }

    #[test]
    fn test_duplicate_source_rejected() {
        let json = r#"{ "modules": [[0, 1], [1]] }"#;
        assert!(matches!(DecoderConfig::from_json(json), Err(Error::Config(_))));
    }

    #[test]
    fn test_bad_timebase_rejected() {
        let json = r#"{ "model": { "timebase": {"multiplier": 1, "divider": 0} } }"#;
        assert!(matches!(
            DecoderConfig::from_json(json),
            Err(Error::CoreError(_))
        ));
    }

    #[test]
    fn test_model_without_energy_rejected() {
        let json = r#"{ "model": { "values": [{"name": "tdc", "bits": 12}] } }"#;
        assert!(matches!(DecoderConfig::from_json(json), Err(Error::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("topology.json");
        std::fs::write(&path, r#"{ "modules": [[9, 8, 7, 6]] }"#).expect("write");
        let config = DecoderConfig::from_file(&path).expect("load");
        assert_eq!(config.topology.source_id(0, 0), 9);
    }
}
