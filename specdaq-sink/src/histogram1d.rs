//! Single-channel energy spectrum.

use std::collections::BTreeMap;
use std::fs::File;
use std::ops::Range;
use std::path::Path;

use specdaq_core::{Calibration, Detector, Pattern};

use crate::channels;
use crate::event::Event;
use crate::export;
use crate::metadata::Metadata;
use crate::sink::{Engine, Entry, Spectrum};
use crate::Result;

/// Sparse 1D storage.
#[derive(Debug, Default)]
pub struct Engine1D {
    cells: BTreeMap<u16, u64>,
    channel: usize,
    bits: u16,
}

/// Energy spectrum of one channel.
pub type Histogram1D = Spectrum<Engine1D>;

impl Engine1D {
    fn bump(&mut self, bin: u16, count: u64, metadata: &mut Metadata) {
        let total = self.cells.entry(bin).or_insert(0);
        *total = total.saturating_add(count);
        metadata.max_chan = metadata.max_chan.max(bin);
    }
}

impl Engine for Engine1D {
    const KIND: &'static str = "1D";
    const DIMENSIONS: u16 = 1;

    fn configure(&mut self, metadata: &Metadata) {
        self.channel = metadata.axis_channels().first().copied().unwrap_or(0);
        self.bits = metadata.bits;
    }

    fn add_event(&mut self, event: &Event, metadata: &mut Metadata) -> bool {
        let Some(hit) = event.hit(self.channel) else {
            return false;
        };
        let bin = hit.value(0).val(self.bits);
        self.bump(bin, 1, metadata);
        true
    }

    fn count(&self, coords: &[u16]) -> u64 {
        self.cells.get(&coords[0]).copied().unwrap_or(0)
    }

    fn entries(&self, bounds: &[Range<u32>]) -> Vec<Entry> {
        self.cells
            .iter()
            .filter(|&(&bin, _)| bounds[0].contains(&u32::from(bin)))
            .map(|(&bin, &count)| Entry::new(vec![bin], count))
            .collect()
    }

    fn append(&mut self, entry: &Entry, metadata: &mut Metadata) {
        self.bump(entry.coords[0], entry.count, metadata);
    }

    fn clear(&mut self) {
        self.cells.clear();
    }

    fn total(&self) -> u64 {
        self.cells.values().fold(0, |sum, &c| sum.saturating_add(c))
    }

    fn to_text(&self) -> String {
        channels::encode_1d(&self.cells)
    }

    fn from_text(&mut self, text: &str) -> Result<u16> {
        let (cells, max_chan) = channels::decode_1d(text)?;
        self.cells = cells;
        Ok(max_chan)
    }

    fn write_file(&self, dir: &Path, format: &str, metadata: &Metadata) -> Result<bool> {
        if format != "tka" {
            return Ok(false);
        }
        let chan = i16::try_from(self.channel).unwrap_or(-1);
        let live = metadata.live_time.get(&chan).copied().unwrap_or(0.0);
        let real = metadata.real_time.get(&chan).copied().unwrap_or(0.0);
        let path = dir.join(format!("{}.tka", metadata.name));
        export::write_tka(&self.cells, metadata.max_chan, live, real, File::create(path)?)?;
        Ok(true)
    }

    fn read_file(&mut self, path: &Path, format: &str, metadata: &mut Metadata) -> Result<bool> {
        if format != "tka" {
            return Ok(false);
        }
        let spectrum = export::read_tka(path)?;
        let size = u32::from(spectrum.max_chan) + 1;
        let bits = u16::try_from(size.next_power_of_two().trailing_zeros())
            .unwrap_or(16)
            .max(1);

        metadata.dimensions = 1;
        metadata.bits = bits;
        metadata.total_count = spectrum.cells.values().sum();
        metadata.max_chan = spectrum.max_chan;
        metadata.add_pattern = Pattern::from_gates(vec![true]);
        metadata.coinc_pattern = Pattern::from_gates(vec![true]);
        metadata.anti_pattern = Pattern::from_gates(vec![false]);
        metadata.live_time = BTreeMap::from([(0, spectrum.live_time)]);
        metadata.real_time = BTreeMap::from([(0, spectrum.real_time)]);
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            metadata.name = name.replace('.', "_");
        }
        let mut detector = Detector::new("unknown");
        detector.add_calibration(Calibration::new("Energy", bits));
        metadata.detectors = vec![detector];

        self.cells = spectrum.cells;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Sink;
    use specdaq_core::{Hit, HitModel, Spill, StatsType, StatsUpdate, TimeBase};

    fn model() -> HitModel {
        HitModel::new(TimeBase::default())
            .with_value("energy", 16)
            .unwrap()
    }

    fn spill(chan: i16, energies: &[u16]) -> Spill {
        let model = model();
        let mut spill = Spill::new();
        for (n, &e) in energies.iter().enumerate() {
            let mut hit = Hit::new(chan, &model);
            hit.set_timestamp_native(1_000 * n as u64);
            hit.set_value(0, e);
            spill.hits.push(hit);
        }
        spill
    }

    fn histogram() -> Histogram1D {
        Histogram1D::with_metadata(Metadata::new("ge", 1).with_bits(16).with_channels(&[2])).unwrap()
    }

    #[test]
    fn test_accumulates_own_channel() {
        let h = histogram();
        h.push_spill(&spill(2, &[10, 10, 11]));
        h.push_spill(&spill(1, &[10]));
        h.flush();
        assert_eq!(h.data_at(&[10]), 2);
        assert_eq!(h.data_at(&[11]), 1);
        assert_eq!(h.metadata().total_count, 3);
        let entries: Vec<Entry> = h.data_range(&[10..11]).collect();
        assert_eq!(entries, vec![Entry::new(vec![10], 2)]);
    }

    #[test]
    fn test_stop_stats_flush_and_times() {
        let h = histogram();
        let mut s = spill(2, &[5]);
        s.stats.insert(
            2,
            StatsUpdate::new(2, StatsType::Stop)
                .with_item(specdaq_core::items::LIVE_TIME, 9.5)
                .with_item(specdaq_core::items::NATIVE_TIME, 10.0),
        );
        h.push_spill(&s);
        let meta = h.metadata();
        assert_eq!(meta.total_count, 1);
        assert_eq!(meta.live_time.get(&2), Some(&9.5));
        assert_eq!(meta.real_time.get(&2), Some(&10.0));
    }

    #[test]
    fn test_tka_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let h = histogram();
        h.push_spill(&spill(2, &[0, 3, 3]));
        h.flush();
        assert!(h.write_file(dir.path(), "tka").unwrap());

        let back = Histogram1D::new();
        assert!(back.read_file(&dir.path().join("ge.tka"), "tka").unwrap());
        assert_eq!(back.data_at(&[3]), 2);
        assert_eq!(back.data_at(&[0]), 1);
        assert_eq!(back.metadata().max_chan, 3);
        assert_eq!(back.metadata().bits, 2);
        assert!(!back.write_file(dir.path(), "mat").unwrap());
    }

    #[test]
    fn test_text_round_trip() {
        let h = histogram();
        h.push_spill(&spill(2, &[4, 4, 900]));
        h.flush();
        let text = h.channels_to_text();
        let other = histogram();
        assert_eq!(other.channels_from_text(&text).unwrap(), 900);
        assert_eq!(other.channels_to_text(), text);
    }
}
