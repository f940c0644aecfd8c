//! Two-axis coincidence histogram.

use std::collections::BTreeMap;
use std::fs::File;
use std::ops::Range;
use std::path::Path;
use std::sync::{Mutex, PoisonError, TryLockError};
use std::thread;
use std::time::Duration;

use rayon::prelude::*;
use specdaq_core::{Calibration, Detector, Pattern};

use crate::channels;
use crate::event::Event;
use crate::export::{self, CellWidth};
use crate::metadata::Metadata;
use crate::sink::{Engine, Entry, Spectrum};
use crate::Result;

const BACKOFF_START: Duration = Duration::from_millis(1);
const BACKOFF_MAX: Duration = Duration::from_millis(50);

/// Sparse 2D storage with an optional delta of recently touched cells.
#[derive(Debug, Default)]
pub struct Engine2D {
    cells: BTreeMap<(u16, u16), u64>,
    delta: Mutex<BTreeMap<(u16, u16), u64>>,
    axes: [usize; 2],
    bits: u16,
    buffered: bool,
}

/// Coincidence histogram of two channels' energies.
pub type Histogram2D = Spectrum<Engine2D>;

impl Engine2D {
    fn coordinate(&self, event: &Event, axis: usize) -> u16 {
        event
            .hit(self.axes[axis])
            .map_or(0, |h| h.value(0).val(self.bits))
    }

    fn bump(&mut self, point: (u16, u16), count: u64, metadata: &mut Metadata) {
        let total = self.cells.entry(point).or_insert(0);
        *total = total.saturating_add(count);
        if self.buffered {
            let total = *total;
            self.delta
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(point, total);
        }
        metadata.max_chan = metadata.max_chan.max(point.0).max(point.1);
    }

    /// Takes the delta map, retrying with backoff while another reader holds it.
    fn take_delta(&self) -> BTreeMap<(u16, u16), u64> {
        let mut backoff = BACKOFF_START;
        loop {
            match self.delta.try_lock() {
                Ok(mut delta) => return std::mem::take(&mut *delta),
                Err(TryLockError::Poisoned(poisoned)) => {
                    return std::mem::take(&mut *poisoned.into_inner());
                }
                Err(TryLockError::WouldBlock) => {
                    log::debug!("delta map busy, retrying in {backoff:?}");
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                }
            }
        }
    }

    fn replace_cells(&mut self, cells: BTreeMap<(u16, u16), u64>) {
        self.cells = cells;
        self.delta
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn is_symmetric(cells: &BTreeMap<(u16, u16), u64>) -> bool {
        cells
            .par_iter()
            .all(|(&(i, j), &count)| cells.get(&(j, i)) == Some(&count))
    }

    fn read_matrix(&mut self, path: &Path, width: CellWidth, metadata: &mut Metadata) -> Result<()> {
        let bytes = std::fs::read(path)?;
        let (cells, side) = export::read_dense(&bytes, width)?;
        let bits = u16::try_from(side.trailing_zeros())
            .unwrap_or(12)
            .clamp(1, 12);
        let symmetric = Self::is_symmetric(&cells);

        metadata.bits = bits;
        metadata.dimensions = 2;
        metadata.total_count = cells.values().sum();
        metadata.max_chan = u16::try_from(side - 1).unwrap_or(u16::MAX);
        metadata.add_pattern = Pattern::from_gates(vec![true, true]);
        metadata.coinc_pattern = Pattern::from_gates(vec![true, true]);
        metadata.anti_pattern = Pattern::from_gates(vec![false, false]);
        metadata.symmetrized = Some(symmetric);
        metadata.live_time.clear();
        metadata.real_time.clear();
        metadata.start_time = None;
        if let Some(stem) = path.file_name().and_then(|n| n.to_str()) {
            metadata.name = stem.replace('.', "_");
        }

        let mut first = Detector::new("unknown1");
        first.add_calibration(Calibration::new("Energy", bits));
        let second = if symmetric {
            first.clone()
        } else {
            let mut d = Detector::new("unknown2");
            d.add_calibration(Calibration::new("Energy", bits));
            d
        };
        metadata.detectors = vec![first, second];

        self.replace_cells(cells);
        Ok(())
    }
}

impl Engine for Engine2D {
    const KIND: &'static str = "2D";
    const DIMENSIONS: u16 = 2;

    fn configure(&mut self, metadata: &Metadata) {
        let channels = metadata.axis_channels();
        self.axes = [
            channels.first().copied().unwrap_or(0),
            channels.get(1).copied().unwrap_or(1),
        ];
        self.bits = metadata.bits;
        self.buffered = metadata.buffered;
    }

    fn add_event(&mut self, event: &Event, metadata: &mut Metadata) -> bool {
        if !event.has(self.axes[0]) && !event.has(self.axes[1]) {
            return false;
        }
        let point = (self.coordinate(event, 0), self.coordinate(event, 1));
        self.bump(point, 1, metadata);
        true
    }

    fn count(&self, coords: &[u16]) -> u64 {
        self.cells
            .get(&(coords[0], coords[1]))
            .copied()
            .unwrap_or(0)
    }

    fn entries(&self, bounds: &[Range<u32>]) -> Vec<Entry> {
        let inside = |&(i, j): &(u16, u16)| {
            bounds[0].contains(&u32::from(i)) && bounds[1].contains(&u32::from(j))
        };
        if self.buffered {
            self.take_delta()
                .into_iter()
                .filter(|(point, _)| inside(point))
                .map(|((i, j), count)| Entry::new(vec![i, j], count))
                .collect()
        } else {
            self.cells
                .iter()
                .filter(|&(point, _)| inside(point))
                .map(|(&(i, j), &count)| Entry::new(vec![i, j], count))
                .collect()
        }
    }

    fn append(&mut self, entry: &Entry, metadata: &mut Metadata) {
        self.bump((entry.coords[0], entry.coords[1]), entry.count, metadata);
    }

    fn clear(&mut self) {
        self.replace_cells(BTreeMap::new());
    }

    fn total(&self) -> u64 {
        self.cells.values().fold(0, |sum, &c| sum.saturating_add(c))
    }

    fn to_text(&self) -> String {
        channels::encode_2d(&self.cells)
    }

    fn from_text(&mut self, text: &str) -> Result<u16> {
        let (cells, max_chan) = channels::decode_2d(text)?;
        self.replace_cells(cells);
        Ok(max_chan)
    }

    fn write_file(&self, dir: &Path, format: &str, metadata: &Metadata) -> Result<bool> {
        let path = dir.join(format!("{}.{format}", metadata.name));
        if format == "m" {
            let file = File::create(&path)?;
            export::write_script(&self.cells, metadata.bits, metadata.total_count, file)?;
            return Ok(true);
        }
        let Some(width) = CellWidth::for_format(format) else {
            return Ok(false);
        };
        let side = width.export_side(metadata.bits);
        let saturated = export::write_dense(&self.cells, side, width, File::create(&path)?)?;
        if saturated > 0 {
            log::warn!(
                "{}: {saturated} cells exceed the {format} cell width and were saturated",
                path.display()
            );
        }
        Ok(true)
    }

    fn read_file(&mut self, path: &Path, format: &str, metadata: &mut Metadata) -> Result<bool> {
        let Some(width) = CellWidth::for_format(format) else {
            return Ok(false);
        };
        self.read_matrix(path, width, metadata)?;
        Ok(true)
    }

    fn symmetric(&self) -> Option<bool> {
        Some(Self::is_symmetric(&self.cells))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Sink;
    use specdaq_core::{Hit, HitModel, Spill, TimeBase};

    fn spill(pairs: &[(u16, u16)]) -> Spill {
        let model = HitModel::new(TimeBase::default())
            .with_value("energy", 16)
            .unwrap();
        let mut spill = Spill::new();
        for (n, &(e0, e1)) in pairs.iter().enumerate() {
            let t = 1_000 * n as u64;
            for (chan, energy) in [(0, e0), (1, e1)] {
                let mut hit = Hit::new(chan, &model);
                hit.set_timestamp_native(t);
                hit.set_value(0, energy);
                spill.hits.push(hit);
            }
        }
        spill
    }

    fn histogram(bits: u16, buffered: bool) -> Histogram2D {
        Histogram2D::with_metadata(
            Metadata::new("test", 2)
                .with_bits(bits)
                .with_channels(&[0, 1])
                .with_buffered(buffered),
        )
        .unwrap()
    }

    #[test]
    fn test_energy_truncated_to_bits() {
        let h = histogram(8, false);
        h.push_spill(&spill(&[(0x1234, 0xFF00)]));
        h.flush();
        assert_eq!(h.data_at(&[0x12, 0xFF]), 1);
        assert_eq!(h.metadata().max_chan, 0xFF);
    }

    #[test]
    fn test_missing_axis_maps_to_zero() {
        let model = HitModel::new(TimeBase::default())
            .with_value("energy", 16)
            .unwrap();
        let mut hit = Hit::new(1, &model);
        hit.set_value(0, 5 << 8);
        let mut s = Spill::new();
        s.hits.push(hit);

        let h = histogram(8, false);
        h.push_spill(&s);
        h.flush();
        assert_eq!(h.data_at(&[0, 5]), 1);
        assert_eq!(h.metadata().total_count, 1);
    }

    #[test]
    fn test_symmetry_check() {
        let h = histogram(16, false);
        h.push_spill(&spill(&[(3, 7), (7, 3)]));
        h.flush();
        assert_eq!(h.check_symmetry(), Some(true));
        assert_eq!(h.metadata().symmetrized, Some(true));

        h.append(&Entry::new(vec![3, 7], 1));
        assert_eq!(h.check_symmetry(), Some(false));
        assert_eq!(h.check_symmetry(), Some(false));
        assert_eq!(h.metadata().symmetrized, Some(false));
    }

    #[test]
    fn test_unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        let h = histogram(8, false);
        assert!(!h.write_file(dir.path(), "n42").unwrap());
        assert!(!h.read_file(&dir.path().join("x.n42"), "n42").unwrap());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_matrix_import() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gg.dat.m4b");
        let cells = BTreeMap::from([((1, 2), 4), ((2, 1), 4)]);
        export::write_dense(&cells, 16, CellWidth::U32, File::create(&path).unwrap()).unwrap();

        let h = Histogram2D::new();
        assert!(h.read_file(&path, "m4b").unwrap());
        let meta = h.metadata();
        assert_eq!(meta.bits, 4);
        assert_eq!(meta.total_count, 8);
        assert_eq!(meta.name, "gg_dat_m4b");
        assert_eq!(meta.symmetrized, Some(true));
        assert_eq!(meta.detectors[0].name, "unknown1");
        assert_eq!(meta.detectors[1].name, "unknown1");
        assert_eq!(h.data_at(&[1, 2]), 4);
    }

    #[test]
    fn test_asymmetric_import_keeps_two_detectors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mat");
        let cells = BTreeMap::from([((0, 1), 1)]);
        export::write_dense(&cells, 4, CellWidth::U16, File::create(&path).unwrap()).unwrap();

        let h = Histogram2D::new();
        assert!(h.read_file(&path, "mat").unwrap());
        let meta = h.metadata();
        assert_eq!(meta.detectors[1].name, "unknown2");
        assert_eq!(meta.detectors[1].calibrations[&2].kind, "Energy");
    }

    #[test]
    fn test_text_import_replaces_totals() {
        let source = histogram(8, false);
        source.append(&Entry::new(vec![3, 4], 7));

        let target = histogram(8, false);
        target.append(&Entry::new(vec![1, 1], 40));
        assert_eq!(target.check_symmetry(), Some(true));

        assert_eq!(target.channels_from_text(&source.channels_to_text()).unwrap(), 4);
        let meta = target.metadata();
        assert_eq!(meta.total_count, 7);
        assert_eq!(meta.max_chan, 4);
        assert_eq!(meta.symmetrized, None);
        assert_eq!(target.data_at(&[1, 1]), 0);
        assert_eq!(target.data_at(&[3, 4]), 7);
    }

    #[test]
    fn test_single_cell_import_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.mat");
        std::fs::write(&path, [5u8, 0]).unwrap();

        let h = histogram(8, false);
        assert!(h.read_file(&path, "mat").is_err());
        assert_eq!(h.metadata().bits, 8);

        h.push_spill(&spill(&[(0x0A00, 0x1400)]));
        h.flush();
        assert_eq!(h.data_at(&[0x0A, 0x14]), 1);
    }

    #[test]
    fn test_wide_histogram_exports_legacy_grid() {
        let dir = tempfile::tempdir().unwrap();
        let h = histogram(14, false);
        h.append(&Entry::new(vec![5, 4000], 3));
        h.append(&Entry::new(vec![4095, 0], 1));
        // Beyond the legacy grid, dropped from dense exports.
        h.append(&Entry::new(vec![9000, 1], 2));
        assert!(h.write_file(dir.path(), "mat").unwrap());

        let path = dir.path().join("test.mat");
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            4096 * 4096 * 2
        );

        let back = Histogram2D::new();
        assert!(back.read_file(&path, "mat").unwrap());
        let meta = back.metadata();
        assert_eq!(meta.bits, 12);
        assert_eq!(meta.max_chan, 4095);
        assert_eq!(meta.total_count, 4);
        assert_eq!(back.data_at(&[5, 4000]), 3);
        assert_eq!(back.data_at(&[4095, 0]), 1);
    }

    #[test]
    fn test_m4b_export_keeps_legacy_side() {
        let dir = tempfile::tempdir().unwrap();
        let h = histogram(8, false);
        h.push_spill(&spill(&[(0x0A00, 0x1400)]));
        h.flush();
        assert!(h.write_file(dir.path(), "m4b").unwrap());

        let path = dir.path().join("test.m4b");
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            4096 * 4096 * 4
        );
        let back = Histogram2D::new();
        assert!(back.read_file(&path, "m4b").unwrap());
        assert_eq!(back.metadata().bits, 12);
        assert_eq!(back.data_at(&[0x0A, 0x14]), 1);
    }
}
