//! Memory-mapped list-mode dumps and the spill source replaying them.

use crate::config::PipelineConfig;
use crate::scanner::{RecordScanner, RecordSpan, ScanStop};
use crate::session::SpillSource;
use crate::Result;
use memmap2::Mmap;
use specdaq_core::{Spill, StatsType, StatsUpdate};
use specdaq_pixie::DecoderConfig;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A memory-mapped list-mode file.
///
/// Cloning shares the mapping.
#[derive(Clone)]
pub struct ListModeFile {
    mmap: Arc<Mmap>,
    path: PathBuf,
}

impl ListModeFile {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap: Arc::new(mmap),
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Path the file was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scans the whole file for records.
    #[must_use]
    pub fn scan(&self, max_words: usize) -> (Vec<RecordSpan>, usize, ScanStop) {
        RecordScanner::scan_records(self.as_bytes(), max_words)
    }

    /// Replays the file as spills of about `config.spill_words` words.
    #[must_use]
    pub fn spills(&self, decoder: &DecoderConfig, config: &PipelineConfig) -> FileSpillSource {
        FileSpillSource::new(self.clone(), decoder, config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    Data,
    Stop,
    Done,
}

/// Spill source backed by a [`ListModeFile`].
///
/// Emits a `Start` statistics spill, raw spills cut on record boundaries
/// and a `Stop` statistics spill. A record larger than the spill size
/// travels alone. Bytes after the last complete record are never emitted.
pub struct FileSpillSource {
    file: ListModeFile,
    records: Vec<RecordSpan>,
    next_record: usize,
    spill_bytes: usize,
    source_ids: Vec<i16>,
    phase: Phase,
}

impl FileSpillSource {
    /// Scans `file` and prepares the replay.
    #[must_use]
    pub fn new(file: ListModeFile, decoder: &DecoderConfig, config: &PipelineConfig) -> Self {
        let (records, consumed, stop) = file.scan(decoder.max_record_words);
        match stop {
            ScanStop::Complete | ScanStop::EndMarker => {}
            ScanStop::BadLength { offset, words } => log::warn!(
                "{}: record at byte {offset} declares {words} words, ignoring the rest",
                file.path().display()
            ),
            ScanStop::Truncated { offset } => log::warn!(
                "{}: record at byte {offset} is truncated, ignoring the rest",
                file.path().display()
            ),
        }
        log::debug!(
            "{}: {} records in {consumed} of {} bytes",
            file.path().display(),
            records.len(),
            file.len()
        );
        Self {
            file,
            records,
            next_record: 0,
            spill_bytes: config.spill_bytes(),
            source_ids: decoder.topology.source_ids(),
            phase: Phase::Start,
        }
    }

    /// Number of complete records in the file.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    fn stats_spill(&self, stats_type: StatsType) -> Spill {
        Spill::with_stats(
            self.source_ids
                .iter()
                .map(|&id| StatsUpdate::new(id, stats_type)),
            stats_type,
        )
    }

    fn next_raw(&mut self) -> Option<Spill> {
        let first = self.records.get(self.next_record)?;
        let start = first.start_offset;
        let mut end = first.end_offset;
        self.next_record += 1;
        while let Some(record) = self.records.get(self.next_record) {
            if record.end_offset - start > self.spill_bytes {
                break;
            }
            end = record.end_offset;
            self.next_record += 1;
        }
        Some(Spill::from_raw(self.file.as_bytes()[start..end].to_vec()))
    }
}

impl SpillSource for FileSpillSource {
    fn next_spill(&mut self) -> Option<Spill> {
        loop {
            match self.phase {
                Phase::Start => {
                    self.phase = Phase::Data;
                    return Some(self.stats_spill(StatsType::Start));
                }
                Phase::Data => {
                    if let Some(spill) = self.next_raw() {
                        return Some(spill);
                    }
                    self.phase = Phase::Stop;
                }
                Phase::Stop => {
                    self.phase = Phase::Done;
                    return Some(self.stats_spill(StatsType::Stop));
                }
                Phase::Done => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use specdaq_pixie::builder::RecordBuilder;
    use specdaq_pixie::{ChannelBlock, EventHeader, ListFormat};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn record_words(events: u16) -> Vec<u16> {
        let mut builder = RecordBuilder::new(ListFormat::Compressed, 0);
        for i in 0..events {
            builder = builder.event(
                EventHeader {
                    pattern: 0x0F00,
                    time_hi: 0,
                    time_lo: i,
                },
                &[(0, ChannelBlock::default())],
            );
        }
        builder.words()
    }

    #[test]
    fn test_list_mode_file() {
        let mut file = NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..64).collect();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let reader = ListModeFile::open(file.path()).unwrap();
        assert_eq!(reader.len(), 64);
        assert!(!reader.is_empty());
        assert_eq!(reader.as_bytes(), &data[..]);
        assert_eq!(reader.path(), file.path());
    }

    #[test]
    fn test_empty_file_brackets_only() {
        let file = NamedTempFile::new().unwrap();
        let reader = ListModeFile::open(file.path()).unwrap();
        assert!(reader.is_empty());

        let mut source = reader.spills(&DecoderConfig::default(), &PipelineConfig::default());
        let start = source.next_spill().unwrap();
        assert!(!start.is_raw());
        assert!(start
            .stats
            .values()
            .all(|s| s.stats_type == StatsType::Start));
        assert!(source.next_spill().unwrap().is_stop());
        assert!(source.next_spill().is_none());
        assert!(source.next_spill().is_none());
    }

    #[test]
    fn test_spills_cut_on_record_boundaries() {
        let one = record_words(2);
        let mut words = Vec::new();
        for _ in 0..5 {
            words.extend(&one);
        }
        let bytes = specdaq_pixie::builder::words_to_bytes(&words);
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        // Trailing partial record.
        file.write_all(&bytes[..10]).unwrap();
        file.flush().unwrap();

        let reader = ListModeFile::open(file.path()).unwrap();
        // Room for two records per spill.
        let config = PipelineConfig::default().with_spill_words(one.len() * 2 + 1);
        let mut source = reader.spills(&DecoderConfig::default(), &config);
        assert_eq!(source.record_count(), 5);

        let spills: Vec<Spill> = std::iter::from_fn(|| source.next_spill()).collect();
        assert_eq!(spills.len(), 5);
        let sizes: Vec<usize> = spills[1..4].iter().map(|s| s.raw.len() / 2).collect();
        assert_eq!(sizes, vec![one.len() * 2, one.len() * 2, one.len()]);
        assert!(spills[4].is_stop());

        let replayed: Vec<u8> = spills.iter().flat_map(|s| s.raw.clone()).collect();
        assert_eq!(replayed, bytes);
    }

    #[test]
    fn test_oversized_record_travels_alone() {
        let big = record_words(4);
        let small = record_words(1);
        let mut words = big.clone();
        words.extend(&small);
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&specdaq_pixie::builder::words_to_bytes(&words))
            .unwrap();
        file.flush().unwrap();

        let reader = ListModeFile::open(file.path()).unwrap();
        let config = PipelineConfig::default().with_spill_words(small.len());
        let mut source = reader.spills(&DecoderConfig::default(), &config);
        source.next_spill();
        assert_eq!(source.next_spill().unwrap().raw.len() / 2, big.len());
        assert_eq!(source.next_spill().unwrap().raw.len() / 2, small.len());
        assert!(source.next_spill().unwrap().is_stop());
    }
}
