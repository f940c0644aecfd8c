//! Record scanner for list-mode dumps.
//!
//! Finds record boundaries from the leading word count of each record so a
//! file can be split into spills without cutting a record in half.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use specdaq_pixie::RECORD_HEADER_WORDS;

/// One list-mode record inside a byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RecordSpan {
    /// Start offset in bytes (inclusive).
    pub start_offset: usize,
    /// End offset in bytes (exclusive).
    pub end_offset: usize,
    /// Module that wrote the record.
    pub module: u16,
}

impl RecordSpan {
    /// Record length in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.end_offset - self.start_offset
    }
}

/// Why a scan stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStop {
    /// Every byte was consumed.
    Complete,
    /// A zero word count marked the end of the data.
    EndMarker,
    /// The word count at `offset` is out of range.
    BadLength {
        /// Byte offset of the record.
        offset: usize,
        /// Declared length in words.
        words: u16,
    },
    /// The record at `offset` runs past the end of the buffer.
    Truncated {
        /// Byte offset of the record.
        offset: usize,
    },
}

/// Scanner for discovering records in list-mode data.
pub struct RecordScanner;

impl RecordScanner {
    /// Scans `data` for consecutive records no longer than `max_words`.
    ///
    /// Returns the records found, the number of bytes they cover and why the
    /// scan stopped. Bytes past the consumed count were not accepted as
    /// records; when the scan stopped on [`ScanStop::Truncated`] they may be
    /// completed by more data.
    #[must_use]
    pub fn scan_records(data: &[u8], max_words: usize) -> (Vec<RecordSpan>, usize, ScanStop) {
        let mut records = Vec::new();
        let mut offset = 0;

        let stop = loop {
            if data.len() < offset + 2 {
                break ScanStop::Complete;
            }
            let words = u16::from_le_bytes([data[offset], data[offset + 1]]);
            if words == 0 {
                break ScanStop::EndMarker;
            }
            let len = usize::from(words);
            if len < RECORD_HEADER_WORDS || len > max_words {
                break ScanStop::BadLength { offset, words };
            }
            let end = offset + len * 2;
            if end > data.len() {
                break ScanStop::Truncated { offset };
            }
            let module = u16::from_le_bytes([data[offset + 2], data[offset + 3]]);
            records.push(RecordSpan {
                start_offset: offset,
                end_offset: end,
                module,
            });
            offset = end;
        };

        (records, offset, stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use specdaq_pixie::builder::RecordBuilder;
    use specdaq_pixie::{ChannelBlock, EventHeader, ListFormat};

    fn record(module: u16, events: usize) -> Vec<u16> {
        let mut builder = RecordBuilder::new(ListFormat::Compressed, module);
        for i in 0..events {
            let lo = u16::try_from(i).unwrap();
            builder = builder.event(
                EventHeader {
                    pattern: 0x0F00,
                    time_hi: 0,
                    time_lo: lo,
                },
                &[(0, ChannelBlock::default())],
            );
        }
        builder.words()
    }

    fn bytes(words: &[u16]) -> Vec<u8> {
        specdaq_pixie::builder::words_to_bytes(words)
    }

    #[test]
    fn test_scan_contiguous_records() {
        let mut words = record(0, 2);
        words.extend(record(1, 3));
        let data = bytes(&words);

        let (records, consumed, stop) = RecordScanner::scan_records(&data, 8192);
        assert_eq!(stop, ScanStop::Complete);
        assert_eq!(consumed, data.len());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].module, 0);
        assert_eq!(records[1].module, 1);
        assert_eq!(records[0].end_offset, records[1].start_offset);
        assert_eq!(records[0].byte_len() + records[1].byte_len(), data.len());
    }

    #[test]
    fn test_scan_stops_at_end_marker() {
        let mut words = record(0, 1);
        let first_len = words.len() * 2;
        words.extend([0, 0, 0]);
        let (records, consumed, stop) = RecordScanner::scan_records(&bytes(&words), 8192);
        assert_eq!(records.len(), 1);
        assert_eq!(consumed, first_len);
        assert_eq!(stop, ScanStop::EndMarker);
    }

    #[test]
    fn test_scan_reports_truncation() {
        let mut words = record(0, 1);
        let first_len = words.len() * 2;
        let second = record(2, 2);
        words.extend(&second[..second.len() - 1]);
        let (records, consumed, stop) = RecordScanner::scan_records(&bytes(&words), 8192);
        assert_eq!(records.len(), 1);
        assert_eq!(consumed, first_len);
        assert_eq!(stop, ScanStop::Truncated { offset: first_len });
    }

    #[test]
    fn test_scan_rejects_bad_length() {
        let words = record(0, 4);
        let (records, _, stop) = RecordScanner::scan_records(&bytes(&words), 8);
        assert!(records.is_empty());
        assert!(matches!(stop, ScanStop::BadLength { offset: 0, .. }));
    }
}
