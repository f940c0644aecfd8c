//! List-mode buffer decoding.
//!
//! A buffer is a run of records. Each record opens with a six-word header
//! followed by events; each event is a three-word header followed by one
//! channel block per channel flagged in its hit pattern.
//!
//! Decoding is stateless: every buffer carries the coarse clock words needed
//! to rebuild full timestamps, so buffers can be decoded in any order and in
//! parallel.

use std::time::Instant;

use rayon::prelude::*;
use specdaq_core::{Hit, Spill};

use crate::config::{fields, DecoderConfig};
use crate::cursor::WordCursor;
use crate::record::{ChannelBlock, EventHeader, RecordHeader, CHANNELS_PER_MODULE, RECORD_HEADER_WORDS};
use crate::timestamp::reconstruct_timestamp;
use crate::{Error, Result};

/// Result of decoding one buffer.
///
/// Hits from every event completed before `error` are kept.
#[derive(Debug, Default)]
pub struct DecodeOutcome {
    /// Routed hits, timestamp-ordered within each event.
    pub hits: Vec<Hit>,
    /// Records fully decoded.
    pub records: usize,
    /// Events fully decoded, routed or not.
    pub events: usize,
    /// Error that ended decoding early.
    pub error: Option<Error>,
}

impl DecodeOutcome {
    /// True when the whole buffer was consumed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Model field positions the decoder writes into.
#[derive(Clone, Copy, Debug)]
struct FieldMap {
    energy: Option<usize>,
    front: Option<usize>,
    xia_psa: Option<usize>,
    user_psa: Option<usize>,
}

impl FieldMap {
    fn new(config: &DecoderConfig) -> Self {
        let model = &config.model;
        Self {
            energy: model.index_of(fields::ENERGY),
            front: model.index_of(fields::FRONT),
            xia_psa: model.index_of(fields::XIA_PSA),
            user_psa: model.index_of(fields::USER_PSA),
        }
    }

    fn fill(&self, hit: &mut Hit, event: &EventHeader, chan: usize, block: &ChannelBlock) {
        let energy = if event.energy_valid(chan) { block.energy } else { 0 };
        for (idx, val) in [
            (self.energy, energy),
            (self.front, event.front_panel()),
            (self.xia_psa, block.xia_psa),
            (self.user_psa, block.user_psa),
        ] {
            if let Some(idx) = idx {
                hit.set_value(idx, val);
            }
        }
        hit.set_trace(&block.trace);
    }
}

/// Decodes a raw list-mode buffer.
///
/// Decoding stops at a zero word count (end of data), at a record whose
/// length is out of range and at the first malformed record or event.
#[must_use]
pub fn decode_buffer(raw: &[u8], config: &DecoderConfig) -> DecodeOutcome {
    let mut outcome = DecodeOutcome::default();
    let fields = FieldMap::new(config);
    let mut cursor = WordCursor::new(raw);

    while let Ok(word_count) = cursor.peek() {
        if word_count == 0 {
            break;
        }
        if let Err(e) = decode_record(&mut cursor, config, fields, &mut outcome) {
            outcome.error = Some(e);
            break;
        }
    }
    outcome
}

fn decode_record(
    cursor: &mut WordCursor<'_>,
    config: &DecoderConfig,
    fields: FieldMap,
    outcome: &mut DecodeOutcome,
) -> Result<()> {
    let offset = cursor.position();
    let word_count = cursor.peek()?;
    let words = usize::from(word_count);
    if words < RECORD_HEADER_WORDS || words > config.max_record_words {
        return Err(Error::RecordLength {
            offset,
            words,
            max: config.max_record_words,
        });
    }
    if words > cursor.remaining() {
        return Err(Error::RecordLength {
            offset,
            words,
            max: cursor.remaining(),
        });
    }

    let mut record = cursor.take(words)?;
    record.skip(1)?;
    let header = RecordHeader::read(word_count, &mut record)?;

    while !record.is_empty() {
        let hits = decode_event(&header, &mut record, config, fields)?;
        outcome.events += 1;
        outcome.hits.extend(hits);
    }
    outcome.records += 1;
    Ok(())
}

fn decode_event(
    header: &RecordHeader,
    record: &mut WordCursor<'_>,
    config: &DecoderConfig,
    fields: FieldMap,
) -> Result<Vec<Hit>> {
    let event = EventHeader::read(record)?;
    let mut hits = Vec::with_capacity(CHANNELS_PER_MODULE);

    for chan in (0..CHANNELS_PER_MODULE).filter(|&c| event.hit(c)) {
        let block = ChannelBlock::read(header.format, record)?;
        let source = config.topology.source_id(header.module, chan);
        if source < 0 {
            continue;
        }
        let mut hit = Hit::new(source, &config.model);
        hit.set_timestamp_native(reconstruct_timestamp(header, &event, &block));
        fields.fill(&mut hit, &event, chan, &block);
        hits.push(hit);
    }

    hits.sort_by(Hit::cmp_time);
    Ok(hits)
}

/// Decodes a raw spill in place.
///
/// Clears the raw buffer and appends decoded hits. Decode errors are logged
/// and never fail the spill. Returns the number of hits appended.
pub fn decode_spill(spill: &mut Spill, config: &DecoderConfig) -> usize {
    if spill.raw.is_empty() {
        return 0;
    }
    let start = Instant::now();
    let raw = std::mem::take(&mut spill.raw);
    let outcome = decode_buffer(&raw, config);
    let count = outcome.hits.len();

    if let Some(e) = &outcome.error {
        log::warn!(
            "list-mode buffer of {} bytes decoded partially ({} records, {} hits kept): {e}",
            raw.len(),
            outcome.records,
            count
        );
    }
    log::debug!(
        "decoded {} records, {} events, {} hits in {:?}",
        outcome.records,
        outcome.events,
        count,
        start.elapsed()
    );

    spill.hits.extend(outcome.hits);
    count
}

/// Decodes independent raw spills in parallel.
///
/// Returns the total number of hits appended.
pub fn decode_spills(spills: &mut [Spill], config: &DecoderConfig) -> usize {
    spills
        .par_iter_mut()
        .map(|spill| decode_spill(spill, config))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ListFormat;
    use crate::builder::{words_to_bytes, RecordBuilder};

    fn record(format: ListFormat, module: u16, time: [u16; 3], events: &[Vec<u16>]) -> Vec<u16> {
        events
            .iter()
            .fold(
                RecordBuilder::new(format, module).time(time[0], time[1], time[2]),
                |b, e| b.raw_event(e),
            )
            .words()
    }

    #[test]
    fn test_empty_buffer() {
        let outcome = decode_buffer(&[], &DecoderConfig::pixie4_defaults());
        assert!(outcome.is_complete());
        assert!(outcome.hits.is_empty());
        assert_eq!(outcome.records, 0);
    }

    #[test]
    fn test_single_compressed_event() {
        // One event on channels 0 and 2, energy valid on both.
        let rec = record(
            ListFormat::Compressed,
            0,
            [0, 0, 0],
            &[vec![0x0505, 0, 0x0100, 0x0010, 1200, 0x0020, 800]],
        );
        let outcome = decode_buffer(&words_to_bytes(&rec), &DecoderConfig::pixie4_defaults());

        assert!(outcome.is_complete(), "{:?}", outcome.error);
        assert_eq!(outcome.records, 1);
        assert_eq!(outcome.events, 1);
        assert_eq!(outcome.hits.len(), 2);
        assert_eq!(outcome.hits[0].source_channel(), 0);
        assert_eq!(outcome.hits[0].timestamp().native(), 0x10);
        assert_eq!(outcome.hits[0].value(0).raw(), 1200);
        assert_eq!(outcome.hits[1].source_channel(), 2);
        assert_eq!(outcome.hits[1].value(0).raw(), 800);
    }

    #[test]
    fn test_invalid_energy_zeroed() {
        // Channel 1 hit, energy-valid bit 9 clear, front panel bit set.
        let rec = record(
            ListFormat::Psa,
            0,
            [0, 0, 0],
            &[vec![0x0012, 0, 0x0100, 0x0050, 999, 7, 9]],
        );
        let outcome = decode_buffer(&words_to_bytes(&rec), &DecoderConfig::pixie4_defaults());
        let hit = &outcome.hits[0];
        assert_eq!(hit.value(0).raw(), 0);
        assert_eq!(hit.value(1).raw(), 1);
        assert_eq!(hit.value(2).raw(), 7);
        assert_eq!(hit.value(3).raw(), 9);
    }

    #[test]
    fn test_zero_word_count_ends_buffer() {
        let mut words = record(
            ListFormat::Compressed,
            0,
            [0, 0, 0],
            &[vec![0x0101, 0, 0x0100, 0x0010, 5]],
        );
        words.extend([0, 0xFFFF, 0xFFFF]);
        let outcome = decode_buffer(&words_to_bytes(&words), &DecoderConfig::pixie4_defaults());
        assert!(outcome.is_complete());
        assert_eq!(outcome.hits.len(), 1);
    }

    #[test]
    fn test_oversized_record_rejected() {
        let mut config = DecoderConfig::pixie4_defaults();
        config.max_record_words = 8;
        let rec = record(
            ListFormat::Compressed,
            0,
            [0, 0, 0],
            &[vec![0x0101, 0, 0x0100, 0x0010, 5]],
        );
        let outcome = decode_buffer(&words_to_bytes(&rec), &config);
        assert!(matches!(
            outcome.error,
            Some(Error::RecordLength { words: 11, max: 8, .. })
        ));
        assert!(outcome.hits.is_empty());
    }

    #[test]
    fn test_bad_run_type_rejected() {
        let mut rec = record(
            ListFormat::Compressed,
            0,
            [0, 0, 0],
            &[vec![0x0101, 0, 0x0100, 0x0010, 5]],
        );
        rec[2] = 0x0203;
        let outcome = decode_buffer(&words_to_bytes(&rec), &DecoderConfig::pixie4_defaults());
        assert!(matches!(outcome.error, Some(Error::UnsupportedRunType(0x0203))));
    }

    #[test]
    fn test_decode_spill_clears_raw() {
        let rec = record(
            ListFormat::Compressed,
            0,
            [0, 0, 0],
            &[vec![0x0101, 0, 0x0100, 0x0010, 5]],
        );
        let mut spill = Spill::from_raw(words_to_bytes(&rec));
        let n = decode_spill(&mut spill, &DecoderConfig::pixie4_defaults());
        assert_eq!(n, 1);
        assert!(spill.raw.is_empty());
        assert!(spill.is_decoded());
        assert!(spill.validate().is_ok());
    }

    #[test]
    fn test_decode_spills_parallel() {
        let config = DecoderConfig::pixie4_defaults();
        let mut spills: Vec<Spill> = (0..8u16)
            .map(|i| {
                let rec = record(
                    ListFormat::Compressed,
                    0,
                    [0, 0, 0],
                    &[vec![0x0303, 0, 0x0100 + i, 0x0010, 5, 0x0011, 6]],
                );
                Spill::from_raw(words_to_bytes(&rec))
            })
            .collect();
        assert_eq!(decode_spills(&mut spills, &config), 16);
        assert!(spills.iter().all(|s| s.hits.len() == 2));
    }
}
