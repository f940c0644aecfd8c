//! Encoder for synthetic list-mode buffers.
//!
//! Produces byte-exact Pixie-4 records for simulations and tests.

use crate::record::{ChannelBlock, EventHeader, ListFormat, CHANNELS_PER_MODULE, RECORD_HEADER_WORDS};

/// Packs 16-bit words into little-endian bytes.
#[must_use]
pub fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// Builds one list-mode record.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    format: ListFormat,
    module: u16,
    time: [u16; 3],
    body: Vec<u16>,
}

impl RecordBuilder {
    /// Starts an empty record for `module`.
    #[must_use]
    pub fn new(format: ListFormat, module: u16) -> Self {
        Self {
            format,
            module,
            time: [0; 3],
            body: Vec::new(),
        }
    }

    /// Sets the record header clock words.
    #[must_use]
    pub fn time(mut self, hi: u16, mid: u16, lo: u16) -> Self {
        self.time = [hi, mid, lo];
        self
    }

    /// Appends an event.
    ///
    /// `blocks` pairs each channel with its block; channels past the module
    /// width are skipped. The hit bits of the
    /// pattern are set from the channels listed; energy-valid and front panel
    /// bits are taken from `event.pattern`.
    #[must_use]
    pub fn event(mut self, event: EventHeader, blocks: &[(usize, ChannelBlock)]) -> Self {
        let mut sorted: Vec<&(usize, ChannelBlock)> = blocks
            .iter()
            .filter(|(chan, _)| *chan < CHANNELS_PER_MODULE)
            .collect();
        sorted.sort_by_key(|(chan, _)| *chan);
        let hits = sorted.iter().fold(0u16, |acc, (chan, _)| acc | (1u16 << *chan));
        let header = EventHeader {
            pattern: (event.pattern & !0x000F) | hits,
            ..event
        };
        header.write(&mut self.body);
        for (_, block) in sorted {
            block.write(self.format, &mut self.body);
        }
        self
    }

    /// Appends pre-encoded event words verbatim.
    #[must_use]
    pub fn raw_event(mut self, words: &[u16]) -> Self {
        self.body.extend_from_slice(words);
        self
    }

    /// Record words, header included.
    #[must_use]
    pub fn words(&self) -> Vec<u16> {
        let count = u16::try_from(RECORD_HEADER_WORDS + self.body.len()).unwrap_or(u16::MAX);
        let mut words = Vec::with_capacity(RECORD_HEADER_WORDS + self.body.len());
        words.extend([
            count,
            self.module,
            0x0100 | self.format as u16,
            self.time[0],
            self.time[1],
            self.time[2],
        ]);
        words.extend_from_slice(&self.body);
        words
    }

    /// Record bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        words_to_bytes(&self.words())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_words() {
        let words = RecordBuilder::new(ListFormat::Psa, 3).time(1, 2, 3).words();
        assert_eq!(words, vec![6, 3, 0x0102, 1, 2, 3]);
    }

    #[test]
    fn test_event_sets_hit_bits() {
        let block = ChannelBlock {
            trigger_time: 1,
            energy: 2,
            ..ChannelBlock::default()
        };
        let ev = EventHeader {
            pattern: 0x0F00,
            time_hi: 0,
            time_lo: 9,
        };
        let words = RecordBuilder::new(ListFormat::Compressed, 0)
            .event(ev, &[(3, block.clone()), (1, block)])
            .words();
        assert_eq!(words[0], 6 + 3 + 4);
        assert_eq!(words[6], 0x0F0A);
    }
}
