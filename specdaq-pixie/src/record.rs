//! Pixie-4 list-mode record and event headers.

use crate::cursor::WordCursor;
use crate::{Error, Result};

/// Words in a record (buffer) header.
pub const RECORD_HEADER_WORDS: usize = 6;
/// Words in an event header.
pub const EVENT_HEADER_WORDS: usize = 3;
/// Words in a format 0/1 channel header, ahead of any trace.
pub const CHANNEL_HEADER_WORDS: usize = 9;
/// Channels per module.
pub const CHANNELS_PER_MODULE: usize = 4;

const RUN_TYPE_MASK: u16 = 0x0F00;
const LIST_MODE_RUN: u16 = 0x0100;
const FORMAT_MASK: u16 = 0x000F;

/// List-mode sub-format, the low nibble of the record format word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ListFormat {
    /// Full channel header plus waveform trace.
    Traces = 0,
    /// Full channel header, no trace.
    Full = 1,
    /// Trigger time, energy and both PSA values.
    Psa = 2,
    /// Trigger time and energy only.
    Compressed = 3,
}

impl ListFormat {
    /// Decodes the record format word.
    ///
    /// # Errors
    /// Returns an error for non-list-mode run types and unknown sub-formats.
    pub fn from_format_word(word: u16) -> Result<Self> {
        if word & RUN_TYPE_MASK != LIST_MODE_RUN {
            return Err(Error::UnsupportedRunType(word));
        }
        match word & FORMAT_MASK {
            0 => Ok(ListFormat::Traces),
            1 => Ok(ListFormat::Full),
            2 => Ok(ListFormat::Psa),
            3 => Ok(ListFormat::Compressed),
            _ => Err(Error::UnknownFormat(word)),
        }
    }

    /// True when each channel block carries its own real-time high word.
    #[inline]
    #[must_use]
    pub fn has_channel_time_hi(self) -> bool {
        matches!(self, ListFormat::Traces | ListFormat::Full)
    }
}

/// Header at the start of every list-mode record.
///
/// The three time words capture the module clock when the buffer was opened,
/// coarser than the per-channel trigger times that follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Record length in words, header included.
    pub word_count: u16,
    /// Module number.
    pub module: u16,
    /// Sub-format.
    pub format: ListFormat,
    /// Clock bits 32..48.
    pub time_hi: u16,
    /// Clock bits 16..32.
    pub time_mid: u16,
    /// Clock bits 0..16.
    pub time_lo: u16,
}

impl RecordHeader {
    /// Reads the five words following the word count.
    ///
    /// # Errors
    /// Returns an error on truncation or an invalid format word.
    pub fn read(word_count: u16, cursor: &mut WordCursor<'_>) -> Result<Self> {
        let module = cursor.read()?;
        let format = ListFormat::from_format_word(cursor.read()?)?;
        Ok(Self {
            word_count,
            module,
            format,
            time_hi: cursor.read()?,
            time_mid: cursor.read()?,
            time_lo: cursor.read()?,
        })
    }
}

/// Header of one hardware event inside a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    /// Hit pattern: bits 0..4 channels hit, bit 4 front panel, bits 8..12 energy valid.
    pub pattern: u16,
    /// Event clock bits 16..32.
    pub time_hi: u16,
    /// Event clock bits 0..16.
    pub time_lo: u16,
}

impl EventHeader {
    /// Reads an event header.
    ///
    /// # Errors
    /// Returns an error on truncation.
    pub fn read(cursor: &mut WordCursor<'_>) -> Result<Self> {
        Ok(Self {
            pattern: cursor.read()?,
            time_hi: cursor.read()?,
            time_lo: cursor.read()?,
        })
    }

    /// True when channel `chan` took part in the event.
    #[inline]
    #[must_use]
    pub fn hit(&self, chan: usize) -> bool {
        chan < CHANNELS_PER_MODULE && self.pattern & (1 << chan) != 0
    }

    /// True when the energy of channel `chan` is valid.
    #[inline]
    #[must_use]
    pub fn energy_valid(&self, chan: usize) -> bool {
        chan < CHANNELS_PER_MODULE && self.pattern & (1 << (chan + 8)) != 0
    }

    /// Appends the three header words.
    pub fn write(&self, out: &mut Vec<u16>) {
        out.extend([self.pattern, self.time_hi, self.time_lo]);
    }

    /// Front panel input state.
    #[inline]
    #[must_use]
    pub fn front_panel(&self) -> u16 {
        (self.pattern >> 4) & 1
    }
}

/// Fields read from one channel block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelBlock {
    /// Fine trigger time, clock bits 0..16.
    pub trigger_time: u16,
    /// Pulse height.
    pub energy: u16,
    /// XIA pulse shape analysis value.
    pub xia_psa: u16,
    /// User pulse shape analysis value.
    pub user_psa: u16,
    /// Channel real-time bits 32..48 (formats 0 and 1).
    pub time_hi: Option<u16>,
    /// Waveform samples (format 0).
    pub trace: Vec<u16>,
}

impl ChannelBlock {
    /// Reads one channel block laid out by `format`.
    ///
    /// # Errors
    /// Returns an error on truncation or a channel word count below the header size.
    pub fn read(format: ListFormat, cursor: &mut WordCursor<'_>) -> Result<Self> {
        let mut block = ChannelBlock::default();
        match format {
            ListFormat::Traces | ListFormat::Full => {
                let offset = cursor.position();
                let words = usize::from(cursor.read()?);
                block.trigger_time = cursor.read()?;
                block.energy = cursor.read()?;
                block.xia_psa = cursor.read()?;
                block.user_psa = cursor.read()?;
                cursor.skip(3)?;
                block.time_hi = Some(cursor.read()?);
                if format == ListFormat::Traces {
                    let trace_len = words
                        .checked_sub(CHANNEL_HEADER_WORDS)
                        .ok_or(Error::ChannelLength { offset, words })?;
                    block.trace = cursor.read_words(trace_len)?;
                }
            }
            ListFormat::Psa => {
                block.trigger_time = cursor.read()?;
                block.energy = cursor.read()?;
                block.xia_psa = cursor.read()?;
                block.user_psa = cursor.read()?;
            }
            ListFormat::Compressed => {
                block.trigger_time = cursor.read()?;
                block.energy = cursor.read()?;
            }
        }
        Ok(block)
    }

    /// Appends the block in `format` layout; the inverse of [`Self::read`].
    pub fn write(&self, format: ListFormat, out: &mut Vec<u16>) {
        match format {
            ListFormat::Traces | ListFormat::Full => {
                let trace: &[u16] = if format == ListFormat::Traces {
                    &self.trace
                } else {
                    &[]
                };
                let words = u16::try_from(CHANNEL_HEADER_WORDS + trace.len()).unwrap_or(u16::MAX);
                out.extend([
                    words,
                    self.trigger_time,
                    self.energy,
                    self.xia_psa,
                    self.user_psa,
                    0,
                    0,
                    0,
                    self.time_hi.unwrap_or(0),
                ]);
                out.extend_from_slice(trace);
            }
            ListFormat::Psa => {
                out.extend([self.trigger_time, self.energy, self.xia_psa, self.user_psa]);
            }
            ListFormat::Compressed => out.extend([self.trigger_time, self.energy]),
        }
    }
}
