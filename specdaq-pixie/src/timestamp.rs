//! Pixie-4 timing helpers.
//!

use crate::record::{ChannelBlock, EventHeader, RecordHeader};

/// Reassembles a 48-bit trigger timestamp with overflow correction.
///
/// The fine trigger time of a channel is latched after the event header's
/// time words, so either counter may have wrapped in between:
///
/// - a trigger time above the event's low word means the low word rolled
///   over after the trigger; the middle word is one too high and is
///   decremented (borrowing from the high word when it is zero);
/// - an event middle word below the record's middle word means the middle
///   counter wrapped after the record header was written; the record high
///   word is one too low and is incremented.
///
/// Formats 0 and 1 carry the channel's own high word, which is used as-is.
#[inline]
#[must_use]
pub fn reconstruct_timestamp(
    record: &RecordHeader,
    event: &EventHeader,
    block: &ChannelBlock,
) -> u64 {
    let hi = match block.time_hi {
        Some(hi) => u64::from(hi),
        None => correct_high_word(record.time_hi, record.time_mid, event.time_hi),
    };
    let coarse = (hi << 32) | (u64::from(event.time_hi) << 16);
    let coarse = if block.trigger_time > event.time_lo {
        coarse.saturating_sub(1 << 16)
    } else {
        coarse
    };
    coarse + u64::from(block.trigger_time)
}

/// High word of the event clock given the record header capture.
///
/// Formula: if `event_mid` < `record_mid`, extend by one
#[inline]
#[must_use]
pub fn correct_high_word(record_hi: u16, record_mid: u16, event_mid: u16) -> u64 {
    if event_mid < record_mid {
        u64::from(record_hi) + 1
    } else {
        u64::from(record_hi)
    }
}
