//! Hit model and decoded event records.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::{ErrorKind, Read, Write};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::time::{TimeBase, TimeStamp};
use crate::{Error, Result};

/// A digitized scalar with a declared bit width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DigitizedValue {
    val: u16,
    bits: u16,
}

impl DigitizedValue {
    /// Creates a value, masking `val` to `bits`.
    #[must_use]
    pub fn new(val: u16, bits: u16) -> Self {
        let mut v = Self { val: 0, bits };
        v.set_val(val);
        v
    }

    /// Declared bit width.
    #[inline]
    #[must_use]
    pub fn bits(&self) -> u16 {
        self.bits
    }

    /// Value at its native bit width.
    #[inline]
    #[must_use]
    pub fn raw(&self) -> u16 {
        self.val
    }

    /// Value rescaled to `bits` of resolution.
    ///
    /// Narrower targets drop low bits, wider targets pad with zero bits. A
    /// zero-bit target is always 0.
    #[must_use]
    pub fn val(&self, bits: u16) -> u16 {
        match bits.cmp(&self.bits) {
            Ordering::Equal => self.val,
            Ordering::Less => self
                .val
                .checked_shr(u32::from(self.bits - bits))
                .unwrap_or(0),
            Ordering::Greater => {
                let shifted = u32::from(self.val) << (bits - self.bits).min(16);
                u16::try_from(shifted).unwrap_or(u16::MAX)
            }
        }
    }

    /// Sets the value, masked to the declared width.
    pub fn set_val(&mut self, val: u16) {
        let mask = if self.bits >= 16 {
            u32::from(u16::MAX)
        } else {
            (1u32 << self.bits) - 1
        };
        self.val = u16::try_from(u32::from(val) & mask).unwrap_or(u16::MAX);
    }
}

/// Schema shared by every hit of one channel group.
///
/// Declares the named digitized fields, the clock they were sampled with and
/// the length of the waveform trace (0 when traces are not recorded).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HitModel {
    /// Tick duration of hit timestamps.
    pub timebase: TimeBase,
    values: Vec<DigitizedValue>,
    names: Vec<String>,
    /// Number of trace samples carried by each hit.
    pub trace_length: usize,
}

impl HitModel {
    /// Creates an empty model on the given timebase.
    #[must_use]
    pub fn new(timebase: TimeBase) -> Self {
        Self {
            timebase,
            ..Self::default()
        }
    }

    /// Appends a named field.
    ///
    /// # Errors
    /// Returns an error if `bits` is outside `1..=16`.
    pub fn add_value(&mut self, name: impl Into<String>, bits: u16) -> Result<()> {
        if bits == 0 || bits > 16 {
            return Err(Error::InvalidBits(bits));
        }
        self.values.push(DigitizedValue::new(0, bits));
        self.names.push(name.into());
        Ok(())
    }

    /// Builder form of [`Self::add_value`].
    ///
    /// # Errors
    /// Returns an error if `bits` is outside `1..=16`.
    pub fn with_value(mut self, name: impl Into<String>, bits: u16) -> Result<Self> {
        self.add_value(name, bits)?;
        Ok(self)
    }

    /// Sets the trace length.
    #[must_use]
    pub fn with_trace_length(mut self, len: usize) -> Self {
        self.trace_length = len;
        self
    }

    /// Number of declared fields.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Index of a named field.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Name of the field at `idx`.
    #[must_use]
    pub fn name_of(&self, idx: usize) -> Option<&str> {
        self.names.get(idx).map(String::as_str)
    }

    /// Bit width of the field at `idx`.
    #[must_use]
    pub fn bits_of(&self, idx: usize) -> Option<u16> {
        self.values.get(idx).map(DigitizedValue::bits)
    }

    /// Zeroed field values sized to this model.
    #[must_use]
    pub fn blank_values(&self) -> Vec<DigitizedValue> {
        self.values.clone()
    }
}

/// One decoded detection event on a single source channel.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Hit {
    source_channel: i16,
    timestamp: TimeStamp,
    values: Vec<DigitizedValue>,
    trace: Vec<u16>,
}

impl Default for Hit {
    fn default() -> Self {
        Self::new(-1, &HitModel::default())
    }
}

impl Hit {
    /// Creates a zeroed hit laid out by `model`.
    #[must_use]
    pub fn new(source_channel: i16, model: &HitModel) -> Self {
        Self {
            source_channel,
            timestamp: TimeStamp::new(0, model.timebase),
            values: model.blank_values(),
            trace: vec![0; model.trace_length],
        }
    }

    /// Source channel id (`-1` when unrouted).
    #[inline]
    #[must_use]
    pub fn source_channel(&self) -> i16 {
        self.source_channel
    }

    /// Timestamp of the hit.
    #[inline]
    #[must_use]
    pub fn timestamp(&self) -> &TimeStamp {
        &self.timestamp
    }

    /// Number of field values.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Field value at `idx`, or a zero value when out of range.
    #[must_use]
    pub fn value(&self, idx: usize) -> DigitizedValue {
        self.values.get(idx).copied().unwrap_or_default()
    }

    /// Trace samples.
    #[must_use]
    pub fn trace(&self) -> &[u16] {
        &self.trace
    }

    /// Replaces the tick count, keeping the timebase.
    pub fn set_timestamp_native(&mut self, native: u64) {
        self.timestamp = self.timestamp.make(native);
    }

    /// Sets field `idx`; out-of-range indices are ignored.
    pub fn set_value(&mut self, idx: usize, val: u16) {
        if let Some(v) = self.values.get_mut(idx) {
            v.set_val(val);
        }
    }

    /// Copies up to the model's trace length of samples.
    pub fn set_trace(&mut self, samples: &[u16]) {
        let len = samples.len().min(self.trace.len());
        self.trace[..len].copy_from_slice(&samples[..len]);
    }

    /// Applies a cable/electronics delay correction.
    pub fn delay_ns(&mut self, ns: f64) {
        self.timestamp.delay(ns);
    }

    /// Orders hits by timestamp only.
    #[must_use]
    pub fn cmp_time(&self, other: &Self) -> Ordering {
        self.timestamp.cmp(&other.timestamp)
    }

    /// Writes the hit as little-endian channel, ticks, values, trace.
    ///
    /// # Errors
    /// Returns an error if the writer fails.
    pub fn write_bin<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(&self.source_channel.to_le_bytes())?;
        out.write_all(&self.timestamp.native().to_le_bytes())?;
        for v in &self.values {
            out.write_all(&v.raw().to_le_bytes())?;
        }
        for s in &self.trace {
            out.write_all(&s.to_le_bytes())?;
        }
        Ok(())
    }

    /// Reads one hit written by [`Self::write_bin`].
    ///
    /// Returns `Ok(None)` at a clean end of stream.
    ///
    /// # Errors
    /// Returns an error on a truncated record or a channel with no model.
    pub fn read_bin<R: Read>(input: &mut R, models: &BTreeMap<i16, HitModel>) -> Result<Option<Self>> {
        let mut chan = [0u8; 2];
        match input.read_exact(&mut chan) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let channel = i16::from_le_bytes(chan);
        let model = models
            .get(&channel)
            .ok_or_else(|| Error::ConfigError(format!("no hit model for channel {channel}")))?;

        let mut hit = Hit::new(channel, model);
        let mut ticks = [0u8; 8];
        input.read_exact(&mut ticks)?;
        hit.set_timestamp_native(u64::from_le_bytes(ticks));

        let mut word = [0u8; 2];
        for i in 0..hit.values.len() {
            input.read_exact(&mut word)?;
            hit.set_value(i, u16::from_le_bytes(word));
        }
        for s in &mut hit.trace {
            input.read_exact(&mut word)?;
            *s = u16::from_le_bytes(word);
        }
        Ok(Some(hit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> HitModel {
        HitModel::new(TimeBase::pixie4())
            .with_value("energy", 16)
            .and_then(|m| m.with_value("front", 1))
            .unwrap()
            .with_trace_length(4)
    }

    #[test]
    fn test_digitized_rescale() {
        let v = DigitizedValue::new(0xABCD, 16);
        assert_eq!(v.val(16), 0xABCD);
        assert_eq!(v.val(8), 0xAB);
        assert_eq!(v.val(12), 0xABC);

        let narrow = DigitizedValue::new(0x3F, 8);
        assert_eq!(narrow.val(10), 0xFC);

        assert_eq!(v.val(0), 0);
        assert_eq!(narrow.val(0), 0);
    }

    #[test]
    fn test_value_masked_to_width() {
        let mut v = DigitizedValue::new(0, 1);
        v.set_val(3);
        assert_eq!(v.raw(), 1);
    }

    #[test]
    fn test_model_lookup() {
        let m = model();
        assert_eq!(m.value_count(), 2);
        assert_eq!(m.index_of("front"), Some(1));
        assert_eq!(m.bits_of(0), Some(16));
        assert!(m.clone().with_value("bad", 17).is_err());
    }

    #[test]
    fn test_hit_accessors() {
        let m = model();
        let mut hit = Hit::new(3, &m);
        hit.set_value(0, 1234);
        hit.set_value(7, 1); // ignored
        hit.set_trace(&[1, 2, 3, 4, 5, 6]);
        hit.set_timestamp_native(500);

        assert_eq!(hit.value(0).raw(), 1234);
        assert_eq!(hit.value(7).raw(), 0);
        assert_eq!(hit.trace(), &[1, 2, 3, 4]);
        assert_eq!(hit.timestamp().native(), 500);

        hit.delay_ns(1000.0);
        assert_eq!(hit.timestamp().native(), 575);
    }

    #[test]
    fn test_hit_equality_and_time_order() {
        let m = model();
        let mut a = Hit::new(0, &m);
        let mut b = Hit::new(1, &m);
        a.set_timestamp_native(10);
        b.set_timestamp_native(10);
        assert_ne!(a, b);
        assert_eq!(a.cmp_time(&b), Ordering::Equal);
        b.set_timestamp_native(11);
        assert_eq!(a.cmp_time(&b), Ordering::Less);
    }

    #[test]
    fn test_binary_stream() {
        let m = model();
        let mut hit = Hit::new(2, &m);
        hit.set_value(0, 4000);
        hit.set_value(1, 1);
        hit.set_trace(&[9, 8, 7, 6]);
        hit.set_timestamp_native(0x1_0000_0001);

        let mut buf = Vec::new();
        hit.write_bin(&mut buf).unwrap();
        assert_eq!(buf.len(), 2 + 8 + 2 * 2 + 4 * 2);

        let models = BTreeMap::from([(2, m)]);
        let mut cursor = std::io::Cursor::new(buf);
        let back = Hit::read_bin(&mut cursor, &models).unwrap();
        assert_eq!(back, Some(hit));
        assert!(Hit::read_bin(&mut cursor, &models).unwrap().is_none());
    }

    #[test]
    fn test_binary_stream_unknown_channel() {
        let buf = 5i16.to_le_bytes().to_vec();
        let mut cursor = std::io::Cursor::new(buf);
        assert!(Hit::read_bin(&mut cursor, &BTreeMap::new()).is_err());
    }
}
