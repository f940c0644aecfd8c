//! Coincidence event building.
//!
//! Hits from a time-ordered stream are grouped into events: a hit joins an
//! open event when it falls within the coincidence window of the event's
//! first hit and its channel is not yet part of it.

use std::collections::{BTreeMap, VecDeque};

use specdaq_core::{Hit, Pattern, TimeStamp};

/// Hits considered simultaneous, keyed by source channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    start: TimeStamp,
    hits: BTreeMap<usize, Hit>,
}

impl Event {
    /// Opens an event with its first hit.
    #[must_use]
    pub fn new(chan: usize, hit: Hit) -> Self {
        let start = *hit.timestamp();
        let mut hits = BTreeMap::new();
        hits.insert(chan, hit);
        Self { start, hits }
    }

    /// Timestamp of the first hit.
    #[must_use]
    pub fn start(&self) -> &TimeStamp {
        &self.start
    }

    /// Hit on channel `chan`, if present.
    #[must_use]
    pub fn hit(&self, chan: usize) -> Option<&Hit> {
        self.hits.get(&chan)
    }

    /// True when channel `chan` took part.
    #[must_use]
    pub fn has(&self, chan: usize) -> bool {
        self.hits.contains_key(&chan)
    }

    /// Number of hits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// True when the event holds no hits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Passes coincidence and anti-coincidence gating.
    #[must_use]
    pub fn passes(&self, coinc: &Pattern, anti: &Pattern) -> bool {
        coinc.all_present(|c| self.has(c)) && anti.none_present(|c| self.has(c))
    }

    fn in_window(&self, ts: &TimeStamp, window_ns: f64) -> bool {
        ts.ns_since(&self.start) <= window_ns
    }
}

/// Groups a hit stream into coincidence events.
#[derive(Debug, Clone, Default)]
pub struct CoincidenceBuilder {
    window_ns: f64,
    open: VecDeque<Event>,
}

impl CoincidenceBuilder {
    /// Creates a builder with a window in nanoseconds.
    #[must_use]
    pub fn new(window_ns: f64) -> Self {
        Self {
            window_ns: window_ns.max(0.0),
            open: VecDeque::new(),
        }
    }

    /// Coincidence window in nanoseconds.
    #[must_use]
    pub fn window_ns(&self) -> f64 {
        self.window_ns
    }

    /// Number of events still open.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.open.len()
    }

    /// Feeds one hit, returning events it closed.
    ///
    /// Hits with a negative source channel are ignored.
    pub fn push(&mut self, hit: Hit) -> Vec<Event> {
        let Ok(chan) = usize::try_from(hit.source_channel()) else {
            return Vec::new();
        };
        let ts = *hit.timestamp();

        let mut closed = Vec::new();
        while self
            .open
            .front()
            .is_some_and(|e| !e.in_window(&ts, self.window_ns) && ts >= e.start)
        {
            closed.extend(self.open.pop_front());
        }

        let window = self.window_ns;
        match self
            .open
            .iter_mut()
            .find(|e| !e.has(chan) && ts >= e.start && e.in_window(&ts, window))
        {
            Some(event) => {
                event.hits.insert(chan, hit);
            }
            None => {
                // Keep open events ordered by start time.
                let at = self.open.partition_point(|e| e.start <= ts);
                self.open.insert(at, Event::new(chan, hit));
            }
        }
        closed
    }

    /// Closes every open event.
    pub fn flush(&mut self) -> Vec<Event> {
        self.open.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use specdaq_core::{HitModel, TimeBase};

    fn hit(chan: i16, ns: u64) -> Hit {
        let model = HitModel::new(TimeBase::default())
            .with_value("energy", 16)
            .unwrap();
        let mut h = Hit::new(chan, &model);
        h.set_timestamp_native(ns);
        h
    }

    #[test]
    fn test_groups_within_window() {
        let mut b = CoincidenceBuilder::new(10.0);
        assert!(b.push(hit(0, 100)).is_empty());
        assert!(b.push(hit(1, 105)).is_empty());
        let closed = b.push(hit(0, 200));
        assert_eq!(closed.len(), 1);
        assert!(closed[0].has(0) && closed[0].has(1));
        let rest = b.flush();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].len(), 1);
        assert_eq!(b.pending(), 0);
    }

    #[test]
    fn test_same_channel_opens_new_event() {
        let mut b = CoincidenceBuilder::new(10.0);
        b.push(hit(0, 100));
        b.push(hit(0, 102));
        b.push(hit(1, 103));
        let events = b.flush();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].len(), 2);
        assert_eq!(events[1].len(), 1);
    }

    #[test]
    fn test_window_edge_inclusive() {
        let mut b = CoincidenceBuilder::new(10.0);
        b.push(hit(0, 100));
        b.push(hit(1, 110));
        assert_eq!(b.flush().len(), 1);
    }

    #[test]
    fn test_unrouted_ignored() {
        let mut b = CoincidenceBuilder::new(10.0);
        assert!(b.push(hit(-1, 100)).is_empty());
        assert_eq!(b.pending(), 0);
    }

    #[test]
    fn test_gating() {
        let mut b = CoincidenceBuilder::new(10.0);
        b.push(hit(0, 100));
        b.push(hit(1, 101));
        let event = b.flush().remove(0);
        assert!(event.passes(&Pattern::from_channels(&[0, 1]), &Pattern::default()));
        assert!(!event.passes(&Pattern::from_channels(&[0, 2]), &Pattern::default()));
        assert!(!event.passes(&Pattern::default(), &Pattern::from_channels(&[1])));
        assert!(event.passes(&Pattern::default(), &Pattern::from_channels(&[2])));
    }
}
