//! Channel gate patterns used for routing and coincidence gating.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A fixed-length set of gates over source channel indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pattern {
    gates: Vec<bool>,
}

impl Pattern {
    /// Creates a pattern with `len` closed gates.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            gates: vec![false; len],
        }
    }

    /// Creates a pattern from explicit gates.
    #[must_use]
    pub fn from_gates(gates: Vec<bool>) -> Self {
        Self { gates }
    }

    /// Creates a pattern opening the listed channels.
    #[must_use]
    pub fn from_channels(channels: &[usize]) -> Self {
        let len = channels.iter().max().map_or(0, |&c| c + 1);
        let mut pattern = Self::new(len);
        for &c in channels {
            pattern.gates[c] = true;
        }
        pattern
    }

    /// Gate values.
    #[must_use]
    pub fn gates(&self) -> &[bool] {
        &self.gates
    }

    /// Number of gates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    /// True when the pattern has no gates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    /// Grows or shrinks the pattern, closing any new gates.
    pub fn resize(&mut self, len: usize) {
        self.gates.resize(len, false);
    }

    /// True when channel `idx` is open.
    #[must_use]
    pub fn relevant(&self, idx: usize) -> bool {
        self.gates.get(idx).copied().unwrap_or(false)
    }

    /// Number of open gates.
    #[must_use]
    pub fn count(&self) -> usize {
        self.gates.iter().filter(|&&g| g).count()
    }

    /// Open channel indices in scan order.
    #[must_use]
    pub fn selected(&self) -> Vec<usize> {
        self.gates
            .iter()
            .enumerate()
            .filter_map(|(i, &g)| g.then_some(i))
            .collect()
    }

    /// Coincidence gating: every open channel is among `present`.
    #[must_use]
    pub fn all_present<F: Fn(usize) -> bool>(&self, present: F) -> bool {
        self.selected().into_iter().all(present)
    }

    /// Anti-coincidence gating: no open channel is among `present`.
    #[must_use]
    pub fn none_present<F: Fn(usize) -> bool>(&self, present: F) -> bool {
        !self.selected().into_iter().any(present)
    }
}
