//! Session sizing: queue depth, spill size and memory budget.

use crate::{Error, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Default words per spill buffer (eight full Pixie-4 list-mode buffers).
pub const DEFAULT_SPILL_WORDS: usize = 8 * specdaq_pixie::DEFAULT_MAX_RECORD_WORDS;

// Raw bytes plus decoded hits of one spill in flight.
const MEMORY_OVERHEAD_FACTOR: f64 = 2.5;

/// Configuration for an acquisition session.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PipelineConfig {
    /// Bounded depth of each inter-stage queue.
    pub queue_depth: usize,
    /// Fraction of available system memory to target (0.0 < fraction <= 1.0).
    pub memory_fraction: f64,
    /// Explicit memory budget override (bytes). If set, `memory_fraction` is ignored.
    pub memory_budget_bytes: Option<usize>,
    /// Target size of a raw spill, in 16-bit words.
    pub spill_words: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_depth: 4,
            memory_fraction: 0.5,
            memory_budget_bytes: None,
            spill_words: DEFAULT_SPILL_WORDS,
        }
    }
}

impl PipelineConfig {
    /// Set the bounded queue depth.
    ///
    /// Values less than 1 are clamped to 1. Use [`Self::try_with_queue_depth`]
    /// to surface invalid values as an error instead.
    #[must_use]
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Set the fraction of available system memory to target.
    #[must_use]
    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.memory_fraction = fraction;
        self
    }

    /// Set an explicit memory budget in bytes.
    #[must_use]
    pub fn with_memory_budget_bytes(mut self, bytes: usize) -> Self {
        self.memory_budget_bytes = Some(bytes);
        self
    }

    /// Set the spill size in words.
    ///
    /// Values less than 1 are clamped to 1. Use [`Self::try_with_spill_words`]
    /// to surface invalid values as an error instead.
    #[must_use]
    pub fn with_spill_words(mut self, words: usize) -> Self {
        self.spill_words = words.max(1);
        self
    }

    /// Fallible variant of [`Self::with_queue_depth`].
    ///
    /// # Errors
    /// Returns an error if `depth` is 0.
    pub fn try_with_queue_depth(mut self, depth: usize) -> Result<Self> {
        if depth == 0 {
            return Err(Error::InvalidConfig(
                "queue_depth must be at least 1".to_string(),
            ));
        }
        self.queue_depth = depth;
        Ok(self)
    }

    /// Fallible variant of [`Self::with_memory_fraction`].
    ///
    /// # Errors
    /// Returns an error if `fraction` is outside `(0.0, 1.0]`.
    pub fn try_with_memory_fraction(mut self, fraction: f64) -> Result<Self> {
        if !(0.0 < fraction && fraction <= 1.0) {
            return Err(Error::InvalidConfig(
                "memory_fraction must be in (0.0, 1.0]".to_string(),
            ));
        }
        self.memory_fraction = fraction;
        Ok(self)
    }

    /// Fallible variant of [`Self::with_spill_words`].
    ///
    /// # Errors
    /// Returns an error if `words` is 0.
    pub fn try_with_spill_words(mut self, words: usize) -> Result<Self> {
        if words == 0 {
            return Err(Error::InvalidConfig(
                "spill_words must be at least 1".to_string(),
            ));
        }
        self.spill_words = words;
        Ok(self)
    }

    /// Spill size in bytes.
    #[must_use]
    pub fn spill_bytes(&self) -> usize {
        self.spill_words.max(1).saturating_mul(2)
    }

    /// Queue depth, clamped to at least 1 and capped by an explicit budget.
    #[must_use]
    pub fn effective_queue_depth(&self) -> usize {
        let depth = self.queue_depth.max(1);
        match self.memory_budget_bytes {
            Some(budget) => depth.min(self.depth_for_budget(budget)),
            None => depth,
        }
    }

    /// Queue depth capped by the resolved memory budget.
    ///
    /// # Errors
    /// Returns an error if the memory budget cannot be resolved.
    pub fn resolve_queue_depth(&self) -> Result<usize> {
        let budget = self.resolve_budget_bytes()?;
        Ok(self.queue_depth.max(1).min(self.depth_for_budget(budget)))
    }

    /// Resolve the target memory budget in bytes.
    ///
    /// # Errors
    /// Returns an error if the memory fraction is invalid or system memory cannot be queried.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn resolve_budget_bytes(&self) -> Result<usize> {
        if let Some(bytes) = self.memory_budget_bytes {
            return Ok(bytes);
        }
        if !(0.0 < self.memory_fraction && self.memory_fraction <= 1.0) {
            return Err(Error::InvalidConfig(
                "memory_fraction must be in (0.0, 1.0]".to_string(),
            ));
        }
        let mut system = System::new();
        system.refresh_memory();
        let available = system.available_memory();
        if available == 0 {
            return Err(Error::InvalidConfig(
                "available system memory reported as 0".to_string(),
            ));
        }
        let budget = (available as f64 * self.memory_fraction).floor() as u64;
        Ok(usize::try_from(budget).unwrap_or(usize::MAX))
    }

    // Two queues share the budget.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    fn depth_for_budget(&self, budget: usize) -> usize {
        let per_spill = (self.spill_bytes() as f64 * MEMORY_OVERHEAD_FACTOR).ceil();
        let depth = (budget as f64 / (2.0 * per_spill)).floor() as usize;
        depth.max(1)
    }
}
