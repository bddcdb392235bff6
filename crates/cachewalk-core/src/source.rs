//! Abstract entropy source trait and runtime state.
//!
//! Every entropy source implements the [`EntropySource`] trait, which provides
//! metadata via [`SourceInfo`], availability checking, and raw byte collection.

use std::time::Duration;

/// Category of entropy source based on physical mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceCategory {
    /// CPU cache and branch predictor timing.
    Microarch,
    /// Operating system supplied randomness.
    System,
}

impl std::fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Microarch => write!(f, "microarch"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Metadata about an entropy source.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// Unique identifier (e.g. `"cache_walk"`).
    pub name: &'static str,
    /// One-line human-readable description.
    pub description: &'static str,
    /// Explanation of where the unpredictability comes from.
    pub physics: &'static str,
    pub category: SourceCategory,
    /// Estimated entropy rate in bits per output byte.
    pub entropy_rate_estimate: f64,
}

/// Trait that every entropy source must implement.
pub trait EntropySource: Send + Sync {
    /// Source metadata.
    fn info(&self) -> &SourceInfo;

    /// Check if this source can operate on the current machine.
    fn is_available(&self) -> bool;

    /// Collect raw bytes. Returns up to `n_bytes` bytes; empty on failure.
    fn collect(&self, n_bytes: usize) -> Vec<u8>;

    /// Convenience: name from info.
    fn name(&self) -> &'static str {
        self.info().name
    }
}

/// Runtime state for a registered source in the pool.
pub struct SourceState {
    pub source: Box<dyn EntropySource>,
    pub total_bytes: u64,
    pub failures: u64,
    pub last_collect_time: Duration,
    pub healthy: bool,
}

impl SourceState {
    pub fn new(source: Box<dyn EntropySource>) -> Self {
        Self {
            source,
            total_bytes: 0,
            failures: 0,
            last_collect_time: Duration::ZERO,
            healthy: true,
        }
    }
}
