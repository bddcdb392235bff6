//! The cache-walk harvester as a pool source.

use std::sync::{Mutex, PoisonError};

use crate::error::CoreError;
use crate::harvester::{Harvester, HarvesterConfig};
use crate::source::{EntropySource, SourceCategory, SourceInfo};
use crate::timer::{CycleTimer, HardwareTimer};

static CACHE_WALK_INFO: SourceInfo = SourceInfo {
    name: "cache_walk",
    description: "HAVEGE-style walk over a table larger than the data caches",
    physics: "Walks a table larger than L1+L2+L3 through two cursors that never share a \
              cache line, rewriting every slot it reads with the current cycle count. \
              Cache misses, TLB misses and about two branch mispredictions per iteration \
              shift each timer reading by an amount that depends on all other activity on \
              the core. The walk position for the next iteration is derived from the \
              words just read, so the access pattern never settles.",
    category: SourceCategory::Microarch,
    entropy_rate_estimate: 2.0,
};

/// [`Harvester`] behind the [`EntropySource`] trait. Each source owns its own
/// engine and table.
pub struct HarvesterSource<T: CycleTimer + Send = HardwareTimer> {
    engine: Mutex<Harvester<T>>,
}

impl HarvesterSource<HardwareTimer> {
    pub fn new(config: &HarvesterConfig) -> Result<Self, CoreError> {
        Ok(Self::from_harvester(Harvester::new(config)?))
    }
}

impl<T: CycleTimer + Send> HarvesterSource<T> {
    pub fn from_harvester(engine: Harvester<T>) -> Self {
        Self {
            engine: Mutex::new(engine),
        }
    }

    /// Iterations the wrapped engine has run.
    pub fn iterations(&self) -> u64 {
        self.engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iterations()
    }
}

impl<T: CycleTimer + Send> EntropySource for HarvesterSource<T> {
    fn info(&self) -> &SourceInfo {
        &CACHE_WALK_INFO
    }

    fn is_available(&self) -> bool {
        self.engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .timer_advances()
    }

    fn collect(&self, n_bytes: usize) -> Vec<u8> {
        // The engine never leaves its state half-updated, so a poisoned lock
        // is still safe to keep walking.
        self.engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fill_bytes(n_bytes)
    }
}
