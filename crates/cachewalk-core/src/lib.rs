//! # cachewalk-core
//!
//! **Cache misses and branch mispredictions as an entropy source.**
//!
//! `cachewalk-core` walks a table larger than the CPU's data caches, mixing
//! cycle-counter readings into every slot it touches. The timing of each read
//! depends on cache, TLB and branch predictor state that no observer can
//! reproduce, and that variation ends up in the output words.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cachewalk_core::{EntropyPool, HarvesterConfig, PoolConfig};
//!
//! let pool = EntropyPool::auto(PoolConfig::default(), &HarvesterConfig::default());
//!
//! // Bytes from blocks that went through the FIPS 140-2 self-tests
//! let bytes = pool.get_bytes(256).unwrap();
//! assert_eq!(bytes.len(), 256);
//!
//! let health = pool.health_report();
//! println!("{} blocks tested, {} failed", health.fips.total_blocks(), health.fips.bad_blocks);
//! ```
//!
//! ## Architecture
//!
//! Harvester → Pool (2500-byte blocks) → Self-tests → Exposure policy → Output
//!
//! The self-tests never alter bytes. Under the default advisory policy a
//! flagged block is still handed out and a warning is logged; the discard
//! policy drops flagged blocks and errors out after too many in a row.
//!
//! Every source implements the [`EntropySource`] trait. The [`Harvester`]
//! itself is usable directly when no self-testing is wanted.

pub mod error;
pub mod harvester;
pub mod platform;
pub mod pool;
pub mod source;
pub mod sources;
pub mod timer;
pub mod walk;

pub use error::CoreError;
pub use harvester::{Harvester, HarvesterConfig, WORDS_PER_ITERATION};
pub use platform::detect_cache_kib;
pub use pool::{
    EntropyPool, ExposurePolicy, HealthReport, PoolConfig, SourceHealth, SourceInfoSnapshot,
    TestedBlock,
};
pub use source::{EntropySource, SourceCategory, SourceInfo};
pub use sources::{HarvesterSource, OsEntropySource, available_sources, default_sources};
pub use timer::{CycleTimer, HardwareTimer};
pub use walk::WalkTable;

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
