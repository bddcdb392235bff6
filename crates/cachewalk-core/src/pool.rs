//! Self-tested multi-source entropy pool.
//!
//! Architecture:
//! 1. Register sources (the cache-walk harvester by default)
//! 2. Collect raw bytes from each source in parallel
//! 3. Concatenate source bytes into a shared buffer
//! 4. Cut the buffer into 2500-byte blocks and run each through the
//!    FIPS 140-2 self-tests
//! 5. Apply the [`ExposurePolicy`] to flagged blocks
//! 6. Per-source health plus cumulative self-test statistics
//!
//! The pool never conditions or whitens: bytes leave exactly as the sources
//! produced them, in the order the self-tests saw them.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use cachewalk_fips::{BLOCK_BYTES, FipsContext, FipsResult, FipsStatistics};
use serde::Serialize;

use crate::error::CoreError;
use crate::harvester::HarvesterConfig;
use crate::source::{EntropySource, SourceState};

/// What the pool does with a block that fails a self-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum ExposurePolicy {
    /// Hand the block out anyway and log a warning.
    #[default]
    Advisory,
    /// Drop the block. After `max_consecutive` flagged blocks in a row,
    /// give up with [`CoreError::TooManyRejectedBlocks`]. A limit of 0 is
    /// raised to 1 when the pool is built.
    Discard { max_consecutive: u64 },
}

impl ExposurePolicy {
    /// The policy with a zero discard limit raised to 1.
    fn normalized(self) -> Self {
        match self {
            Self::Discard { max_consecutive: 0 } => {
                log::warn!("discard limit of 0 blocks raised to 1");
                Self::Discard { max_consecutive: 1 }
            }
            other => other,
        }
    }
}

/// Pool configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolConfig {
    pub policy: ExposurePolicy,
    /// Accumulate CPU time spent in the self-tests.
    pub track_cpu_time: bool,
}

/// One block together with its self-test verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestedBlock {
    pub bytes: Vec<u8>,
    pub result: FipsResult,
}

/// Thread-safe self-tested entropy pool.
pub struct EntropyPool {
    policy: ExposurePolicy,
    sources: Vec<Mutex<SourceState>>,
    /// Raw source bytes not yet tested.
    buffer: Mutex<Vec<u8>>,
    /// Tested bytes not yet handed out by `get_bytes`.
    ready: Mutex<Vec<u8>>,
    fips: Mutex<FipsContext>,
    total_output: Mutex<u64>,
    rejected_blocks: Mutex<u64>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EntropyPool {
    /// Create an empty pool.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            policy: config.policy.normalized(),
            sources: Vec::new(),
            buffer: Mutex::new(Vec::new()),
            ready: Mutex::new(Vec::new()),
            fips: Mutex::new(FipsContext::with_options(0, config.track_cpu_time)),
            total_output: Mutex::new(0),
            rejected_blocks: Mutex::new(0),
        }
    }

    /// Create a pool over the default source set.
    pub fn auto(config: PoolConfig, harvester: &HarvesterConfig) -> Self {
        let mut pool = Self::new(config);
        for source in crate::sources::default_sources(harvester) {
            pool.add_source(source);
        }
        pool
    }

    /// Register an entropy source.
    pub fn add_source(&mut self, source: Box<dyn EntropySource>) {
        log::debug!("pool: registered source {}", source.name());
        self.sources.push(Mutex::new(SourceState::new(source)));
    }

    /// Number of registered sources.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn policy(&self) -> ExposurePolicy {
        self.policy
    }

    /// Collect up to `n_bytes` from every registered source in parallel and
    /// append them to the buffer in registration order. Returns the number of
    /// bytes added.
    pub fn collect_all(&self, n_bytes: usize) -> usize {
        let collected: Vec<Vec<u8>> = std::thread::scope(|s| {
            let handles: Vec<_> = self
                .sources
                .iter()
                .map(|ss_mutex| s.spawn(move || Self::collect_one(ss_mutex, n_bytes)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_default())
                .collect()
        });

        let mut buf = lock(&self.buffer);
        let before = buf.len();
        for data in collected {
            buf.extend_from_slice(&data);
        }
        buf.len() - before
    }

    fn collect_one(ss_mutex: &Mutex<SourceState>, n_bytes: usize) -> Vec<u8> {
        let mut ss = lock(ss_mutex);
        let t0 = Instant::now();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ss.source.collect(n_bytes)
        }));
        ss.last_collect_time = t0.elapsed();
        match outcome {
            Ok(data) if !data.is_empty() || n_bytes == 0 => {
                ss.total_bytes += data.len() as u64;
                ss.healthy = true;
                data
            }
            _ => {
                log::warn!("source {} produced no bytes", ss.source.name());
                ss.failures += 1;
                ss.healthy = false;
                Vec::new()
            }
        }
    }

    /// Take exactly one untested block from the buffer, collecting as needed.
    fn take_raw_block(&self) -> Result<Vec<u8>, CoreError> {
        loop {
            let missing = {
                let mut buf = lock(&self.buffer);
                if buf.len() >= BLOCK_BYTES {
                    return Ok(buf.drain(..BLOCK_BYTES).collect());
                }
                BLOCK_BYTES - buf.len()
            };
            if self.collect_all(missing) == 0 {
                return Err(CoreError::NoSources);
            }
        }
    }

    /// Next self-tested block, with the exposure policy applied.
    ///
    /// Under [`ExposurePolicy::Advisory`] the returned block may carry a
    /// failing result. Under [`ExposurePolicy::Discard`] it never does.
    pub fn next_block(&self) -> Result<TestedBlock, CoreError> {
        let mut consecutive = 0u64;
        // Held across draining and testing so blocks reach the self-tests in
        // buffer order and the Continuous-Run check sees adjacent words.
        let mut fips = lock(&self.fips);
        loop {
            let bytes = self.take_raw_block()?;
            let result = fips.test_block(&bytes)?;
            log::trace!("pool: block tested, {result}");

            if result.passed() {
                return Ok(TestedBlock { bytes, result });
            }
            match self.policy {
                ExposurePolicy::Advisory => {
                    log::warn!("exposing block that failed self-tests: {result}");
                    return Ok(TestedBlock { bytes, result });
                }
                ExposurePolicy::Discard { max_consecutive } => {
                    consecutive += 1;
                    *lock(&self.rejected_blocks) += 1;
                    log::warn!("discarding block ({consecutive} in a row): {result}");
                    if consecutive >= max_consecutive {
                        return Err(CoreError::TooManyRejectedBlocks { consecutive });
                    }
                }
            }
        }
    }

    /// Exactly `n_bytes` of self-tested output.
    ///
    /// Bytes come from whole tested blocks; the unused tail of the last block
    /// is kept for the next call.
    pub fn get_bytes(&self, n_bytes: usize) -> Result<Vec<u8>, CoreError> {
        let mut ready = lock(&self.ready);
        while ready.len() < n_bytes {
            let block = self.next_block()?;
            ready.extend_from_slice(&block.bytes);
        }
        let output: Vec<u8> = ready.drain(..n_bytes).collect();
        drop(ready);
        *lock(&self.total_output) += n_bytes as u64;
        Ok(output)
    }

    /// Metadata of every registered source, in registration order.
    pub fn source_infos(&self) -> Vec<SourceInfoSnapshot> {
        self.sources
            .iter()
            .map(|ss_mutex| {
                let ss = lock(ss_mutex);
                let info = ss.source.info();
                SourceInfoSnapshot {
                    name: info.name.to_string(),
                    description: info.description.to_string(),
                    physics: info.physics.to_string(),
                    category: info.category.to_string(),
                    entropy_rate_estimate: info.entropy_rate_estimate,
                }
            })
            .collect()
    }

    /// Snapshot of the cumulative self-test statistics.
    pub fn fips_statistics(&self) -> FipsStatistics {
        lock(&self.fips).statistics().clone()
    }

    /// Health report as structured data.
    pub fn health_report(&self) -> HealthReport {
        let mut sources = Vec::new();
        let mut healthy_count = 0;
        let mut total_raw = 0u64;

        for ss_mutex in &self.sources {
            let ss = lock(ss_mutex);
            if ss.healthy {
                healthy_count += 1;
            }
            total_raw += ss.total_bytes;
            sources.push(SourceHealth {
                name: ss.source.name().to_string(),
                healthy: ss.healthy,
                bytes: ss.total_bytes,
                time: ss.last_collect_time.as_secs_f64(),
                failures: ss.failures,
            });
        }

        // One lock at a time: `next_block` takes the buffer under the fips lock.
        let buffer_size = lock(&self.buffer).len();
        let fips = self.fips_statistics();

        HealthReport {
            healthy: healthy_count,
            total: self.sources.len(),
            raw_bytes: total_raw,
            output_bytes: *lock(&self.total_output),
            rejected_blocks: *lock(&self.rejected_blocks),
            buffer_size,
            sources,
            fips,
        }
    }
}

/// Overall health report for the entropy pool.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Number of sources whose last collection produced bytes.
    pub healthy: usize,
    /// Total number of registered sources.
    pub total: usize,
    /// Total raw bytes collected across all sources.
    pub raw_bytes: u64,
    /// Total bytes handed out by `get_bytes`.
    pub output_bytes: u64,
    /// Blocks dropped under the discard policy.
    pub rejected_blocks: u64,
    /// Raw bytes collected but not yet tested.
    pub buffer_size: usize,
    /// Per-source health details.
    pub sources: Vec<SourceHealth>,
    /// Cumulative self-test statistics.
    pub fips: FipsStatistics,
}

/// Health status of a single entropy source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceHealth {
    pub name: String,
    /// Whether the last collection produced bytes.
    pub healthy: bool,
    /// Total bytes collected from this source.
    pub bytes: u64,
    /// Time taken for the last collection in seconds.
    pub time: f64,
    /// Number of collections that produced nothing.
    pub failures: u64,
}

/// Owned copy of a source's metadata.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfoSnapshot {
    pub name: String,
    pub description: String,
    /// Where the unpredictability comes from.
    pub physics: String,
    pub category: String,
    /// Estimated bits of entropy per output byte.
    pub entropy_rate_estimate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SourceCategory, SourceInfo};
    use cachewalk_fips::FipsTest;

    // -----------------------------------------------------------------------
    // Mock entropy sources for testing
    // -----------------------------------------------------------------------

    static MOCK_INFO: SourceInfo = SourceInfo {
        name: "mock",
        description: "mock source",
        physics: "deterministic test data",
        category: SourceCategory::System,
        entropy_rate_estimate: 1.0,
    };

    /// LCG stream; consecutive 2500-byte blocks pass every self-test.
    struct LcgSource {
        state: Mutex<u64>,
    }

    impl LcgSource {
        fn new() -> Self {
            Self {
                state: Mutex::new(0xDEAD_BEEF_CAFE_BABE),
            }
        }
    }

    impl EntropySource for LcgSource {
        fn info(&self) -> &SourceInfo {
            &MOCK_INFO
        }
        fn is_available(&self) -> bool {
            true
        }
        fn collect(&self, n_bytes: usize) -> Vec<u8> {
            let mut state = self.state.lock().unwrap();
            (0..n_bytes)
                .map(|_| {
                    *state = state
                        .wrapping_mul(6364136223846793005)
                        .wrapping_add(1442695040888963407);
                    (*state >> 33) as u8
                })
                .collect()
        }
    }

    /// Repeats one byte forever.
    struct StuckSource(u8);

    impl EntropySource for StuckSource {
        fn info(&self) -> &SourceInfo {
            &MOCK_INFO
        }
        fn is_available(&self) -> bool {
            true
        }
        fn collect(&self, n_bytes: usize) -> Vec<u8> {
            vec![self.0; n_bytes]
        }
    }

    /// Always returns nothing.
    struct FailingSource;

    impl EntropySource for FailingSource {
        fn info(&self) -> &SourceInfo {
            &MOCK_INFO
        }
        fn is_available(&self) -> bool {
            true
        }
        fn collect(&self, _n_bytes: usize) -> Vec<u8> {
            Vec::new()
        }
    }

    fn pool_with(policy: ExposurePolicy, source: Box<dyn EntropySource>) -> EntropyPool {
        let mut pool = EntropyPool::new(PoolConfig {
            policy,
            track_cpu_time: false,
        });
        pool.add_source(source);
        pool
    }

    // -----------------------------------------------------------------------
    // Pool creation and collection
    // -----------------------------------------------------------------------

    #[test]
    fn test_pool_new_empty() {
        let pool = EntropyPool::new(PoolConfig::default());
        assert_eq!(pool.source_count(), 0);
        assert_eq!(pool.policy(), ExposurePolicy::Advisory);
    }

    #[test]
    fn test_collect_all_in_registration_order() {
        let mut pool = EntropyPool::new(PoolConfig::default());
        pool.add_source(Box::new(StuckSource(1)));
        pool.add_source(Box::new(StuckSource(2)));
        assert_eq!(pool.collect_all(3), 6);
        assert_eq!(*pool.buffer.lock().unwrap(), vec![1, 1, 1, 2, 2, 2]);
    }

    #[test]
    fn test_collect_from_empty_pool() {
        let pool = EntropyPool::new(PoolConfig::default());
        assert_eq!(pool.collect_all(100), 0);
        assert_eq!(pool.next_block().unwrap_err(), CoreError::NoSources);
        assert_eq!(pool.get_bytes(1).unwrap_err(), CoreError::NoSources);
    }

    #[test]
    fn test_failing_source_only() {
        let pool = pool_with(ExposurePolicy::Advisory, Box::new(FailingSource));
        assert_eq!(pool.get_bytes(16).unwrap_err(), CoreError::NoSources);
        let report = pool.health_report();
        assert_eq!(report.healthy, 0);
        assert_eq!(report.sources[0].failures, 1);
    }

    // -----------------------------------------------------------------------
    // Blocks and exposure policy
    // -----------------------------------------------------------------------

    #[test]
    fn test_next_block_passes_good_source() {
        let pool = pool_with(ExposurePolicy::Advisory, Box::new(LcgSource::new()));
        let reference = LcgSource::new().collect(2 * BLOCK_BYTES);

        let first = pool.next_block().unwrap();
        let second = pool.next_block().unwrap();
        assert!(first.result.passed());
        assert!(second.result.passed());
        assert_eq!(first.bytes, reference[..BLOCK_BYTES]);
        assert_eq!(second.bytes, reference[BLOCK_BYTES..]);
        assert_eq!(pool.fips_statistics().good_blocks, 2);
    }

    #[test]
    fn test_advisory_exposes_flagged_block() {
        let pool = pool_with(ExposurePolicy::Advisory, Box::new(StuckSource(0)));
        let block = pool.next_block().unwrap();
        assert_eq!(block.bytes, vec![0; BLOCK_BYTES]);
        assert!(block.result.contains(FipsTest::Monobit));
        assert!(block.result.contains(FipsTest::Poker));
        assert_eq!(pool.fips_statistics().bad_blocks, 1);
        assert_eq!(pool.health_report().rejected_blocks, 0);
    }

    #[test]
    fn test_discard_gives_up_after_limit() {
        let pool = pool_with(
            ExposurePolicy::Discard { max_consecutive: 3 },
            Box::new(StuckSource(0xFF)),
        );
        assert_eq!(
            pool.next_block().unwrap_err(),
            CoreError::TooManyRejectedBlocks { consecutive: 3 }
        );
        let report = pool.health_report();
        assert_eq!(report.rejected_blocks, 3);
        assert_eq!(report.fips.bad_blocks, 3);
        assert_eq!(report.output_bytes, 0);
    }

    #[test]
    fn test_discard_passes_good_blocks() {
        let pool = pool_with(
            ExposurePolicy::Discard { max_consecutive: 1 },
            Box::new(LcgSource::new()),
        );
        for _ in 0..4 {
            assert!(pool.next_block().unwrap().result.passed());
        }
        assert_eq!(pool.health_report().rejected_blocks, 0);
    }

    #[test]
    fn test_zero_discard_limit_acts_as_one() {
        let pool = pool_with(
            ExposurePolicy::Discard { max_consecutive: 0 },
            Box::new(StuckSource(0)),
        );
        assert_eq!(pool.policy(), ExposurePolicy::Discard { max_consecutive: 1 });
        assert_eq!(
            pool.next_block().unwrap_err(),
            CoreError::TooManyRejectedBlocks { consecutive: 1 }
        );
        assert_eq!(pool.health_report().rejected_blocks, 1);
    }

    #[test]
    fn test_concurrent_blocks_are_tested_in_buffer_order() {
        const BLOCKS: usize = 400;
        const THREADS: usize = 8;

        // Each block opens with the word that closed the one before it, so
        // in-order testing flags exactly one repeat per block boundary.
        let mut data = LcgSource::new().collect(BLOCKS * BLOCK_BYTES);
        for k in 1..BLOCKS {
            let start = k * BLOCK_BYTES;
            data.copy_within(start - 4..start, start);
        }

        let pool = EntropyPool::new(PoolConfig::default());
        *pool.buffer.lock().unwrap() = data;

        std::thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    for _ in 0..BLOCKS / THREADS {
                        pool.next_block().unwrap();
                    }
                });
            }
        });

        let stats = pool.fips_statistics();
        assert_eq!(stats.total_blocks(), BLOCKS as u64);
        assert_eq!(
            stats.failures_for(FipsTest::ContinuousRun),
            BLOCKS as u64 - 1
        );
        assert_eq!(pool.health_report().buffer_size, 0);
    }

    // -----------------------------------------------------------------------
    // Byte output
    // -----------------------------------------------------------------------

    #[test]
    fn test_get_bytes_keeps_block_tail() {
        let pool = pool_with(ExposurePolicy::Advisory, Box::new(LcgSource::new()));
        let reference = LcgSource::new().collect(2 * BLOCK_BYTES);

        let mut out = Vec::new();
        for size in [1, 16, 2000, 483, 2500] {
            let bytes = pool.get_bytes(size).unwrap();
            assert_eq!(bytes.len(), size);
            out.extend(bytes);
        }
        assert_eq!(out, reference[..out.len()]);
        assert_eq!(pool.fips_statistics().total_blocks(), 2);
        assert_eq!(pool.health_report().output_bytes, out.len() as u64);
    }

    #[test]
    fn test_get_bytes_zero() {
        let pool = pool_with(ExposurePolicy::Advisory, Box::new(LcgSource::new()));
        assert!(pool.get_bytes(0).unwrap().is_empty());
        assert_eq!(pool.fips_statistics().total_blocks(), 0);
    }

    // -----------------------------------------------------------------------
    // Health report
    // -----------------------------------------------------------------------

    #[test]
    fn test_health_report_empty_pool() {
        let report = EntropyPool::new(PoolConfig::default()).health_report();
        assert_eq!(report.total, 0);
        assert_eq!(report.healthy, 0);
        assert_eq!(report.raw_bytes, 0);
        assert_eq!(report.output_bytes, 0);
        assert_eq!(report.buffer_size, 0);
        assert!(report.sources.is_empty());
        assert_eq!(report.fips.total_blocks(), 0);
    }

    #[test]
    fn test_health_report_mixed_sources() {
        let mut pool = EntropyPool::new(PoolConfig::default());
        pool.add_source(Box::new(LcgSource::new()));
        pool.add_source(Box::new(FailingSource));
        pool.next_block().unwrap();
        let report = pool.health_report();
        assert_eq!(report.total, 2);
        assert_eq!(report.healthy, 1);
        assert_eq!(report.raw_bytes, BLOCK_BYTES as u64);
        assert!(report.sources[0].healthy);
        assert!(!report.sources[1].healthy);
        assert_eq!(report.sources[1].failures, 1);
    }

    #[test]
    fn test_health_report_serializes() {
        let pool = pool_with(
            ExposurePolicy::Discard { max_consecutive: 2 },
            Box::new(StuckSource(0)),
        );
        let _ = pool.next_block();
        let json = serde_json::to_value(pool.health_report()).unwrap();
        assert_eq!(json["rejected_blocks"], 2);
        assert_eq!(json["fips"]["bad_blocks"], 2);
        assert_eq!(json["sources"][0]["name"], "mock");
    }

    #[test]
    fn test_source_infos() {
        let mut pool = EntropyPool::new(PoolConfig::default());
        assert!(pool.source_infos().is_empty());
        pool.add_source(Box::new(LcgSource::new()));
        pool.add_source(Box::new(crate::sources::OsEntropySource));
        let infos = pool.source_infos();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].name, "mock");
        assert_eq!(infos[0].physics, "deterministic test data");
        assert_eq!(infos[0].category, "system");
        assert_eq!(infos[1].name, "os_random");
        assert_eq!(infos[1].entropy_rate_estimate, 8.0);
    }

    #[test]
    fn test_cpu_time_tracking() {
        let mut pool = EntropyPool::new(PoolConfig {
            policy: ExposurePolicy::Advisory,
            track_cpu_time: true,
        });
        pool.add_source(Box::new(LcgSource::new()));
        pool.next_block().unwrap();
        assert!(pool.fips_statistics().cpu_time.is_some());
        assert!(
            EntropyPool::new(PoolConfig::default())
                .fips_statistics()
                .cpu_time
                .is_none()
        );
    }

    #[test]
    fn test_policy_serializes_tagged() {
        let json = serde_json::to_value(ExposurePolicy::Discard { max_consecutive: 4 }).unwrap();
        assert_eq!(json["policy"], "discard");
        assert_eq!(json["max_consecutive"], 4);
    }
}
