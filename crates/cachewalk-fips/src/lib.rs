//! FIPS 140-2 (2001-10-10 errata) continuous randomness self-tests.
//!
//! A [`FipsContext`] consumes successive 2500-byte (20000-bit) blocks and runs
//! the Monobit, Poker, Runs and Long-Run tests on each block, plus the
//! Continuous-Run test on every 32-bit word, including across block
//! boundaries. Each call returns a [`FipsResult`] bitmask; cumulative counters
//! are kept in [`FipsStatistics`].
//!
//! The 2002-12-03 errata removed the requirement that a failing source be
//! disabled, so the result is advisory. Whether a flagged block is exposed,
//! discarded or only logged is decided by the caller.
//!
//! The acceptance ranges below are only valid for a 20000-bit block. A
//! different block size needs ranges re-derived from the distributions.

mod cputime;

use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

use serde::Serialize;

use crate::cputime::CpuStopwatch;

// ═══════════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════════

/// Bytes per test block.
pub const BLOCK_BYTES: usize = 2500;

/// Bits per test block.
pub const BLOCK_BITS: usize = BLOCK_BYTES * 8;

/// Number of tests tracked by the engine.
pub const N_TESTS: usize = 5;

/// Accepted count of set bits per block (FIPS 140-2: 9725 < ones < 10275).
pub const MONOBIT_RANGE: RangeInclusive<u32> = 9726..=10274;

/// Accepted sum of squared nibble counts per block.
///
/// Equivalent to the published `2.16 < X < 46.17` after scaling by
/// `16/5000 * sum - 5000`.
pub const POKER_RANGE: RangeInclusive<u64> = 1_563_176..=1_576_928;

/// Accepted run counts for run lengths 1, 2, 3, 4, 5 and 6+.
/// Applies to runs of zeros and runs of ones alike.
pub const RUNS_RANGES: [RangeInclusive<u32>; 6] = [
    2315..=2685,
    1114..=1386,
    527..=723,
    240..=384,
    103..=209,
    103..=209,
];

/// A run reaching this length fails the Long-Run test.
pub const LONG_RUN_LENGTH: i32 = 26;

// ═══════════════════════════════════════════════════════════════════════════════
// Test identifiers and results
// ═══════════════════════════════════════════════════════════════════════════════

/// One of the five self-tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FipsTest {
    Monobit,
    Poker,
    Runs,
    LongRun,
    ContinuousRun,
}

impl FipsTest {
    /// All tests, in bitmask order.
    pub const ALL: [FipsTest; N_TESTS] = [
        Self::Monobit,
        Self::Poker,
        Self::Runs,
        Self::LongRun,
        Self::ContinuousRun,
    ];

    /// Published test name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Monobit => "FIPS 140-2(2001-10-10) Monobit",
            Self::Poker => "FIPS 140-2(2001-10-10) Poker",
            Self::Runs => "FIPS 140-2(2001-10-10) Runs",
            Self::LongRun => "FIPS 140-2(2001-10-10) Long run",
            Self::ContinuousRun => "FIPS 140-2(2001-10-10) Continuous run",
        }
    }

    /// Position of this test in [`FipsStatistics::failures`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Flag bit of this test inside a [`FipsResult`].
    pub fn mask(self) -> u32 {
        1 << self.index()
    }
}

impl fmt::Display for FipsTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure bitmask of one block. Zero means every test passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct FipsResult(u32);

impl FipsResult {
    /// Result with no test failed.
    pub const PASS: Self = Self(0);

    /// Build a result from raw flag bits, dropping unknown bits.
    pub fn from_bits(bits: u32) -> Self {
        let known = FipsTest::ALL.iter().fold(0, |acc, t| acc | t.mask());
        Self(bits & known)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// `true` when no test failed.
    pub fn passed(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, test: FipsTest) -> bool {
        self.0 & test.mask() != 0
    }

    /// Tests that failed, in bitmask order.
    pub fn failed_tests(self) -> impl Iterator<Item = FipsTest> {
        FipsTest::ALL.into_iter().filter(move |t| self.contains(*t))
    }

    fn insert(&mut self, test: FipsTest) {
        self.0 |= test.mask();
    }
}

impl fmt::Display for FipsResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed() {
            return f.write_str("pass");
        }
        let names: Vec<&str> = self.failed_tests().map(FipsTest::name).collect();
        write!(f, "fail ({})", names.join(", "))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Statistics
// ═══════════════════════════════════════════════════════════════════════════════

/// Cumulative counters over the lifetime of a [`FipsContext`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FipsStatistics {
    /// Blocks that passed every test.
    pub good_blocks: u64,
    /// Blocks that failed at least one test.
    pub bad_blocks: u64,
    /// Per-test failure counts, indexed by [`FipsTest::index`].
    ///
    /// Continuous-Run counts every repeated word; the others count blocks.
    pub failures: [u64; N_TESTS],
    /// CPU time spent inside [`FipsContext::test_block`], when tracked.
    pub cpu_time: Option<Duration>,
}

impl FipsStatistics {
    pub fn total_blocks(&self) -> u64 {
        self.good_blocks + self.bad_blocks
    }

    pub fn failures_for(&self, test: FipsTest) -> u64 {
        self.failures[test.index()]
    }

    /// Fraction of tested blocks that failed, `0.0` before any block.
    pub fn bad_ratio(&self) -> f64 {
        match self.total_blocks() {
            0 => 0.0,
            total => self.bad_blocks as f64 / total as f64,
        }
    }
}

impl fmt::Display for FipsStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Number of blocks passing FIPS 140-2 randomness tests: {}",
            self.good_blocks
        )?;
        writeln!(
            f,
            "Number of blocks failing FIPS 140-2 randomness tests: {}",
            self.bad_blocks
        )?;
        for test in FipsTest::ALL {
            writeln!(
                f,
                "Number of blocks failing {} test: \t{}",
                test.name(),
                self.failures_for(test)
            )?;
        }
        if let Some(cpu) = self.cpu_time {
            writeln!(
                f,
                "CPU time of FIPS 140-2 randomness tests: {}.{:09} s",
                cpu.as_secs(),
                cpu.subsec_nanos()
            )?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Precondition violations of the self-test engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FipsError {
    /// The buffer handed to [`FipsContext::test_block`] is not exactly one block.
    BlockLength { expected: usize, actual: usize },
}

impl fmt::Display for FipsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FipsError::BlockLength { expected, actual } => write!(
                f,
                "FIPS test block must be exactly {expected} bytes, got {actual}"
            ),
        }
    }
}

impl std::error::Error for FipsError {}

// ═══════════════════════════════════════════════════════════════════════════════
// Test context
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-stream test state.
///
/// Create one context per independent entropy stream and never share it
/// between streams: the Continuous-Run test compares against the last word of
/// the previous block.
#[derive(Debug, Clone)]
pub struct FipsContext {
    poker: [u32; 16],
    runs: [u32; 12],
    ones: u32,
    /// Current run length minus one; `-1` before the first bit of a run.
    rlength: i32,
    current_bit: u8,
    last_bit: u8,
    last32: u32,
    longrun: bool,
    track_cpu_time: bool,
    statistics: FipsStatistics,
}

impl Default for FipsContext {
    fn default() -> Self {
        Self::new()
    }
}

impl FipsContext {
    /// Context with `last32 = 0` and no CPU-time tracking.
    pub fn new() -> Self {
        Self::with_options(0, false)
    }

    /// Context seeded with the word preceding the first block.
    pub fn with_options(last32: u32, track_cpu_time: bool) -> Self {
        Self {
            poker: [0; 16],
            runs: [0; 12],
            ones: 0,
            rlength: -1,
            current_bit: 0,
            last_bit: 0,
            last32,
            longrun: false,
            track_cpu_time,
            statistics: FipsStatistics {
                cpu_time: track_cpu_time.then_some(Duration::ZERO),
                ..FipsStatistics::default()
            },
        }
    }

    pub fn statistics(&self) -> &FipsStatistics {
        &self.statistics
    }

    /// Last 32-bit word seen by the Continuous-Run test.
    pub fn last32(&self) -> u32 {
        self.last32
    }

    pub fn tracks_cpu_time(&self) -> bool {
        self.track_cpu_time
    }

    /// Run all five tests on exactly one block.
    ///
    /// Returns the failure bitmask. Counters are updated whatever the outcome.
    pub fn test_block(&mut self, block: &[u8]) -> Result<FipsResult, FipsError> {
        if block.len() != BLOCK_BYTES {
            return Err(FipsError::BlockLength {
                expected: BLOCK_BYTES,
                actual: block.len(),
            });
        }
        Ok(self.run_block(block))
    }

    /// Test every complete block of `data`.
    ///
    /// Trailing bytes that do not fill a block are left untested and reported
    /// in [`StreamReport::untested_bytes`].
    pub fn test_stream(&mut self, data: &[u8]) -> StreamReport {
        let chunks = data.chunks_exact(BLOCK_BYTES);
        let untested_bytes = chunks.remainder().len();
        let results = chunks.map(|block| self.run_block(block)).collect();
        StreamReport {
            results,
            untested_bytes,
        }
    }

    fn run_block(&mut self, block: &[u8]) -> FipsResult {
        let stopwatch = self.track_cpu_time.then(CpuStopwatch::start);
        let mut result = FipsResult::PASS;

        for group in block.chunks_exact(4) {
            let word = u32::from_le_bytes([group[0], group[1], group[2], group[3]]);
            if word == self.last32 {
                result.insert(FipsTest::ContinuousRun);
                self.statistics.failures[FipsTest::ContinuousRun.index()] += 1;
            }
            self.last32 = word;
            for &byte in group {
                self.record_byte(byte);
            }
        }

        // The last run of the block has not been closed by a bit flip yet.
        self.close_run();
        if self.longrun {
            result.insert(FipsTest::LongRun);
            self.longrun = false;
        }

        if !MONOBIT_RANGE.contains(&self.ones) {
            result.insert(FipsTest::Monobit);
        }
        if !POKER_RANGE.contains(&self.poker_statistic()) {
            result.insert(FipsTest::Poker);
        }
        if !self.runs_within_ranges() {
            result.insert(FipsTest::Runs);
        }

        for test in [
            FipsTest::Monobit,
            FipsTest::Poker,
            FipsTest::Runs,
            FipsTest::LongRun,
        ] {
            if result.contains(test) {
                self.statistics.failures[test.index()] += 1;
            }
        }
        if result.passed() {
            self.statistics.good_blocks += 1;
        } else {
            self.statistics.bad_blocks += 1;
        }

        log::trace!(
            "fips block: ones={} poker={} runs={:?} -> {}",
            self.ones,
            self.poker_statistic(),
            self.runs,
            result
        );

        self.poker = [0; 16];
        self.runs = [0; 12];
        self.ones = 0;
        self.rlength = -1;
        self.current_bit = 0;

        if let (Some(sw), Some(total)) = (stopwatch, self.statistics.cpu_time.as_mut()) {
            *total += sw.elapsed();
        }

        result
    }

    /// Account one byte: both nibbles, then its bits from MSB to LSB.
    fn record_byte(&mut self, byte: u8) {
        self.poker[(byte >> 4) as usize] += 1;
        self.poker[(byte & 0x0f) as usize] += 1;

        for shift in (0..8).rev() {
            let bit = (byte >> shift) & 1;
            self.current_bit = bit;
            self.ones += u32::from(bit);
            if bit != self.last_bit {
                self.close_run();
                self.rlength = 0;
                self.last_bit = bit;
            } else {
                self.rlength += 1;
            }
        }
    }

    /// Count the run that ends here, bucketed by `current_bit`: the bit that
    /// broke the run, or the block's final bit at the flush. An unstarted run
    /// is ignored.
    fn close_run(&mut self) {
        if self.rlength < 0 {
            return;
        }
        let bucket = self.rlength.min(5) as usize + 6 * self.current_bit as usize;
        self.runs[bucket] += 1;
        if self.rlength >= LONG_RUN_LENGTH - 1 {
            self.longrun = true;
        }
    }

    fn poker_statistic(&self) -> u64 {
        self.poker.iter().map(|&c| u64::from(c) * u64::from(c)).sum()
    }

    fn runs_within_ranges(&self) -> bool {
        self.runs
            .iter()
            .enumerate()
            .all(|(i, count)| RUNS_RANGES[i % 6].contains(count))
    }
}

/// Outcome of [`FipsContext::test_stream`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamReport {
    /// One result per complete block, in order.
    pub results: Vec<FipsResult>,
    /// Bytes after the last complete block.
    pub untested_bytes: usize,
}

impl StreamReport {
    pub fn bad_blocks(&self) -> usize {
        self.results.iter().filter(|r| !r.passed()).count()
    }
}
