//! Cache-walk harvester: HAVEGE-style entropy from cache and branch timing.
//!
//! Each call to [`Harvester::run_iteration`] walks two 8-word blocks of a
//! [`WalkTable`] that is larger than the data caches, emits 16 words, and
//! rewrites and permutes every slot it read with the current cycle count.
//! The walk position for the next call is derived from the words just
//! emitted, so the access pattern itself keeps moving.
//!
//! The iteration contains 21 conditional branches: two cascades of 10
//! early-exit tests whose depth depends on cursor bits, and one test that
//! permutes which slots get which rewrite. On real hardware roughly four of
//! them execute per call and about two mispredict. Every mispredict and every
//! cache miss shifts the next timer reading by an amount the harvester cannot
//! predict; that, not the arithmetic, is the entropy.
//!
//! Before any walk, every table slot is seeded from successive timer readings
//! so the first block out is not built from zero slots.
//!
//! With a deterministic timer (some virtual machines, or a test fake) the
//! output is still produced but carries no entropy. Only a timer that never
//! moves is caught ([`Harvester::timer_advances`]); otherwise a rising
//! self-test failure rate over many blocks is the only sign.

use std::hint::black_box;

use crate::error::CoreError;
use crate::platform::detect_cache_kib;
use crate::timer::{CycleTimer, HardwareTimer};
use crate::walk::{WalkTable, words_for_cache};

/// Words appended to the output per iteration.
pub const WORDS_PER_ITERATION: usize = 16;

/// Readings [`Harvester::timer_advances`] takes before calling a timer stuck.
const TIMER_CHECK_READS: usize = 1000;

/// Harvester configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvesterConfig {
    /// Combined data cache size in KiB. Detected from the OS when `None`.
    pub cache_kib: Option<usize>,
    /// Explicit walk table size in words. Overrides `cache_kib`.
    pub table_words: Option<usize>,
    /// Iterations run and thrown away before the first output.
    pub warmup_iterations: usize,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            cache_kib: None,
            table_words: None,
            warmup_iterations: 64,
        }
    }
}

impl HarvesterConfig {
    /// Walk table size this configuration resolves to.
    pub fn resolved_table_words(&self) -> usize {
        match self.table_words {
            Some(words) => words,
            None => words_for_cache(self.cache_kib.unwrap_or_else(detect_cache_kib)),
        }
    }
}

/// One step of the early-exit cascade: stop on a clear low bit, otherwise
/// fold and shift.
macro_rules! cascade_step {
    ($t:ident, $exit:lifetime) => {
        if $t & 1 == 0 {
            break $exit;
        }
        $t ^= 3;
        $t >>= 1;
    };
}

/// Ten data-dependent tests. Inlined at each call site so each copy has its
/// own branch predictor entries.
#[inline(always)]
fn branch_cascade(mut t: u32) -> u32 {
    'cascade: {
        cascade_step!(t, 'cascade);
        cascade_step!(t, 'cascade);
        cascade_step!(t, 'cascade);
        cascade_step!(t, 'cascade);
        cascade_step!(t, 'cascade);
        cascade_step!(t, 'cascade);
        cascade_step!(t, 'cascade);
        cascade_step!(t, 'cascade);
        cascade_step!(t, 'cascade);
        cascade_step!(t, 'cascade);
    }
    t
}

/// The harvester engine. Owns its walk table and cursor state exclusively.
pub struct Harvester<T: CycleTimer = HardwareTimer> {
    timer: T,
    table: WalkTable,
    /// Primary cursor (`PT`). Unmasked between iterations.
    pt: u32,
    /// Secondary cursor (`PT2`). Always masked.
    pt2: u32,
    /// 3-bit offset selectors derived from the cursors.
    sel: u32,
    sel2: u32,
    last_tick: u32,
    iterations: u64,
    /// Bytes produced but not yet handed out by `fill_bytes`.
    spill: Vec<u8>,
}

impl Harvester<HardwareTimer> {
    /// Harvester over the CPU cycle counter.
    pub fn new(config: &HarvesterConfig) -> Result<Self, CoreError> {
        Self::with_timer(config, HardwareTimer)
    }
}

impl<T: CycleTimer> Harvester<T> {
    /// Harvester over an injected timer.
    pub fn with_timer(config: &HarvesterConfig, timer: T) -> Result<Self, CoreError> {
        let table = WalkTable::new(config.resolved_table_words())?;
        log::debug!(
            "harvester: {} KiB walk table, {} warm-up iterations",
            table.len() * size_of::<u32>() / 1024,
            config.warmup_iterations
        );

        let mut harvester = Self {
            timer,
            table,
            pt: 0,
            // Bit 3 differs from `pt` and bit 4 is the complement `pt` will
            // take, so the cursors start on different cache lines.
            pt2: 0x18,
            sel: 0,
            sel2: 0,
            last_tick: 0,
            iterations: 0,
            spill: Vec::new(),
        };

        let timer = &mut harvester.timer;
        harvester.table.seed(|| timer.ticks() as u32);

        let mut scratch = Vec::with_capacity(WORDS_PER_ITERATION);
        for _ in 0..config.warmup_iterations {
            scratch.clear();
            harvester.run_iteration(&mut scratch);
        }
        Ok(harvester)
    }

    pub fn table(&self) -> &WalkTable {
        &self.table
    }

    /// Current `(PT, PT2)` cursor pair.
    pub fn cursors(&self) -> (u32, u32) {
        (self.pt, self.pt2)
    }

    /// Iterations run so far, warm-up included.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Most recent timer reading (low 32 bits).
    pub fn last_tick(&self) -> u32 {
        self.last_tick
    }

    /// Whether the timer moves at all. Coarse counters may repeat a reading,
    /// so a bounded number of attempts is allowed before giving up.
    pub fn timer_advances(&mut self) -> bool {
        let first = self.timer.ticks();
        (0..TIMER_CHECK_READS).any(|_| self.timer.ticks() != first)
    }

    #[inline(always)]
    fn sample(&mut self) -> u32 {
        self.last_tick = self.timer.ticks() as u32;
        self.last_tick
    }

    /// Run one walk iteration and append exactly [`WORDS_PER_ITERATION`]
    /// words to `out`.
    pub fn run_iteration(&mut self, out: &mut Vec<u32>) {
        let mut words = [0u32; WORDS_PER_ITERATION];
        let mask = self.table.mask();

        let test = branch_cascade(self.pt >> 20) >> 1;
        self.sel = (self.pt >> 18) & 7;
        self.pt &= mask;
        let pt = self.pt;
        let pt2 = self.pt2;

        // First quartet.
        let tick = self.sample();
        let q = [pt, pt2, pt ^ 1, pt2 ^ 4];
        self.emit(&mut words[0..4], q);
        self.table.exchange_mix(q[0], q[1], 1, 2, tick);
        self.table.rotate_mix(q[2], 3, tick);
        self.table.rotate_mix(q[3], 4, tick);

        // Second quartet; which slot gets which rewrite depends on `test`.
        let mut q = [pt ^ 2, pt2 ^ 2, pt ^ 3, pt2 ^ 6];
        self.emit(&mut words[4..8], q);
        if test & 1 != 0 {
            q.swap(0, 2);
        }
        let test = pt2 >> 18;
        self.table.exchange_mix(q[0], q[1], 5, 6, tick);
        let tick = self.sample();
        self.table.rotate_mix(q[2], 7, tick);
        self.table.rotate_mix(q[3], 8, tick);

        // Third quartet starts on the old `pt2`.
        let (a0, a1) = (pt ^ 4, pt2 ^ 1);

        let raw = words[self.sel2 as usize] ^ self.table.get(pt2 ^ self.sel2 ^ 7);
        let pt2 = ((raw & mask) & !0x8) ^ ((pt ^ 0x8) & 0x8);
        // Bits 28..30 of the unmasked value; the mask clears them.
        self.sel2 = (raw >> 28) & 7;
        self.pt2 = pt2;

        black_box(branch_cascade(test));

        let q = [a0, a1, pt ^ 5, pt2 ^ 5];
        self.emit(&mut words[8..12], q);
        self.table.exchange_mix(q[0], q[1], 9, 10, tick);
        self.table.rotate_mix(q[2], 11, tick);
        self.table.rotate_mix(q[3], 12, tick);

        // Fourth quartet.
        let q = [pt ^ 6, pt2 ^ 3, pt ^ 7, pt2 ^ 7];
        self.emit(&mut words[12..16], q);
        self.table.exchange_mix(q[0], q[1], 13, 14, tick);
        self.table.rotate_mix(q[2], 15, tick);
        self.table.rotate_mix(q[3], 16, tick);

        let raw = words[8 ^ self.sel as usize] ^ self.table.get(pt ^ self.sel ^ 7);
        self.pt = (raw & !0x10) ^ ((pt2 ^ 0x10) & 0x10);

        self.iterations += 1;
        out.extend_from_slice(&words);
    }

    #[inline(always)]
    fn emit(&self, dst: &mut [u32], slots: [u32; 4]) {
        for (word, slot) in dst.iter_mut().zip(slots) {
            *word ^= self.table.get(slot);
        }
    }

    /// Words appended by [`run_iteration`](Self::run_iteration) so far.
    pub fn words_produced(&self) -> u64 {
        self.iterations * WORDS_PER_ITERATION as u64
    }

    /// Exactly `n` words of harvester output.
    ///
    /// Shares the surplus buffer with [`fill_bytes`](Self::fill_bytes), so
    /// the two can be mixed without any byte being handed out twice.
    pub fn fill_words(&mut self, n: usize) -> Vec<u32> {
        self.fill_bytes(n * size_of::<u32>())
            .chunks_exact(size_of::<u32>())
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// Exactly `n` bytes of harvester output, little-endian per word.
    ///
    /// Surplus bytes of the last iteration are kept for the next call and
    /// never handed out twice.
    pub fn fill_bytes(&mut self, n: usize) -> Vec<u8> {
        let mut words = Vec::with_capacity(WORDS_PER_ITERATION);
        while self.spill.len() < n {
            words.clear();
            self.run_iteration(&mut words);
            self.spill
                .extend(words.iter().flat_map(|w| w.to_le_bytes()));
        }
        self.spill.drain(..n).collect()
    }
}
