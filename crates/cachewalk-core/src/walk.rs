//! The walk table: a power-of-two array of words larger than the data caches.
//!
//! Slots are addressed by `u32` indices that the harvester keeps masked to
//! the table, so every access below is in bounds. The table is zero-filled on
//! construction and then [`WalkTable::seed`]ed from the timer, so no slot is
//! ever read before holding a defined value and the first words out are not
//! XORs of zeros.

use std::fmt;

use crate::error::CoreError;

/// Smallest accepted table. The cursors use index bits 0 through 4.
pub const MIN_TABLE_WORDS: usize = 32;

/// Largest accepted table (4 GiB of words).
pub const MAX_TABLE_WORDS: usize = 1 << 30;

pub struct WalkTable {
    slots: Vec<u32>,
    mask: u32,
}

impl WalkTable {
    /// Table of exactly `words` zeroed slots.
    pub fn new(words: usize) -> Result<Self, CoreError> {
        if !words.is_power_of_two() || !(MIN_TABLE_WORDS..=MAX_TABLE_WORDS).contains(&words) {
            return Err(CoreError::InvalidTableSize { words });
        }
        Ok(Self {
            slots: vec![0; words],
            mask: (words - 1) as u32,
        })
    }

    /// Table sized to twice `cache_kib` KiB of data cache, rounded up to a
    /// power of two.
    pub fn for_cache(cache_kib: usize) -> Result<Self, CoreError> {
        Self::new(words_for_cache(cache_kib))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// `len() - 1`; masking with it keeps an index in bounds.
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Fill every slot from a running rotate-and-XOR over `tick` readings:
    /// `acc = ror(acc, 7) ^ tick()`, slot `k` takes the `k`th `acc`.
    pub fn seed(&mut self, mut tick: impl FnMut() -> u32) {
        let mut acc = 0u32;
        for slot in &mut self.slots {
            acc = acc.rotate_right(7) ^ tick();
            *slot = acc;
        }
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.slots
    }

    #[inline(always)]
    pub fn get(&self, index: u32) -> u32 {
        self.slots[index as usize]
    }

    /// `slot = ror(slot, rot) ^ tick`.
    #[inline(always)]
    pub fn rotate_mix(&mut self, index: u32, rot: u32, tick: u32) {
        let slot = &mut self.slots[index as usize];
        *slot = slot.rotate_right(rot) ^ tick;
    }

    /// Exchange two slots while mixing: `a = ror(b, rot_b) ^ tick`,
    /// `b = ror(old a, rot_a) ^ tick`.
    #[inline(always)]
    pub fn exchange_mix(&mut self, a: u32, b: u32, rot_a: u32, rot_b: u32, tick: u32) {
        let inter = self.get(a).rotate_right(rot_a) ^ tick;
        self.slots[a as usize] = self.get(b).rotate_right(rot_b) ^ tick;
        self.slots[b as usize] = inter;
    }
}

impl fmt::Debug for WalkTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalkTable")
            .field("words", &self.slots.len())
            .field("mask", &format_args!("{:#x}", self.mask))
            .finish()
    }
}

/// Words needed to cover twice `cache_kib` KiB, as a power of two.
pub fn words_for_cache(cache_kib: usize) -> usize {
    let bytes = cache_kib.saturating_mul(2 * 1024);
    (bytes / size_of::<u32>())
        .checked_next_power_of_two()
        .unwrap_or(MAX_TABLE_WORDS)
        .clamp(MIN_TABLE_WORDS, MAX_TABLE_WORDS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_zeroed() {
        let table = WalkTable::new(64).unwrap();
        assert_eq!(table.len(), 64);
        assert_eq!(table.mask(), 63);
        assert!(table.as_slice().iter().all(|&w| w == 0));
    }

    #[test]
    fn test_seed_chains_every_slot() {
        let mut table = WalkTable::new(32).unwrap();
        let mut t = 0u32;
        table.seed(|| {
            t += 1;
            t
        });
        assert_eq!(t, 32, "one reading per slot");
        assert_eq!(table.get(0), 1);
        assert_eq!(table.get(1), 1u32.rotate_right(7) ^ 2);
        assert_eq!(table.get(2), table.get(1).rotate_right(7) ^ 3);
        assert!(table.as_slice().iter().all(|&w| w != 0));
    }

    #[test]
    fn test_rejects_bad_sizes() {
        for words in [0, 16, 31, 48, 100, MAX_TABLE_WORDS * 2] {
            assert_eq!(
                WalkTable::new(words).unwrap_err(),
                CoreError::InvalidTableSize { words }
            );
        }
    }

    #[test]
    fn test_words_for_cache() {
        // 2 * 32 KiB = 64 KiB = 16384 words.
        assert_eq!(words_for_cache(32), 16384);
        // Non power-of-two caches round up: 2 * 12 MiB -> 32 MiB.
        assert_eq!(words_for_cache(12 * 1024), 8 * 1024 * 1024);
        assert_eq!(words_for_cache(0), MIN_TABLE_WORDS);
    }

    #[test]
    fn test_rotate_mix() {
        let mut table = WalkTable::new(32).unwrap();
        table.rotate_mix(5, 4, 0x1234_5678);
        assert_eq!(table.get(5), 0x1234_5678);
        table.rotate_mix(5, 4, 0);
        assert_eq!(table.get(5), 0x8123_4567);
    }

    #[test]
    fn test_exchange_mix() {
        let mut table = WalkTable::new(32).unwrap();
        table.rotate_mix(1, 0, 0x0000_0002);
        table.rotate_mix(2, 0, 0x0000_0004);
        table.exchange_mix(1, 2, 1, 2, 0);
        assert_eq!(table.get(1), 0x0000_0001, "ror(4, 2)");
        assert_eq!(table.get(2), 0x0000_0001, "ror(2, 1)");

        table.exchange_mix(1, 2, 0, 0, 0xF0);
        assert_eq!(table.get(1), 0xF1);
        assert_eq!(table.get(2), 0xF1);
    }

    #[test]
    fn test_debug_is_compact() {
        let table = WalkTable::new(1 << 16).unwrap();
        let dbg = format!("{table:?}");
        assert!(dbg.contains("65536"));
        assert!(dbg.contains("0xffff"));
    }
}
