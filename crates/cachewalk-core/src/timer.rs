//! Cycle timer capability used by the harvester.
//!
//! The harvester only needs a monotonically non-decreasing tick count whose
//! low bits jitter with cache misses and branch mispredictions. Any
//! `FnMut() -> u64` closure is a [`CycleTimer`], so tests can inject a
//! deterministic fake.

/// Source of high-resolution ticks.
pub trait CycleTimer {
    /// Current tick count. Never smaller than the previous reading.
    fn ticks(&mut self) -> u64;
}

impl<F: FnMut() -> u64> CycleTimer for F {
    fn ticks(&mut self) -> u64 {
        self()
    }
}

/// The CPU's own cycle counter.
///
/// `rdtsc` on x86_64, `cntvct_el0` on aarch64, and a nanosecond clock
/// relative to a process-local epoch everywhere else.
#[derive(Debug, Clone, Copy, Default)]
pub struct HardwareTimer;

impl CycleTimer for HardwareTimer {
    #[inline(always)]
    fn ticks(&mut self) -> u64 {
        read_cycle_counter()
    }
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn read_cycle_counter() -> u64 {
    // SAFETY: RDTSC is present on every x86_64 CPU, readable from user mode
    // and has no side effects.
    unsafe { core::arch::x86_64::_rdtsc() }
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub fn read_cycle_counter() -> u64 {
    let val: u64;
    // SAFETY: CNTVCT_EL0 is readable from EL0 on Linux and macOS.
    // Read-only system register, no side effects.
    unsafe {
        std::arch::asm!("mrs {}, cntvct_el0", out(reg) val, options(nostack, nomem));
    }
    val
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub fn read_cycle_counter() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}
