//! Process CPU-time stopwatch used to account for time spent inside the tests.
//!
//! On Unix this reads `CLOCK_PROCESS_CPUTIME_ID`; elsewhere (or if the clock
//! read fails) it falls back to wall-clock time from [`Instant`].

use std::time::{Duration, Instant};

/// Running stopwatch started by [`CpuStopwatch::start`].
pub(crate) struct CpuStopwatch {
    cpu_start: Option<Duration>,
    wall_start: Instant,
}

impl CpuStopwatch {
    pub(crate) fn start() -> Self {
        Self {
            cpu_start: process_cpu_time(),
            wall_start: Instant::now(),
        }
    }

    /// Time elapsed since `start`, preferring process CPU time.
    pub(crate) fn elapsed(&self) -> Duration {
        match (self.cpu_start, process_cpu_time()) {
            (Some(start), Some(end)) => end.saturating_sub(start),
            _ => self.wall_start.elapsed(),
        }
    }
}

#[cfg(unix)]
fn process_cpu_time() -> Option<Duration> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec and CLOCK_PROCESS_CPUTIME_ID
    // is supported on every Unix target libc exposes it for.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_PROCESS_CPUTIME_ID, &mut ts) };
    if rc != 0 {
        return None;
    }
    Some(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
}

#[cfg(not(unix))]
fn process_cpu_time() -> Option<Duration> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopwatch_never_goes_backwards() {
        let sw = CpuStopwatch::start();
        let mut acc = 0u64;
        for i in 0..100_000u64 {
            acc = acc.wrapping_mul(31).wrapping_add(i);
        }
        std::hint::black_box(acc);
        let first = sw.elapsed();
        let second = sw.elapsed();
        assert!(second >= first);
    }

    #[cfg(unix)]
    #[test]
    fn process_clock_is_readable() {
        assert!(process_cpu_time().is_some());
    }
}
