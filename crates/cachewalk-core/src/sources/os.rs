//! OS CSPRNG bytes as an alternate source.

use crate::source::{EntropySource, SourceCategory, SourceInfo};

static OS_ENTROPY_INFO: SourceInfo = SourceInfo {
    name: "os_random",
    description: "Operating system CSPRNG via getrandom",
    physics: "Reads the kernel's seeded random number generator (getrandom(2), \
              getentropy, BCryptGenRandom). The kernel pools interrupt timing and \
              hardware RNG input; the bytes arriving here are already conditioned.",
    category: SourceCategory::System,
    entropy_rate_estimate: 8.0,
};

pub struct OsEntropySource;

impl EntropySource for OsEntropySource {
    fn info(&self) -> &SourceInfo {
        &OS_ENTROPY_INFO
    }

    fn is_available(&self) -> bool {
        let mut byte = [0u8; 1];
        getrandom::fill(&mut byte).is_ok()
    }

    fn collect(&self, n_bytes: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n_bytes];
        match getrandom::fill(&mut buf) {
            Ok(()) => buf,
            Err(e) => {
                log::warn!("os_random: getrandom failed: {e}");
                Vec::new()
            }
        }
    }
}
