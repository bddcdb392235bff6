//! Entropy source implementations.

pub mod harvester;
pub mod os;

pub use harvester::HarvesterSource;
pub use os::OsEntropySource;

use crate::harvester::HarvesterConfig;
use crate::source::EntropySource;

/// Default source set: the cache-walk harvester, if its table can be built
/// and its timer runs.
pub fn default_sources(config: &HarvesterConfig) -> Vec<Box<dyn EntropySource>> {
    let mut candidates: Vec<Box<dyn EntropySource>> = Vec::new();
    match HarvesterSource::new(config) {
        Ok(src) => candidates.push(Box::new(src)),
        Err(e) => log::warn!("cache_walk source unavailable: {e}"),
    }
    available_sources(candidates)
}

/// Keep only the sources that report themselves usable on this machine.
pub fn available_sources(candidates: Vec<Box<dyn EntropySource>>) -> Vec<Box<dyn EntropySource>> {
    candidates
        .into_iter()
        .filter(|src| {
            let ok = src.is_available();
            if !ok {
                log::warn!("{} source unavailable on this machine", src.name());
            }
            ok
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SourceCategory, SourceInfo};

    static OFFLINE_INFO: SourceInfo = SourceInfo {
        name: "offline",
        description: "never available",
        physics: "none",
        category: SourceCategory::System,
        entropy_rate_estimate: 0.0,
    };

    struct OfflineSource;

    impl EntropySource for OfflineSource {
        fn info(&self) -> &SourceInfo {
            &OFFLINE_INFO
        }
        fn is_available(&self) -> bool {
            false
        }
        fn collect(&self, _n_bytes: usize) -> Vec<u8> {
            Vec::new()
        }
    }

    #[test]
    fn unavailable_sources_are_dropped() {
        let kept = available_sources(vec![
            Box::new(OfflineSource),
            Box::new(OsEntropySource),
            Box::new(OfflineSource),
        ]);
        let names: Vec<_> = kept.iter().map(|s| s.name()).collect();
        assert_eq!(names, ["os_random"]);
    }

    #[test]
    fn default_sources_with_small_table() {
        let config = HarvesterConfig {
            cache_kib: None,
            table_words: Some(1024),
            warmup_iterations: 0,
        };
        let sources = default_sources(&config);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name(), "cache_walk");
    }

    #[test]
    fn default_sources_skip_bad_table() {
        let config = HarvesterConfig {
            cache_kib: None,
            table_words: Some(1000),
            warmup_iterations: 0,
        };
        assert!(default_sources(&config).is_empty());
    }
}
