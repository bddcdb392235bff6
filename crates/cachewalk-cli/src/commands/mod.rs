pub mod bench;
pub mod check;
pub mod stream;

use std::error::Error;

use cachewalk_core::{EntropyPool, ExposurePolicy, HarvesterConfig, HarvesterSource, PoolConfig};

/// Error type shared by the subcommands.
pub type CommandResult = Result<(), Box<dyn Error>>;

/// Harvester configuration for an optional `--table-kib` override.
pub fn harvester_config(table_kib: Option<usize>) -> Result<HarvesterConfig, Box<dyn Error>> {
    let table_words = match table_kib {
        Some(kib) => {
            let bytes = kib
                .checked_mul(1024)
                .ok_or_else(|| format!("--table-kib {kib} overflows the address space"))?;
            Some(bytes / size_of::<u32>())
        }
        None => None,
    };
    Ok(HarvesterConfig {
        table_words,
        ..HarvesterConfig::default()
    })
}

/// Build a pool over a single cache-walk harvester.
pub fn make_pool(
    policy: ExposurePolicy,
    table_kib: Option<usize>,
    track_cpu_time: bool,
) -> Result<EntropyPool, Box<dyn Error>> {
    let source = HarvesterSource::new(&harvester_config(table_kib)?)?;
    let mut pool = EntropyPool::new(PoolConfig {
        policy,
        track_cpu_time,
    });
    pool.add_source(Box::new(source));
    Ok(pool)
}

/// Map a `--policy` value (already restricted by clap) to an exposure policy.
pub fn parse_policy(s: &str, max_consecutive: u64) -> ExposurePolicy {
    if s == "discard" {
        ExposurePolicy::Discard { max_consecutive }
    } else {
        ExposurePolicy::Advisory
    }
}
