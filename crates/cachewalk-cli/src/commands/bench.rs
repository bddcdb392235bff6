use std::time::Instant;

use cachewalk_core::ExposurePolicy;
use cachewalk_fips::BLOCK_BYTES;

pub fn run(blocks: usize, table_kib: Option<usize>) -> super::CommandResult {
    let pool = super::make_pool(ExposurePolicy::Advisory, table_kib, true)?;

    for info in pool.source_infos() {
        println!(
            "{} [{}] ~{:.1} bits/byte: {}",
            info.name, info.category, info.entropy_rate_estimate, info.description
        );
        println!("  {}\n", info.physics);
    }
    println!("Harvesting {blocks} blocks of {BLOCK_BYTES} bytes...\n");

    let t0 = Instant::now();
    for _ in 0..blocks {
        pool.next_block()?;
    }
    let elapsed = t0.elapsed().as_secs_f64();

    let bytes = blocks * BLOCK_BYTES;
    let report = pool.health_report();

    println!("{}", "=".repeat(60));
    println!("{:<28} {:>12}", "Bytes harvested", bytes);
    println!("{:<28} {:>11.3}s", "Wall time", elapsed);
    println!("{:<28} {:>8.2} MiB/s", "Throughput", throughput_mib(bytes, elapsed));
    if blocks > 0 {
        println!(
            "{:<28} {:>10.1}µs",
            "Per block",
            elapsed * 1e6 / blocks as f64
        );
    }
    println!("{}", "-".repeat(60));
    for src in &report.sources {
        let ok = if src.healthy { "✓" } else { "✗" };
        println!(
            "{:<25} {:>2} {:>10}B {:>5} failures",
            src.name, ok, src.bytes, src.failures
        );
    }
    println!("{}", "-".repeat(60));
    print!("{}", report.fips);
    println!("Failing block ratio: {:.4}", report.fips.bad_ratio());
    Ok(())
}

fn throughput_mib(bytes: usize, secs: f64) -> f64 {
    if secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 / (1024.0 * 1024.0) / secs
}
