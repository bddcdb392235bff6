use std::io::Read;

use cachewalk_fips::{BLOCK_BYTES, FipsContext};

/// Blocks read from the input per pass.
const BLOCKS_PER_READ: usize = 64;

pub fn run(input: Option<&str>, json: bool, cpu_time: bool) -> super::CommandResult {
    let mut reader: Box<dyn Read> = match input {
        Some(path) => Box::new(std::fs::File::open(path)?),
        None => Box::new(std::io::stdin().lock()),
    };

    let mut ctx = FipsContext::with_options(0, cpu_time);
    let untested_bytes = check_reader(&mut ctx, &mut reader)?;
    let stats = ctx.statistics();

    if json {
        let report = serde_json::json!({
            "statistics": stats,
            "bad_ratio": stats.bad_ratio(),
            "untested_bytes": untested_bytes,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{stats}");
        if untested_bytes > 0 {
            eprintln!(
                "Warning: {untested_bytes} trailing bytes do not fill a block and were not tested"
            );
        }
    }
    Ok(())
}

/// Test every complete block the reader yields. Returns the number of
/// trailing bytes that did not fill a block.
fn check_reader(ctx: &mut FipsContext, reader: &mut impl Read) -> std::io::Result<usize> {
    let mut buf = vec![0u8; BLOCK_BYTES * BLOCKS_PER_READ];
    loop {
        let n = read_full(reader, &mut buf)?;
        let first = ctx.statistics().total_blocks();
        let report = ctx.test_stream(&buf[..n]);
        for (i, result) in report.results.iter().enumerate() {
            if !result.passed() {
                log::debug!("block {}: {result}", first + i as u64);
            }
        }
        if n < buf.len() {
            return Ok(report.untested_bytes);
        }
    }
}

/// Fill `buf` as far as the reader allows. Short only at end of input.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
