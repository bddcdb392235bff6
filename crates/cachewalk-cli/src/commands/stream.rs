use std::io::Write;

use cachewalk_core::ExposurePolicy;
use cachewalk_fips::BLOCK_BYTES;

pub struct StreamCommandConfig<'a> {
    /// 0 means unlimited.
    pub n_bytes: usize,
    pub format: &'a str,
    pub policy: ExposurePolicy,
    pub table_kib: Option<usize>,
}

pub fn run(cfg: StreamCommandConfig<'_>) -> super::CommandResult {
    let pool = super::make_pool(cfg.policy, cfg.table_kib, false)?;
    let chunk_size = BLOCK_BYTES;
    let mut total = 0usize;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    loop {
        if cfg.n_bytes > 0 && total >= cfg.n_bytes {
            break;
        }
        let want = if cfg.n_bytes == 0 {
            chunk_size
        } else {
            chunk_size.min(cfg.n_bytes - total)
        };

        let data = pool.get_bytes(want)?;

        if write_chunk(&mut out, cfg.format, &data).is_err() {
            // Broken pipe
            return Ok(());
        }
        let _ = out.flush();
        total += data.len();
    }

    if cfg.format == "hex" {
        let _ = writeln!(out);
    }

    let stats = pool.fips_statistics();
    log::info!(
        "streamed {total} bytes; {} of {} blocks flagged",
        stats.bad_blocks,
        stats.total_blocks()
    );
    Ok(())
}

fn write_chunk(out: &mut impl Write, format: &str, data: &[u8]) -> std::io::Result<()> {
    match format {
        "hex" => {
            let hex: String = data.iter().map(|b| format!("{b:02x}")).collect();
            out.write_all(hex.as_bytes())
        }
        _ => out.write_all(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_chunk_formats() {
        let mut raw = Vec::new();
        write_chunk(&mut raw, "raw", &[0x00, 0xAB, 0xFF]).unwrap();
        assert_eq!(raw, vec![0x00, 0xAB, 0xFF]);

        let mut hex = Vec::new();
        write_chunk(&mut hex, "hex", &[0x00, 0xAB, 0xFF]).unwrap();
        assert_eq!(hex, b"00abff");
    }
}
