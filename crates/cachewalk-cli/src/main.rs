//! CLI for cachewalk: cache-timing entropy with FIPS 140-2 self-tests.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cachewalk")]
#[command(about = "cachewalk: cache and branch timing entropy, FIPS 140-2 self-tested")]
#[command(version = cachewalk_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write self-tested harvester output to stdout
    Stream {
        /// Total bytes to write (0 = unlimited)
        #[arg(long, default_value = "0")]
        bytes: usize,

        /// Output format
        #[arg(long, default_value = "raw", value_parser = ["raw", "hex"])]
        format: String,

        /// What to do with blocks that fail the self-tests: advisory (emit and
        /// warn) or discard (drop)
        #[arg(long, default_value = "advisory", value_parser = ["advisory", "discard"])]
        policy: String,

        /// Consecutive discarded blocks before giving up (discard policy only)
        #[arg(long, default_value = "16")]
        max_rejects: u64,

        /// Walk table size in KiB (power of two; default: twice the detected cache size)
        #[arg(long)]
        table_kib: Option<usize>,
    },

    /// Run the FIPS 140-2 self-tests over a file or stdin
    Check {
        /// Input file (default: stdin)
        #[arg(long)]
        input: Option<String>,

        /// Print statistics as JSON
        #[arg(long)]
        json: bool,

        /// Report CPU time spent in the tests
        #[arg(long)]
        cpu_time: bool,
    },

    /// Harvest blocks and report throughput and self-test statistics
    Bench {
        /// Number of 2500-byte blocks to harvest
        #[arg(long, default_value = "100")]
        blocks: usize,

        /// Walk table size in KiB (power of two; default: twice the detected cache size)
        #[arg(long)]
        table_kib: Option<usize>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Stream {
            bytes,
            format,
            policy,
            max_rejects,
            table_kib,
        } => commands::stream::run(commands::stream::StreamCommandConfig {
            n_bytes: bytes,
            format: &format,
            policy: commands::parse_policy(&policy, max_rejects),
            table_kib,
        }),
        Commands::Check {
            input,
            json,
            cpu_time,
        } => commands::check::run(input.as_deref(), json, cpu_time),
        Commands::Bench { blocks, table_kib } => commands::bench::run(blocks, table_kib),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
