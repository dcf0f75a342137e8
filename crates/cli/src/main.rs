//! Coherence simulator CLI.
//!
//! This binary drives the two-level MESI hierarchy from the command line. It performs:
//! 1. **Trace run:** Replay a text trace of per-L1 loads and stores.
//! 2. **Synthetic run:** Generate a seeded random workload over a small working set.
//! 3. **Defaults:** Print the default configuration as JSON, as a starting point for
//!    `--config`.
//!
//! Log output goes to stderr and is controlled with `RUST_LOG` (e.g. `RUST_LOG=debug`).

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cohsim_core::common::Result;
use cohsim_core::config::Config;
use cohsim_core::sim::{SyntheticWorkload, System, load_trace};

#[derive(Parser, Debug)]
#[command(
    name = "cohsim",
    author,
    version,
    about = "Two-level MESI cache coherence simulator",
    long_about = "Run a trace or a synthetic workload through private L1s and shared L2 banks.\n\nExamples:\n  cohsim run --trace accesses.trace\n  cohsim run --synthetic 10000 --seed 7 --config small.json\n  cohsim defaults > config.json"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a workload until every access has completed.
    Run {
        /// JSON configuration; absent fields take their defaults.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Trace file (`<l1> <L|S> <hex address>` per line).
        #[arg(short, long, conflicts_with = "synthetic")]
        trace: Option<PathBuf>,

        /// Number of synthetic accesses to generate instead of a trace.
        #[arg(long)]
        synthetic: Option<usize>,

        /// Seed for the synthetic workload.
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Distinct lines touched by the synthetic workload.
        #[arg(long, default_value_t = 64)]
        lines: u64,

        /// Give up after this many cycles.
        #[arg(long, default_value_t = 10_000_000)]
        max_cycles: u64,
    },

    /// Print the default configuration as JSON.
    Defaults,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Run {
            config,
            trace,
            synthetic,
            seed,
            lines,
            max_cycles,
        } => cmd_run(config.as_deref(), trace.as_deref(), synthetic, seed, lines, max_cycles),
        Commands::Defaults => cmd_defaults(),
    };
    if let Err(e) = outcome {
        error!(%e, "simulation failed");
        eprintln!("\n[!] {e}");
        process::exit(1);
    }
}

/// Loads `path`, or the defaults when no file is given.
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_json_file(path),
        None => Ok(Config::default()),
    }
}

fn cmd_run(
    config: Option<&Path>,
    trace: Option<&Path>,
    synthetic: Option<usize>,
    seed: u64,
    lines: u64,
    max_cycles: u64,
) -> Result<()> {
    let config = load_config(config)?;
    let mut system = System::new(&config)?;

    let entries = match (trace, synthetic) {
        (Some(path), _) => {
            println!("[*] Trace: {}", path.display());
            load_trace(path)?
        }
        (None, Some(count)) => {
            println!("[*] Synthetic: {count} accesses, seed {seed}, {lines} lines");
            let mut workload =
                SyntheticWorkload::new(seed, config.system.num_l1, lines, config.l1.line_bytes as u64);
            workload.generate(count)
        }
        (None, None) => {
            eprintln!("Error: specify --trace <file> or --synthetic <count>");
            eprintln!("  cohsim run --trace accesses.trace");
            eprintln!("  cohsim run --synthetic 10000 --seed 7");
            process::exit(1);
        }
    };
    println!(
        "  L1: {} x {} KiB {}-way   L2: {} x {} KiB {}-way   MC: {}",
        config.system.num_l1,
        config.l1.size_bytes / 1024,
        config.l1.ways,
        config.system.num_l2,
        config.l2.size_bytes / 1024,
        config.l2.ways,
        config.system.num_mc
    );
    println!();

    system.load(&entries)?;
    let cycles = system.run_until_idle(max_cycles)?;
    system.check_invariants()?;
    system.check_directory()?;
    info!(cycles, accesses = entries.len(), "run complete");

    println!("[*] {} accesses completed in {cycles} cycles", entries.len());
    system.print_stats();
    Ok(())
}

fn cmd_defaults() -> Result<()> {
    let json = serde_json::to_string_pretty(&Config::default())?;
    println!("{json}");
    Ok(())
}
