use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use genary_core::PipelineConfig;
use std::path::PathBuf;
use std::time::Instant;

mod emergency_processor;
mod ingest_processor;
mod pump_processor;
mod solar_processor;
mod thermal_finder;

#[derive(Parser)]
#[command(name = "genary_pipeline")]
#[command(about = "Archive Taipower generation snapshots and track emergency reserve units")]
struct Cli {
    /// Archive root (overrides the config file and GENARY_DOCS_ROOT)
    #[arg(long, global = true)]
    docs_root: Option<PathBuf>,

    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Archive one fetched snapshot file
    Ingest { file: PathBuf },
    /// Rebuild today's storage aggregate
    Pump,
    /// Rebuild the storage aggregate of every archived day
    PumpAll,
    /// Check genary.json for emergency units, then apply retention
    Emergency,
    /// Replay emergency detection over the whole snapshot history
    Backfill,
    /// Regenerate day, month and global indexes from the records
    Reindex,
    /// Print recent emergency records
    Logs {
        #[arg(default_value_t = genary_core::logs::DEFAULT_LOG_DAYS)]
        days: u32,
    },
    /// Write daily solar sums to solar.csv
    Solar {
        #[arg(default_value_t = solar_processor::DEFAULT_SOLAR_DAYS)]
        days: u32,
    },
    /// List snapshots whose thermal share exceeds a threshold
    Thermal {
        #[arg(default_value_t = thermal_finder::DEFAULT_THRESHOLD)]
        threshold: f64,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = PipelineConfig::load(cli.config.as_deref()).context("loading config")?;
    if let Some(root) = cli.docs_root {
        config.docs_root = root;
    }

    let threads = if config.threads == 0 {
        num_cpus::get()
    } else {
        config.threads
    };
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .context("configuring rayon thread pool")?;

    log::info!("archive root: {}", config.docs_root.display());
    let start = Instant::now();

    match cli.command {
        Command::Ingest { file } => ingest_processor::IngestProcessor::new(&config).ingest_file(&file)?,
        Command::Pump => pump_processor::PumpProcessor::new(&config).process_today()?,
        Command::PumpAll => pump_processor::PumpProcessor::new(&config).process_all()?,
        Command::Emergency => emergency_processor::EmergencyProcessor::new(&config).check_latest()?,
        Command::Backfill => emergency_processor::EmergencyProcessor::new(&config).backfill()?,
        Command::Reindex => emergency_processor::EmergencyProcessor::new(&config).reindex()?,
        Command::Logs { days } => emergency_processor::EmergencyProcessor::new(&config).show_logs(days)?,
        Command::Solar { days } => solar_processor::SolarProcessor::new(&config).write_daily_sums(days)?,
        Command::Thermal { threshold } => thermal_finder::ThermalFinder::new(&config).report(threshold)?,
    }

    println!("\n⏱️  Finished in {:.2?}", start.elapsed());
    Ok(())
}
