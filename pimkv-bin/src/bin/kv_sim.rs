use std::{
    fs::File,
    io::{BufWriter, Write},
    time::Instant,
};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use pimkv_bin::init_logging_with_progress;
use pimkv_bin::workload::{KvWorkload, WorkloadSummary};
use pimkv_core::SimulationConfig;
use pimkv_core::allocator::RowAllocator;
use pimkv_core::dram::{Dram, DramReport, Pim};
use pimkv_core::util::NamedProgress;
use pimkv_core::RequestDriver;
use pimkv_fixed_latency::FixedLatency;
use pimkv_linear::LinearRowAllocator;
use pimkv_shuffled::ShuffledRowAllocator;
use serde::Serialize;

#[derive(Debug, Clone, Copy, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
enum AllocStrategy {
    /// Rows in ascending order
    Linear,
    /// Rows in seeded random order
    Shuffled,
}

/// CLI arguments for the `kv_sim` binary.
#[derive(Debug, Parser, Serialize, Clone)]
struct CliArgs {
    /// The simulation config file.
    #[clap(long = "config", default_value = "config/pim-config.json")]
    config: String,
    /// Number of attention heads.
    #[clap(long = "heads", default_value = "32")]
    heads: usize,
    /// Prompt length in tokens.
    #[clap(long = "prompt-len", default_value = "64")]
    prompt_len: u32,
    /// Number of generated tokens.
    #[clap(long = "decode-steps", default_value = "32")]
    decode_steps: u32,
    /// The row allocation strategy.
    #[clap(long = "allocator", value_enum, default_value = "linear")]
    allocator: AllocStrategy,
    /// Seed for the shuffled allocator. Random if not given.
    #[clap(long = "seed")]
    seed: Option<u64>,
    /// Output file for the report (JSON format).
    #[clap(long = "output")]
    output: Option<String>,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    /// ISO 8601 timestamp of when the simulation ran
    date: String,
    args: CliArgs,
    seed: Option<u64>,
    duration_ms: u64,
    workload: WorkloadSummary,
    dram: DramReport,
}

impl SimulationReport {
    fn save_to_file(&self, filename: &str) -> Result<()> {
        let file = File::create(filename)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        info!("Report saved to {}", filename);
        Ok(())
    }
}

fn simulate<A>(
    args: &CliArgs,
    config: &SimulationConfig,
    allocator: &mut A,
    progress: &indicatif::MultiProgress,
) -> Result<(WorkloadSummary, DramReport)>
where
    A: RowAllocator,
    A::Error: Send + Sync + 'static,
{
    let mut dram = Pim::new(config, FixedLatency::from_config(config)?);
    info!("Timing: {:?}", dram.engine().config());
    let mut driver = RequestDriver::new(dram.n_channels());
    let mut workload = KvWorkload::new(config, args.heads, args.prompt_len, allocator)?;

    let p = progress.add(ProgressBar::new(0));
    p.set_style(ProgressStyle::named_bar("Prefill requests"));
    let cycles = workload.prefill(&mut dram, &mut driver, Some(&p));
    p.finish_and_clear();
    info!("Prefill done after {} cycles", cycles);

    let p = progress.add(ProgressBar::new(u64::from(args.decode_steps)));
    p.set_style(ProgressStyle::named_bar("Decode steps"));
    for _ in 0..args.decode_steps {
        let cycles = workload.decode_step(&mut dram, &mut driver, allocator)?;
        p.set_message(format!("{cycles} cycles"));
        p.inc(1);
    }
    p.finish_and_clear();

    dram.print_stat();
    Ok((workload.summary(), dram.report()))
}

fn main() -> Result<()> {
    let progress = init_logging_with_progress()?;
    let args = CliArgs::parse();
    info!("CLI args: {:?}", args);
    let config = SimulationConfig::from_jsonfile(&args.config)?;
    let start = Instant::now();

    let (seed, (workload, dram)) = match args.allocator {
        AllocStrategy::Linear => {
            let mut alloc = LinearRowAllocator::new(config.mapping(), config.n_channels);
            (None, simulate(&args, &config, &mut alloc, &progress)?)
        }
        AllocStrategy::Shuffled => {
            let seed = args.seed.unwrap_or_else(rand::random);
            let mut alloc = ShuffledRowAllocator::new(config.mapping(), config.n_channels, seed);
            (Some(seed), simulate(&args, &config, &mut alloc, &progress)?)
        }
    };

    info!(
        "{} rows, {} growth events, {} cycles, avg bw util {:.3}",
        workload.total_rows, workload.growth_events, dram.cycles, dram.avg_bw_util
    );
    info!(
        "{} of {} token elements had no address",
        workload.unresolved_elements, workload.elements
    );
    let report = SimulationReport {
        date: chrono::Local::now().to_rfc3339(),
        args: args.clone(),
        seed,
        duration_ms: start.elapsed().as_millis() as u64,
        workload,
        dram,
    };
    match &args.output {
        Some(filename) => report.save_to_file(filename)?,
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}
