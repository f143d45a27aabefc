//Command line interface
// runtime configuration (machine shape, tick length, workload source)
use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Policy assignment for generated workloads.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMix {
    Rms,
    Sjf,
    Mixed,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub cores: usize,
    pub ticks: u64,
    pub tick_ns: u64,
    pub tick_us: u64,
    pub seed: u64,
    pub tasks: usize,
    pub workload: Option<PathBuf>,
    pub balance_interval: u64,
    pub policy: PolicyMix,
    pub cpu_window: u64,
    pub trace_csv: bool,
    pub summary_json: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
#[command(about = "Drive the RMS/SJF scheduling classes on a simulated multi-core host")]
pub struct Cli {
    #[arg(long, default_value_t = 2)]          pub cores: usize,
    /// Upper bound on simulated ticks; the run ends early once every task exited
    #[arg(long, default_value_t = 10_000)]     pub ticks: u64,
    /// Simulated clock advance per tick
    #[arg(long, default_value_t = 1_000_000)]  pub tick_ns: u64,
    /// Wall-clock pacing per tick in microseconds (0 = as fast as possible)
    #[arg(long, default_value_t = 0)]          pub tick_us: u64,
    #[arg(long, default_value_t = 7)]          pub seed: u64,
    /// Number of generated tasks when no workload file is given
    #[arg(long, default_value_t = 16)]         pub tasks: usize,
    #[arg(long)]                               pub workload: Option<PathBuf>,
    #[arg(long, default_value_t = 20)]         pub balance_interval: u64,
    #[arg(long, value_enum, default_value_t = PolicyMix::Mixed)]
    pub policy: PolicyMix,
    /// Ticks per cpu.csv window
    #[arg(long, default_value_t = 1_000)]      pub cpu_window: u64,
    #[arg(long, default_value_t = false)]      pub trace_csv: bool,
    #[arg(long)]                               pub summary_json: Option<PathBuf>,
}

impl Cli {
    pub fn parse_and_build_config() -> Result<Config> {
        <Cli as Parser>::parse().build()
    }

    pub fn build(self) -> Result<Config> {
        if self.cores == 0 || self.cores > 64 {
            bail!("--cores must be within 1..=64, got {}", self.cores);
        }
        if self.tick_ns == 0 {
            bail!("--tick-ns must be non-zero");
        }
        Ok(Config {
            cores: self.cores,
            ticks: self.ticks,
            tick_ns: self.tick_ns,
            tick_us: self.tick_us,
            seed: self.seed,
            tasks: self.tasks,
            workload: self.workload,
            balance_interval: self.balance_interval,
            policy: self.policy,
            cpu_window: self.cpu_window.max(1),
            trace_csv: self.trace_csv,
            summary_json: self.summary_json,
        })
    }
}
