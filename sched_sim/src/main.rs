// src/main.rs
mod config;
mod errors;
mod logging;
mod report;
mod scheduler;
mod workload;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::scheduler::{runner, Machine};
use crate::workload::Workload;

#[tokio::main]
async fn main() -> Result<()> {
    // -------- logging ----------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("sched_sim=info".parse()?)
                .add_directive("sched_core=warn".parse()?)
                .add_directive("tokio=warn".parse()?),
        )
        .compact()
        .init();

    // -------- config + workload ----------
    let cfg = config::Cli::parse_and_build_config()?;
    info!(?cfg, "sched_sim starting");

    let workload = match &cfg.workload {
        Some(path) => Workload::load(path, cfg.cores)
            .with_context(|| format!("loading workload {}", path.display()))?,
        None => Workload::generate(cfg.seed, cfg.tasks, cfg.cores, cfg.policy)?,
    };
    info!(
        tasks = workload.tasks.len(),
        total_work_ticks = workload.total_work(),
        "workload ready"
    );

    // -------- run ----------
    let machine = Arc::new(Machine::new(
        cfg.cores,
        cfg.tick_ns,
        cfg.balance_interval,
        workload,
    ));
    let summary = runner::run(Arc::clone(&machine), &cfg).await?;
    machine.validate()?;

    // -------- report ----------
    summary.log();
    if cfg.trace_csv {
        for t in &summary.tasks {
            logging::csv::log_task_summary(t).await;
        }
        logging::csv::flush_all().await;
    }
    if let Some(path) = &cfg.summary_json {
        summary
            .write_json(path)
            .with_context(|| format!("writing summary to {}", path.display()))?;
        info!(path = %path.display(), "summary written");
    }
    Ok(())
}
