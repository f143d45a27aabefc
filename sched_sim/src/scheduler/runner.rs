// src/scheduler/runner.rs
use crate::{config::Config, errors::SimError, logging, report::RunSummary};
use super::{timing::TickClock, Machine};

use std::sync::Arc;
use tokio::{
    task,
    time::{self, Duration, MissedTickBehavior},
};
use tracing::{info, warn};

/// Unpaced runs give the runtime a chance to deliver Ctrl+C this often.
const YIELD_EVERY_TICKS: u64 = 1024;

/// Busy/idle counts of one core over a cpu.csv window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuRow {
    pub tick: u64,
    pub core: usize,
    pub window_ticks: u64,
    pub busy_ticks: u64,
    pub idle_ticks: u64,
}

struct CpuWindow {
    len: u64,
    ticks: u64,
    busy: Vec<u64>,
}

impl CpuWindow {
    fn new(cores: usize, len: u64) -> Self {
        Self { len: len.max(1), ticks: 0, busy: vec![0; cores] }
    }

    /// Returns one row per core once the window fills up.
    fn push(&mut self, tick: u64, busy: &[bool]) -> Option<Vec<CpuRow>> {
        self.ticks += 1;
        for (acc, &b) in self.busy.iter_mut().zip(busy) {
            *acc += u64::from(b);
        }
        (self.ticks >= self.len).then(|| self.drain(tick))
    }

    fn drain(&mut self, tick: u64) -> Vec<CpuRow> {
        let window = std::mem::take(&mut self.ticks);
        self.busy
            .iter_mut()
            .enumerate()
            .map(|(core, busy)| {
                let busy_ticks = std::mem::take(busy);
                CpuRow {
                    tick,
                    core,
                    window_ticks: window,
                    busy_ticks,
                    idle_ticks: window - busy_ticks,
                }
            })
            .collect()
    }
}

/// Drives `machine` until every task exited, `cfg.ticks` elapsed or Ctrl+C.
/// CSV writes happen between steps, never under the machine's locks.
pub async fn run(machine: Arc<Machine>, cfg: &Config) -> Result<RunSummary, SimError> {
    let mut window = CpuWindow::new(machine.cores(), cfg.cpu_window);
    let mut jitter = (cfg.tick_us > 0).then(|| TickClock::new(u128::from(cfg.tick_us) * 1_000));
    let mut pace = (cfg.tick_us > 0).then(|| {
        let mut i = time::interval(Duration::from_micros(cfg.tick_us));
        i.set_missed_tick_behavior(MissedTickBehavior::Delay);
        i
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!(
        cores = machine.cores(),
        tick_ns = machine.tick_ns(),
        max_ticks = cfg.ticks,
        paced = pace.is_some(),
        "simulation started"
    );

    let mut last_tick = machine.tick();
    while last_tick < cfg.ticks && !machine.is_done() {
        if let Some(interval) = pace.as_mut() {
            tokio::select! {
                _ = interval.tick() => {
                    if let Some(clock) = jitter.as_mut() {
                        clock.observe(std::time::Instant::now());
                    }
                }
                _ = &mut ctrl_c => {
                    warn!(tick = last_tick, "interrupted, stopping early");
                    break;
                }
            }
        } else if last_tick % YIELD_EVERY_TICKS == 0 {
            tokio::select! {
                biased;
                _ = &mut ctrl_c => {
                    warn!(tick = last_tick, "interrupted, stopping early");
                    break;
                }
                _ = task::yield_now() => {}
            }
        }

        let report = machine.step()?;
        last_tick = report.tick;

        if cfg.trace_csv {
            for record in &report.events {
                logging::csv::log_sched_event(record).await;
            }
        }
        if let Some(rows) = window.push(report.tick, &report.busy) {
            if cfg.trace_csv {
                for row in &rows {
                    logging::csv::log_cpu(row).await;
                }
            }
        }
    }

    if window.ticks > 0 && cfg.trace_csv {
        for row in &window.drain(last_tick) {
            logging::csv::log_cpu(row).await;
        }
    }

    let mut summary = machine.summary();
    summary.jitter = jitter.map(|c| c.summary());
    Ok(summary)
}
