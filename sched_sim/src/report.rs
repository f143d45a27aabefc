// report.rs: end-of-run summary (tracing lines, optional JSON)
use sched_core::{Policy, TaskDescriptor};
use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::errors::SimError;

#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub name: String,
    pub policy: Policy,
    pub core: usize,
    pub time_slice: u32,
    pub runtime_ns: u64,
    pub max_single_run_ns: u64,
    pub exec_ticks: u64,
    pub wait_ticks: u64,
    pub switches: u64,
    pub migrations: u64,
    pub spawned_at: u64,
    pub first_run: Option<u64>,
    pub finished_at: Option<u64>,
}

impl TaskSummary {
    pub fn from_descriptor(
        t: &TaskDescriptor,
        exec_ticks: u64,
        wait_ticks: u64,
        spawned_at: u64,
        first_run: Option<u64>,
        finished_at: Option<u64>,
    ) -> Self {
        Self {
            name: t.name().to_string(),
            policy: t.policy(),
            core: t.core().0,
            time_slice: t.static_time_slice(),
            runtime_ns: t.accumulated_runtime(),
            max_single_run_ns: t.max_single_run(),
            exec_ticks,
            wait_ticks,
            switches: t.nr_switches(),
            migrations: t.nr_migrations(),
            spawned_at,
            first_run,
            finished_at,
        }
    }

    pub fn turnaround(&self) -> Option<u64> {
        self.finished_at.map(|f| f - self.spawned_at)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CoreSummary {
    pub core: usize,
    pub busy_ticks: u64,
    pub idle_ticks: u64,
    /// Total reported through the core's accounting sink
    pub charged_ns: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JitterSummary {
    pub samples: u64,
    pub max_ns: i128,
    pub mean_abs_ns: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub tick_ns: u64,
    pub completed: bool,
    pub tasks: Vec<TaskSummary>,
    pub cores: Vec<CoreSummary>,
    pub jitter: Option<JitterSummary>,
}

impl RunSummary {
    pub fn log(&self) {
        let finished = self.tasks.iter().filter(|t| t.finished_at.is_some()).count();
        info!(
            ticks = self.ticks,
            finished,
            total = self.tasks.len(),
            completed = self.completed,
            "run summary"
        );
        for c in &self.cores {
            let busy_pct = if c.busy_ticks + c.idle_ticks > 0 {
                c.busy_ticks as f64 * 100.0 / (c.busy_ticks + c.idle_ticks) as f64
            } else {
                0.0
            };
            info!(
                core = c.core,
                busy_ticks = c.busy_ticks,
                idle_ticks = c.idle_ticks,
                busy_pct = format_args!("{busy_pct:.1}"),
                "core"
            );
        }
        for policy in Policy::ALL {
            let done: Vec<_> = self
                .tasks
                .iter()
                .filter(|t| t.policy == policy)
                .filter_map(|t| t.turnaround())
                .collect();
            if done.is_empty() {
                continue;
            }
            let mean = done.iter().sum::<u64>() as f64 / done.len() as f64;
            info!(%policy, tasks = done.len(), mean_turnaround_ticks = format_args!("{mean:.1}"), "turnaround");
        }
        if let Some(j) = &self.jitter {
            info!(samples = j.samples, max_ns = j.max_ns as i64, mean_abs_ns = j.mean_abs_ns, "tick jitter");
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<(), SimError> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}
