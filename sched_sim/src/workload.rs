// workload.rs: task mix fed to the simulated host (TOML file or seeded generator)
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use sched_core::{CpuMask, Policy};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::PolicyMix;
use crate::errors::SimError;

/// Average CPU burst of an interactive generated task, in ticks.
const MEAN_BURST_TICKS: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySwitch {
    pub at: u64,
    pub policy: Policy,
}

/// One simulated task. Times are in ticks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSpec {
    pub name: String,
    pub policy: Policy,
    pub time_slice: u32,
    /// Total CPU ticks before the task exits
    pub work: u64,
    /// CPU ticks between blocking sleeps (0 = CPU bound, never blocks)
    #[serde(default)]
    pub burst: u64,
    #[serde(default)]
    pub sleep: u64,
    /// Voluntary yield after this many ticks on the CPU (0 = never)
    #[serde(default)]
    pub yield_every: u64,
    #[serde(default)]
    pub spawn_at: u64,
    /// Core the task is forked from
    #[serde(default)]
    pub core: usize,
    #[serde(default)]
    pub affinity: Option<Vec<usize>>,
    #[serde(default)]
    pub switch_policy: Option<PolicySwitch>,
}

impl TaskSpec {
    pub fn new(name: &str, policy: Policy, time_slice: u32, work: u64) -> Self {
        Self {
            name: name.to_string(),
            policy,
            time_slice,
            work,
            burst: 0,
            sleep: 0,
            yield_every: 0,
            spawn_at: 0,
            core: 0,
            affinity: None,
            switch_policy: None,
        }
    }

    pub fn mask(&self) -> CpuMask {
        self.affinity
            .as_deref()
            .map(CpuMask::from_cores)
            .unwrap_or_default()
    }

    fn validate(&self, cores: usize) -> Result<(), SimError> {
        let bad = |why: &str| Err(SimError::Workload(format!("task '{}': {why}", self.name)));
        if self.time_slice == 0 {
            return bad("time_slice must be > 0");
        }
        if self.work == 0 {
            return bad("work must be > 0");
        }
        if (self.burst == 0) != (self.sleep == 0) {
            return bad("burst and sleep must be set together");
        }
        if self.core >= cores {
            return bad(&format!("core {} outside 0..{cores}", self.core));
        }
        if let Some(aff) = &self.affinity {
            if aff.is_empty() || aff.iter().any(|&c| c >= cores) {
                return bad(&format!("affinity {aff:?} must name cores in 0..{cores}"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workload {
    #[serde(rename = "task", default)]
    pub tasks: Vec<TaskSpec>,
}

impl Workload {
    pub fn from_toml(text: &str, cores: usize) -> Result<Self, SimError> {
        let mut w: Workload = toml::from_str(text)?;
        w.finish(cores)?;
        Ok(w)
    }

    pub fn load(path: &Path, cores: usize) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text, cores)
    }

    /// Seeded random mix: CPU-bound and interactive tasks, skewed towards
    /// core 0 so the balancer has work to do.
    pub fn generate(seed: u64, count: usize, cores: usize, mix: PolicyMix) -> Result<Self, SimError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let bursts = Exp::new(1.0 / MEAN_BURST_TICKS)
            .map_err(|e| SimError::Config(format!("burst distribution: {e}")))?;

        let tasks = (0..count)
            .map(|i| {
                let policy = match mix {
                    PolicyMix::Rms => Policy::Rms,
                    PolicyMix::Sjf => Policy::Sjf,
                    PolicyMix::Mixed => {
                        if rng.random_bool(0.5) { Policy::Rms } else { Policy::Sjf }
                    }
                };
                let mut spec = TaskSpec::new(
                    &format!("{policy}-{i}"),
                    policy,
                    rng.random_range(1..=10),
                    rng.random_range(20..=200),
                );
                if rng.random_bool(0.4) {
                    spec.burst = (bursts.sample(&mut rng).ceil() as u64).max(1);
                    spec.sleep = rng.random_range(5..=40);
                }
                if rng.random_bool(0.1) {
                    spec.yield_every = rng.random_range(3..=10);
                }
                spec.spawn_at = rng.random_range(0..50);
                spec.core = if rng.random_bool(0.7) {
                    0
                } else {
                    rng.random_range(0..cores)
                };
                spec
            })
            .collect();

        let mut w = Workload { tasks };
        w.finish(cores)?;
        Ok(w)
    }

    fn finish(&mut self, cores: usize) -> Result<(), SimError> {
        for t in &self.tasks {
            t.validate(cores)?;
        }
        // stable: equal spawn times keep file order
        self.tasks.sort_by_key(|t| t.spawn_at);
        Ok(())
    }

    pub fn total_work(&self) -> u64 {
        self.tasks.iter().map(|t| t.work).sum()
    }
}
