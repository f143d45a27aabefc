// src/scheduler/machine.rs
//
// Simulated multi-core host. Owns one locked `Rq` per core and the task arena
// and calls into the scheduling classes the way a kernel core would.
//
// Lock order: host -> cores (ascending index) -> table.

use parking_lot::Mutex;
use sched_core::{
    balance_tasks, pick_next_task, CoreId, CpuAccounting, Policy, Rq, SelectReason, TaskDescriptor,
    TaskId, TaskTable, WakeFlags, CLASS_ORDER,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::errors::SimError;
use crate::report::{CoreSummary, RunSummary, TaskSummary};
use crate::workload::{PolicySwitch, TaskSpec, Workload};

/// Per-core CPU time sink fed by the classes' runtime accounting.
struct CoreCharge(Arc<AtomicU64>);

impl CpuAccounting for CoreCharge {
    fn charge(&mut self, _task: TaskId, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Runnable,
    Sleeping { until: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Continue,
    Exit,
    Block,
    Yield,
}

/// What the simulated program does with the CPU it is given.
struct Behaviour {
    spec: TaskSpec,
    work_left: u64,
    burst_left: u64,
    since_yield: u64,
    state: RunState,
    exec_ticks: u64,
    wait_ticks: u64,
    spawned_at: u64,
    first_run: Option<u64>,
    switch: Option<PolicySwitch>,
}

impl Behaviour {
    fn new(spec: TaskSpec, tick: u64) -> Self {
        Self {
            work_left: spec.work,
            burst_left: spec.burst,
            since_yield: 0,
            state: RunState::Runnable,
            exec_ticks: 0,
            wait_ticks: 0,
            spawned_at: tick,
            first_run: None,
            switch: spec.switch_policy,
            spec,
        }
    }

    /// One tick of CPU consumed.
    fn after_tick(&mut self, tick: u64) -> Outcome {
        self.exec_ticks += 1;
        self.work_left = self.work_left.saturating_sub(1);
        self.since_yield += 1;
        if self.work_left == 0 {
            return Outcome::Exit;
        }
        if self.spec.burst > 0 {
            self.burst_left = self.burst_left.saturating_sub(1);
            if self.burst_left == 0 {
                self.state = RunState::Sleeping { until: tick + self.spec.sleep };
                self.since_yield = 0;
                return Outcome::Block;
            }
        }
        if self.spec.yield_every > 0 && self.since_yield >= self.spec.yield_every {
            self.since_yield = 0;
            return Outcome::Yield;
        }
        Outcome::Continue
    }

    fn summary(&self, t: &TaskDescriptor, finished_at: Option<u64>) -> TaskSummary {
        TaskSummary::from_descriptor(
            t,
            self.exec_ticks,
            self.wait_ticks,
            self.spawned_at,
            self.first_run,
            finished_at,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    Spawn { core: CoreId, task: String },
    Switch { core: CoreId, from: Option<String>, to: Option<String> },
    Wake { core: CoreId, task: String },
    Block { core: CoreId, task: String },
    Yield { core: CoreId, task: String },
    Exit { core: CoreId, task: String },
    Migrate { from: CoreId, to: CoreId, policy: Policy, moved: usize },
    PolicySwitch { task: String, from: Policy, to: Policy },
}

impl SimEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SimEvent::Spawn { .. } => "spawn",
            SimEvent::Switch { .. } => "switch",
            SimEvent::Wake { .. } => "wake",
            SimEvent::Block { .. } => "block",
            SimEvent::Yield { .. } => "yield",
            SimEvent::Exit { .. } => "exit",
            SimEvent::Migrate { .. } => "migrate",
            SimEvent::PolicySwitch { .. } => "policy_switch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub tick: u64,
    pub event: SimEvent,
}

/// Result of one [`Machine::step`].
#[derive(Debug, Clone, Default)]
pub struct StepReport {
    pub tick: u64,
    pub events: Vec<EventRecord>,
    /// Per core: a task held the CPU during this tick.
    pub busy: Vec<bool>,
}

struct HostState {
    tick: u64,
    pending: VecDeque<TaskSpec>,
    tasks: BTreeMap<TaskId, Behaviour>,
    finished: Vec<TaskSummary>,
    busy_ticks: Vec<u64>,
    idle_ticks: Vec<u64>,
    events: Vec<EventRecord>,
}

impl HostState {
    fn emit(&mut self, event: SimEvent) {
        trace!(tick = self.tick, ?event, "sched event");
        self.events.push(EventRecord { tick: self.tick, event });
    }

    fn behaviour(&mut self, id: TaskId) -> Result<&mut Behaviour, SimError> {
        self.tasks
            .get_mut(&id)
            .ok_or(SimError::Sched(sched_core::SchedError::UnknownTask(id)))
    }
}

pub struct Machine {
    cores: Vec<Mutex<Rq>>,
    table: Mutex<TaskTable>,
    host: Mutex<HostState>,
    charged: Vec<Arc<AtomicU64>>,
    tick_ns: u64,
    balance_interval: u64,
}

impl Machine {
    /// `workload` must already be validated for `cores` and sorted by spawn time.
    pub fn new(cores: usize, tick_ns: u64, balance_interval: u64, workload: Workload) -> Self {
        let charged: Vec<Arc<AtomicU64>> = (0..cores).map(|_| Arc::new(AtomicU64::new(0))).collect();
        let rqs = charged
            .iter()
            .enumerate()
            .map(|(i, sink)| {
                Mutex::new(Rq::new(CoreId(i)).with_accounting(Box::new(CoreCharge(Arc::clone(sink)))))
            })
            .collect();
        Self {
            cores: rqs,
            table: Mutex::new(TaskTable::new()),
            host: Mutex::new(HostState {
                tick: 0,
                pending: workload.tasks.into(),
                tasks: BTreeMap::new(),
                finished: Vec::new(),
                busy_ticks: vec![0; cores],
                idle_ticks: vec![0; cores],
                events: Vec::new(),
            }),
            charged,
            tick_ns,
            balance_interval,
        }
    }

    pub fn cores(&self) -> usize {
        self.cores.len()
    }

    pub fn tick_ns(&self) -> u64 {
        self.tick_ns
    }

    pub fn tick(&self) -> u64 {
        self.host.lock().tick
    }

    /// Every task was spawned and has exited.
    pub fn is_done(&self) -> bool {
        let host = self.host.lock();
        host.pending.is_empty() && host.tasks.is_empty()
    }

    #[cfg(test)]
    pub fn queue_len(&self, core: usize, policy: Policy) -> usize {
        self.cores[core].lock().queue(policy).len()
    }

    #[cfg(test)]
    pub fn curr_name(&self, core: usize) -> Option<String> {
        let rq = self.cores[core].lock();
        let table = self.table.lock();
        rq.curr().and_then(|id| table.get(id)).map(|t| t.name().to_string())
    }

    /// Advances the machine by one timer tick on every core.
    pub fn step(&self) -> Result<StepReport, SimError> {
        let mut host = self.host.lock();
        host.tick += 1;
        let tick = host.tick;
        let now = tick.saturating_mul(self.tick_ns);
        for core in &self.cores {
            core.lock().set_clock(now);
        }

        self.spawn_due(&mut host)?;
        self.switch_policies_due(&mut host)?;
        self.wake_due(&mut host)?;

        let mut busy = Vec::with_capacity(self.cores.len());
        for idx in 0..self.cores.len() {
            busy.push(self.run_core(&mut host, idx)?);
        }

        if self.balance_interval > 0 && tick % self.balance_interval == 0 {
            self.balance(&mut host)?;
        }

        Ok(StepReport {
            tick,
            events: std::mem::take(&mut host.events),
            busy,
        })
    }

    fn spawn_due(&self, host: &mut HostState) -> Result<(), SimError> {
        while host.pending.front().is_some_and(|s| s.spawn_at <= host.tick) {
            let Some(spec) = host.pending.pop_front() else {
                break;
            };
            let parent = CoreId(spec.core);
            let task = TaskDescriptor::new(spec.name.clone(), spec.policy, spec.time_slice)?
                .with_core(parent)
                .with_affinity(spec.mask());
            let id = self.table.lock().insert(task);

            let target = {
                let rq = self.cores[parent.0].lock();
                let table = self.table.lock();
                spec.policy
                    .class()
                    .select_cpu_on_wakeup(&rq, &table, id, SelectReason::Fork)
            };
            self.activate(id, target, WakeFlags { sync: false, fork: true })?;
            host.emit(SimEvent::Spawn { core: target, task: spec.name.clone() });
            let tick = host.tick;
            host.tasks.insert(id, Behaviour::new(spec, tick));
        }
        Ok(())
    }

    fn wake_due(&self, host: &mut HostState) -> Result<(), SimError> {
        let tick = host.tick;
        let due: Vec<TaskId> = host
            .tasks
            .iter()
            .filter(|(_, b)| matches!(b.state, RunState::Sleeping { until } if until <= tick))
            .map(|(&id, _)| id)
            .collect();

        for id in due {
            let home = self.table.lock().try_get(id)?.core();
            let target = {
                let rq = self.cores[home.0].lock();
                let table = self.table.lock();
                let policy = table.try_get(id)?.policy();
                policy
                    .class()
                    .select_cpu_on_wakeup(&rq, &table, id, SelectReason::Wake)
            };
            self.activate(id, target, WakeFlags::default())?;

            let b = host.behaviour(id)?;
            b.state = RunState::Runnable;
            b.burst_left = b.spec.burst;
            let task = b.spec.name.clone();
            host.emit(SimEvent::Wake { core: target, task });
        }
        Ok(())
    }

    /// Puts a runnable task on `target`'s queue and lets the current task
    /// there know about it.
    fn activate(&self, id: TaskId, target: CoreId, flags: WakeFlags) -> Result<(), SimError> {
        let mut rq = self.cores[target.0].lock();
        let mut table = self.table.lock();
        table.try_get_mut(id)?.set_core(target);
        let policy = table.try_get(id)?.policy();
        policy.class().enqueue(&mut rq, &mut table, id, true)?;
        check_preempt(&mut rq, &table, id, flags);
        Ok(())
    }

    fn switch_policies_due(&self, host: &mut HostState) -> Result<(), SimError> {
        let tick = host.tick;
        let due: Vec<(TaskId, Policy)> = host
            .tasks
            .iter_mut()
            .filter_map(|(&id, b)| match b.switch {
                Some(s) if s.at <= tick => {
                    b.switch = None;
                    Some((id, s.policy))
                }
                _ => None,
            })
            .collect();

        for (id, policy) in due {
            self.switch_policy(host, id, policy)?;
        }
        Ok(())
    }

    /// Moves a live task to another class, wherever it currently is.
    fn switch_policy(&self, host: &mut HostState, id: TaskId, to: Policy) -> Result<(), SimError> {
        let core = self.table.lock().try_get(id)?.core();
        let mut rq = self.cores[core.0].lock();
        let mut table = self.table.lock();

        let (from, queued, name) = {
            let t = table.try_get(id)?;
            (t.policy(), t.is_queued(), t.name().to_string())
        };
        if from == to {
            return Ok(());
        }
        let running = rq.is_curr(id);
        let (old, new) = (from.class(), to.class());

        if queued {
            old.dequeue(&mut rq, &mut table, id, false)?;
        }
        if running {
            old.put_prev(&mut rq, &mut table, id);
        }
        table.set_policy(id, to)?;
        if running {
            new.set_curr(&mut rq, &mut table, id);
        }
        if queued {
            new.enqueue(&mut rq, &mut table, id, false)?;
        }
        new.switched_to(&mut rq, &table, id, running);
        if queued && !running {
            check_preempt(&mut rq, &table, id, WakeFlags::default());
        }

        host.emit(SimEvent::PolicySwitch { task: name, from, to });
        Ok(())
    }

    /// Timer tick on one core, then the scheduling decision. Returns whether
    /// the core was busy during the tick.
    fn run_core(&self, host: &mut HostState, idx: usize) -> Result<bool, SimError> {
        let mut rq = self.cores[idx].lock();
        let mut table = self.table.lock();
        let core = rq.core();
        let tick = host.tick;
        let ran = rq.curr();
        let mut exited = None;

        if let Some(curr) = ran {
            let (policy, queued) = {
                let t = table.try_get(curr)?;
                (t.policy(), t.is_queued())
            };
            let class = policy.class();
            class.tick(&mut rq, &mut table, curr, queued)?;

            let b = host.behaviour(curr)?;
            let outcome = b.after_tick(tick);
            let task = b.spec.name.clone();
            match outcome {
                Outcome::Continue => {}
                Outcome::Exit => {
                    class.dequeue(&mut rq, &mut table, curr, true)?;
                    rq.resched_curr();
                    exited = Some(curr);
                    host.emit(SimEvent::Exit { core, task });
                }
                Outcome::Block => {
                    class.dequeue(&mut rq, &mut table, curr, true)?;
                    rq.resched_curr();
                    host.emit(SimEvent::Block { core, task });
                }
                Outcome::Yield => {
                    class.yield_current(&mut rq, &mut table, curr)?;
                    rq.resched_curr();
                    host.emit(SimEvent::Yield { core, task });
                }
            }
        }

        if rq.take_need_resched() || rq.curr().is_none() {
            schedule(host, &mut rq, &mut table)?;
        }

        for policy in Policy::ALL {
            for id in rq.queue(policy).iter(&table) {
                if rq.is_curr(id) {
                    continue;
                }
                if let Some(b) = host.tasks.get_mut(&id) {
                    b.wait_ticks += 1;
                }
            }
        }

        if let Some(id) = exited {
            let t = table.remove(id)?;
            if let Some(b) = host.tasks.remove(&id) {
                host.finished.push(b.summary(&t, Some(tick)));
            }
        }

        if ran.is_some() {
            host.busy_ticks[idx] += 1;
        } else {
            host.idle_ticks[idx] += 1;
        }
        Ok(ran.is_some())
    }

    /// Per policy, the least-loaded core pulls half the queue-length
    /// difference from the busiest one.
    fn balance(&self, host: &mut HostState) -> Result<(), SimError> {
        if self.cores.len() < 2 {
            return Ok(());
        }
        for policy in Policy::ALL {
            let loads: Vec<usize> = self
                .cores
                .iter()
                .map(|c| c.lock().queue(policy).len())
                .collect();
            let max = loads.iter().copied().max().unwrap_or(0);
            let min = loads.iter().copied().min().unwrap_or(0);
            if max - min < 2 {
                continue;
            }
            let busiest = loads.iter().position(|&l| l == max).unwrap_or(0);
            let idlest = loads.iter().position(|&l| l == min).unwrap_or(0);

            let (lo, hi) = (busiest.min(idlest), busiest.max(idlest));
            let mut first = self.cores[lo].lock();
            let mut second = self.cores[hi].lock();
            let mut table = self.table.lock();
            let (this, from) = if idlest < busiest {
                (&mut *first, &mut *second)
            } else {
                (&mut *second, &mut *first)
            };

            let outcome = balance_tasks(this, from, &mut table, policy, (max - min) / 2)?;
            if outcome.moved > 0 {
                host.emit(SimEvent::Migrate {
                    from: from.core(),
                    to: this.core(),
                    policy,
                    moved: outcome.moved,
                });
                if this.curr().is_none() {
                    schedule(host, this, &mut table)?;
                } else if outranks_curr(this, &table, policy) {
                    this.resched_curr();
                }
            } else if outcome.all_pinned {
                debug!(%policy, busiest = %from.core(), to = %this.core(), "balance: every candidate pinned");
            }
        }
        Ok(())
    }

    /// Finished tasks plus the ones still alive.
    pub fn summary(&self) -> RunSummary {
        let host = self.host.lock();
        let table = self.table.lock();
        let mut tasks = host.finished.clone();
        tasks.extend(
            host.tasks
                .iter()
                .filter_map(|(id, b)| table.get(*id).map(|t| b.summary(t, None))),
        );
        let cores = (0..self.cores.len())
            .map(|i| CoreSummary {
                core: i,
                busy_ticks: host.busy_ticks[i],
                idle_ticks: host.idle_ticks[i],
                charged_ns: self.charged[i].load(Ordering::Relaxed),
            })
            .collect();
        RunSummary {
            ticks: host.tick,
            tick_ns: self.tick_ns,
            completed: host.pending.is_empty() && host.tasks.is_empty(),
            tasks,
            cores,
            jitter: None,
        }
    }

    /// Structural check of every run queue.
    pub fn validate(&self) -> Result<(), SimError> {
        let _host = self.host.lock();
        for core in &self.cores {
            let rq = core.lock();
            let table = self.table.lock();
            for policy in Policy::ALL {
                rq.queue(policy).validate(&table)?;
            }
        }
        Ok(())
    }
}

fn rank(policy: Policy) -> usize {
    CLASS_ORDER
        .iter()
        .position(|&p| p == policy)
        .unwrap_or(CLASS_ORDER.len())
}

/// A task of `policy` arriving on `rq` should displace the current one.
/// False on an idle core, the next pass schedules anyway.
fn outranks_curr(rq: &Rq, table: &TaskTable, policy: Policy) -> bool {
    rq.curr()
        .and_then(|c| table.get(c))
        .is_some_and(|t| rank(policy) < rank(t.policy()))
}

/// A waking task of a higher class always preempts; inside one class the
/// class decides.
fn check_preempt(rq: &mut Rq, table: &TaskTable, waking: TaskId, flags: WakeFlags) {
    let Some(waking_policy) = table.get(waking).map(|t| t.policy()) else {
        return;
    };
    let Some(curr_policy) = rq.curr().and_then(|c| table.get(c)).map(|t| t.policy()) else {
        return;
    };
    if outranks_curr(rq, table, waking_policy) {
        rq.resched_curr();
    } else if waking_policy == curr_policy {
        waking_policy
            .class()
            .check_preempt_curr(rq, table, waking, flags);
    }
}

/// put_prev on the outgoing task, pick across the classes, set_curr on the
/// winner.
fn schedule(host: &mut HostState, rq: &mut Rq, table: &mut TaskTable) -> Result<(), SimError> {
    let prev = rq.curr();
    if let Some(p) = prev {
        let policy = table.try_get(p)?.policy();
        policy.class().put_prev(rq, table, p);
    }

    let next = pick_next_task(rq, table);
    rq.set_curr_task(next);
    if let Some(n) = next {
        let policy = table.try_get(n)?.policy();
        policy.class().set_curr(rq, table, n);
        let tick = host.tick;
        if let Some(b) = host.tasks.get_mut(&n) {
            b.first_run.get_or_insert(tick);
        }
    }

    if prev != next {
        let name = |id: Option<TaskId>| id.and_then(|i| table.get(i)).map(|t| t.name().to_string());
        host.emit(SimEvent::Switch {
            core: rq.core(),
            from: name(prev),
            to: name(next),
        });
    }
    Ok(())
}
