// rq.rs: per-core scheduler context handed to every class operation

use std::fmt;

use tracing::trace;

use crate::queue::RunQueue;
use crate::task::{CoreId, Policy, TaskId};

/// Receives every runtime charge made by [`crate::accounting::update_curr`]
/// (the host's CPU accounting, cgroup counters, ...).
#[cfg_attr(test, mockall::automock)]
pub trait CpuAccounting {
    fn charge(&mut self, task: TaskId, delta: u64);
}

/// One core's scheduling state: its clock, the current task, one run queue per
/// policy and the "reschedule needed" signal for the host.
pub struct Rq {
    core: CoreId,
    clock: u64,
    curr: Option<TaskId>,
    rms: RunQueue,
    sjf: RunQueue,
    need_resched: bool,
    acct: Option<Box<dyn CpuAccounting + Send>>,
}

impl Rq {
    pub fn new(core: CoreId) -> Self {
        Self {
            core,
            clock: 0,
            curr: None,
            rms: RunQueue::new(core, Policy::Rms),
            sjf: RunQueue::new(core, Policy::Sjf),
            need_resched: false,
            acct: None,
        }
    }

    pub fn with_accounting(mut self, acct: Box<dyn CpuAccounting + Send>) -> Self {
        self.acct = Some(acct);
        self
    }

    pub fn core(&self) -> CoreId {
        self.core
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// The host owns the clock source. Regressions are accepted here and
    /// clamped when runtime is charged.
    pub fn set_clock(&mut self, now: u64) {
        if now < self.clock {
            trace!(core = %self.core, from = self.clock, to = now, "clock went backwards");
        }
        self.clock = now;
    }

    pub fn curr(&self) -> Option<TaskId> {
        self.curr
    }

    pub fn set_curr_task(&mut self, task: Option<TaskId>) {
        self.curr = task;
    }

    pub fn is_curr(&self, task: TaskId) -> bool {
        self.curr == Some(task)
    }

    pub fn queue(&self, policy: Policy) -> &RunQueue {
        match policy {
            Policy::Rms => &self.rms,
            Policy::Sjf => &self.sjf,
        }
    }

    pub(crate) fn queue_mut(&mut self, policy: Policy) -> &mut RunQueue {
        match policy {
            Policy::Rms => &mut self.rms,
            Policy::Sjf => &mut self.sjf,
        }
    }

    /// Runnable tasks across both policies, the running one included.
    pub fn nr_running(&self) -> usize {
        self.rms.len() + self.sjf.len()
    }

    pub fn resched_curr(&mut self) {
        trace!(core = %self.core, curr = ?self.curr, "reschedule requested");
        self.need_resched = true;
    }

    pub fn need_resched(&self) -> bool {
        self.need_resched
    }

    /// Reads and clears the reschedule signal.
    pub fn take_need_resched(&mut self) -> bool {
        std::mem::take(&mut self.need_resched)
    }

    pub(crate) fn charge(&mut self, task: TaskId, delta: u64) {
        if let Some(acct) = self.acct.as_mut() {
            acct.charge(task, delta);
        }
    }
}

impl fmt::Debug for Rq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rq")
            .field("core", &self.core)
            .field("clock", &self.clock)
            .field("curr", &self.curr)
            .field("rms", &self.rms)
            .field("sjf", &self.sjf)
            .field("need_resched", &self.need_resched)
            .field("accounting", &self.acct.is_some())
            .finish()
    }
}
