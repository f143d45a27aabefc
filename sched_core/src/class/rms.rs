// class/rms.rs: weighted round robin with static quanta

use tracing::trace;

use super::{consume_quantum, SchedClass};
use crate::accounting::update_curr;
use crate::error::SchedResult;
use crate::rq::Rq;
use crate::task::{Policy, TaskId, TaskTable};

/// Smallest static slice runs first; equal slices take turns, each task
/// running one full quantum before it goes to the back of the queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rms;

impl SchedClass for Rms {
    fn policy(&self) -> Policy {
        Policy::Rms
    }

    /// The only preemption path under this policy.
    fn tick(&self, rq: &mut Rq, table: &mut TaskTable, task: TaskId, _queued: bool) -> SchedResult<()> {
        update_curr(rq, table, Policy::Rms);

        if consume_quantum(table, task)? {
            self.requeue(rq, table, task)?;
            rq.resched_curr();
            trace!(core = %rq.core(), %task, "rms quantum expired");
        }
        Ok(())
    }
}
