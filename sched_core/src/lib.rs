// lib.rs: RMS / SJF scheduling classes for a multi-core kernel scheduler
//
// The host kernel owns the task table and the per-core locks. Every entry
// point here runs with the relevant core's `Rq` already borrowed mutably and
// finishes in bounded time without blocking.

pub mod accounting;
pub mod balance;
pub mod class;
pub mod error;
pub mod migrate;
pub mod queue;
pub mod rq;
pub mod task;

pub use accounting::update_curr;
pub use balance::LoadBalanceIter;
pub use class::{Rms, SchedClass, SelectReason, Sjf, WakeFlags};
pub use error::{SchedError, SchedResult};
pub use migrate::{balance_tasks, can_migrate, move_one_task, BalanceOutcome};
pub use queue::{QueueId, RunQueue};
pub use rq::{CpuAccounting, Rq};
pub use task::{CoreId, CpuMask, Policy, TaskDescriptor, TaskId, TaskTable};

/// Order in which a host consults the classes when picking the next task;
/// an empty pick falls through to the next entry and finally to idle.
pub const CLASS_ORDER: [Policy; 2] = [Policy::Rms, Policy::Sjf];

/// Picks across both classes in [`CLASS_ORDER`].
pub fn pick_next_task(rq: &Rq, table: &TaskTable) -> Option<TaskId> {
    CLASS_ORDER
        .iter()
        .find_map(|policy| policy.class().pick_next(rq, table))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_outranks_sjf() {
        let mut table = TaskTable::new();
        let mut rq = Rq::new(CoreId(0));
        let short_sjf = table.insert(TaskDescriptor::new("short", Policy::Sjf, 1).unwrap());
        let long_rms = table.insert(TaskDescriptor::new("long", Policy::Rms, 50).unwrap());

        assert_eq!(pick_next_task(&rq, &table), None);
        Policy::Sjf.class().enqueue(&mut rq, &mut table, short_sjf, true).unwrap();
        assert_eq!(pick_next_task(&rq, &table), Some(short_sjf));
        Policy::Rms.class().enqueue(&mut rq, &mut table, long_rms, true).unwrap();
        assert_eq!(pick_next_task(&rq, &table), Some(long_rms));
    }

    #[test]
    fn policy_change_requires_dequeue() {
        let mut table = TaskTable::new();
        let mut rq = Rq::new(CoreId(0));
        let id = table.insert(TaskDescriptor::new("t", Policy::Rms, 3).unwrap());
        Policy::Rms.class().enqueue(&mut rq, &mut table, id, true).unwrap();

        assert_eq!(table.set_policy(id, Policy::Sjf), Err(SchedError::TaskQueued(id)));
        assert_eq!(table.remove(id).unwrap_err(), SchedError::TaskQueued(id));

        Policy::Rms.class().dequeue(&mut rq, &mut table, id, false).unwrap();
        table.set_policy(id, Policy::Sjf).unwrap();
        Policy::Sjf.class().enqueue(&mut rq, &mut table, id, false).unwrap();
        assert_eq!(rq.queue(Policy::Sjf).len(), 1);
        assert_eq!(rq.queue(Policy::Rms).len(), 0);
    }
}
