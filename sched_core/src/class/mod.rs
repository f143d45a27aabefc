// class/mod.rs: the scheduling class interface
//
// The host core calls into a class on every enqueue, dequeue, tick, pick and
// rebalance, always with the owning core's `Rq` already locked. Both classes
// share everything except the tick handler, so the shared behaviour lives in
// the provided methods of `SchedClass` and each policy only supplies `policy`
// and `tick`.

pub mod rms;
pub mod sjf;

use tracing::{debug, trace};

use crate::accounting::update_curr;
use crate::balance::LoadBalanceIter;
use crate::error::{SchedError, SchedResult};
use crate::rq::Rq;
use crate::task::{CoreId, Policy, TaskId, TaskTable};

pub use rms::Rms;
pub use sjf::Sjf;

/// Flags accompanying a wakeup preemption check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WakeFlags {
    /// The waker is about to sleep.
    pub sync: bool,
    /// The wakee was just created.
    pub fork: bool,
}

/// Why the host asks a class to place a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectReason {
    /// Balance-on-wake: a sleeping task became runnable.
    Wake,
    Fork,
    Exec,
}

pub trait SchedClass: Sync {
    fn policy(&self) -> Policy;

    fn name(&self) -> &'static str {
        self.policy().as_str()
    }

    /// Per-timer-interrupt hook for the running task.
    fn tick(&self, rq: &mut Rq, table: &mut TaskTable, task: TaskId, queued: bool) -> SchedResult<()>;

    /// Appends to the tail of this policy's queue. No ordering beyond arrival.
    fn enqueue(&self, rq: &mut Rq, table: &mut TaskTable, task: TaskId, wakeup: bool) -> SchedResult<()> {
        rq.queue_mut(self.policy()).push_tail(table, task)?;
        trace!(class = self.name(), core = %rq.core(), %task, wakeup, nr = rq.queue(self.policy()).len(), "enqueue");
        Ok(())
    }

    /// Charges the current task first; nothing is charged when `task` is not
    /// on this class's queue.
    fn dequeue(&self, rq: &mut Rq, table: &mut TaskTable, task: TaskId, sleep: bool) -> SchedResult<()> {
        let queue = rq.queue(self.policy());
        if !queue.contains(table, task) {
            table.try_get(task)?;
            return Err(SchedError::NotQueued { task, queue: queue.id() });
        }
        update_curr(rq, table, self.policy());
        rq.queue_mut(self.policy()).unlink(table, task)?;
        trace!(class = self.name(), core = %rq.core(), %task, sleep, nr = rq.queue(self.policy()).len(), "dequeue");
        Ok(())
    }

    /// Moves the task to the tail in place, without dequeue/enqueue bookkeeping.
    fn requeue(&self, rq: &mut Rq, table: &mut TaskTable, task: TaskId) -> SchedResult<()> {
        rq.queue_mut(self.policy()).move_tail(table, task)
    }

    /// The current task gives up the CPU voluntarily.
    fn yield_current(&self, rq: &mut Rq, table: &mut TaskTable, task: TaskId) -> SchedResult<()> {
        self.requeue(rq, table, task)
    }

    /// Wakeups never preempt under either policy; preemption is tick-driven.
    fn check_preempt_curr(&self, _rq: &mut Rq, _table: &TaskTable, _waking: TaskId, _flags: WakeFlags) {}

    /// Non-destructive: the chosen task stays queued while it runs.
    fn pick_next(&self, rq: &Rq, table: &TaskTable) -> Option<TaskId> {
        rq.queue(self.policy()).pick_min(table).ok()
    }

    fn put_prev(&self, rq: &mut Rq, table: &mut TaskTable, task: TaskId) {
        update_curr(rq, table, self.policy());
        if let Some(t) = table.get_mut(task) {
            t.run_start_timestamp = 0;
        }
    }

    fn set_curr(&self, rq: &mut Rq, table: &mut TaskTable, task: TaskId) {
        if let Some(t) = table.get_mut(task) {
            t.run_start_timestamp = rq.clock();
            t.nr_switches += 1;
        }
    }

    /// Wakeups stay on the task's core; no search for an idler one happens
    /// here, cross-core movement is left to periodic balancing. Fork and exec
    /// land on the selecting core.
    fn select_cpu_on_wakeup(&self, rq: &Rq, table: &TaskTable, task: TaskId, reason: SelectReason) -> CoreId {
        let Some(t) = table.get(task) else {
            return rq.core();
        };
        let wanted = match reason {
            SelectReason::Wake => t.core(),
            SelectReason::Fork | SelectReason::Exec => rq.core(),
        };
        if t.allowed_cores().contains(wanted) {
            wanted
        } else {
            t.allowed_cores().first().unwrap_or(wanted)
        }
    }

    /// The task was just moved into this class.
    fn switched_to(&self, rq: &mut Rq, table: &TaskTable, task: TaskId, running: bool) {
        debug!(class = self.name(), core = %rq.core(), %task, running, "switched to class");
        if running {
            rq.resched_curr();
        } else {
            self.check_preempt_curr(rq, table, task, WakeFlags::default());
        }
    }

    /// Starts a tail-to-head walk of `busiest`'s queue for the balancer.
    fn load_balance_start(&self, busiest: &Rq, table: &TaskTable) -> Option<(LoadBalanceIter, TaskId)> {
        LoadBalanceIter::start(busiest.queue(self.policy()), table)
    }
}

static RMS: Rms = Rms;
static SJF: Sjf = Sjf;

impl Policy {
    pub fn class(self) -> &'static dyn SchedClass {
        match self {
            Policy::Rms => &RMS,
            Policy::Sjf => &SJF,
        }
    }
}

/// Shared countdown: returns true when the quantum just expired and was refilled.
pub(crate) fn consume_quantum(table: &mut TaskTable, task: TaskId) -> SchedResult<bool> {
    let t = table.try_get_mut(task)?;
    t.remaining_quantum = t.remaining_quantum.saturating_sub(1);
    if t.remaining_quantum == 0 {
        t.remaining_quantum = t.static_time_slice;
        return Ok(true);
    }
    Ok(false)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::SchedError;
    use crate::task::{CpuMask, TaskDescriptor};

    pub(crate) fn setup(policy: Policy, slices: &[u32]) -> (Rq, TaskTable, Vec<TaskId>) {
        let mut table = TaskTable::new();
        let mut rq = Rq::new(CoreId(0));
        let class = policy.class();
        let ids = slices
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                let id = table.insert(TaskDescriptor::new(format!("t{i}"), policy, s).unwrap());
                class.enqueue(&mut rq, &mut table, id, true).unwrap();
                id
            })
            .collect();
        (rq, table, ids)
    }

    /// Makes `task` current the way the host's schedule() does.
    pub(crate) fn run(rq: &mut Rq, table: &mut TaskTable, task: TaskId) {
        let class = table.get(task).unwrap().policy().class();
        rq.set_curr_task(Some(task));
        class.set_curr(rq, table, task);
    }

    #[test]
    fn pick_then_dequeue_example() {
        for policy in Policy::ALL {
            let (mut rq, mut table, ids) = setup(policy, &[5, 3, 4]);
            let class = policy.class();
            assert_eq!(class.pick_next(&rq, &table), Some(ids[1]));

            class.dequeue(&mut rq, &mut table, ids[1], true).unwrap();
            assert_eq!(class.pick_next(&rq, &table), Some(ids[2]));
            assert_eq!(rq.queue(policy).len(), 2);
        }
    }

    #[test]
    fn pick_on_empty_queue_falls_through() {
        let (rq, table, _) = setup(Policy::Rms, &[]);
        assert_eq!(Policy::Rms.class().pick_next(&rq, &table), None);
        assert_eq!(rq.queue(Policy::Rms).pick_min(&table), Err(SchedError::EmptyQueue));
    }

    #[test]
    fn pick_is_non_destructive() {
        let (rq, table, ids) = setup(Policy::Sjf, &[2, 2]);
        let class = Policy::Sjf.class();
        assert_eq!(class.pick_next(&rq, &table), Some(ids[0]));
        assert_eq!(class.pick_next(&rq, &table), Some(ids[0]));
        assert_eq!(rq.queue(Policy::Sjf).len(), 2);
    }

    #[test]
    fn classes_only_touch_their_own_queue() {
        let (mut rq, mut table, ids) = setup(Policy::Rms, &[1]);
        let err = Policy::Sjf
            .class()
            .dequeue(&mut rq, &mut table, ids[0], false)
            .unwrap_err();
        assert!(matches!(err, SchedError::NotQueued { .. }));
        assert_eq!(rq.queue(Policy::Rms).len(), 1);
    }

    #[test]
    fn yield_moves_current_to_tail() {
        let (mut rq, mut table, ids) = setup(Policy::Rms, &[2, 2, 2]);
        run(&mut rq, &mut table, ids[0]);
        Policy::Rms.class().yield_current(&mut rq, &mut table, ids[0]).unwrap();

        let order: Vec<_> = rq.queue(Policy::Rms).iter(&table).collect();
        assert_eq!(order, vec![ids[1], ids[2], ids[0]]);
        assert_eq!(Policy::Rms.class().pick_next(&rq, &table), Some(ids[1]));
    }

    #[test]
    fn dequeue_of_running_task_charges_it_first() {
        let (mut rq, mut table, ids) = setup(Policy::Sjf, &[3]);
        rq.set_clock(1_000);
        run(&mut rq, &mut table, ids[0]);
        rq.set_clock(1_400);

        Policy::Sjf.class().dequeue(&mut rq, &mut table, ids[0], true).unwrap();
        assert_eq!(table.get(ids[0]).unwrap().accumulated_runtime(), 400);
    }

    #[test]
    fn rejected_dequeue_leaves_accounting_alone() {
        let (mut rq, mut table, ids) = setup(Policy::Sjf, &[3]);
        let stray = table.insert(TaskDescriptor::new("stray", Policy::Sjf, 2).unwrap());
        rq.set_clock(1_000);
        run(&mut rq, &mut table, ids[0]);
        rq.set_clock(1_400);

        let err = Policy::Sjf.class().dequeue(&mut rq, &mut table, stray, true).unwrap_err();
        assert!(matches!(err, SchedError::NotQueued { task, .. } if task == stray));
        let t = table.get(ids[0]).unwrap();
        assert_eq!(t.accumulated_runtime(), 0);
        assert_eq!(t.run_start_timestamp(), 1_000);
    }

    #[test]
    fn put_prev_marks_not_current() {
        let (mut rq, mut table, ids) = setup(Policy::Rms, &[3]);
        rq.set_clock(50);
        run(&mut rq, &mut table, ids[0]);
        assert_eq!(table.get(ids[0]).unwrap().run_start_timestamp(), 50);
        assert_eq!(table.get(ids[0]).unwrap().nr_switches(), 1);

        rq.set_clock(80);
        Policy::Rms.class().put_prev(&mut rq, &mut table, ids[0]);
        let t = table.get(ids[0]).unwrap();
        assert_eq!(t.run_start_timestamp(), 0);
        assert_eq!(t.accumulated_runtime(), 30);
    }

    #[test]
    fn switched_to_running_task_requests_resched() {
        let (mut rq, table, ids) = setup(Policy::Sjf, &[3]);
        let class = Policy::Sjf.class();

        class.switched_to(&mut rq, &table, ids[0], false);
        assert!(!rq.need_resched());

        class.switched_to(&mut rq, &table, ids[0], true);
        assert!(rq.need_resched());
    }

    #[test]
    fn check_preempt_never_preempts() {
        let (mut rq, mut table, ids) = setup(Policy::Rms, &[9, 1]);
        run(&mut rq, &mut table, ids[0]);
        Policy::Rms
            .class()
            .check_preempt_curr(&mut rq, &table, ids[1], WakeFlags::default());
        assert!(!rq.need_resched());
    }

    #[test]
    fn wakeup_placement() {
        let mut table = TaskTable::new();
        let rq = Rq::new(CoreId(2));
        let class = Policy::Rms.class();
        let roaming = table.insert(
            TaskDescriptor::new("roaming", Policy::Rms, 3)
                .unwrap()
                .with_core(CoreId(1)),
        );
        let pinned = table.insert(
            TaskDescriptor::new("pinned", Policy::Rms, 3)
                .unwrap()
                .with_core(CoreId(3))
                .with_affinity(CpuMask::from_cores(&[0, 3])),
        );

        assert_eq!(class.select_cpu_on_wakeup(&rq, &table, roaming, SelectReason::Wake), CoreId(1));
        assert_eq!(class.select_cpu_on_wakeup(&rq, &table, roaming, SelectReason::Fork), CoreId(2));
        assert_eq!(class.select_cpu_on_wakeup(&rq, &table, pinned, SelectReason::Wake), CoreId(3));
        assert_eq!(class.select_cpu_on_wakeup(&rq, &table, pinned, SelectReason::Exec), CoreId(0));
    }

    #[test]
    fn class_names() {
        assert_eq!(Policy::Rms.class().name(), "rms");
        assert_eq!(Policy::Sjf.class().name(), "sjf");
        assert_eq!(Policy::Sjf.class().policy(), Policy::Sjf);
    }
}
