// class/sjf.rs: shortest static slice first, no mid-run preemption

use super::{consume_quantum, SchedClass};
use crate::accounting::update_curr;
use crate::error::SchedResult;
use crate::rq::Rq;
use crate::task::{Policy, TaskId, TaskTable};

/// Selection is the same minimum scan as [`super::Rms`], but the ordering is
/// only applied when the running task leaves the CPU (block, yield, exit).
///
/// Known limitation: a shorter job becoming runnable does not preempt the
/// current one, and an expired quantum is simply refilled. This is not
/// preemptive shortest-job-first.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sjf;

impl SchedClass for Sjf {
    fn policy(&self) -> Policy {
        Policy::Sjf
    }

    fn tick(&self, rq: &mut Rq, table: &mut TaskTable, task: TaskId, _queued: bool) -> SchedResult<()> {
        update_curr(rq, table, Policy::Sjf);
        // refill only: no requeue, no reschedule
        consume_quantum(table, task)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::tests::{run, setup};

    #[test]
    fn quantum_expiry_keeps_task_running() {
        let (mut rq, mut table, ids) = setup(Policy::Sjf, &[3, 1]);
        let a = ids[0];
        run(&mut rq, &mut table, a);
        let before: Vec<_> = rq.queue(Policy::Sjf).iter(&table).collect();

        for expected in [2, 1, 3, 2] {
            Sjf.tick(&mut rq, &mut table, a, false).unwrap();
            assert_eq!(table.get(a).unwrap().remaining_quantum(), expected);
        }

        assert!(!rq.need_resched());
        let after: Vec<_> = rq.queue(Policy::Sjf).iter(&table).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn shortest_runs_once_current_leaves() {
        let (mut rq, mut table, ids) = setup(Policy::Sjf, &[8, 6]);
        let long = ids[0];
        let mid = ids[1];
        run(&mut rq, &mut table, mid);

        let short = table.insert(crate::task::TaskDescriptor::new("short", Policy::Sjf, 2).unwrap());
        Sjf.enqueue(&mut rq, &mut table, short, true).unwrap();
        Sjf.tick(&mut rq, &mut table, mid, false).unwrap();
        assert!(!rq.need_resched());

        Sjf.dequeue(&mut rq, &mut table, mid, true).unwrap();
        Sjf.put_prev(&mut rq, &mut table, mid);
        assert_eq!(Sjf.pick_next(&rq, &table), Some(short));
        assert!(rq.queue(Policy::Sjf).contains(&table, long));
    }
}
