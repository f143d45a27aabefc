// accounting.rs: runtime statistics of the task currently on the CPU

use tracing::trace;

use crate::rq::Rq;
use crate::task::{Policy, TaskTable};

/// Charges the time since `run_start_timestamp` to the current task when it
/// runs under `policy`. A task of any other class (or an idle core) is left
/// alone.
///
/// Call before anything that changes which task is current, otherwise the
/// elapsed slice is lost.
pub fn update_curr(rq: &mut Rq, table: &mut TaskTable, policy: Policy) {
    let Some(curr) = rq.curr() else {
        return;
    };
    let now = rq.clock();
    let Some(task) = table.get_mut(curr) else {
        return;
    };
    if task.policy() != policy {
        return;
    }

    let delta = match now.checked_sub(task.run_start_timestamp) {
        Some(d) => d,
        None => {
            trace!(task = %curr, now, start = task.run_start_timestamp, "clock regression, charging 0");
            0
        }
    };

    task.max_single_run = task.max_single_run.max(delta);
    task.accumulated_runtime += delta;
    task.run_start_timestamp = now;
    rq.charge(curr, delta);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rq::MockCpuAccounting;
    use crate::task::{CoreId, TaskDescriptor, TaskId};
    use mockall::predicate::eq;

    fn running(policy: Policy) -> (Rq, TaskTable, TaskId) {
        let mut table = TaskTable::new();
        let id = table.insert(TaskDescriptor::new("worker", policy, 4).unwrap());
        let mut rq = Rq::new(CoreId(0));
        rq.set_clock(100);
        rq.set_curr_task(Some(id));
        table.get_mut(id).unwrap().run_start_timestamp = 100;
        (rq, table, id)
    }

    #[test]
    fn consecutive_updates_accumulate() {
        let (mut rq, mut table, id) = running(Policy::Rms);

        rq.set_clock(110);
        update_curr(&mut rq, &mut table, Policy::Rms);
        rq.set_clock(125);
        update_curr(&mut rq, &mut table, Policy::Rms);

        let t = table.get(id).unwrap();
        assert_eq!(t.accumulated_runtime(), 25);
        assert_eq!(t.max_single_run(), 15);
        assert_eq!(t.run_start_timestamp(), 125);
    }

    #[test]
    fn other_policy_is_untouched() {
        let (mut rq, mut table, id) = running(Policy::Sjf);
        rq.set_clock(150);
        update_curr(&mut rq, &mut table, Policy::Rms);

        let t = table.get(id).unwrap();
        assert_eq!(t.accumulated_runtime(), 0);
        assert_eq!(t.run_start_timestamp(), 100);
    }

    #[test]
    fn regression_clamps_to_zero() {
        let (mut rq, mut table, id) = running(Policy::Rms);
        rq.set_clock(90);
        update_curr(&mut rq, &mut table, Policy::Rms);

        let t = table.get(id).unwrap();
        assert_eq!(t.accumulated_runtime(), 0);
        assert_eq!(t.max_single_run(), 0);
        assert_eq!(t.run_start_timestamp(), 90);
    }

    #[test]
    fn idle_core_is_a_no_op() {
        let mut table = TaskTable::new();
        let mut rq = Rq::new(CoreId(0));
        rq.set_clock(10);
        update_curr(&mut rq, &mut table, Policy::Sjf);
        assert!(table.is_empty());
    }

    #[test]
    fn charges_reach_the_accounting_sink() {
        let (rq, mut table, id) = running(Policy::Rms);
        let mut acct = MockCpuAccounting::new();
        acct.expect_charge()
            .with(eq(id), eq(10))
            .times(1)
            .return_const(());
        acct.expect_charge()
            .with(eq(id), eq(15))
            .times(1)
            .return_const(());
        let mut rq = rq.with_accounting(Box::new(acct));

        rq.set_clock(110);
        update_curr(&mut rq, &mut table, Policy::Rms);
        rq.set_clock(125);
        update_curr(&mut rq, &mut table, Policy::Rms);
    }
}
