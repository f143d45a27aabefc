// migrate.rs: per-class task pulling driven by the load-balance iterator
//
// How much load to move is the host balancer's decision; these helpers only
// walk the busiest queue and move what they are allowed to.

use tracing::debug;

use crate::class::WakeFlags;
use crate::error::SchedResult;
use crate::rq::Rq;
use crate::task::{CoreId, Policy, TaskId, TaskTable};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceOutcome {
    /// Tasks pulled onto the balancing core (each task weighs one unit).
    pub moved: usize,
    /// Candidates were seen but every one of them was pinned or running.
    pub all_pinned: bool,
}

/// A task may move unless it is running on `busiest` or its affinity excludes
/// the pulling core.
pub fn can_migrate(table: &TaskTable, busiest: &Rq, task: TaskId, this_core: CoreId) -> bool {
    if busiest.is_curr(task) {
        return false;
    }
    table
        .get(task)
        .is_some_and(|t| t.allowed_cores().contains(this_core))
}

fn pull_task(
    this: &mut Rq,
    busiest: &mut Rq,
    table: &mut TaskTable,
    policy: Policy,
    task: TaskId,
) -> SchedResult<()> {
    let class = policy.class();
    class.dequeue(busiest, table, task, false)?;
    let t = table.try_get_mut(task)?;
    t.set_core(this.core());
    t.nr_migrations += 1;
    class.enqueue(this, table, task, false)?;
    class.check_preempt_curr(this, table, task, WakeFlags::default());
    debug!(%task, from = %busiest.core(), to = %this.core(), %policy, "migrated");
    Ok(())
}

/// Pulls up to `max_load_move` tasks of `policy` from `busiest` onto `this`,
/// walking busiest's queue tail to head.
pub fn balance_tasks(
    this: &mut Rq,
    busiest: &mut Rq,
    table: &mut TaskTable,
    policy: Policy,
    max_load_move: usize,
) -> SchedResult<BalanceOutcome> {
    let mut outcome = BalanceOutcome::default();
    if max_load_move == 0 || this.core() == busiest.core() {
        return Ok(outcome);
    }

    let Some((mut iter, first)) = policy.class().load_balance_start(busiest, table) else {
        return Ok(outcome);
    };

    let mut seen = 0usize;
    let mut pinned = 0usize;
    let mut next = Some(first);
    while let Some(task) = next {
        seen += 1;
        if can_migrate(table, busiest, task, this.core()) {
            pull_task(this, busiest, table, policy, task)?;
            outcome.moved += 1;
            if outcome.moved >= max_load_move {
                break;
            }
        } else {
            pinned += 1;
        }
        next = iter.next(table);
    }

    outcome.all_pinned = seen > 0 && pinned == seen;
    Ok(outcome)
}

/// Moves at most one task; true when something moved.
pub fn move_one_task(
    this: &mut Rq,
    busiest: &mut Rq,
    table: &mut TaskTable,
    policy: Policy,
) -> SchedResult<bool> {
    balance_tasks(this, busiest, table, policy, 1).map(|o| o.moved == 1)
}
