// balance.rs: removal-tolerant walk over a remote run queue
//
// The balancer walks the busiest core's queue while holding its lock and may
// unlink the task it was just handed (to migrate it). The cursor is therefore
// always moved to the predecessor *before* a task is returned, so the walk
// never needs the links of a task that has left the queue.

use crate::queue::{QueueId, RunQueue};
use crate::task::{TaskId, TaskTable};

/// Tail-to-head iterator. Bounded by the queue length seen at
/// [`LoadBalanceIter::start`] and not restartable: every balancing attempt
/// starts a fresh one.
#[derive(Debug, Clone)]
pub struct LoadBalanceIter {
    queue: QueueId,
    cursor: Option<TaskId>,
    remaining: usize,
}

impl LoadBalanceIter {
    /// Returns the tail of `queue` together with an iterator already parked on
    /// the tail's predecessor. `None` on an empty queue.
    pub fn start(queue: &RunQueue, table: &TaskTable) -> Option<(Self, TaskId)> {
        let tail = queue.tail()?;
        let cursor = table.get(tail).and_then(|t| t.link.prev);
        let iter = Self {
            queue: queue.id(),
            cursor,
            remaining: queue.len().saturating_sub(1),
        };
        Some((iter, tail))
    }

    pub fn queue(&self) -> QueueId {
        self.queue
    }

    /// Hands out the task under the cursor after stepping the cursor to its
    /// predecessor.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self, table: &TaskTable) -> Option<TaskId> {
        if self.remaining == 0 {
            return None;
        }
        let cur = self.cursor?;
        let prev = match table.get(cur) {
            Some(t) if t.link.on_rq == Some(self.queue) => t.link.prev,
            _ => {
                // Someone unlinked the cursor task itself; only the task we
                // last returned may be removed mid-walk.
                debug_assert!(false, "stale load-balance cursor {cur} on {}", self.queue);
                self.remaining = 0;
                self.cursor = None;
                return None;
            }
        };
        self.cursor = prev;
        self.remaining -= 1;
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::tests::setup;
    use crate::task::Policy;
    use proptest::prelude::*;

    #[test]
    fn walks_tail_to_head() {
        let (rq, table, ids) = setup(Policy::Rms, &[1, 2, 3, 4]);
        let (mut it, first) = Policy::Rms.class().load_balance_start(&rq, &table).unwrap();
        assert_eq!(it.queue(), rq.queue(Policy::Rms).id());
        let mut seen = vec![first];
        while let Some(id) = it.next(&table) {
            seen.push(id);
        }
        let mut expected = ids.clone();
        expected.reverse();
        assert_eq!(seen, expected);
        assert_eq!(it.next(&table), None);
    }

    #[test]
    fn empty_queue_has_no_walk() {
        let (rq, table, _) = setup(Policy::Sjf, &[]);
        assert!(Policy::Sjf.class().load_balance_start(&rq, &table).is_none());
    }

    #[test]
    fn removing_returned_task_keeps_walk_valid() {
        let (mut rq, mut table, ids) = setup(Policy::Sjf, &[5, 5, 5]);
        let class = Policy::Sjf.class();
        let (mut it, first) = class.load_balance_start(&rq, &table).unwrap();
        assert_eq!(first, ids[2]);
        class.dequeue(&mut rq, &mut table, first, false).unwrap();

        let second = it.next(&table).unwrap();
        assert_eq!(second, ids[1]);
        class.dequeue(&mut rq, &mut table, second, false).unwrap();

        assert_eq!(it.next(&table), Some(ids[0]));
        assert_eq!(it.next(&table), None);
        assert_eq!(rq.queue(Policy::Sjf).len(), 1);
    }

    #[test]
    fn walk_is_bounded_by_start_snapshot() {
        let (mut rq, mut table, ids) = setup(Policy::Rms, &[1, 1]);
        let class = Policy::Rms.class();
        let (mut it, _) = class.load_balance_start(&rq, &table).unwrap();
        let late = table.insert(crate::task::TaskDescriptor::new("late", Policy::Rms, 1).unwrap());
        class.enqueue(&mut rq, &mut table, late, true).unwrap();

        assert_eq!(it.next(&table), Some(ids[0]));
        assert_eq!(it.next(&table), None);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "stale load-balance cursor")]
    fn removing_cursor_task_is_detected() {
        let (mut rq, mut table, ids) = setup(Policy::Rms, &[1, 1, 1]);
        let class = Policy::Rms.class();
        let (mut it, _) = class.load_balance_start(&rq, &table).unwrap();
        class.dequeue(&mut rq, &mut table, ids[1], false).unwrap();
        it.next(&table);
    }

    proptest! {
        #[test]
        fn yields_each_task_once_under_removal(
            n in 1usize..24,
            removals in prop::collection::vec(any::<bool>(), 24),
        ) {
            let slices = vec![1u32; n];
            let (mut rq, mut table, ids) = setup(Policy::Rms, &slices);
            let class = Policy::Rms.class();
            let (mut it, first) = class.load_balance_start(&rq, &table).unwrap();

            let mut seen = Vec::new();
            let mut cur = Some(first);
            let mut step = 0;
            while let Some(id) = cur {
                seen.push(id);
                if removals[step] {
                    class.dequeue(&mut rq, &mut table, id, false).unwrap();
                }
                step += 1;
                cur = it.next(&table);
            }

            let mut expected = ids.clone();
            expected.reverse();
            prop_assert_eq!(seen, expected);
            prop_assert!(rq.queue(Policy::Rms).validate(&table).is_ok());
        }
    }
}
