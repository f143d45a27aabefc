// queue.rs: per-core, per-policy run queue over the task arena

use std::fmt;

use crate::error::{SchedError, SchedResult};
use crate::task::{CoreId, Link, Policy, TaskId, TaskTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId {
    pub core: CoreId,
    pub policy: Policy,
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.core, self.policy)
    }
}

/// FIFO of task ids linked through the descriptors themselves.
///
/// Appending, unlinking and moving to the tail are O(1); only the selection
/// scan in [`RunQueue::pick_min`] walks the list.
#[derive(Debug, Clone)]
pub struct RunQueue {
    id: QueueId,
    head: Option<TaskId>,
    tail: Option<TaskId>,
    count: usize,
}

impl RunQueue {
    pub fn new(core: CoreId, policy: Policy) -> Self {
        Self {
            id: QueueId { core, policy },
            head: None,
            tail: None,
            count: 0,
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn head(&self) -> Option<TaskId> {
        self.head
    }

    pub fn tail(&self) -> Option<TaskId> {
        self.tail
    }

    pub fn contains(&self, table: &TaskTable, task: TaskId) -> bool {
        table
            .get(task)
            .is_some_and(|t| t.queued_on() == Some(self.id))
    }

    pub(crate) fn push_tail(&mut self, table: &mut TaskTable, task: TaskId) -> SchedResult<()> {
        if let Some(queue) = table.link(task)?.on_rq {
            return Err(SchedError::AlreadyQueued { task, queue });
        }
        let old_tail = self.tail;
        match old_tail {
            Some(t) => table.link_mut(t)?.next = Some(task),
            None => self.head = Some(task),
        }
        *table.link_mut(task)? = Link {
            prev: old_tail,
            next: None,
            on_rq: Some(self.id),
        };
        self.tail = Some(task);
        self.count += 1;
        Ok(())
    }

    pub(crate) fn unlink(&mut self, table: &mut TaskTable, task: TaskId) -> SchedResult<()> {
        let link = *table.link(task)?;
        if link.on_rq != Some(self.id) {
            return Err(SchedError::NotQueued {
                task,
                queue: self.id,
            });
        }
        match link.prev {
            Some(p) => table.link_mut(p)?.next = link.next,
            None => self.head = link.next,
        }
        match link.next {
            Some(n) => table.link_mut(n)?.prev = link.prev,
            None => self.tail = link.prev,
        }
        *table.link_mut(task)? = Link::default();
        self.count -= 1;
        Ok(())
    }

    /// Moves a queued task to the tail without leaving the queued state.
    pub(crate) fn move_tail(&mut self, table: &mut TaskTable, task: TaskId) -> SchedResult<()> {
        if !self.contains(table, task) {
            return Err(SchedError::NotQueued {
                task,
                queue: self.id,
            });
        }
        if self.tail == Some(task) {
            return Ok(());
        }
        self.unlink(table, task)?;
        self.push_tail(table, task)
    }

    /// Head-to-tail walk.
    pub fn iter<'a>(&self, table: &'a TaskTable) -> Iter<'a> {
        Iter {
            table,
            next: self.head,
            remaining: self.count,
        }
    }

    /// Single forward scan for the strictly smallest static time slice.
    /// Ties keep the element met first, so equal slices are served FIFO.
    pub fn pick_min(&self, table: &TaskTable) -> SchedResult<TaskId> {
        let mut ids = self.iter(table);
        let mut best = ids.next().ok_or(SchedError::EmptyQueue)?;
        let mut best_value = table.try_get(best)?.static_time_slice;
        for id in ids {
            let value = table.try_get(id)?.static_time_slice;
            if value < best_value {
                best = id;
                best_value = value;
            }
        }
        Ok(best)
    }

    /// Walks the list checking link symmetry, membership and the count.
    pub fn validate(&self, table: &TaskTable) -> SchedResult<()> {
        let violation = |detail: String| SchedError::InvariantViolation {
            queue: self.id,
            detail,
        };

        let mut prev: Option<TaskId> = None;
        let mut cur = self.head;
        let mut seen = 0usize;
        while let Some(id) = cur {
            if seen == self.count {
                return Err(violation(format!("more than {} linked tasks", self.count)));
            }
            let link = table
                .link(id)
                .map_err(|_| violation(format!("dangling link to {id}")))?;
            if link.on_rq != Some(self.id) {
                return Err(violation(format!("{id} linked but tagged {:?}", link.on_rq)));
            }
            if link.prev != prev {
                return Err(violation(format!("{id} has prev {:?}, expected {prev:?}", link.prev)));
            }
            prev = Some(id);
            cur = link.next;
            seen += 1;
        }
        if seen != self.count {
            return Err(violation(format!("count {} but {seen} linked", self.count)));
        }
        if self.tail != prev {
            return Err(violation(format!("tail {:?} but last linked {prev:?}", self.tail)));
        }
        Ok(())
    }
}

pub struct Iter<'a> {
    table: &'a TaskTable,
    next: Option<TaskId>,
    remaining: usize,
}

impl Iterator for Iter<'_> {
    type Item = TaskId;

    fn next(&mut self) -> Option<TaskId> {
        if self.remaining == 0 {
            return None;
        }
        let id = self.next?;
        self.next = self.table.get(id).and_then(|t| t.link.next);
        self.remaining -= 1;
        Some(id)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}
