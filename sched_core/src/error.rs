// error.rs: contract violations reported by the scheduling core

use thiserror::Error;

use crate::queue::QueueId;
use crate::task::TaskId;

pub type SchedResult<T> = Result<T, SchedError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// Nothing runnable under this policy; the host falls through to the next class.
    #[error("run queue is empty")]
    EmptyQueue,

    #[error("unknown or stale task id {0}")]
    UnknownTask(TaskId),

    #[error("task {task} is already queued on {queue}")]
    AlreadyQueued { task: TaskId, queue: QueueId },

    #[error("task {task} is not queued on {queue}")]
    NotQueued { task: TaskId, queue: QueueId },

    /// The operation needs the task off every run queue (removal, policy change).
    #[error("task {0} is still queued")]
    TaskQueued(TaskId),

    #[error("time slice must be non-zero")]
    ZeroTimeSlice,

    #[error("run queue {queue} invariant violated: {detail}")]
    InvariantViolation { queue: QueueId, detail: String },
}
