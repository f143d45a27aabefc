// task.rs: task descriptors and the host-owned, generation-tagged task arena

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SchedError, SchedResult};
use crate::queue::QueueId;

// =============================== Identifiers ================================

/// Handle into a [`TaskTable`]. The generation changes every time a slot is
/// reused, so a handle to a removed task never resolves to its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    index: u32,
    generation: u32,
}

impl TaskId {
    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct CoreId(pub usize);

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// Affinity mask, one bit per core (up to 64 cores).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuMask(pub u64);

impl CpuMask {
    pub const ALL: CpuMask = CpuMask(u64::MAX);

    pub fn only(core: CoreId) -> Self {
        CpuMask(bit(core.0))
    }

    pub fn from_cores(cores: &[usize]) -> Self {
        CpuMask(cores.iter().fold(0u64, |m, &c| m | bit(c)))
    }

    pub fn contains(self, core: CoreId) -> bool {
        self.0 & bit(core.0) != 0
    }

    /// Lowest core in the mask.
    pub fn first(self) -> Option<CoreId> {
        (self.0 != 0).then(|| CoreId(self.0.trailing_zeros() as usize))
    }
}

fn bit(core: usize) -> u64 {
    u32::try_from(core)
        .ok()
        .and_then(|c| 1u64.checked_shl(c))
        .unwrap_or(0)
}

impl Default for CpuMask {
    fn default() -> Self {
        CpuMask::ALL
    }
}

// ================================ Policy ====================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Weighted round robin: smallest static slice first, requeued on quantum expiry.
    Rms,
    /// Shortest static slice first, never preempted mid-run.
    Sjf,
}

impl Policy {
    pub const ALL: [Policy; 2] = [Policy::Rms, Policy::Sjf];

    pub fn as_str(self) -> &'static str {
        match self {
            Policy::Rms => "rms",
            Policy::Sjf => "sjf",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================== Descriptor ==================================

/// Intrusive run-queue membership, stored inside the descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Link {
    pub(crate) prev: Option<TaskId>,
    pub(crate) next: Option<TaskId>,
    pub(crate) on_rq: Option<QueueId>,
}

#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    name: String,
    policy: Policy,
    core: CoreId,
    allowed_cores: CpuMask,

    pub(crate) static_time_slice: u32,
    pub(crate) remaining_quantum: u32,

    pub(crate) accumulated_runtime: u64,
    pub(crate) max_single_run: u64,
    /// 0 while the task is not current.
    pub(crate) run_start_timestamp: u64,

    pub(crate) nr_switches: u64,
    pub(crate) nr_migrations: u64,

    pub(crate) link: Link,
}

impl TaskDescriptor {
    pub fn new(name: impl Into<String>, policy: Policy, time_slice: u32) -> SchedResult<Self> {
        if time_slice == 0 {
            return Err(SchedError::ZeroTimeSlice);
        }
        Ok(Self {
            name: name.into(),
            policy,
            core: CoreId(0),
            allowed_cores: CpuMask::ALL,
            static_time_slice: time_slice,
            remaining_quantum: time_slice,
            accumulated_runtime: 0,
            max_single_run: 0,
            run_start_timestamp: 0,
            nr_switches: 0,
            nr_migrations: 0,
            link: Link::default(),
        })
    }

    pub fn with_core(mut self, core: CoreId) -> Self {
        self.core = core;
        self
    }

    pub fn with_affinity(mut self, mask: CpuMask) -> Self {
        self.allowed_cores = mask;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn core(&self) -> CoreId {
        self.core
    }

    /// Hosts call this when they place a task; migrations update it themselves.
    pub fn set_core(&mut self, core: CoreId) {
        self.core = core;
    }

    pub fn allowed_cores(&self) -> CpuMask {
        self.allowed_cores
    }

    pub fn set_allowed_cores(&mut self, mask: CpuMask) {
        self.allowed_cores = mask;
    }

    pub fn static_time_slice(&self) -> u32 {
        self.static_time_slice
    }

    pub fn remaining_quantum(&self) -> u32 {
        self.remaining_quantum
    }

    pub fn accumulated_runtime(&self) -> u64 {
        self.accumulated_runtime
    }

    pub fn max_single_run(&self) -> u64 {
        self.max_single_run
    }

    pub fn run_start_timestamp(&self) -> u64 {
        self.run_start_timestamp
    }

    pub fn nr_switches(&self) -> u64 {
        self.nr_switches
    }

    pub fn nr_migrations(&self) -> u64 {
        self.nr_migrations
    }

    /// Queue the task currently sits on, if any.
    pub fn queued_on(&self) -> Option<QueueId> {
        self.link.on_rq
    }

    pub fn is_queued(&self) -> bool {
        self.link.on_rq.is_some()
    }
}

// ================================= Arena ====================================

#[derive(Debug)]
struct Slot {
    generation: u32,
    task: Option<TaskDescriptor>,
}

/// Host-owned storage for every descriptor. Run queues only hold [`TaskId`]s.
#[derive(Debug, Default)]
pub struct TaskTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task: TaskDescriptor) -> TaskId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.task = Some(task);
            return TaskId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            task: Some(task),
        });
        TaskId {
            index,
            generation: 0,
        }
    }

    /// Frees the slot. A queued task must be dequeued first.
    pub fn remove(&mut self, id: TaskId) -> SchedResult<TaskDescriptor> {
        if self.try_get(id)?.is_queued() {
            return Err(SchedError::TaskQueued(id));
        }
        let slot = &mut self.slots[id.index()];
        let task = slot.task.take().ok_or(SchedError::UnknownTask(id))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Ok(task)
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskDescriptor> {
        self.slots
            .get(id.index())
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.task.as_ref())
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut TaskDescriptor> {
        self.slots
            .get_mut(id.index())
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.task.as_mut())
    }

    pub fn try_get(&self, id: TaskId) -> SchedResult<&TaskDescriptor> {
        self.get(id).ok_or(SchedError::UnknownTask(id))
    }

    pub fn try_get_mut(&mut self, id: TaskId) -> SchedResult<&mut TaskDescriptor> {
        self.get_mut(id).ok_or(SchedError::UnknownTask(id))
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.get(id).is_some()
    }

    /// Switching policy is only legal while the task is off every run queue.
    pub fn set_policy(&mut self, id: TaskId, policy: Policy) -> SchedResult<()> {
        let task = self.try_get_mut(id)?;
        if task.is_queued() {
            return Err(SchedError::TaskQueued(id));
        }
        task.policy = policy;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &TaskDescriptor)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.task.as_ref().map(|t| {
                (
                    TaskId {
                        index: i as u32,
                        generation: s.generation,
                    },
                    t,
                )
            })
        })
    }

    pub(crate) fn link(&self, id: TaskId) -> SchedResult<&Link> {
        self.try_get(id).map(|t| &t.link)
    }

    pub(crate) fn link_mut(&mut self, id: TaskId) -> SchedResult<&mut Link> {
        self.try_get_mut(id).map(|t| &mut t.link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_slice_is_rejected() {
        let err = TaskDescriptor::new("idle", Policy::Rms, 0).unwrap_err();
        assert_eq!(err, SchedError::ZeroTimeSlice);
    }

    #[test]
    fn removed_slot_is_reused_with_new_generation() {
        let mut table = TaskTable::new();
        let a = table.insert(TaskDescriptor::new("a", Policy::Rms, 3).unwrap());
        table.remove(a).unwrap();
        let b = table.insert(TaskDescriptor::new("b", Policy::Sjf, 2).unwrap());

        assert_eq!(a.index(), b.index());
        assert_eq!(b.generation(), a.generation() + 1);
        assert_ne!(a, b);
        assert!(table.get(a).is_none());
        assert!(!table.contains(a));
        assert!(table.contains(b));
        assert_eq!(table.try_get(b).unwrap().name(), "b");
        assert_eq!(table.remove(a).unwrap_err(), SchedError::UnknownTask(a));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn cpu_mask_helpers() {
        let m = CpuMask::from_cores(&[2, 5]);
        assert!(m.contains(CoreId(2)));
        assert!(!m.contains(CoreId(0)));
        assert!(!m.contains(CoreId(64)));
        assert_eq!(m.first(), Some(CoreId(2)));
        assert_eq!(CpuMask(0).first(), None);
        assert_eq!(CpuMask::only(CoreId(3)), CpuMask(0b1000));
    }

    #[test]
    fn iter_skips_free_slots() {
        let mut table = TaskTable::new();
        let a = table.insert(TaskDescriptor::new("a", Policy::Rms, 1).unwrap());
        let b = table.insert(TaskDescriptor::new("b", Policy::Rms, 1).unwrap());
        table.remove(a).unwrap();
        let ids: Vec<_> = table.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![b]);
    }
}
