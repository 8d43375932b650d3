//! The set of admitted tasks plus the Running pointer.
//!
//! A [`Registry`] is always reached through the scheduler's single registry
//! mutex. Iteration order is registration order, which is also the
//! tie-breaker between tasks with equal periods.

use indexmap::IndexMap;

use rmsched_core::{Result, SchedError, TaskId};

use crate::admission;
use crate::host::ContextHandle;
use crate::task::{Task, TaskInfo, TaskSnapshot, TaskStatus};

/// Outcome of one dispatch selection, computed under the registry lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Switch {
    /// Task that should hold the CPU, with its context if it has one.
    pub selected: Option<(TaskId, Option<ContextHandle>)>,
    /// The selection differs from the previous Running pointer.
    pub changed: bool,
    /// Running task sent back to `Ready` by a shorter-period task.
    pub preempted: Option<TaskId>,
}

#[derive(Debug)]
pub struct Registry {
    tasks: IndexMap<TaskId, Task>,
    running: Option<TaskId>,
    capacity: usize,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self {
            tasks: IndexMap::new(),
            running: None,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    /// Task the dispatcher last put on the CPU, if it has not yielded since.
    pub fn running(&self) -> Option<TaskId> {
        self.running
    }

    /// Clear the Running pointer if it names `id`.
    pub(crate) fn clear_running_if(&mut self, id: TaskId) {
        if self.running == Some(id) {
            self.running = None;
        }
    }

    /// Check that `id` could be inserted right now.
    pub(crate) fn check_vacancy(&self, id: TaskId) -> Result<()> {
        if self.tasks.contains_key(&id) {
            return Err(SchedError::AlreadyRegistered(id));
        }
        if self.tasks.len() >= self.capacity {
            return Err(SchedError::ResourceExhausted { capacity: self.capacity });
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, task: Task) -> Result<()> {
        self.check_vacancy(task.id)?;
        self.tasks.insert(task.id, task);
        Ok(())
    }

    /// Take a task out, keeping the order of the rest.
    pub(crate) fn remove(&mut self, id: TaskId) -> Option<Task> {
        let task = self.tasks.shift_remove(&id)?;
        self.clear_running_if(id);
        Some(task)
    }

    /// Remove every task (shutdown).
    pub(crate) fn drain(&mut self) -> Vec<Task> {
        self.running = None;
        self.tasks.drain(..).map(|(_, task)| task).collect()
    }

    /// Sum of per-task admission loads.
    pub fn load(&self) -> u64 {
        self.tasks.values().map(Task::load).fold(0, u64::saturating_add)
    }

    /// Sum of `budget / period` over admitted tasks.
    pub fn utilization(&self) -> f64 {
        admission::load_to_utilization(self.load())
    }

    pub fn running_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .count()
    }

    pub fn list(&self) -> Vec<TaskInfo> {
        self.tasks.values().map(Task::info).collect()
    }

    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.tasks.values().map(Task::snapshot).collect()
    }

    /// Rate-monotonic choice among ready tasks and the running one.
    ///
    /// Shortest period wins. On equal periods the running task keeps the CPU,
    /// then the earliest registered task goes first.
    pub fn select_next(&self) -> Option<TaskId> {
        self.tasks
            .values()
            .enumerate()
            .filter(|(_, t)| match t.status {
                TaskStatus::Ready => true,
                TaskStatus::Running => self.running == Some(t.id),
                TaskStatus::Sleeping => false,
            })
            .min_by_key(|(idx, t)| (t.period, t.status != TaskStatus::Running, *idx))
            .map(|(_, t)| t.id)
    }

    /// Apply [`select_next`](Self::select_next): flip statuses and move the
    /// Running pointer. Host calls happen later, outside the lock.
    pub(crate) fn switch_to_next(&mut self) -> Switch {
        let next = self.select_next();
        let current = self.running;
        if next == current {
            return Switch {
                selected: next.map(|id| (id, self.context_of(id))),
                changed: false,
                preempted: None,
            };
        }

        let preempted = current.and_then(|id| {
            let task = self.tasks.get_mut(&id)?;
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Ready;
                Some(id)
            } else {
                None
            }
        });
        if let Some(task) = next.and_then(|id| self.tasks.get_mut(&id)) {
            task.status = TaskStatus::Running;
        }
        self.running = next;

        Switch {
            selected: next.map(|id| (id, self.context_of(id))),
            changed: true,
            preempted,
        }
    }

    fn context_of(&self, id: TaskId) -> Option<ContextHandle> {
        self.tasks.get(&id).and_then(|t| t.context)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::timer::{FireOutcome, ReleaseTimer};

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
    }

    fn task(rt: &tokio::runtime::Runtime, id: TaskId, period_ms: u64, budget_ms: u64) -> Task {
        let timer = ReleaseTimer::new(rt.handle().clone(), || FireOutcome::Done);
        Task::new(
            id,
            Some(ContextHandle(id as u64)),
            Duration::from_millis(period_ms),
            Duration::from_millis(budget_ms),
            Instant::now() + Duration::from_millis(period_ms),
            timer,
        )
    }

    #[test]
    fn insert_rejects_duplicates_and_overflow() {
        let rt = runtime();
        let mut registry = Registry::new(2);
        registry.insert(task(&rt, 1, 100, 10)).unwrap();
        assert_eq!(
            registry.insert(task(&rt, 1, 100, 10)).unwrap_err(),
            SchedError::AlreadyRegistered(1)
        );
        registry.insert(task(&rt, 2, 100, 10)).unwrap();
        assert_eq!(
            registry.insert(task(&rt, 3, 100, 10)).unwrap_err(),
            SchedError::ResourceExhausted { capacity: 2 }
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn shortest_period_selected() {
        let rt = runtime();
        let mut registry = Registry::new(8);
        registry.insert(task(&rt, 10, 100, 10)).unwrap();
        registry.insert(task(&rt, 20, 50, 10)).unwrap();
        assert_eq!(registry.select_next(), Some(20));
    }

    #[test]
    fn equal_periods_go_in_registration_order() {
        let rt = runtime();
        let mut registry = Registry::new(8);
        registry.insert(task(&rt, 30, 80, 10)).unwrap();
        registry.insert(task(&rt, 10, 80, 10)).unwrap();
        registry.insert(task(&rt, 20, 80, 10)).unwrap();
        assert_eq!(registry.select_next(), Some(30));

        registry.remove(30);
        assert_eq!(registry.select_next(), Some(10));
    }

    #[test]
    fn sleeping_tasks_are_not_selected() {
        let rt = runtime();
        let mut registry = Registry::new(8);
        registry.insert(task(&rt, 1, 50, 10)).unwrap();
        registry.insert(task(&rt, 2, 100, 10)).unwrap();
        registry.get_mut(1).unwrap().status = TaskStatus::Sleeping;
        assert_eq!(registry.select_next(), Some(2));

        registry.get_mut(2).unwrap().status = TaskStatus::Sleeping;
        assert_eq!(registry.select_next(), None);
    }

    #[test]
    fn switch_preempts_longer_period() {
        let rt = runtime();
        let mut registry = Registry::new(8);
        registry.insert(task(&rt, 1, 100, 10)).unwrap();

        let first = registry.switch_to_next();
        assert_eq!(first.selected, Some((1, Some(ContextHandle(1)))));
        assert!(first.changed);
        assert_eq!(registry.running(), Some(1));

        registry.insert(task(&rt, 2, 40, 10)).unwrap();
        let second = registry.switch_to_next();
        assert_eq!(second.selected.map(|(id, _)| id), Some(2));
        assert_eq!(second.preempted, Some(1));
        assert_eq!(registry.get(1).unwrap().status(), TaskStatus::Ready);
        assert_eq!(registry.get(2).unwrap().status(), TaskStatus::Running);
        assert_eq!(registry.running_count(), 1);
    }

    #[test]
    fn running_task_keeps_cpu_on_tie() {
        let rt = runtime();
        let mut registry = Registry::new(8);
        registry.insert(task(&rt, 1, 100, 10)).unwrap();
        registry.switch_to_next();
        registry.insert(task(&rt, 2, 100, 10)).unwrap();

        let switch = registry.switch_to_next();
        assert!(!switch.changed);
        assert_eq!(registry.running(), Some(1));
    }

    #[test]
    fn remove_clears_running_pointer() {
        let rt = runtime();
        let mut registry = Registry::new(8);
        registry.insert(task(&rt, 1, 100, 10)).unwrap();
        registry.switch_to_next();
        assert!(registry.remove(1).is_some());
        assert_eq!(registry.running(), None);
        assert!(registry.remove(1).is_none());
    }

    #[test]
    fn utilization_and_listing() {
        let rt = runtime();
        let mut registry = Registry::new(8);
        registry.insert(task(&rt, 5, 100, 20)).unwrap();
        registry.insert(task(&rt, 3, 200, 20)).unwrap();
        assert_eq!(registry.load(), 300_000_000);
        assert!((registry.utilization() - 0.3).abs() < 1e-9);

        let ids: Vec<TaskId> = registry.list().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![5, 3], "listing follows registration order");
        assert_eq!(registry.list()[0].period_ms, 100);
        assert_eq!(registry.list()[0].budget_ms, 20);
    }
}
