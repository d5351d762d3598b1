//! Tasks and task lists.
//!
//! A task lives in exactly one of the scheduler's four lists at a time and
//! its `status` always names that list.

use std::cmp::Ordering;
use std::fmt;
use std::time::Instant;

use quarry_core::prelude::{Location, TaskId};
use quarry_plan::LogicalPlan;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    Doing,
    Done,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Todo => "todo",
            TaskStatus::Doing => "doing",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub query: String,
    pub catalog: String,
    pub schema: String,
    /// Higher runs first.
    pub priority: i32,
    /// Monotonic admission time; wall-clock steps never reorder the queue.
    pub commit_time: Instant,
    /// `None` when compilation failed.
    pub plan: Option<LogicalPlan>,
    /// Executors needed at `parallelism` (at 1 until dispatched).
    pub executor_number: usize,
    pub parallelism: usize,
    /// Executors the task holds, in plan order.
    pub executors: Vec<Location>,
    /// Executor holding the root node.
    pub root: Option<Location>,
    pub error: Option<String>,
    /// Set once every dispatch phase succeeded; only dispatched tasks are
    /// polled.
    pub dispatched: bool,
}

impl Task {
    pub fn new(id: TaskId, query: &str, catalog: &str, schema: &str, priority: i32) -> Self {
        Self {
            id,
            status: TaskStatus::Todo,
            query: query.to_string(),
            catalog: catalog.to_string(),
            schema: schema.to_string(),
            priority,
            commit_time: Instant::now(),
            plan: None,
            executor_number: 0,
            parallelism: 1,
            executors: Vec::new(),
            root: None,
            error: None,
            dispatched: false,
        }
    }

    /// Scheduling order: priority descending, then commit time, then id.
    pub fn schedule_cmp(&self, other: &Task) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.commit_time.cmp(&other.commit_time))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Ordered collection of tasks. `insert_sorted` keeps scheduling order,
/// `push` keeps arrival order.
#[derive(Debug, Clone, Default)]
pub struct TaskList {
    tasks: Vec<Task>,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_sorted(&mut self, task: Task) {
        let at = self
            .tasks
            .partition_point(|t| t.schedule_cmp(&task) != Ordering::Greater);
        self.tasks.insert(at, task);
    }

    pub fn push(&mut self, task: Task) {
        self.tasks.push(task);
    }

    pub fn top(&self) -> Option<&Task> {
        self.tasks.first()
    }

    pub fn pop(&mut self) -> Option<Task> {
        if self.tasks.is_empty() {
            None
        } else {
            Some(self.tasks.remove(0))
        }
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        let pos = self.tasks.iter().position(|t| t.id == id)?;
        Some(self.tasks.remove(pos))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn to_vec(&self) -> Vec<Task> {
        self.tasks.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn task(id: u64, priority: i32, at_ms: u64) -> Task {
        task_at(Instant::now(), id, priority, at_ms)
    }

    fn task_at(base: Instant, id: u64, priority: i32, at_ms: u64) -> Task {
        let mut t = Task::new(TaskId::new(id), "q", "c", "s", priority);
        t.commit_time = base + Duration::from_millis(at_ms);
        t
    }

    #[test]
    fn todos_order_by_priority_then_commit_time() {
        let mut list = TaskList::new();
        let base = Instant::now();
        list.insert_sorted(task_at(base, 1, 0, 10));
        list.insert_sorted(task_at(base, 2, 5, 30));
        list.insert_sorted(task_at(base, 3, 5, 20));
        list.insert_sorted(task_at(base, 4, -1, 0));
        list.insert_sorted(task_at(base, 5, 0, 10));

        let ids: Vec<u64> = list.iter().map(|t| t.id.get()).collect();
        assert_eq!(ids, vec![3, 2, 1, 5, 4]);
        assert_eq!(list.pop().map(|t| t.id.get()), Some(3));
        assert_eq!(list.top().map(|t| t.id.get()), Some(2));
    }

    #[test]
    fn later_admission_never_overtakes_an_equal_priority_task() {
        let first = Task::new(TaskId::new(7), "q", "c", "s", 0);
        let second = Task::new(TaskId::new(8), "q", "c", "s", 0);
        assert!(first.commit_time <= second.commit_time);
        assert_eq!(first.schedule_cmp(&second), Ordering::Less);

        let mut list = TaskList::new();
        list.insert_sorted(second);
        list.insert_sorted(first);
        let ids: Vec<u64> = list.iter().map(|t| t.id.get()).collect();
        assert_eq!(ids, vec![7, 8]);
    }

    #[test]
    fn remove_by_id() {
        let mut list = TaskList::new();
        list.push(task(1, 0, 0));
        list.push(task(2, 0, 0));
        assert!(list.remove(TaskId::new(1)).is_some());
        assert!(list.remove(TaskId::new(1)).is_none());
        assert_eq!(list.len(), 1);
        assert!(list.get(TaskId::new(2)).is_some());
    }
}
