use std::collections::{HashMap, VecDeque};

use logrelay_common::ids::TaskId;
use logrelay_common::types::Task;

/// Ordered backlog of queued tasks.
///
/// Order lives in a deque of ids; the tasks themselves are keyed by id.
/// Head insert (retries), tail append (fresh work), and head pop are all
/// O(1). A task id may appear at most once.
pub struct Backlog {
    order: VecDeque<TaskId>,
    tasks: HashMap<TaskId, Task>,
}

impl Backlog {
    pub fn new() -> Self {
        Self {
            order: VecDeque::new(),
            tasks: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    /// Append fresh work at the tail.
    pub fn push_back(&mut self, task: Task) {
        if self.reject_duplicate(&task) {
            return;
        }
        self.order.push_back(task.id);
        self.tasks.insert(task.id, task);
    }

    /// Insert a retried task at the head so it is delivered next.
    pub fn push_front(&mut self, task: Task) {
        if self.reject_duplicate(&task) {
            return;
        }
        self.order.push_front(task.id);
        self.tasks.insert(task.id, task);
    }

    /// Remove and return the task at the head.
    pub fn pop_front(&mut self) -> Option<Task> {
        let id = self.order.pop_front()?;
        self.tasks.remove(&id)
    }

    fn reject_duplicate(&self, task: &Task) -> bool {
        let duplicate = self.tasks.contains_key(&task.id);
        debug_assert!(!duplicate, "duplicate task id in backlog: {}", task.id);
        if duplicate {
            tracing::error!(task_id = %task.id, "Duplicate task id in backlog, dropping insert");
        }
        duplicate
    }
}

impl Default for Backlog {
    fn default() -> Self {
        Self::new()
    }
}
