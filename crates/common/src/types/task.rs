use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TaskId;

/// Task lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One unit of work tracked by the coordinator.
///
/// Lives in the backlog while `Queued`, in the in-flight table while
/// `InProgress`. Terminal tasks survive only as counters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub state: TaskState,
    /// Consumer currently holding the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<DateTime<Utc>>,
    /// Last status update received from the assignee.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Times this task has been requeued after a heartbeat timeout.
    #[serde(default)]
    pub retries: u32,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new() -> Self {
        Self {
            id: TaskId::new(),
            state: TaskState::Queued,
            assignee: None,
            assigned_at: None,
            last_heartbeat: None,
            retries: 0,
            created_at: Utc::now(),
        }
    }

    /// Mark the task assigned to `consumer_id` as of `now`.
    pub fn assign(&mut self, consumer_id: &str, now: DateTime<Utc>) {
        self.state = TaskState::InProgress;
        self.assignee = Some(consumer_id.to_string());
        self.assigned_at = Some(now);
        self.last_heartbeat = Some(now);
    }

    /// Return the task to the queued state for another delivery attempt.
    pub fn requeue(&mut self) {
        self.state = TaskState::Queued;
        self.assignee = None;
        self.assigned_at = None;
        self.last_heartbeat = None;
        self.retries += 1;
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskState::InProgress).unwrap(),
            r#""in_progress""#
        );
        let state: TaskState = serde_json::from_str(r#""queued""#).unwrap();
        assert_eq!(state, TaskState::Queued);
    }

    #[test]
    fn test_assign_then_requeue_preserves_identity() {
        let mut task = Task::new();
        let id = task.id;
        let created = task.created_at;

        task.assign("analyzer-0", Utc::now());
        assert_eq!(task.state, TaskState::InProgress);
        assert_eq!(task.assignee.as_deref(), Some("analyzer-0"));
        assert!(task.last_heartbeat.is_some());

        task.requeue();
        assert_eq!(task.id, id);
        assert_eq!(task.created_at, created);
        assert_eq!(task.state, TaskState::Queued);
        assert!(task.assignee.is_none());
        assert_eq!(task.retries, 1);
    }
}
