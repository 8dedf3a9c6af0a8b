use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use logrelay_common::api::coordinator::{
    ConsumerRow, FailureRecord, MetricsResponse, StatsResponse,
};
use logrelay_common::config::CoordinatorConfig;
use logrelay_common::ids::TaskId;
use logrelay_common::types::{LogRecord, Task};

use crate::backlog::Backlog;

/// Capacity of the recent-failure ring.
const FAILURE_RING_CAPACITY: usize = 50;

/// Failure reason recorded when a task runs out of timeout retries.
pub const RETRIES_EXHAUSTED_REASON: &str = "max retries exceeded";

#[derive(Default)]
struct GlobalCounters {
    submitted: u64,
    completed: u64,
    failed: u64,
    /// Timeout requeues across all tasks.
    retries: u64,
}

struct ConsumerEntry {
    processed: u64,
    failed: u64,
    weight: Option<f64>,
    last_seen: DateTime<Utc>,
}

/// Everything the coordinator tracks, guarded as one unit so every operation
/// commits atomically. A task id lives in exactly one of {backlog, in_flight,
/// terminal counters}; its payload exists iff the task is non-terminal.
struct QueueCore {
    backlog: Backlog,
    in_flight: HashMap<TaskId, Task>,
    payloads: HashMap<TaskId, LogRecord>,
    counters: GlobalCounters,
    consumers: HashMap<String, ConsumerEntry>,
    recent_failures: VecDeque<FailureRecord>,
}

impl QueueCore {
    fn touch_consumer(&mut self, consumer_id: &str, weight: Option<f64>, now: DateTime<Utc>) {
        let entry = self
            .consumers
            .entry(consumer_id.to_string())
            .or_insert(ConsumerEntry {
                processed: 0,
                failed: 0,
                weight: None,
                last_seen: now,
            });
        entry.last_seen = now;
        if weight.is_some() {
            entry.weight = weight;
        }
    }

    fn push_failure(
        &mut self,
        task_id: TaskId,
        consumer_id: Option<String>,
        reason: &str,
        now: DateTime<Utc>,
    ) {
        if self.recent_failures.len() == FAILURE_RING_CAPACITY {
            self.recent_failures.pop_front();
        }
        self.recent_failures.push_back(FailureRecord {
            task_id,
            consumer_id,
            reason: reason.to_string(),
            at: now,
        });
    }
}

/// Outcome of one expiry scan.
#[derive(Debug, Default)]
pub struct RequeueOutcome {
    pub requeued: Vec<TaskId>,
    pub exhausted: Vec<TaskId>,
}

/// Shared coordinator state.
///
/// Guards the queue core with a std::sync::Mutex: every critical section is
/// a short in-memory mutation and the lock is never held across an await.
pub struct QueueState {
    core: Mutex<QueueCore>,
    config: CoordinatorConfig,
    started_at: Instant,
}

impl QueueState {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            core: Mutex::new(QueueCore {
                backlog: Backlog::new(),
                in_flight: HashMap::new(),
                payloads: HashMap::new(),
                counters: GlobalCounters::default(),
                consumers: HashMap::new(),
                recent_failures: VecDeque::new(),
            }),
            config,
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueCore> {
        self.core.lock().unwrap()
    }

    /// Accept a record: create a queued task, append it to the backlog tail,
    /// store the payload. The task is eligible for assignment once this
    /// returns.
    pub fn submit(&self, mut record: LogRecord) -> TaskId {
        let task = Task::new();
        let id = task.id;
        if record.timestamp.is_none() {
            record.timestamp = Some(task.created_at);
        }

        let mut core = self.lock();
        core.payloads.insert(id, record);
        core.backlog.push_back(task);
        core.counters.submitted += 1;
        id
    }

    /// Assign the backlog head to `consumer_id`. Returns the task id and a
    /// copy of its payload, or None when the backlog is empty.
    pub fn assign(&self, consumer_id: &str, weight: f64) -> Option<(TaskId, LogRecord)> {
        let now = Utc::now();
        let mut core = self.lock();
        core.touch_consumer(consumer_id, Some(weight), now);

        let mut task = core.backlog.pop_front()?;
        let id = task.id;
        let record = match core.payloads.get(&id) {
            Some(record) => record.clone(),
            None => {
                // Payload-lifetime invariant broken; drop the orphan rather
                // than hand out an unprocessable assignment.
                tracing::error!(task_id = %id, "Queued task has no payload, dropping");
                core.counters.failed += 1;
                core.push_failure(id, None, "payload missing", now);
                return None;
            }
        };

        task.assign(consumer_id, now);
        core.in_flight.insert(id, task);

        tracing::debug!(task_id = %id, consumer = consumer_id, "Task assigned");
        Some((id, record))
    }

    /// Refresh the heartbeat for `task_id` if `consumer_id` still owns it.
    /// Heartbeats for requeued or reassigned tasks are dropped.
    pub fn heartbeat(&self, consumer_id: &str, task_id: TaskId) -> bool {
        let now = Utc::now();
        let mut core = self.lock();
        core.touch_consumer(consumer_id, None, now);

        match core.in_flight.get_mut(&task_id) {
            Some(task) if task.assignee.as_deref() == Some(consumer_id) => {
                task.last_heartbeat = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Apply a COMPLETED report. Returns whether the report changed state;
    /// stale and unknown ids are accepted no-ops.
    pub fn complete(&self, consumer_id: &str, task_id: TaskId) -> bool {
        let now = Utc::now();
        let mut core = self.lock();
        core.touch_consumer(consumer_id, None, now);

        if core.in_flight.remove(&task_id).is_none() {
            tracing::debug!(task_id = %task_id, consumer = consumer_id, "Stale completion ignored");
            return false;
        }
        core.payloads.remove(&task_id);
        core.counters.completed += 1;
        if let Some(entry) = core.consumers.get_mut(consumer_id) {
            entry.processed += 1;
        }

        tracing::debug!(task_id = %task_id, consumer = consumer_id, "Task completed");
        true
    }

    /// Apply a FAILED report. Same no-op semantics as [`complete`].
    ///
    /// [`complete`]: QueueState::complete
    pub fn fail(&self, consumer_id: &str, task_id: TaskId, reason: &str) -> bool {
        let now = Utc::now();
        let mut core = self.lock();
        core.touch_consumer(consumer_id, None, now);

        if core.in_flight.remove(&task_id).is_none() {
            tracing::debug!(task_id = %task_id, consumer = consumer_id, "Stale failure ignored");
            return false;
        }
        core.payloads.remove(&task_id);
        core.counters.failed += 1;
        if let Some(entry) = core.consumers.get_mut(consumer_id) {
            entry.failed += 1;
        }
        core.push_failure(task_id, Some(consumer_id.to_string()), reason, now);

        tracing::warn!(task_id = %task_id, consumer = consumer_id, reason, "Task failed");
        true
    }

    /// Scan in-flight tasks for expired heartbeats as of `now`.
    ///
    /// Keys are snapshotted first, then each id is re-checked under the lock
    /// before acting, so a terminal report landing mid-scan wins cleanly.
    /// Expired tasks with retries left return to the backlog head; the rest
    /// are failed with [`RETRIES_EXHAUSTED_REASON`].
    pub fn requeue_expired(&self, now: DateTime<Utc>) -> RequeueOutcome {
        let timeout = ChronoDuration::milliseconds(self.config.task_timeout_ms as i64);
        let max_retries = self.config.max_retries;

        let ids: Vec<TaskId> = {
            let core = self.lock();
            core.in_flight.keys().copied().collect()
        };

        let mut outcome = RequeueOutcome::default();
        for id in ids {
            let mut core = self.lock();

            let expired = match core.in_flight.get(&id) {
                Some(task) => match task.last_heartbeat {
                    Some(heartbeat) => now - heartbeat > timeout,
                    None => true,
                },
                // Reached a terminal state between snapshot and re-check.
                None => false,
            };
            if !expired {
                continue;
            }

            let mut task = match core.in_flight.remove(&id) {
                Some(task) => task,
                None => continue,
            };
            let assignee = task.assignee.take();

            if task.retries < max_retries {
                task.requeue();
                core.counters.retries += 1;
                core.backlog.push_front(task);
                tracing::warn!(
                    task_id = %id,
                    consumer = assignee.as_deref().unwrap_or(""),
                    "Heartbeat expired, task requeued"
                );
                outcome.requeued.push(id);
            } else {
                core.payloads.remove(&id);
                core.counters.failed += 1;
                core.push_failure(id, assignee.clone(), RETRIES_EXHAUSTED_REASON, now);
                tracing::error!(
                    task_id = %id,
                    consumer = assignee.as_deref().unwrap_or(""),
                    retries = task.retries,
                    "Task exceeded max retries, dropped"
                );
                outcome.exhausted.push(id);
            }
        }

        outcome
    }

    /// Read-only snapshot for GET /stats. Fields are individually
    /// consistent; no atomicity is promised across them.
    pub fn stats(&self) -> StatsResponse {
        let core = self.lock();

        let mut in_flight_by_consumer: HashMap<&str, u64> = HashMap::new();
        for task in core.in_flight.values() {
            if let Some(assignee) = task.assignee.as_deref() {
                *in_flight_by_consumer.entry(assignee).or_default() += 1;
            }
        }

        let per_consumer: BTreeMap<String, ConsumerRow> = core
            .consumers
            .iter()
            .map(|(id, entry)| {
                (
                    id.clone(),
                    ConsumerRow {
                        processed: entry.processed,
                        failed: entry.failed,
                        in_flight: in_flight_by_consumer.get(id.as_str()).copied().unwrap_or(0),
                        weight: entry.weight,
                        last_seen: entry.last_seen,
                    },
                )
            })
            .collect();

        StatsResponse {
            queue_depth: core.backlog.len() as u64,
            in_flight: core.in_flight.len() as u64,
            submitted: core.counters.submitted,
            completed: core.counters.completed,
            failed: core.counters.failed,
            retries: core.counters.retries,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            per_consumer,
            recent_failures: core.recent_failures.iter().cloned().collect(),
        }
    }

    /// Snapshot for GET /metrics. A consumer counts as active when it has
    /// contacted the coordinator within the last task timeout.
    pub fn metrics(&self) -> MetricsResponse {
        let now = Utc::now();
        let window = ChronoDuration::milliseconds(self.config.task_timeout_ms as i64);
        let core = self.lock();

        let active_consumers = core
            .consumers
            .values()
            .filter(|entry| now - entry.last_seen <= window)
            .count() as u64;

        let queue_depth = core.backlog.len() as u64;
        MetricsResponse {
            queue_depth,
            in_flight: core.in_flight.len() as u64,
            active_consumers,
            backpressure: queue_depth as f64 / active_consumers.max(1) as f64,
        }
    }
}
