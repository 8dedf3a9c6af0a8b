use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ids::TaskId;
use crate::types::LogRecord;

/// POST /submit response. The request body is a [`LogRecord`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: TaskId,
}

/// POST /get_work request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetWorkRequest {
    pub consumer_id: String,
    /// Advisory: the consumer's configured weight. Recorded for diagnostics.
    pub weight: f64,
    /// Advisory: the consumer's local in-flight count.
    #[serde(default)]
    pub current_tasks: u32,
}

/// Assigned payload — the submitted record plus its task id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskPayload {
    pub task_id: TaskId,
    #[serde(flatten)]
    pub record: LogRecord,
}

/// POST /get_work response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetWorkResponse {
    pub has_work: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<TaskPayload>,
}

impl GetWorkResponse {
    pub fn empty() -> Self {
        Self {
            has_work: false,
            task_id: None,
            payload: None,
        }
    }
}

/// Status values accepted on POST /status. Parsed case-insensitively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusUpdate {
    InProgress,
    Completed,
    Failed,
}

impl StatusUpdate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusUpdate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

impl Serialize for StatusUpdate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StatusUpdate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// POST /status request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusRequest {
    pub consumer_id: String,
    pub task_id: TaskId,
    pub status: StatusUpdate,
    /// Failure reason; meaningful only with `status = failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// POST /status and GET /health response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AckResponse {
    pub ok: bool,
}

/// Per-consumer row inside GET /stats.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsumerRow {
    pub processed: u64,
    pub failed: u64,
    /// Tasks currently assigned to this consumer in the in-flight table.
    pub in_flight: u64,
    /// Weight last reported by the consumer on get_work.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    pub last_seen: DateTime<Utc>,
}

/// One entry in the bounded ring of recent failures.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailureRecord {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_id: Option<String>,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// GET /stats response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub queue_depth: u64,
    pub in_flight: u64,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    /// Total timeout requeues across all tasks.
    pub retries: u64,
    pub uptime_seconds: u64,
    pub per_consumer: BTreeMap<String, ConsumerRow>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_failures: Vec<FailureRecord>,
}

/// GET /metrics response. Consumed by the autoscaler.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub queue_depth: u64,
    pub in_flight: u64,
    /// Consumers seen within the activity window.
    pub active_consumers: u64,
    /// queue_depth / max(1, active_consumers).
    pub backpressure: f64,
}
