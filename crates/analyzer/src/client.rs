use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use logrelay_common::api::coordinator::{
    AckResponse, GetWorkRequest, GetWorkResponse, MetricsResponse, StatsResponse, StatusRequest,
    StatusUpdate, SubmitResponse, TaskPayload,
};
use logrelay_common::ids::TaskId;
use logrelay_common::types::LogRecord;
use logrelay_common::RelayError;

/// get_work may contend with many consumers; give it headroom.
const GET_WORK_TIMEOUT: Duration = Duration::from_secs(10);
/// Status and submit calls must stay well under the monitor tick period.
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for the coordinator API.
pub struct CoordinatorClient {
    http: reqwest::Client,
    base_url: String,
}

impl CoordinatorClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent("logrelay-analyzer/0.1")
            .build()
            .map_err(|e| ClientError::Request(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Submit a record for processing. Used by producers and tests.
    pub async fn submit(&self, record: &LogRecord) -> Result<TaskId, ClientError> {
        let response: SubmitResponse = self.post_json("/submit", record, STATUS_TIMEOUT).await?;
        Ok(response.task_id)
    }

    /// Ask the coordinator for one task. None when the backlog is empty.
    pub async fn get_work(
        &self,
        consumer_id: &str,
        weight: f64,
        current_tasks: u32,
    ) -> Result<Option<TaskPayload>, ClientError> {
        let request = GetWorkRequest {
            consumer_id: consumer_id.to_string(),
            weight,
            current_tasks,
        };
        let response: GetWorkResponse =
            self.post_json("/get_work", &request, GET_WORK_TIMEOUT).await?;

        if response.has_work {
            Ok(response.payload)
        } else {
            Ok(None)
        }
    }

    /// Report a heartbeat or terminal status for an assigned task.
    pub async fn report_status(
        &self,
        consumer_id: &str,
        task_id: TaskId,
        status: StatusUpdate,
        reason: Option<&str>,
    ) -> Result<(), ClientError> {
        let request = StatusRequest {
            consumer_id: consumer_id.to_string(),
            task_id,
            status,
            reason: reason.map(|r| r.to_string()),
        };
        let _: AckResponse = self.post_json("/status", &request, STATUS_TIMEOUT).await?;
        Ok(())
    }

    pub async fn metrics(&self) -> Result<MetricsResponse, ClientError> {
        self.get_json("/metrics").await
    }

    pub async fn stats(&self) -> Result<StatsResponse, ClientError> {
        self.get_json("/stats").await
    }

    pub async fn health(&self) -> Result<(), ClientError> {
        let _: AckResponse = self.get_json("/health").await?;
        Ok(())
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        Self::decode(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .timeout(STATUS_TIMEOUT)
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("coordinator returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl From<ClientError> for RelayError {
    fn from(e: ClientError) -> Self {
        RelayError::Http(e.to_string())
    }
}
