//! HTTP client for the engine's REST endpoints.

use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use taskgrid_core::{ProgressEntry, TaskFailure, TaskState, WorkerStatus};
use tracing::debug;

use crate::error::ClientError;

/// Identity forwarded in request headers.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub principal: Option<String>,
    pub authorities: Vec<String>,
    pub email: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct SubmitRequest {
    pub task_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub parameters: serde_json::Value,
    pub remote: bool,
    pub remote_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_queue_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_runtime_minutes: Option<u32>,
    pub email_alert: bool,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub task_type: String,
    pub target: Option<String>,
    pub submitter: String,
    pub state: TaskState,
    pub submitted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub progress_entries: usize,
    pub email_alert: bool,
}

#[derive(Debug, Deserialize)]
pub struct ProgressPage {
    pub state: TaskState,
    pub next_offset: usize,
    pub entries: Vec<ProgressEntry>,
}

#[derive(Debug, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub state: TaskState,
    pub answer: Option<serde_json::Value>,
    pub failure: Option<TaskFailure>,
    pub finished_at: DateTime<Utc>,
    pub ran_remotely: bool,
}

#[derive(Debug, Deserialize)]
pub struct CancelOutcome {
    pub cancelled: bool,
}

#[derive(Debug, Deserialize)]
pub struct WorkerSummary {
    pub worker_id: String,
    pub hostname: String,
    pub status: WorkerStatus,
    pub task_types: Vec<String>,
    pub active_tasks: u32,
    pub max_concurrent: u32,
    pub last_heartbeat: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    conflicting_task_id: Option<String>,
}

/// HTTP client for the engine API.
pub struct HttpClient {
    inner: reqwest::Client,
    base_url: String,
    identity: Identity,
}

impl HttpClient {
    /// Create a new HTTP client.
    pub fn new(base_url: &str, identity: Identity) -> Self {
        Self {
            inner: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            identity,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_identity(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(principal) = &self.identity.principal {
            request = request.header("x-principal", principal);
        }
        if !self.identity.authorities.is_empty() {
            request = request.header("x-authorities", self.identity.authorities.join(","));
        }
        if let Some(email) = &self.identity.email {
            request = request.header("x-email", email);
        }
        request
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let response = self.with_identity(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let (message, conflicting_task_id) = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => (body.error, body.conflicting_task_id),
            Err(_) => (text, None),
        };
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
            conflicting_task_id,
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        Ok(self.execute(request).await?.json().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.url(path);
        debug!(url = %url, "GET request");
        self.send(self.inner.get(&url)).await
    }

    /// Check if the engine is healthy.
    pub async fn health(&self) -> Result<serde_json::Value, ClientError> {
        self.get("/health").await
    }

    pub async fn submit(&self, request: &SubmitRequest) -> Result<String, ClientError> {
        let url = self.url("/v1/tasks");
        debug!(url = %url, task_type = %request.task_type, "POST request");
        let response: SubmitResponse = self.send(self.inner.post(&url).json(request)).await?;
        Ok(response.task_id)
    }

    pub async fn task(&self, task_id: &str) -> Result<TaskSummary, ClientError> {
        self.get(&format!("/v1/tasks/{task_id}")).await
    }

    pub async fn tasks(&self) -> Result<Vec<TaskSummary>, ClientError> {
        self.get("/v1/tasks").await
    }

    pub async fn progress(&self, task_id: &str, offset: usize) -> Result<ProgressPage, ClientError> {
        self.get(&format!("/v1/tasks/{task_id}/progress?offset={offset}"))
            .await
    }

    pub async fn result(&self, task_id: &str) -> Result<TaskOutcome, ClientError> {
        self.get(&format!("/v1/tasks/{task_id}/result")).await
    }

    pub async fn cancel(&self, task_id: &str) -> Result<bool, ClientError> {
        let url = self.url(&format!("/v1/tasks/{task_id}/cancel"));
        let outcome: CancelOutcome = self.send(self.inner.post(&url)).await?;
        Ok(outcome.cancelled)
    }

    pub async fn add_email_alert(&self, task_id: &str) -> Result<(), ClientError> {
        let url = self.url(&format!("/v1/tasks/{task_id}/email"));
        self.execute(self.inner.post(&url)).await?;
        Ok(())
    }

    pub async fn workers(&self) -> Result<Vec<WorkerSummary>, ClientError> {
        self.get("/v1/workers").await
    }
}
