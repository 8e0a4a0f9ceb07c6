//! reqwest-backed implementation of [`RemoteApi`]

use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::sse::decode_event_stream;
use super::types::*;
use super::{EventStream, RemoteApi};
use crate::common::credentials::Credential;
use crate::common::{Error, Result};
use crate::execution::status::RunKind;

const USER_AGENT: &str = concat!("devicelab-cli/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the remote service
pub struct HttpApi {
    /// Client for ordinary request/response calls, bounded by the request timeout
    client: reqwest::Client,
    /// Client for the status stream, which stays open for the whole run
    stream_client: reqwest::Client,
    base_url: String,
    credential: Credential,
}

impl HttpApi {
    pub fn new(base_url: &str, credential: Credential, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;
        let stream_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            stream_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credential,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.bearer_auth(self.credential.bearer()).send().await?;
        let response = check_status(response).await?;
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| Error::Protocol(format!("Unexpected response body: {}", e)))
    }
}

/// Turn a non-2xx response into a domain error
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    Err(Error::from_status(status.as_u16(), message))
}

/// Extract a human message from an error body
fn error_message(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<Value>,
        detail: Option<Value>,
        message: Option<Value>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        let found = [parsed.error, parsed.detail, parsed.message]
            .into_iter()
            .flatten()
            .find_map(|v| match v {
                Value::String(s) if !s.is_empty() => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            });
        if found.is_some() {
            return found;
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.chars().take(200).collect())
    }
}

/// Rewrite 404/403 messages to name the resource involved
fn in_context(err: Error, what: impl Display) -> Error {
    match err {
        Error::NotFound(_) => Error::NotFound(format!("{} not found", what)),
        Error::PermissionDenied(detail) => {
            Error::PermissionDenied(format!("not allowed to access {} ({})", what, detail))
        }
        other => other,
    }
}

#[async_trait]
impl RemoteApi for HttpApi {
    async fn execute_test(&self, req: &ExecuteTestRequest) -> Result<SubmitResponse> {
        let request = self
            .client
            .post(self.url("/api/v1/execution/api/execute_test_id_async"))
            .json(req);
        self.send(request)
            .await
            .map_err(|e| in_context(e, format_args!("test {}", req.test_id)))
    }

    async fn execute_workflow(&self, req: &ExecuteWorkflowRequest) -> Result<SubmitResponse> {
        let request = self
            .client
            .post(self.url("/api/v1/execution/api/execute_workflow_id_async"))
            .json(req);
        self.send(request)
            .await
            .map_err(|e| in_context(e, format_args!("workflow {}", req.workflow_id)))
    }

    async fn cancel_task(&self, kind: RunKind, task_id: &str) -> Result<CancelResponse> {
        let path = match kind {
            RunKind::Test => format!("/api/v1/execution/device/status/cancel/{}", task_id),
            RunKind::Workflow => format!("/api/v1/workflows/cancel/{}", task_id),
        };
        self.send(self.client.post(self.url(&path)))
            .await
            .map_err(|e| in_context(e, format_args!("{} task {}", kind, task_id)))
    }

    async fn open_status_stream(&self) -> Result<EventStream> {
        let response = self
            .stream_client
            .get(self.url("/api/v1/monitor/stream/unified"))
            .bearer_auth(self.credential.bearer())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(decode_event_stream(response.bytes_stream()))
    }

    async fn test_status(&self, task_id: &str) -> Result<TestStatusResponse> {
        let request = self
            .client
            .get(self.url("/api/v1/tests/get_test_execution_task"))
            .query(&[("task_id", task_id)]);
        self.send(request)
            .await
            .map_err(|e| in_context(e, format_args!("test task {}", task_id)))
    }

    async fn workflow_status(&self, task_id: &str) -> Result<WorkflowStatusResponse> {
        let path = format!("/api/v1/workflows/status/{}", task_id);
        self.send(self.client.get(self.url(&path)))
            .await
            .map_err(|e| in_context(e, format_args!("workflow task {}", task_id)))
    }

    async fn get_test(&self, test_id: &str) -> Result<RemoteTest> {
        let path = format!("/api/v1/tests/get_test_by_id/{}", test_id);
        self.send(self.client.get(self.url(&path)))
            .await
            .map_err(|e| in_context(e, format_args!("test {}", test_id)))
    }

    async fn get_workflow(&self, workflow_id: &str) -> Result<RemoteWorkflow> {
        let request = self
            .client
            .get(self.url("/api/v1/workflows/get_workflow_info"))
            .query(&[("workflow_id", workflow_id)]);
        self.send(request)
            .await
            .map_err(|e| in_context(e, format_args!("workflow {}", workflow_id)))
    }

    async fn list_org_tests(&self, limit: u32, offset: u32, tag: Option<&str>) -> Result<TestPage> {
        let mut request = self
            .client
            .get(self.url("/api/v1/tests/get_simple_tests"))
            .query(&[("limit", limit), ("offset", offset)]);
        if let Some(tag) = tag {
            request = request.query(&[("tag", tag)]);
        }
        self.send(request).await
    }

    async fn create_test(&self, req: &CreateTestRequest) -> Result<WriteResponse> {
        let request = self.client.post(self.url("/api/v1/tests/create")).json(req);
        self.send(request).await
    }

    async fn update_test(&self, test_id: &str, req: &UpdateTestRequest) -> Result<WriteResponse> {
        let path = format!("/api/v1/tests/update/{}", test_id);
        self.send(self.client.put(self.url(&path)).json(req))
            .await
            .map_err(|e| in_context(e, format_args!("test {}", test_id)))
    }
}
