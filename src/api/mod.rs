//! Remote service contract
//!
//! [`RemoteApi`] is everything the execution and sync engines need from the
//! service: run submission, status streaming and polling, cancellation, and
//! test definition storage. [`HttpApi`] is the production implementation.

mod http;
pub mod sse;
pub mod types;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::common::Result;
use crate::execution::status::RunKind;

pub use http::HttpApi;
pub use types::*;

/// Live sequence of decoded status stream events
pub type EventStream = BoxStream<'static, Result<StreamEvent>>;

#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Queue a test run and return the assigned task
    async fn execute_test(&self, req: &ExecuteTestRequest) -> Result<SubmitResponse>;

    /// Queue a workflow run and return the assigned task
    async fn execute_workflow(&self, req: &ExecuteWorkflowRequest) -> Result<SubmitResponse>;

    /// Ask the service to stop a running task
    async fn cancel_task(&self, kind: RunKind, task_id: &str) -> Result<CancelResponse>;

    /// Open the organization-wide status event stream
    async fn open_status_stream(&self) -> Result<EventStream>;

    async fn test_status(&self, task_id: &str) -> Result<TestStatusResponse>;

    async fn workflow_status(&self, task_id: &str) -> Result<WorkflowStatusResponse>;

    async fn get_test(&self, test_id: &str) -> Result<RemoteTest>;

    async fn get_workflow(&self, workflow_id: &str) -> Result<RemoteWorkflow>;

    /// One page of the organization's tests, optionally filtered by tag
    async fn list_org_tests(&self, limit: u32, offset: u32, tag: Option<&str>) -> Result<TestPage>;

    async fn create_test(&self, req: &CreateTestRequest) -> Result<WriteResponse>;

    /// Overwrite a test's blocks; 409 when `expected_version` is stale
    async fn update_test(&self, test_id: &str, req: &UpdateTestRequest) -> Result<WriteResponse>;
}
