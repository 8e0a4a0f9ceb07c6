//! Request and response bodies exchanged with the remote service

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Treat an explicit `null` as the type's default
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// === Execution ===

/// Initial GPS position for the device under test
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub execution_mode: ExecutionMode,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_location: Option<GeoPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteTestRequest {
    pub test_id: String,
    pub retries: u32,
    pub timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_version_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_config: Option<RunConfig>,
}

/// App identifier pinned for one platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformApp {
    pub app_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowAppConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ios_build: Option<PlatformApp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub android_build: Option<PlatformApp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteWorkflowRequest {
    pub workflow_id: String,
    pub retries: u32,
    pub timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_config: Option<WorkflowAppConfig>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub override_build_config: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_config: Option<GeoPoint>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub override_location: bool,
}

/// Answer to a submission; older endpoints only fill `id`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl SubmitResponse {
    /// The assigned task ID, preferring `task_id` over `id`
    pub fn task_id(&self) -> Option<&str> {
        [self.task_id.as_deref(), self.id.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

// === Status ===

/// Body of the test execution status endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestStatusResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub test_name: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub total_steps: Option<u32>,
    #[serde(default)]
    pub steps_completed: Option<u32>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub execution_time_seconds: Option<f64>,
}

/// Body of the workflow status endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowStatusResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub workflow_name: Option<String>,
    #[serde(default)]
    pub total_tests: u32,
    #[serde(default)]
    pub completed_tests: u32,
    #[serde(default)]
    pub passed_tests: u32,
    #[serde(default)]
    pub failed_tests: u32,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// One test entry on the unified status stream
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestStreamItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub test_id: Option<String>,
    #[serde(default)]
    pub test_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub total_steps: Option<u32>,
    #[serde(default)]
    pub steps_completed: Option<u32>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
}

impl TestStreamItem {
    pub fn is_task(&self, task_id: &str) -> bool {
        self.id == task_id || self.task_id == task_id
    }
}

/// One workflow entry on the unified status stream
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowStreamItem {
    #[serde(default)]
    pub task: WorkflowTask,
    #[serde(default)]
    pub workflow_name: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowTask {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub total_tests: u32,
    #[serde(default)]
    pub completed_tests: u32,
    #[serde(default)]
    pub passed_tests: u32,
    #[serde(default)]
    pub failed_tests: u32,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// A decoded event from the unified status stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub event: String,
    pub data: Value,
}

impl StreamEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

// === Definitions ===

/// A test definition as stored by the remote service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteTest {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tasks: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_var_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteWorkflow {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tests: Vec<Value>,
}

/// Entry of the organization test listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub platform: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestPage {
    #[serde(default)]
    pub tests: Vec<TestSummary>,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTestRequest {
    pub name: String,
    pub platform: String,
    pub tasks: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateTestRequest {
    pub tasks: Vec<Value>,
    /// Version the caller last saw; omitted to force the write
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
}

/// Answer to a create or update of a test definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteResponse {
    pub id: String,
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_submit_response_prefers_task_id() {
        let resp: SubmitResponse =
            serde_json::from_value(json!({"id": "row-1", "task_id": "task-001"})).unwrap();
        assert_eq!(resp.task_id(), Some("task-001"));

        let resp: SubmitResponse =
            serde_json::from_value(json!({"id": "task-002", "task_id": ""})).unwrap();
        assert_eq!(resp.task_id(), Some("task-002"));

        let resp: SubmitResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(resp.task_id(), None);
    }

    #[test]
    fn test_workflow_request_omits_unset_overrides() {
        let req = ExecuteWorkflowRequest {
            workflow_id: "wf".into(),
            retries: 1,
            timeout: 60,
            build_config: None,
            override_build_config: false,
            location_config: None,
            override_location: false,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value, json!({"workflow_id": "wf", "retries": 1, "timeout": 60}));
    }

    #[test]
    fn test_remote_test_tolerates_nulls() {
        let test: RemoteTest = serde_json::from_value(json!({
            "id": "abc",
            "name": "Login",
            "platform": null,
            "tasks": null,
            "version": 4
        }))
        .unwrap();
        assert!(test.tasks.is_empty());
        assert_eq!(test.platform, "");
        assert_eq!(test.version, 4);
    }
}
