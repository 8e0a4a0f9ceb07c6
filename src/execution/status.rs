//! Execution status vocabulary and typed status events
//!
//! The remote service reports status as free-form strings on two channels
//! (the unified event stream and the polling endpoints). Everything here
//! normalizes those into [`TaskStatus`] plus one of the two event types,
//! [`TestStatus`] and [`WorkflowStatus`].

use std::fmt;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::api::{RemoteApi, StreamEvent, TestStreamItem, WorkflowStreamItem};
use crate::common::{format_duration_secs, Result};

/// What kind of entity a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunKind {
    Test,
    Workflow,
}

impl RunKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RunKind::Test => "test",
            RunKind::Workflow => "workflow",
        }
    }

    /// Report link for a task, built client-side from the app base URL
    pub fn report_url(self, app_url: &str, task_id: &str) -> String {
        format!(
            "{}/{}s/report?taskId={}",
            app_url.trim_end_matches('/'),
            self.as_str(),
            task_id
        )
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a remote task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Queued,
    Setup,
    Starting,
    Running,
    Verifying,
    Stopping,
    Completed,
    Failed,
    Cancelled,
    Timeout,
    /// Status text the client does not recognize, or none at all
    Unknown,
}

impl TaskStatus {
    /// Parse a status string; `success`/`failure` are legacy spellings
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => TaskStatus::Queued,
            "setup" => TaskStatus::Setup,
            "starting" => TaskStatus::Starting,
            "running" => TaskStatus::Running,
            "verifying" => TaskStatus::Verifying,
            "stopping" => TaskStatus::Stopping,
            "completed" | "success" => TaskStatus::Completed,
            "failed" | "failure" => TaskStatus::Failed,
            "cancelled" => TaskStatus::Cancelled,
            "timeout" => TaskStatus::Timeout,
            _ => TaskStatus::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Setup => "setup",
            TaskStatus::Starting => "starting",
            TaskStatus::Running => "running",
            TaskStatus::Verifying => "verifying",
            TaskStatus::Stopping => "stopping",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Timeout => "timeout",
            TaskStatus::Unknown => "unknown",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Timeout
        )
    }

    /// Position in the forward-only lifecycle; terminal states share the top rank
    pub fn rank(self) -> u8 {
        match self {
            TaskStatus::Unknown => 0,
            TaskStatus::Queued => 1,
            TaskStatus::Setup | TaskStatus::Starting => 2,
            TaskStatus::Running => 3,
            TaskStatus::Verifying => 4,
            TaskStatus::Stopping => 5,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Timeout => 6,
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            TaskStatus::Queued | TaskStatus::Setup => "⏳",
            TaskStatus::Starting | TaskStatus::Running | TaskStatus::Verifying | TaskStatus::Stopping => "▶",
            TaskStatus::Completed => "✓",
            TaskStatus::Failed => "✗",
            TaskStatus::Cancelled => "⊘",
            TaskStatus::Timeout => "⏱",
            TaskStatus::Unknown => "●",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TaskStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(TaskStatus::parse(&s))
    }
}

/// Whether a test run passed
///
/// Only `completed` can pass. An explicit `success` flag from the service is
/// authoritative; without one, an error message marks the run as failed.
pub fn test_passed(status: TaskStatus, success: Option<bool>, error_message: Option<&str>) -> bool {
    if status != TaskStatus::Completed {
        return false;
    }
    match success {
        Some(flag) => flag,
        None => error_message.map_or(true, |m| m.trim().is_empty()),
    }
}

/// Whether a workflow run passed: completed with no failed child tests
pub fn workflow_passed(status: TaskStatus, failed_tests: u32) -> bool {
    status == TaskStatus::Completed && failed_tests == 0
}

/// Normalize a progress value to a percentage
///
/// The service sends either a 0..1 fraction or a 0..100 percentage.
fn percent(progress: Option<f64>) -> u8 {
    let p = progress.unwrap_or(0.0);
    let p = if p > 0.0 && p <= 1.0 { p * 100.0 } else { p };
    p.round().clamp(0.0, 100.0) as u8
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

fn field<T: DeserializeOwned>(data: &Value, key: &str) -> Option<T> {
    serde_json::from_value(data.get(key)?.clone()).ok()
}

/// Terminal status forced by a completion event name, e.g. `test_failed_with_data`
fn forced_terminal(event: &str, prefix: &str) -> Option<TaskStatus> {
    let verb = event.strip_prefix(prefix)?;
    let verb = verb.strip_suffix("_with_data").unwrap_or(verb);
    match verb {
        "completed" => Some(TaskStatus::Completed),
        "failed" => Some(TaskStatus::Failed),
        "cancelled" => Some(TaskStatus::Cancelled),
        _ => None,
    }
}

/// One observed update for a task, as consumed by the status monitor
pub trait StatusEvent: Clone + fmt::Debug + Send + Sync + 'static {
    const KIND: RunKind;

    fn status(&self) -> TaskStatus;

    /// Overwrite the status, e.g. when the client decides the outcome
    fn set_status(&mut self, status: TaskStatus);

    fn progress(&self) -> u8;

    /// Completed steps for a test, completed child tests for a workflow
    fn completed(&self) -> u32;

    /// Raise every counter to at least the value in `floor`
    fn raise_to(&mut self, floor: &Self);

    /// This task's update carried by a stream event, if any
    fn from_stream(event: &StreamEvent, task_id: &str) -> Option<Self>;

    /// Fetch the task's current status from the polling endpoint
    fn poll<'a>(api: &'a dyn RemoteApi, task_id: &'a str) -> BoxFuture<'a, Result<Self>>;

    fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

/// Status update for a single test run
#[derive(Debug, Clone, PartialEq)]
pub struct TestStatus {
    pub task_id: String,
    pub test_name: Option<String>,
    pub status: TaskStatus,
    /// Percentage, 0..=100
    pub progress: u8,
    pub current_step: Option<String>,
    pub completed_steps: u32,
    pub total_steps: u32,
    pub duration: Option<String>,
    pub error_message: Option<String>,
    /// Explicit pass/fail verdict, when the service sends one
    pub success: Option<bool>,
    pub observed_at: DateTime<Utc>,
}

impl TestStatus {
    pub fn new(task_id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            test_name: None,
            status,
            progress: 0,
            current_step: None,
            completed_steps: 0,
            total_steps: 0,
            duration: None,
            error_message: None,
            success: None,
            observed_at: Utc::now(),
        }
    }

    pub fn passed(&self) -> bool {
        test_passed(self.status, self.success, self.error_message.as_deref())
    }

    fn from_item(item: TestStreamItem, task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            test_name: non_empty(item.test_name),
            status: item.status.as_deref().map_or(TaskStatus::Unknown, TaskStatus::parse),
            progress: percent(item.progress),
            current_step: non_empty(item.current_step),
            completed_steps: item.steps_completed.unwrap_or(0),
            total_steps: item.total_steps.unwrap_or(0),
            duration: None,
            error_message: non_empty(item.error_message),
            success: item.success,
            observed_at: Utc::now(),
        }
    }
}

impl StatusEvent for TestStatus {
    const KIND: RunKind = RunKind::Test;

    fn status(&self) -> TaskStatus {
        self.status
    }

    fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
    }

    fn progress(&self) -> u8 {
        self.progress
    }

    fn completed(&self) -> u32 {
        self.completed_steps
    }

    fn raise_to(&mut self, floor: &Self) {
        self.progress = self.progress.max(floor.progress);
        self.completed_steps = self.completed_steps.max(floor.completed_steps);
        self.total_steps = self.total_steps.max(floor.total_steps);
        if self.test_name.is_none() {
            self.test_name = floor.test_name.clone();
        }
    }

    fn from_stream(event: &StreamEvent, task_id: &str) -> Option<Self> {
        let (item, forced) = match event.event.as_str() {
            "initial_state" => {
                let running: Vec<TestStreamItem> = field(&event.data, "running_tests")?;
                (running.into_iter().find(|t| t.is_task(task_id))?, None)
            }
            "test_started" | "test_updated" => (field::<TestStreamItem>(&event.data, "test")?, None),
            name => {
                let forced = forced_terminal(name, "test_")?;
                (field::<TestStreamItem>(&event.data, "test")?, Some(forced))
            }
        };
        if !item.is_task(task_id) {
            return None;
        }

        let mut status = TestStatus::from_item(item, task_id);
        if let Some(forced) = forced {
            status.status = forced;
        }
        Some(status)
    }

    fn poll<'a>(api: &'a dyn RemoteApi, task_id: &'a str) -> BoxFuture<'a, Result<Self>> {
        Box::pin(async move {
            let resp = api.test_status(task_id).await?;

            let status = match resp.status.as_deref().filter(|s| !s.trim().is_empty()) {
                Some(s) => TaskStatus::parse(s),
                None => match resp.success {
                    Some(true) => TaskStatus::Completed,
                    Some(false) => TaskStatus::Failed,
                    None => TaskStatus::Unknown,
                },
            };

            Ok(Self {
                task_id: task_id.to_string(),
                test_name: non_empty(resp.test_name),
                status,
                progress: percent(resp.progress),
                current_step: non_empty(resp.current_step),
                completed_steps: resp.steps_completed.unwrap_or(0),
                total_steps: resp.total_steps.unwrap_or(0),
                duration: resp
                    .execution_time_seconds
                    .filter(|secs| *secs > 0.0)
                    .map(format_duration_secs),
                error_message: non_empty(resp.error_message),
                success: resp.success,
                observed_at: Utc::now(),
            })
        })
    }
}

/// Status update for a workflow run
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStatus {
    pub task_id: String,
    pub workflow_name: Option<String>,
    pub status: TaskStatus,
    /// Percentage, 0..=100
    pub progress: u8,
    pub total_tests: u32,
    pub completed_tests: u32,
    pub passed_tests: u32,
    pub failed_tests: u32,
    pub duration: Option<String>,
    pub error_message: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl WorkflowStatus {
    pub fn new(task_id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            workflow_name: None,
            status,
            progress: 0,
            total_tests: 0,
            completed_tests: 0,
            passed_tests: 0,
            failed_tests: 0,
            duration: None,
            error_message: None,
            observed_at: Utc::now(),
        }
    }

    pub fn passed(&self) -> bool {
        workflow_passed(self.status, self.failed_tests)
    }

    /// Restore `passed + failed <= completed <= total`
    pub fn normalized(mut self) -> Self {
        self.completed_tests = self
            .completed_tests
            .max(self.passed_tests.saturating_add(self.failed_tests));
        self.total_tests = self.total_tests.max(self.completed_tests);
        if self.progress == 0 && self.total_tests > 0 {
            self.progress = ((self.completed_tests as f64 / self.total_tests as f64) * 100.0).round() as u8;
        }
        self
    }

    fn from_item(item: WorkflowStreamItem, task_id: &str) -> Self {
        let task = item.task;
        Self {
            task_id: task_id.to_string(),
            workflow_name: non_empty(item.workflow_name),
            status: task.status.as_deref().map_or(TaskStatus::Unknown, TaskStatus::parse),
            progress: percent(item.progress),
            total_tests: task.total_tests,
            completed_tests: task.completed_tests,
            passed_tests: task.passed_tests,
            failed_tests: task.failed_tests,
            duration: non_empty(task.duration),
            error_message: non_empty(task.error_message),
            observed_at: Utc::now(),
        }
        .normalized()
    }
}

impl StatusEvent for WorkflowStatus {
    const KIND: RunKind = RunKind::Workflow;

    fn status(&self) -> TaskStatus {
        self.status
    }

    fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
    }

    fn progress(&self) -> u8 {
        self.progress
    }

    fn completed(&self) -> u32 {
        self.completed_tests
    }

    fn raise_to(&mut self, floor: &Self) {
        self.progress = self.progress.max(floor.progress);
        self.passed_tests = self.passed_tests.max(floor.passed_tests);
        self.failed_tests = self.failed_tests.max(floor.failed_tests);
        self.completed_tests = self.completed_tests.max(floor.completed_tests);
        self.total_tests = self.total_tests.max(floor.total_tests);
        if self.workflow_name.is_none() {
            self.workflow_name = floor.workflow_name.clone();
        }
        *self = self.clone().normalized();
    }

    fn from_stream(event: &StreamEvent, task_id: &str) -> Option<Self> {
        let (item, forced) = match event.event.as_str() {
            "initial_state" => {
                let running: Vec<WorkflowStreamItem> = field(&event.data, "running_workflows")?;
                (running.into_iter().find(|w| w.task.id == task_id)?, None)
            }
            "workflow_started" | "workflow_updated" => {
                (field::<WorkflowStreamItem>(&event.data, "workflow")?, None)
            }
            name => {
                let forced = forced_terminal(name, "workflow_")?;
                (field::<WorkflowStreamItem>(&event.data, "workflow")?, Some(forced))
            }
        };
        if item.task.id != task_id {
            return None;
        }

        let mut status = WorkflowStatus::from_item(item, task_id);
        if let Some(forced) = forced {
            status.status = forced;
        }
        Some(status)
    }

    fn poll<'a>(api: &'a dyn RemoteApi, task_id: &'a str) -> BoxFuture<'a, Result<Self>> {
        Box::pin(async move {
            let resp = api.workflow_status(task_id).await?;
            Ok(Self {
                task_id: task_id.to_string(),
                workflow_name: non_empty(resp.workflow_name),
                status: resp.status.as_deref().map_or(TaskStatus::Unknown, TaskStatus::parse),
                progress: 0,
                total_tests: resp.total_tests,
                completed_tests: resp.completed_tests,
                passed_tests: resp.passed_tests,
                failed_tests: resp.failed_tests,
                duration: non_empty(resp.duration),
                error_message: non_empty(resp.error_message),
                observed_at: Utc::now(),
            }
            .normalized())
        })
    }
}
