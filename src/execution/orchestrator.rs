//! Submit-monitor-resolve driver for test and workflow runs
//!
//! A run moves `Submitted -> Monitoring -> {Completed | Failed | Cancelled | TimedOut}`.
//! Errors returned from [`Orchestrator::run_test`] and
//! [`Orchestrator::run_workflow`] mean the run could not be started; a run
//! that started and did not pass is a regular result with `success: false`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::api::{
    ExecuteTestRequest, ExecuteWorkflowRequest, ExecutionMode, PlatformApp, RemoteApi, RunConfig,
    SubmitResponse, WorkflowAppConfig,
};
use crate::common::{Error, Result};

use super::cancel::{CancelToken, CancellationCoordinator, RemoteCancelOutcome};
use super::location::Location;
use super::monitor::{MonitorOutcome, MonitorSettings, StatusMonitor};
use super::status::{RunKind, StatusEvent, TaskStatus, TestStatus, WorkflowStatus};

pub const MIN_RETRIES: u32 = 1;
pub const MAX_RETRIES: u32 = 5;
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;
/// One week
pub const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 3600;

/// Receives run milestones as they happen
///
/// Both hooks run on the monitor's own task; the monitor waits for them to
/// return before reading the next update.
pub trait RunObserver<T>: Send {
    /// The service assigned a task ID and monitoring is about to start
    fn on_task_started(&mut self, _task_id: &str) {}

    /// A new status update was accepted
    fn on_progress(&mut self, _status: &T) {}
}

/// Observer that ignores everything
pub struct NoopObserver;

impl<T> RunObserver<T> for NoopObserver {}

/// Parameters for one test run
#[derive(Debug, Clone, PartialEq)]
pub struct RunTestParams {
    pub test_id: String,
    pub retries: u32,
    pub build_version_id: Option<String>,
    pub timeout_secs: u64,
    pub location: Option<Location>,
    /// Deep link that replaces the normal app launch
    pub launch_url: Option<String>,
    /// Return right after submission without monitoring
    pub no_wait: bool,
}

impl RunTestParams {
    pub fn new(test_id: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            retries: MIN_RETRIES,
            build_version_id: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            location: None,
            launch_url: None,
            no_wait: false,
        }
    }
}

/// Parameters for one workflow run
#[derive(Debug, Clone, PartialEq)]
pub struct RunWorkflowParams {
    pub workflow_id: String,
    pub retries: u32,
    pub timeout_secs: u64,
    pub location: Option<Location>,
    pub ios_app_id: Option<String>,
    pub android_app_id: Option<String>,
    pub no_wait: bool,
}

impl RunWorkflowParams {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            retries: MIN_RETRIES,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            location: None,
            ios_app_id: None,
            android_app_id: None,
            no_wait: false,
        }
    }
}

/// Final outcome of a test run
#[derive(Debug, Clone, Serialize)]
pub struct RunTestResult {
    pub success: bool,
    pub task_id: String,
    pub test_id: String,
    pub test_name: String,
    pub status: TaskStatus,
    pub report_link: String,
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_request: Option<RemoteCancelOutcome>,
}

/// Final outcome of a workflow run
#[derive(Debug, Clone, Serialize)]
pub struct RunWorkflowResult {
    pub success: bool,
    pub task_id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: TaskStatus,
    pub report_link: String,
    pub duration: Option<String>,
    pub total_tests: u32,
    pub completed_tests: u32,
    pub passed_tests: u32,
    pub failed_tests: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_request: Option<RemoteCancelOutcome>,
}

/// Reject retry counts outside `[1, 5]`
pub fn validate_retries(retries: u32) -> Result<()> {
    if (MIN_RETRIES..=MAX_RETRIES).contains(&retries) {
        Ok(())
    } else {
        Err(Error::InvalidRetries {
            got: retries,
            min: MIN_RETRIES,
            max: MAX_RETRIES,
        })
    }
}

fn validate_common(retries: u32, timeout_secs: u64, location: Option<&Location>) -> Result<()> {
    validate_retries(retries)?;
    if !(1..=MAX_TIMEOUT_SECS).contains(&timeout_secs) {
        return Err(Error::InvalidTimeout {
            got: timeout_secs,
            max: MAX_TIMEOUT_SECS,
        });
    }
    if let Some(loc) = location {
        Location::new(loc.latitude, loc.longitude)?;
    }
    Ok(())
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty()).cloned()
}

fn assigned_task_id(kind: RunKind, resp: &SubmitResponse) -> Result<String> {
    resp.task_id().map(str::to_string).ok_or_else(|| {
        Error::Protocol(format!(
            "{} submission was accepted but no task ID was returned",
            kind
        ))
    })
}

/// How monitoring ended, reduced to what the result needs
struct Resolution<T> {
    status: TaskStatus,
    last: Option<T>,
    error: Option<String>,
    cancelled_by_user: bool,
}

fn resolve<T: StatusEvent>(outcome: MonitorOutcome<T>, timeout_secs: u64) -> Resolution<T> {
    match outcome {
        MonitorOutcome::Terminal(last) => Resolution {
            status: last.status(),
            last: Some(last),
            error: None,
            cancelled_by_user: false,
        },
        MonitorOutcome::TimedOut { last } => Resolution {
            status: TaskStatus::Timeout,
            last,
            error: Some(format!("run did not finish within {}s", timeout_secs)),
            cancelled_by_user: false,
        },
        MonitorOutcome::Cancelled { last } => Resolution {
            status: TaskStatus::Cancelled,
            last,
            error: Some("run cancelled by user".to_string()),
            cancelled_by_user: true,
        },
        MonitorOutcome::Failed { last, error } => Resolution {
            status: TaskStatus::Unknown,
            last,
            error: Some(format!("lost track of the run: {}", error)),
            cancelled_by_user: false,
        },
    }
}

/// Drives test and workflow runs against a [`RemoteApi`]
pub struct Orchestrator {
    api: Arc<dyn RemoteApi>,
    app_url: String,
    monitor: MonitorSettings,
    coordinator: CancellationCoordinator,
}

impl Orchestrator {
    pub fn new(api: Arc<dyn RemoteApi>, app_url: impl Into<String>) -> Self {
        let coordinator = CancellationCoordinator::new(api.clone(), Duration::from_secs(10));
        Self {
            api,
            app_url: app_url.into(),
            monitor: MonitorSettings::default(),
            coordinator,
        }
    }

    pub fn with_monitor_settings(mut self, settings: MonitorSettings) -> Self {
        self.monitor = settings;
        self
    }

    pub fn with_cancel_timeout(mut self, timeout: Duration) -> Self {
        self.coordinator = CancellationCoordinator::new(self.api.clone(), timeout);
        self
    }

    /// Submit a test and follow it to completion
    pub async fn run_test(
        &self,
        params: &RunTestParams,
        cancel: &CancelToken,
        observer: &mut dyn RunObserver<TestStatus>,
    ) -> Result<RunTestResult> {
        validate_common(params.retries, params.timeout_secs, params.location.as_ref())?;

        let request = ExecuteTestRequest {
            test_id: params.test_id.clone(),
            retries: params.retries,
            timeout: params.timeout_secs,
            build_version_id: non_empty(params.build_version_id.as_ref()),
            launch_url: non_empty(params.launch_url.as_ref()),
            run_config: params.location.map(|loc| RunConfig {
                execution_mode: ExecutionMode {
                    initial_location: Some(loc.into()),
                },
            }),
        };

        let resp = self.api.execute_test(&request).await?;
        let task_id = assigned_task_id(RunKind::Test, &resp)?;
        let report_link = RunKind::Test.report_url(&self.app_url, &task_id);
        tracing::info!("Test {} submitted as task {}", params.test_id, task_id);

        if params.no_wait {
            return Ok(RunTestResult {
                success: false,
                task_id,
                test_id: params.test_id.clone(),
                test_name: String::new(),
                status: TaskStatus::Queued,
                report_link,
                duration: None,
                error: None,
                cancel_request: None,
            });
        }

        observer.on_task_started(&task_id);
        let outcome = self
            .monitor_task(&task_id, params.timeout_secs, cancel, &mut |s: &TestStatus| {
                observer.on_progress(s)
            })
            .await;
        let resolution = resolve(outcome, params.timeout_secs);
        let cancel_request = self.cancel_if_requested(RunKind::Test, &task_id, &resolution).await;

        let last = resolution.last;
        let passed = last.as_ref().is_some_and(|s| s.passed()) && resolution.status == TaskStatus::Completed;
        let status = match resolution.status {
            // Completed with an explicit failure verdict or an error message
            TaskStatus::Completed if !passed => TaskStatus::Failed,
            other => other,
        };
        let test_name = match last.as_ref().and_then(|s| s.test_name.clone()) {
            Some(name) => name,
            None => self.test_name(&params.test_id).await,
        };

        tracing::info!("Test task {} finished: {}", task_id, status);
        Ok(RunTestResult {
            success: passed,
            task_id,
            test_id: params.test_id.clone(),
            test_name,
            status,
            report_link,
            duration: last.as_ref().and_then(|s| s.duration.clone()),
            error: resolution
                .error
                .or_else(|| last.as_ref().and_then(|s| s.error_message.clone())),
            cancel_request,
        })
    }

    /// Submit a workflow and follow it to completion
    pub async fn run_workflow(
        &self,
        params: &RunWorkflowParams,
        cancel: &CancelToken,
        observer: &mut dyn RunObserver<WorkflowStatus>,
    ) -> Result<RunWorkflowResult> {
        validate_common(params.retries, params.timeout_secs, params.location.as_ref())?;

        let ios = non_empty(params.ios_app_id.as_ref());
        let android = non_empty(params.android_app_id.as_ref());
        let build_config = (ios.is_some() || android.is_some()).then(|| WorkflowAppConfig {
            ios_build: ios.map(|app_id| PlatformApp { app_id }),
            android_build: android.map(|app_id| PlatformApp { app_id }),
        });
        let request = ExecuteWorkflowRequest {
            workflow_id: params.workflow_id.clone(),
            retries: params.retries,
            timeout: params.timeout_secs,
            override_build_config: build_config.is_some(),
            build_config,
            location_config: params.location.map(Into::into),
            override_location: params.location.is_some(),
        };

        let resp = self.api.execute_workflow(&request).await?;
        let task_id = assigned_task_id(RunKind::Workflow, &resp)?;
        let report_link = RunKind::Workflow.report_url(&self.app_url, &task_id);
        tracing::info!("Workflow {} submitted as task {}", params.workflow_id, task_id);

        if params.no_wait {
            return Ok(RunWorkflowResult {
                success: false,
                task_id,
                workflow_id: params.workflow_id.clone(),
                workflow_name: String::new(),
                status: TaskStatus::Queued,
                report_link,
                duration: None,
                total_tests: 0,
                completed_tests: 0,
                passed_tests: 0,
                failed_tests: 0,
                error: None,
                cancel_request: None,
            });
        }

        observer.on_task_started(&task_id);
        let outcome = self
            .monitor_task(&task_id, params.timeout_secs, cancel, &mut |s: &WorkflowStatus| {
                observer.on_progress(s)
            })
            .await;
        let resolution = resolve(outcome, params.timeout_secs);
        let cancel_request = self
            .cancel_if_requested(RunKind::Workflow, &task_id, &resolution)
            .await;

        let last = resolution
            .last
            .unwrap_or_else(|| WorkflowStatus::new(task_id.clone(), TaskStatus::Unknown));
        let passed = resolution.status == TaskStatus::Completed && last.passed();
        let status = match resolution.status {
            // Every child ran, but not all of them passed
            TaskStatus::Completed if !passed => TaskStatus::Failed,
            other => other,
        };
        let workflow_name = match last.workflow_name.clone() {
            Some(name) => name,
            None => self.workflow_name(&params.workflow_id).await,
        };
        let error = resolution.error.or_else(|| last.error_message.clone()).or_else(|| {
            (status == TaskStatus::Failed && last.failed_tests > 0).then(|| {
                format!("{} of {} tests failed", last.failed_tests, last.total_tests)
            })
        });

        tracing::info!("Workflow task {} finished: {}", task_id, status);
        Ok(RunWorkflowResult {
            success: passed,
            task_id,
            workflow_id: params.workflow_id.clone(),
            workflow_name,
            status,
            report_link,
            duration: last.duration.clone(),
            total_tests: last.total_tests,
            completed_tests: last.completed_tests,
            passed_tests: last.passed_tests,
            failed_tests: last.failed_tests,
            error,
            cancel_request,
        })
    }

    async fn monitor_task<T: StatusEvent>(
        &self,
        task_id: &str,
        timeout_secs: u64,
        cancel: &CancelToken,
        on_event: &mut (dyn FnMut(&T) + Send),
    ) -> MonitorOutcome<T> {
        let now = Instant::now();
        let deadline = now
            .checked_add(Duration::from_secs(timeout_secs))
            .unwrap_or_else(|| now + Duration::from_secs(MAX_TIMEOUT_SECS));
        StatusMonitor::new(self.api.clone(), self.monitor.clone())
            .watch(task_id, deadline, cancel, on_event)
            .await
    }

    async fn cancel_if_requested<T>(
        &self,
        kind: RunKind,
        task_id: &str,
        resolution: &Resolution<T>,
    ) -> Option<RemoteCancelOutcome> {
        if resolution.cancelled_by_user {
            Some(self.coordinator.cancel_remote(kind, task_id).await)
        } else {
            None
        }
    }

    /// Display name for a test when no status update carried one
    async fn test_name(&self, test_id: &str) -> String {
        match self.api.get_test(test_id).await {
            Ok(test) => test.name,
            Err(e) => {
                tracing::debug!("Could not fetch name of test {}: {}", test_id, e);
                String::new()
            }
        }
    }

    async fn workflow_name(&self, workflow_id: &str) -> String {
        match self.api.get_workflow(workflow_id).await {
            Ok(workflow) => workflow.name,
            Err(e) => {
                tracing::debug!("Could not fetch name of workflow {}: {}", workflow_id, e);
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_bounds() {
        assert!(validate_retries(0).is_err());
        assert!(validate_retries(1).is_ok());
        assert!(validate_retries(5).is_ok());
        let err = validate_retries(6).unwrap_err();
        assert_eq!(err.to_string(), "retries must be between 1 and 5 (got 6)");
    }

    #[test]
    fn test_timeout_bounds() {
        assert!(matches!(
            validate_common(1, 0, None),
            Err(Error::InvalidTimeout { got: 0, .. })
        ));
        assert!(validate_common(1, MAX_TIMEOUT_SECS, None).is_ok());
        let err = validate_common(1, u64::MAX, None).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(
            err.to_string(),
            format!("timeout must be between 1 and 604800 seconds (got {})", u64::MAX)
        );
    }

    #[test]
    fn test_unvalidated_location_rejected() {
        let loc = Location {
            latitude: 95.0,
            longitude: 0.0,
        };
        assert!(matches!(
            validate_common(1, 60, Some(&loc)),
            Err(Error::InvalidLocation(_))
        ));
    }

    #[test]
    fn test_resolve_outcomes() {
        let timed_out = resolve::<TestStatus>(MonitorOutcome::TimedOut { last: None }, 30);
        assert_eq!(timed_out.status, TaskStatus::Timeout);
        assert!(!timed_out.cancelled_by_user);

        let cancelled = resolve::<TestStatus>(MonitorOutcome::Cancelled { last: None }, 30);
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert!(cancelled.cancelled_by_user);

        let failed = resolve::<TestStatus>(
            MonitorOutcome::Failed {
                last: None,
                error: Error::Protocol("gone".into()),
            },
            30,
        );
        assert_eq!(failed.status, TaskStatus::Unknown);
        assert!(failed.error.unwrap().contains("gone"));
    }

    #[test]
    fn test_params_defaults() {
        let params = RunTestParams::new("abc");
        assert_eq!(params.retries, 1);
        assert_eq!(params.timeout_secs, 3600);
        assert!(!params.no_wait);
    }
}
