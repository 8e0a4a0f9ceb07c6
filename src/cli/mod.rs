//! CLI command handling
//!
//! Dispatches CLI commands to the execution and sync engines and formats
//! their results.

mod progress;
mod render;

use std::path::PathBuf;
use std::sync::Arc;

use crate::api::{HttpApi, RemoteApi};
use crate::commands::{CancelCommands, Commands, RunCommands, TestCommands};
use crate::common::config::{Config, Endpoints};
use crate::common::{credentials, Error, Result};
use crate::execution::orchestrator::validate_retries;
use crate::execution::{
    CancelToken, CancellationCoordinator, Location, Orchestrator, RunKind, RunTestParams,
    RunWorkflowParams, SignalListener, TaskStatus,
};
use crate::project::ProjectStore;
use crate::sync::{PullOptions, SyncResolver, SyncResult};

use progress::RunProgress;

/// Flags shared by every command
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    /// Use the development endpoints
    pub dev: bool,
    /// Print machine-readable JSON on stdout
    pub json: bool,
    /// Directory containing `.devicelab/`
    pub project_dir: PathBuf,
}

/// Everything needed to talk to the service
struct Session {
    config: Config,
    endpoints: Endpoints,
    api: Arc<dyn RemoteApi>,
}

impl Session {
    fn connect(opts: &GlobalOptions) -> Result<Self> {
        let config = Config::load()?;
        let credential = credentials::load()?;
        let endpoints = config.endpoints(opts.dev);
        tracing::debug!("Using backend {}", endpoints.backend_url);
        let api = HttpApi::new(&endpoints.backend_url, credential, config.http_timeout())?;
        Ok(Self {
            config,
            endpoints,
            api: Arc::new(api),
        })
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.api.clone(), self.endpoints.app_url.clone())
            .with_monitor_settings((&self.config.monitor).into())
            .with_cancel_timeout(self.config.cancel_timeout())
    }
}

/// Timeout precedence: explicit flag, then project default, then user config
pub fn effective_timeout(flag: Option<u64>, project_default: Option<u64>, config_default: u64) -> u64 {
    flag.or(project_default).unwrap_or(config_default)
}

fn parse_location(location: Option<&str>) -> Result<Option<Location>> {
    location.map(str::parse::<Location>).transpose()
}

/// Turn a finished run into the process outcome
fn run_outcome(kind: RunKind, success: bool, status: TaskStatus, timeout_secs: u64) -> Result<()> {
    match status {
        _ if success => Ok(()),
        // Queued without waiting
        TaskStatus::Queued => Ok(()),
        TaskStatus::Cancelled => Err(Error::Cancelled),
        TaskStatus::Timeout => Err(Error::RunTimedOut(timeout_secs)),
        other => Err(Error::RunNotPassed {
            kind: kind.to_string(),
            status: other.to_string(),
        }),
    }
}

fn sync_outcome(action: &str, results: &[SyncResult]) -> Result<()> {
    let failed = results.iter().filter(|r| r.error.is_some()).count();
    let conflicts = results.iter().filter(|r| r.conflict).count();
    if failed == 0 && conflicts == 0 {
        return Ok(());
    }
    Err(Error::Incomplete(format!(
        "{action}: {failed} failed, {conflicts} conflicted"
    )))
}

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, opts: &GlobalOptions) -> Result<()> {
    match command {
        Commands::Run(run) => run_command(run, opts).await,
        Commands::Cancel(cancel) => cancel_command(cancel, opts).await,
        Commands::Test(test) => test_command(test, opts).await,
    }
}

async fn run_command(command: RunCommands, opts: &GlobalOptions) -> Result<()> {
    let store = ProjectStore::new(&opts.project_dir);

    match command {
        RunCommands::Test {
            name,
            retries,
            build_id,
            timeout,
            location,
            launch_url,
            no_wait,
        } => {
            validate_retries(retries)?;
            let location = parse_location(location.as_deref())?;
            let project = store.load_config()?;
            let test_id = project.resolve_test(&name)?;

            let session = Session::connect(opts)?;
            let timeout_secs = effective_timeout(
                timeout,
                project.defaults.timeout,
                session.config.timeouts.run_default_secs,
            );
            let params = RunTestParams {
                retries,
                build_version_id: build_id,
                timeout_secs,
                location,
                launch_url,
                no_wait,
                ..RunTestParams::new(test_id)
            };

            let cancel = CancelToken::new();
            let _signals = SignalListener::spawn(cancel.clone());
            let mut progress = RunProgress::new(RunKind::Test, &session.endpoints.app_url, !opts.json);
            let result = session
                .orchestrator()
                .run_test(&params, &cancel, &mut progress)
                .await;
            progress.finish();
            let result = result?;

            if opts.json {
                render::print_json(&result)?;
            } else {
                render::print_test_result(&result);
            }
            run_outcome(RunKind::Test, result.success, result.status, timeout_secs)
        }

        RunCommands::Workflow {
            name,
            retries,
            timeout,
            location,
            ios_app,
            android_app,
            no_wait,
        } => {
            validate_retries(retries)?;
            let location = parse_location(location.as_deref())?;
            let project = store.load_config()?;
            let workflow_id = project.resolve_workflow(&name)?;

            let session = Session::connect(opts)?;
            let timeout_secs = effective_timeout(
                timeout,
                project.defaults.timeout,
                session.config.timeouts.run_default_secs,
            );
            let params = RunWorkflowParams {
                retries,
                timeout_secs,
                location,
                ios_app_id: ios_app,
                android_app_id: android_app,
                no_wait,
                ..RunWorkflowParams::new(workflow_id)
            };

            let cancel = CancelToken::new();
            let _signals = SignalListener::spawn(cancel.clone());
            let mut progress =
                RunProgress::new(RunKind::Workflow, &session.endpoints.app_url, !opts.json);
            let result = session
                .orchestrator()
                .run_workflow(&params, &cancel, &mut progress)
                .await;
            progress.finish();
            let result = result?;

            if opts.json {
                render::print_json(&result)?;
            } else {
                render::print_workflow_result(&result);
            }
            run_outcome(RunKind::Workflow, result.success, result.status, timeout_secs)
        }
    }
}

async fn cancel_command(command: CancelCommands, opts: &GlobalOptions) -> Result<()> {
    let (kind, task_id) = match command {
        CancelCommands::Test { task_id } => (RunKind::Test, task_id),
        CancelCommands::Workflow { task_id } => (RunKind::Workflow, task_id),
    };

    let session = Session::connect(opts)?;
    let coordinator = CancellationCoordinator::new(session.api.clone(), session.config.cancel_timeout());
    let resp = coordinator.request_cancel(kind, &task_id).await?;

    if opts.json {
        render::print_json(&resp)?;
    } else {
        render::print_cancel_response(kind, &task_id, &resp);
    }

    if resp.success {
        Ok(())
    } else {
        Err(Error::Incomplete(format!(
            "service refused to cancel {kind} task {task_id}"
        )))
    }
}

async fn test_command(command: TestCommands, opts: &GlobalOptions) -> Result<()> {
    let session = Session::connect(opts)?;
    let store = ProjectStore::new(&opts.project_dir);
    let mut resolver = SyncResolver::open(session.api.clone(), store)?;

    match command {
        TestCommands::Status => {
            let statuses = resolver.get_all_statuses().await?;
            if opts.json {
                render::print_json(&statuses)?;
            } else {
                render::print_sync_statuses(&statuses);
            }
            Ok(())
        }

        TestCommands::Push { name, force } => {
            let results = resolver.sync_to_remote(name.as_deref(), force).await?;
            if opts.json {
                render::print_json(&results)?;
            } else {
                render::print_sync_results("push", &results);
            }
            sync_outcome("push", &results)
        }

        TestCommands::Pull {
            name,
            force,
            all,
            tag,
        } => {
            let pull = PullOptions {
                name,
                force,
                all,
                tag,
            };
            let results = resolver.pull_from_remote(&pull).await?;
            if opts.json {
                render::print_json(&results)?;
            } else {
                render::print_sync_results("pull", &results);
            }
            sync_outcome("pull", &results)
        }

        TestCommands::Diff { name } => {
            let diff = resolver.get_diff(&name).await?;
            if opts.json {
                render::print_json(&serde_json::json!({
                    "name": name,
                    "changed": !diff.is_empty(),
                    "diff": diff,
                }))?;
            } else {
                render::print_diff(&name, &diff);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_precedence() {
        assert_eq!(effective_timeout(Some(60), Some(600), 3600), 60);
        assert_eq!(effective_timeout(None, Some(600), 3600), 600);
        assert_eq!(effective_timeout(None, None, 3600), 3600);
    }

    #[test]
    fn test_run_outcome_mapping() {
        assert!(run_outcome(RunKind::Test, true, TaskStatus::Completed, 60).is_ok());
        assert!(run_outcome(RunKind::Test, false, TaskStatus::Queued, 60).is_ok());
        assert!(matches!(
            run_outcome(RunKind::Test, false, TaskStatus::Cancelled, 60),
            Err(Error::Cancelled)
        ));
        assert!(matches!(
            run_outcome(RunKind::Workflow, false, TaskStatus::Timeout, 60),
            Err(Error::RunTimedOut(60))
        ));
        let err = run_outcome(RunKind::Workflow, false, TaskStatus::Failed, 60).unwrap_err();
        assert_eq!(err.to_string(), "workflow run finished with status 'failed'");
    }

    #[test]
    fn test_sync_outcome_counts() {
        let ok = SyncResult {
            name: "login".into(),
            new_version: Some(2),
            conflict: false,
            error: None,
        };
        assert!(sync_outcome("push", &[ok.clone()]).is_ok());

        let conflict = SyncResult {
            conflict: true,
            new_version: None,
            ..ok
        };
        let err = sync_outcome("push", &[conflict]).unwrap_err();
        assert_eq!(err.to_string(), "push: 0 failed, 1 conflicted");
        assert!(err.is_reported());
    }

    #[test]
    fn test_bad_location_is_validation_error() {
        assert!(parse_location(None).unwrap().is_none());
        assert!(parse_location(Some("91,0")).unwrap_err().is_validation());
    }
}
