//! Human-readable and JSON output

use chrono::Utc;
use colored::Colorize;
use serde::Serialize;

use crate::api::CancelResponse;
use crate::common::Result;
use crate::execution::{RemoteCancelOutcome, RunKind, RunTestResult, RunWorkflowResult, TaskStatus};
use crate::sync::{time_ago, SyncResult, SyncStatus, TestSyncStatus};

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn verdict(status: TaskStatus, success: bool) -> String {
    let label = format!("{} {}", status.icon(), status);
    if success {
        label.green().bold().to_string()
    } else if status == TaskStatus::Queued {
        label.cyan().to_string()
    } else if status == TaskStatus::Cancelled || status == TaskStatus::Timeout {
        label.yellow().bold().to_string()
    } else {
        label.red().bold().to_string()
    }
}

fn print_cancel_request(outcome: Option<&RemoteCancelOutcome>) {
    match outcome {
        Some(RemoteCancelOutcome::Acknowledged { .. }) => {
            println!("  {}", "Remote task cancelled".dimmed());
        }
        Some(RemoteCancelOutcome::Rejected { message }) => {
            println!("  {} remote cancel refused: {}", "!".yellow(), message);
        }
        Some(RemoteCancelOutcome::Failed { error, .. }) => {
            println!("  {} remote cancel failed: {}", "!".yellow(), error);
            println!("  The task may still be running on the service");
        }
        None => {}
    }
}

pub fn print_test_result(result: &RunTestResult) {
    let name = if result.test_name.is_empty() {
        result.test_id.as_str()
    } else {
        result.test_name.as_str()
    };

    println!();
    println!("{} {}", "Test:".blue().bold(), name.bold());
    println!("  Status:   {}", verdict(result.status, result.success));
    println!("  Task ID:  {}", result.task_id);
    if let Some(duration) = &result.duration {
        println!("  Duration: {}", duration);
    }
    if let Some(error) = &result.error {
        println!("  Error:    {}", error.red());
    }
    println!("  Report:   {}", result.report_link.underline());
    print_cancel_request(result.cancel_request.as_ref());
}

pub fn print_workflow_result(result: &RunWorkflowResult) {
    let name = if result.workflow_name.is_empty() {
        result.workflow_id.as_str()
    } else {
        result.workflow_name.as_str()
    };

    println!();
    println!("{} {}", "Workflow:".blue().bold(), name.bold());
    println!("  Status:   {}", verdict(result.status, result.success));
    println!("  Task ID:  {}", result.task_id);
    if result.total_tests > 0 {
        println!(
            "  Tests:    {} total, {} passed, {} failed",
            result.total_tests,
            result.passed_tests.to_string().green(),
            result.failed_tests.to_string().red()
        );
    }
    if let Some(duration) = &result.duration {
        println!("  Duration: {}", duration);
    }
    if let Some(error) = &result.error {
        println!("  Error:    {}", error.red());
    }
    println!("  Report:   {}", result.report_link.underline());
    print_cancel_request(result.cancel_request.as_ref());
}

pub fn print_cancel_response(kind: RunKind, task_id: &str, resp: &CancelResponse) {
    if resp.success {
        println!("{} Cancelled {} task {}", "✓".green(), kind, task_id);
    } else {
        println!("{} Could not cancel {} task {}", "✗".red(), kind, task_id);
    }
    if !resp.message.is_empty() {
        println!("  {}", resp.message);
    }
    if let Some(status) = &resp.status {
        println!("  Task status: {}", status);
    }
}

fn colored_sync_status(status: SyncStatus) -> String {
    let text = format!("{:<12}", status.as_str());
    match status {
        SyncStatus::Synced => text.green().to_string(),
        SyncStatus::Modified => text.yellow().to_string(),
        SyncStatus::Outdated => text.cyan().to_string(),
        SyncStatus::LocalOnly | SyncStatus::RemoteOnly => text.dimmed().to_string(),
    }
}

fn version(v: Option<u64>) -> String {
    v.map(|v| format!("v{v}")).unwrap_or_else(|| "-".to_string())
}

pub fn print_sync_statuses(statuses: &[TestSyncStatus]) {
    if statuses.is_empty() {
        println!("No tests found. Add tests under .devicelab/tests/ or run 'devicelab test pull --all'");
        return;
    }

    let width = statuses.iter().map(|s| s.name.len()).max().unwrap_or(4).max(4);
    let header = format!(
        "{:<width$}  {:<12}  {:>7}  {:>7}  {}",
        "NAME", "STATUS", "LOCAL", "REMOTE", "LAST SYNC"
    );
    println!("{}", header.bold());

    let now = Utc::now();
    for status in statuses {
        let last_sync = status
            .last_sync
            .map(|t| time_ago(t, now))
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<width$}  {}  {:>7}  {:>7}  {}",
            status.name,
            colored_sync_status(status.status),
            version(status.local_version),
            version(status.remote_version),
            last_sync
        );
    }
}

pub fn print_sync_results(action: &str, results: &[SyncResult]) {
    if results.is_empty() {
        println!("Nothing to {action}");
        return;
    }

    for result in results {
        if let Some(error) = &result.error {
            println!("  {} {}: {}", "✗".red(), result.name, error);
        } else if result.conflict {
            println!(
                "  {} {}: conflict, rerun with --force to overwrite",
                "!".yellow(),
                result.name
            );
        } else {
            println!("  {} {} (v{})", "✓".green(), result.name, result.new_version.unwrap_or_default());
        }
    }
}

pub fn print_diff(name: &str, diff: &str) {
    if diff.is_empty() {
        println!("{} {} matches the remote copy", "✓".green(), name);
        return;
    }
    for line in diff.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            println!("{}", line.bold());
        } else if line.starts_with('+') {
            println!("{}", line.green());
        } else if line.starts_with('-') {
            println!("{}", line.red());
        } else {
            println!("{}", line);
        }
    }
}
