//! Live progress bars for runs

use indicatif::{ProgressBar, ProgressStyle};

use crate::execution::{RunKind, RunObserver, TestStatus, WorkflowStatus};

fn progress_bar(visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::default_bar()
        .template("  [{bar:40.cyan/blue}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar
}

/// Renders a run's status updates as a progress bar on stderr
pub struct RunProgress {
    bar: ProgressBar,
    kind: RunKind,
    app_url: String,
}

impl RunProgress {
    /// A hidden progress bar swallows all output, for `--json` mode
    pub fn new(kind: RunKind, app_url: &str, visible: bool) -> Self {
        Self {
            bar: progress_bar(visible),
            kind,
            app_url: app_url.to_string(),
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn started(&mut self, task_id: &str) {
        self.bar.println(format!("Started {} task {}", self.kind, task_id));
        self.bar
            .println(format!("Report: {}", self.kind.report_url(&self.app_url, task_id)));
        self.bar.set_message("queued");
    }
}

impl RunObserver<TestStatus> for RunProgress {
    fn on_task_started(&mut self, task_id: &str) {
        self.started(task_id);
    }

    fn on_progress(&mut self, status: &TestStatus) {
        self.bar.set_position(u64::from(status.progress));
        let mut msg = format!("{} {}", status.status.icon(), status.status);
        if status.total_steps > 0 {
            msg.push_str(&format!(" {}/{} steps", status.completed_steps, status.total_steps));
        }
        if let Some(step) = &status.current_step {
            msg.push_str(&format!(": {step}"));
        }
        self.bar.set_message(msg);
    }
}

impl RunObserver<WorkflowStatus> for RunProgress {
    fn on_task_started(&mut self, task_id: &str) {
        self.started(task_id);
    }

    fn on_progress(&mut self, status: &WorkflowStatus) {
        self.bar.set_position(u64::from(status.progress));
        self.bar.set_message(format!(
            "{} {} {}/{} tests ({} passed, {} failed)",
            status.status.icon(),
            status.status,
            status.completed_tests,
            status.total_tests,
            status.passed_tests,
            status.failed_tests
        ));
    }
}
