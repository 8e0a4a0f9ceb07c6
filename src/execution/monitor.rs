//! Status monitoring for one task
//!
//! The monitor prefers the push stream and falls back to polling. Either
//! way every update passes through an [`OrderingGuard`] before it reaches
//! the caller, so counters never move backwards, even across reconnects.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::{Instant, MissedTickBehavior};

use crate::api::RemoteApi;
use crate::common::config::MonitorConfig;
use crate::common::{Error, Result};

use super::cancel::{CancelReason, CancelToken};
use super::status::{StatusEvent, TaskStatus};

/// Lower bound for the poll interval
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tuning for [`StatusMonitor`]
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub max_consecutive_errors: u32,
    pub stream_reconnects: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            poll_interval: config.poll_interval().max(MIN_POLL_INTERVAL),
            max_consecutive_errors: config.max_consecutive_errors.max(1),
            stream_reconnects: config.stream_reconnects,
        }
    }
}

/// How monitoring ended
#[derive(Debug)]
pub enum MonitorOutcome<T> {
    /// The service reported a terminal status
    Terminal(T),
    /// The deadline passed first
    TimedOut { last: Option<T> },
    /// The run was cancelled by the user first
    Cancelled { last: Option<T> },
    /// Neither streaming nor polling could keep track of the task
    Failed { last: Option<T>, error: Error },
}

/// Drops updates that would move a task's progress backwards
///
/// A regressing update is treated as a replay of an older event. Terminal
/// updates are never dropped; their counters are raised instead.
#[derive(Debug)]
pub struct OrderingGuard<T> {
    last: Option<T>,
}

impl<T> Default for OrderingGuard<T> {
    fn default() -> Self {
        Self { last: None }
    }
}

impl<T: StatusEvent> OrderingGuard<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `event` for delivery, or drop it as a replay
    pub fn admit(&mut self, mut event: T) -> Option<T> {
        if let Some(last) = &self.last {
            if event.status() == TaskStatus::Unknown {
                event.set_status(last.status());
            }

            let regresses = event.completed() < last.completed()
                || event.progress() < last.progress()
                || event.status().rank() < last.status().rank();

            if regresses {
                if event.is_terminal() {
                    event.raise_to(last);
                } else {
                    tracing::debug!(
                        "Dropping replayed {} update ({} -> {}, {}% -> {}%)",
                        T::KIND,
                        last.completed(),
                        event.completed(),
                        last.progress(),
                        event.progress()
                    );
                    return None;
                }
            }
        }

        self.last = Some(event.clone());
        Some(event)
    }

    pub fn last(&self) -> Option<&T> {
        self.last.as_ref()
    }

    pub fn into_last(self) -> Option<T> {
        self.last
    }
}

/// Follows one task until it reaches a terminal status
pub struct StatusMonitor {
    api: Arc<dyn RemoteApi>,
    settings: MonitorSettings,
}

enum Exit<T> {
    Finished(Result<T>),
    Cancelled(CancelReason),
    Deadline,
}

impl StatusMonitor {
    pub fn new(api: Arc<dyn RemoteApi>, settings: MonitorSettings) -> Self {
        Self { api, settings }
    }

    /// Watch `task_id` until terminal status, deadline or cancellation
    ///
    /// `on_event` runs synchronously for every delivered update; the next
    /// update is not read until it returns. Cancellation is observed only
    /// between updates.
    pub async fn watch<T: StatusEvent>(
        &self,
        task_id: &str,
        deadline: Instant,
        cancel: &CancelToken,
        on_event: &mut (dyn FnMut(&T) + Send),
    ) -> MonitorOutcome<T> {
        if let Some(reason) = cancel.reason() {
            return stopped(reason, None);
        }

        let mut guard = OrderingGuard::new();
        let exit = {
            let drive = self.drive(task_id, &mut guard, on_event);
            tokio::select! {
                // An update already observed beats a cancel that is merely pending
                biased;
                result = drive => Exit::Finished(result),
                reason = cancel.cancelled() => Exit::Cancelled(reason),
                _ = tokio::time::sleep_until(deadline) => Exit::Deadline,
            }
        };
        let last = guard.into_last();

        match exit {
            Exit::Finished(Ok(terminal)) => MonitorOutcome::Terminal(terminal),
            Exit::Finished(Err(error)) => {
                tracing::warn!("Lost track of {} task {}: {}", T::KIND, task_id, error);
                MonitorOutcome::Failed { last, error }
            }
            Exit::Cancelled(reason) => stopped(reason, last),
            Exit::Deadline => {
                cancel.cancel(CancelReason::Deadline);
                // A user cancel that raced the deadline still counts as a cancel
                stopped(cancel.reason().unwrap_or(CancelReason::Deadline), last)
            }
        }
    }

    async fn drive<T: StatusEvent>(
        &self,
        task_id: &str,
        guard: &mut OrderingGuard<T>,
        on_event: &mut (dyn FnMut(&T) + Send),
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                // Catch up on anything missed while disconnected
                if let Ok(status) = T::poll(self.api.as_ref(), task_id).await {
                    if let Some(terminal) = deliver(guard, on_event, status) {
                        return Ok(terminal);
                    }
                }
            }

            match self.api.open_status_stream().await {
                Ok(mut stream) => {
                    tracing::debug!("Status stream open for {} task {}", T::KIND, task_id);
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(event) => {
                                let Some(status) = T::from_stream(&event, task_id) else {
                                    continue;
                                };
                                if let Some(terminal) = deliver(guard, on_event, status) {
                                    return Ok(terminal);
                                }
                            }
                            Err(e) => {
                                tracing::warn!("Status stream interrupted: {}", e);
                                break;
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!("Could not open status stream: {}", e),
            }

            if attempt >= self.settings.stream_reconnects {
                break;
            }
            attempt += 1;
            tracing::info!("Re-establishing status stream for {} task {}", T::KIND, task_id);
        }

        tracing::info!("Falling back to polling {} task {}", T::KIND, task_id);
        self.poll_loop(task_id, guard, on_event).await
    }

    async fn poll_loop<T: StatusEvent>(
        &self,
        task_id: &str,
        guard: &mut OrderingGuard<T>,
        on_event: &mut (dyn FnMut(&T) + Send),
    ) -> Result<T> {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_errors = 0;

        loop {
            ticker.tick().await;
            match T::poll(self.api.as_ref(), task_id).await {
                Ok(status) => {
                    consecutive_errors = 0;
                    if let Some(terminal) = deliver(guard, on_event, status) {
                        return Ok(terminal);
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::debug!(
                        "Status poll {}/{} failed: {}",
                        consecutive_errors,
                        self.settings.max_consecutive_errors,
                        e
                    );
                    if consecutive_errors >= self.settings.max_consecutive_errors {
                        return Err(e);
                    }
                }
            }
        }
    }
}

/// Pass an update through the guard to the callback; returns it if terminal
fn deliver<T: StatusEvent>(
    guard: &mut OrderingGuard<T>,
    on_event: &mut (dyn FnMut(&T) + Send),
    status: T,
) -> Option<T> {
    let delivered = guard.admit(status)?;
    tracing::debug!(
        "{} update: {} ({}%)",
        T::KIND,
        delivered.status(),
        delivered.progress()
    );
    on_event(&delivered);
    delivered.is_terminal().then_some(delivered)
}

fn stopped<T>(reason: CancelReason, last: Option<T>) -> MonitorOutcome<T> {
    match reason {
        CancelReason::User => MonitorOutcome::Cancelled { last },
        CancelReason::Deadline => MonitorOutcome::TimedOut { last },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::status::{TestStatus, WorkflowStatus};

    fn test_status(status: TaskStatus, progress: u8, done: u32) -> TestStatus {
        let mut s = TestStatus::new("task-001", status);
        s.progress = progress;
        s.completed_steps = done;
        s.total_steps = 5;
        s
    }

    #[test]
    fn test_guard_drops_regressions() {
        let mut guard = OrderingGuard::new();
        assert!(guard.admit(test_status(TaskStatus::Running, 60, 3)).is_some());
        assert!(guard.admit(test_status(TaskStatus::Running, 40, 2)).is_none());
        assert!(guard.admit(test_status(TaskStatus::Running, 60, 2)).is_none());
        assert!(guard.admit(test_status(TaskStatus::Queued, 80, 4)).is_none());
        assert!(guard.admit(test_status(TaskStatus::Verifying, 80, 4)).is_some());
        assert_eq!(guard.last().unwrap().completed_steps, 4);
    }

    #[test]
    fn test_guard_raises_regressing_terminal() {
        let mut guard = OrderingGuard::new();
        guard.admit(test_status(TaskStatus::Running, 80, 4));
        let delivered = guard
            .admit(test_status(TaskStatus::Failed, 0, 0))
            .expect("terminal updates are never dropped");
        assert_eq!(delivered.status, TaskStatus::Failed);
        assert_eq!(delivered.completed_steps, 4);
        assert_eq!(delivered.progress, 80);
    }

    #[test]
    fn test_guard_fills_unknown_status() {
        let mut guard = OrderingGuard::new();
        guard.admit(test_status(TaskStatus::Running, 20, 1));
        let delivered = guard.admit(test_status(TaskStatus::Unknown, 40, 2)).unwrap();
        assert_eq!(delivered.status, TaskStatus::Running);
    }

    #[test]
    fn test_guard_workflow_counters() {
        let mut guard = OrderingGuard::new();
        let mut first = WorkflowStatus::new("wf", TaskStatus::Running);
        first.total_tests = 2;
        first.completed_tests = 1;
        first.passed_tests = 1;
        guard.admit(first);

        let stale = WorkflowStatus::new("wf", TaskStatus::Running);
        assert!(guard.admit(stale).is_none());
    }

    #[test]
    fn test_settings_from_config() {
        let settings = MonitorSettings::from(&MonitorConfig {
            poll_interval_ms: 250,
            max_consecutive_errors: 0,
            stream_reconnects: 2,
        });
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.max_consecutive_errors, 1);
        assert_eq!(settings.stream_reconnects, 2);

        let settings = MonitorSettings::from(&MonitorConfig {
            poll_interval_ms: 0,
            ..MonitorConfig::default()
        });
        assert_eq!(settings.poll_interval, MIN_POLL_INTERVAL);
    }
}
