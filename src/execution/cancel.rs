//! Run cancellation
//!
//! A [`CancelToken`] is created once per run and threaded through the
//! orchestrator and the monitor. Interrupt signals, deadline expiry and
//! explicit requests all resolve to the same token, and only the first one
//! is recorded. [`CancellationCoordinator`] turns a user cancellation into a
//! best-effort remote cancel call.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::{CancelResponse, RemoteApi};
use crate::common::{Error, Result};

use super::status::RunKind;

/// Why a run stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Interrupt signal or an explicit request
    User,
    /// The run's timeout elapsed
    Deadline,
}

/// Shared, clonable cancellation flag for one run
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<Option<CancelReason>>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Cancel with `reason`; returns true only for the call that took effect
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        })
    }

    pub fn reason(&self) -> Option<CancelReason> {
        *self.tx.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Wait until the token is cancelled
    pub async fn cancelled(&self) -> CancelReason {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                // The sender lives in self, so this never resolves
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Background listener bridging SIGINT/SIGTERM into one run's token
///
/// The listener task is aborted when this value is dropped, so signal
/// handling never outlives the run it belongs to.
pub struct SignalListener {
    handle: JoinHandle<()>,
}

impl SignalListener {
    pub fn spawn(token: CancelToken) -> Self {
        let handle = tokio::spawn(async move {
            wait_for_signal().await;
            if token.cancel(CancelReason::User) {
                tracing::info!("Interrupt received, cancelling run");
            }
        });
        Self { handle }
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {}", e);
            wait_for_ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = wait_for_ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Outcome of the best-effort remote cancel call
///
/// Reported next to the run result, never instead of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemoteCancelOutcome {
    /// The service accepted the cancellation
    Acknowledged {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    /// The service answered but refused
    Rejected { message: String },
    /// The call itself failed or timed out
    Failed { code: String, error: String },
}

impl RemoteCancelOutcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, RemoteCancelOutcome::Acknowledged { .. })
    }
}

/// Issues remote cancel calls on their own short timeout
#[derive(Clone)]
pub struct CancellationCoordinator {
    api: Arc<dyn RemoteApi>,
    request_timeout: Duration,
}

impl CancellationCoordinator {
    pub fn new(api: Arc<dyn RemoteApi>, request_timeout: Duration) -> Self {
        Self {
            api,
            request_timeout,
        }
    }

    /// Ask the service to cancel a task, bounded by the cancel timeout
    pub async fn request_cancel(&self, kind: RunKind, task_id: &str) -> Result<CancelResponse> {
        match tokio::time::timeout(self.request_timeout, self.api.cancel_task(kind, task_id)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "cancel request for {} task {} got no answer within {}s",
                kind,
                task_id,
                self.request_timeout.as_secs()
            ))),
        }
    }

    /// Cancel a task after the user aborted its run; failures are only logged
    pub async fn cancel_remote(&self, kind: RunKind, task_id: &str) -> RemoteCancelOutcome {
        match self.request_cancel(kind, task_id).await {
            Ok(resp) if resp.success => {
                tracing::info!("Remote {} task {} cancelled", kind, task_id);
                RemoteCancelOutcome::Acknowledged {
                    message: resp.message,
                    status: resp.status,
                }
            }
            Ok(resp) => {
                tracing::warn!(
                    "Service refused to cancel {} task {}: {}",
                    kind,
                    task_id,
                    resp.message
                );
                RemoteCancelOutcome::Rejected {
                    message: resp.message,
                }
            }
            Err(e) => {
                tracing::warn!("Failed to cancel {} task {} remotely: {}", kind, task_id, e);
                RemoteCancelOutcome::Failed {
                    code: e.code().to_string(),
                    error: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reason_wins() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.cancel(CancelReason::User));
        assert!(!token.cancel(CancelReason::Deadline));
        assert!(!token.cancel(CancelReason::User));
        assert_eq!(token.reason(), Some(CancelReason::User));
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(clone.cancel(CancelReason::Deadline));
        assert_eq!(token.reason(), Some(CancelReason::Deadline));
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::task::yield_now().await;
        token.cancel(CancelReason::User);
        assert_eq!(waiter.await.unwrap(), CancelReason::User);
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_set() {
        let token = CancelToken::new();
        token.cancel(CancelReason::Deadline);
        assert_eq!(token.cancelled().await, CancelReason::Deadline);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = RemoteCancelOutcome::Failed {
            code: "TIMEOUT".into(),
            error: "no answer".into(),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["outcome"], "failed");
        assert_eq!(value["code"], "TIMEOUT");
    }
}
