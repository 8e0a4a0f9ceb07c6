//! Remote run execution: submission, live status, cancellation

pub mod cancel;
pub mod location;
pub mod monitor;
pub mod orchestrator;
pub mod status;

pub use cancel::{CancelReason, CancelToken, CancellationCoordinator, RemoteCancelOutcome, SignalListener};
pub use location::Location;
pub use monitor::{MonitorOutcome, MonitorSettings, OrderingGuard, StatusMonitor};
pub use orchestrator::{
    NoopObserver, Orchestrator, RunObserver, RunTestParams, RunTestResult, RunWorkflowParams,
    RunWorkflowResult,
};
pub use status::{RunKind, StatusEvent, TaskStatus, TestStatus, WorkflowStatus};
