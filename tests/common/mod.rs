//! In-memory stand-in for the DeviceLab service
//!
//! Scripted status streams and poll responses drive the execution engine;
//! a versioned test store backs the sync engine.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};

use devicelab::api::*;
use devicelab::execution::{RunKind, RunObserver, StatusEvent};
use devicelab::{Error, Result};

/// How one `open_status_stream` call behaves
pub enum StreamScript {
    /// Yield the events, then stay open without further events
    Hold(Vec<StreamEvent>),
    /// Yield the events, then close
    Close(Vec<StreamEvent>),
    /// Refuse to open
    Refuse,
}

#[derive(Default)]
pub struct FakeState {
    pub calls: Vec<String>,
    pub next_task_id: Option<String>,
    pub streams: VecDeque<StreamScript>,
    pub test_polls: VecDeque<Result<TestStatusResponse>>,
    pub workflow_polls: VecDeque<Result<WorkflowStatusResponse>>,
    pub cancel_response: CancelResponse,
    pub tests: BTreeMap<String, RemoteTest>,
    pub workflows: BTreeMap<String, RemoteWorkflow>,
    pub tags: BTreeMap<String, Vec<String>>,
    pub forbidden: BTreeSet<String>,
    pub created: u32,
}

#[derive(Default)]
pub struct FakeApi {
    pub state: Mutex<FakeState>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        let api = Self::default();
        api.state.lock().unwrap().cancel_response = CancelResponse {
            success: true,
            message: "cancellation requested".into(),
            status: Some("cancelled".into()),
        };
        Arc::new(api)
    }

    pub fn as_remote(self: &Arc<Self>) -> Arc<dyn RemoteApi> {
        self.clone()
    }

    pub fn with_task_id(self: &Arc<Self>, task_id: &str) -> Arc<Self> {
        self.state.lock().unwrap().next_task_id = Some(task_id.to_string());
        self.clone()
    }

    pub fn push_stream(&self, script: StreamScript) {
        self.state.lock().unwrap().streams.push_back(script);
    }

    pub fn push_test_poll(&self, resp: Result<TestStatusResponse>) {
        self.state.lock().unwrap().test_polls.push_back(resp);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }

    pub fn add_test(&self, id: &str, name: &str, version: u64, tasks: Vec<Value>) {
        self.state.lock().unwrap().tests.insert(
            id.to_string(),
            RemoteTest {
                id: id.to_string(),
                name: name.to_string(),
                platform: "IOS".to_string(),
                description: None,
                tasks,
                version,
                build_var_id: None,
                pinned_version: None,
            },
        );
    }

    pub fn tag_test(&self, tag: &str, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.tags.entry(tag.to_string()).or_default().push(id.to_string());
    }

    pub fn add_workflow(&self, id: &str, name: &str) {
        self.state.lock().unwrap().workflows.insert(
            id.to_string(),
            RemoteWorkflow {
                id: id.to_string(),
                name: name.to_string(),
                tests: vec![],
            },
        );
    }

    /// Reads of this test answer 403
    pub fn forbid(&self, id: &str) {
        self.state.lock().unwrap().forbidden.insert(id.to_string());
    }

    /// Someone else edits the remote test
    pub fn edit_remote(&self, id: &str, tasks: Vec<Value>) {
        let mut state = self.state.lock().unwrap();
        if let Some(test) = state.tests.get_mut(id) {
            test.tasks = tasks;
            test.version += 1;
        }
    }

    pub fn remote_version(&self, id: &str) -> Option<u64> {
        self.state.lock().unwrap().tests.get(id).map(|t| t.version)
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl RemoteApi for FakeApi {
    async fn execute_test(&self, req: &ExecuteTestRequest) -> Result<SubmitResponse> {
        self.record(format!("execute_test:{}:{}", req.test_id, req.retries));
        let task_id = self.state.lock().unwrap().next_task_id.clone();
        Ok(SubmitResponse {
            id: None,
            task_id,
            status: Some("queued".into()),
            message: None,
        })
    }

    async fn execute_workflow(&self, req: &ExecuteWorkflowRequest) -> Result<SubmitResponse> {
        self.record(format!("execute_workflow:{}:{}", req.workflow_id, req.retries));
        let task_id = self.state.lock().unwrap().next_task_id.clone();
        Ok(SubmitResponse {
            id: None,
            task_id,
            status: Some("queued".into()),
            message: None,
        })
    }

    async fn cancel_task(&self, kind: RunKind, task_id: &str) -> Result<CancelResponse> {
        self.record(format!("cancel:{kind}:{task_id}"));
        Ok(self.state.lock().unwrap().cancel_response.clone())
    }

    async fn open_status_stream(&self) -> Result<EventStream> {
        self.record("open_stream".into());
        let script = self.state.lock().unwrap().streams.pop_front();
        match script {
            Some(StreamScript::Hold(events)) => Ok(stream::iter(events.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
            Some(StreamScript::Close(events)) => Ok(stream::iter(events.into_iter().map(Ok)).boxed()),
            Some(StreamScript::Refuse) | None => Err(Error::Network {
                message: "stream unavailable".into(),
                hint: None,
            }),
        }
    }

    async fn test_status(&self, task_id: &str) -> Result<TestStatusResponse> {
        self.record(format!("poll_test:{task_id}"));
        self.state
            .lock()
            .unwrap()
            .test_polls
            .pop_front()
            .unwrap_or_else(|| Err(Error::Network {
                message: "no poll scripted".into(),
                hint: None,
            }))
    }

    async fn workflow_status(&self, task_id: &str) -> Result<WorkflowStatusResponse> {
        self.record(format!("poll_workflow:{task_id}"));
        self.state
            .lock()
            .unwrap()
            .workflow_polls
            .pop_front()
            .unwrap_or_else(|| Err(Error::Network {
                message: "no poll scripted".into(),
                hint: None,
            }))
    }

    async fn get_test(&self, test_id: &str) -> Result<RemoteTest> {
        self.record(format!("get_test:{test_id}"));
        let state = self.state.lock().unwrap();
        if state.forbidden.contains(test_id) {
            return Err(Error::PermissionDenied(format!("test {test_id}")));
        }
        state
            .tests
            .get(test_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("test {test_id}")))
    }

    async fn get_workflow(&self, workflow_id: &str) -> Result<RemoteWorkflow> {
        self.record(format!("get_workflow:{workflow_id}"));
        self.state
            .lock()
            .unwrap()
            .workflows
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("workflow {workflow_id}")))
    }

    async fn list_org_tests(&self, limit: u32, offset: u32, tag: Option<&str>) -> Result<TestPage> {
        self.record(format!("list_org_tests:{limit}:{offset}"));
        let state = self.state.lock().unwrap();
        let matching: Vec<TestSummary> = state
            .tests
            .values()
            .filter(|t| match tag {
                Some(tag) => state.tags.get(tag).is_some_and(|ids| ids.contains(&t.id)),
                None => true,
            })
            .map(|t| TestSummary {
                id: t.id.clone(),
                name: t.name.clone(),
                platform: t.platform.clone(),
            })
            .collect();
        let count = matching.len() as u64;
        let tests = matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(TestPage { tests, count })
    }

    async fn create_test(&self, req: &CreateTestRequest) -> Result<WriteResponse> {
        self.record(format!("create_test:{}", req.name));
        let mut state = self.state.lock().unwrap();
        state.created += 1;
        let id = format!("00000000-0000-4000-8000-{:012}", state.created);
        state.tests.insert(
            id.clone(),
            RemoteTest {
                id: id.clone(),
                name: req.name.clone(),
                platform: req.platform.clone(),
                description: req.description.clone(),
                tasks: req.tasks.clone(),
                version: 1,
                build_var_id: None,
                pinned_version: None,
            },
        );
        Ok(WriteResponse { id, version: 1 })
    }

    async fn update_test(&self, test_id: &str, req: &UpdateTestRequest) -> Result<WriteResponse> {
        self.record(format!("update_test:{test_id}"));
        let mut state = self.state.lock().unwrap();
        let test = state
            .tests
            .get_mut(test_id)
            .ok_or_else(|| Error::NotFound(format!("test {test_id}")))?;
        if let Some(expected) = req.expected_version {
            if expected != test.version {
                return Err(Error::VersionConflict(format!(
                    "expected version {expected}, found {}",
                    test.version
                )));
            }
        }
        test.tasks = req.tasks.clone();
        test.version += 1;
        Ok(WriteResponse {
            id: test_id.to_string(),
            version: test.version,
        })
    }
}

/// `test_updated` event for one task
pub fn test_event(name: &str, task_id: &str, status: &str, progress: f64, done: u32, total: u32) -> StreamEvent {
    StreamEvent::new(
        name,
        json!({
            "test": {
                "id": task_id,
                "task_id": task_id,
                "test_name": "Login",
                "status": status,
                "progress": progress,
                "steps_completed": done,
                "total_steps": total,
            }
        }),
    )
}

/// `workflow_*` event for one task
pub fn workflow_event(name: &str, task_id: &str, status: &str, counts: (u32, u32, u32, u32)) -> StreamEvent {
    let (total, completed, passed, failed) = counts;
    StreamEvent::new(
        name,
        json!({
            "workflow": {
                "task": {
                    "id": task_id,
                    "status": status,
                    "total_tests": total,
                    "completed_tests": completed,
                    "passed_tests": passed,
                    "failed_tests": failed,
                },
                "workflow_name": "Checkout suite",
            }
        }),
    )
}

/// Observer that records everything and can cancel on a condition
pub struct Recorder<T> {
    pub started: Vec<String>,
    pub events: Vec<T>,
    cancel_when: Option<(devicelab::execution::CancelToken, fn(&T) -> bool)>,
}

impl<T> Recorder<T> {
    pub fn new() -> Self {
        Self {
            started: Vec::new(),
            events: Vec::new(),
            cancel_when: None,
        }
    }

    pub fn cancelling(token: devicelab::execution::CancelToken, when: fn(&T) -> bool) -> Self {
        Self {
            started: Vec::new(),
            events: Vec::new(),
            cancel_when: Some((token, when)),
        }
    }
}

impl<T: StatusEvent> RunObserver<T> for Recorder<T> {
    fn on_task_started(&mut self, task_id: &str) {
        self.started.push(task_id.to_string());
    }

    fn on_progress(&mut self, status: &T) {
        self.events.push(status.clone());
        if let Some((token, when)) = &self.cancel_when {
            if when(status) {
                token.cancel(devicelab::execution::CancelReason::User);
            }
        }
    }
}
