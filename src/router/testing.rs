//! In-memory backends for unit tests.
//!
//! `FakeSession` understands three tools:
//! - `echo`: returns the arguments as one text block (with an `annotations`
//!   field the router must strip); sleeps first if `sleep_ms` is given.
//! - `fail`: returns a backend error with message `boom`.
//! - anything else: a JSON-RPC "unknown tool" error.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::{BackendDescriptor, StartupSpec};
use crate::mcp_client::types::error_codes;
use crate::mcp_client::{CapabilityDefinition, ContentBlock, McpError, Session, SessionLauncher};

pub(crate) fn capability(name: &str, description: &str) -> CapabilityDefinition {
    CapabilityDefinition {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema: json!({
            "type": "object",
            "properties": {"x": {"type": "integer"}},
        }),
    }
}

pub(crate) struct FakeSession {
    name: String,
    tools: Mutex<Vec<CapabilityDefinition>>,
    list_calls: AtomicUsize,
    completed: AtomicUsize,
    closed: AtomicBool,
    used_after_close: AtomicBool,
}

impl FakeSession {
    pub(crate) fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            tools: Mutex::new(vec![
                capability("echo", "Echo the arguments back"),
                capability("fail", "Always fails"),
            ]),
            list_calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            used_after_close: AtomicBool::new(false),
        })
    }

    pub(crate) fn set_tools(&self, tools: Vec<CapabilityDefinition>) {
        *self.tools.lock().unwrap() = tools;
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn completed_invocations(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn was_used_after_close(&self) -> bool {
        self.used_after_close.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<(), McpError> {
        if self.is_closed() {
            self.used_after_close.store(true, Ordering::SeqCst);
            return Err(McpError::TransportError {
                server: self.name.clone(),
                reason: "session closed".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Session for FakeSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_capabilities(&self) -> Result<Vec<CapabilityDefinition>, McpError> {
        self.check_open()?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tools.lock().unwrap().clone())
    }

    async fn invoke(
        &self,
        capability: &str,
        arguments: Value,
    ) -> Result<Vec<ContentBlock>, McpError> {
        self.check_open()?;
        if let Some(ms) = arguments.get("sleep_ms").and_then(Value::as_u64) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            self.check_open()?;
        }

        let result = match capability {
            "echo" => Ok(vec![json!({
                "type": "text",
                "text": arguments.to_string(),
                "annotations": {"audience": ["assistant"]},
            })]),
            "fail" => Err(McpError::ServerError {
                code: error_codes::INTERNAL_ERROR,
                message: "boom".into(),
                data: None,
            }),
            other => Err(McpError::ServerError {
                code: error_codes::INVALID_PARAMS,
                message: format!("Unknown tool: {other}"),
                data: None,
            }),
        };
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Launches `FakeSession`s, optionally slowly or not at all.
#[derive(Default)]
pub(crate) struct FakeLauncher {
    delays: HashMap<String, Duration>,
    failing: HashSet<String>,
    launched: Mutex<HashMap<String, Arc<FakeSession>>>,
}

impl FakeLauncher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }

    pub(crate) fn with_failure(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    /// The session handed out for `name`, if it was launched.
    pub(crate) fn session(&self, name: &str) -> Option<Arc<FakeSession>> {
        self.launched.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl SessionLauncher for FakeLauncher {
    async fn launch(&self, descriptor: &BackendDescriptor) -> Result<Arc<dyn Session>, McpError> {
        if let Some(delay) = self.delays.get(&descriptor.name) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(&descriptor.name) {
            return Err(McpError::SpawnFailed {
                name: descriptor.name.clone(),
                reason: "No such file or directory".into(),
            });
        }
        let session = FakeSession::new(&descriptor.name);
        self.launched
            .lock()
            .unwrap()
            .insert(descriptor.name.clone(), Arc::clone(&session));
        Ok(session)
    }
}

pub(crate) fn descriptor(name: &str, timeout: f64) -> BackendDescriptor {
    BackendDescriptor {
        name: name.to_string(),
        description: format!("{name} backend"),
        timeout,
        startup: StartupSpec {
            command: "fake".into(),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
        },
    }
}
