//! Session registry — backend name → live session.
//!
//! Populated once by `start_all` and read-only afterwards. Startup is
//! best-effort: every configured backend gets its own deadline, and one
//! that fails or times out is logged and left out without affecting the
//! others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::errors::RouterError;
use crate::config::BackendDescriptor;
use crate::mcp_client::{McpError, Session, SessionLauncher};

/// Summary text used when no backend came up.
pub const NO_BACKENDS_SUMMARY: &str = "No MCP servers started successfully.";

/// Separator between per-backend summary entries.
const SUMMARY_SEPARATOR: &str = "\n###\n";

// ─── SessionRegistry ─────────────────────────────────────────────────────────

/// Started backends, keyed by configured name.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Arc<dyn Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, name: String, session: Arc<dyn Session>) {
        self.sessions.insert(name, session);
    }

    /// Direct lookup by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Session>, RouterError> {
        self.sessions
            .get(name)
            .cloned()
            .ok_or_else(|| RouterError::UnknownBackend {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    /// Registered backend names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close every session concurrently.
    pub async fn close_all(&self) {
        let closing = self.sessions.iter().map(|(name, session)| async move {
            session.close().await;
            tracing::debug!(server = %name, "session closed");
        });
        futures::future::join_all(closing).await;
    }
}

// ─── Startup ─────────────────────────────────────────────────────────────────

/// One line of the capability summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendSummary {
    pub name: String,
    pub description: String,
    pub number_of_tools: usize,
}

/// Result of bringing up all configured backends.
pub struct StartupReport {
    pub registry: SessionRegistry,
    pub started: Vec<BackendSummary>,
    pub failures: Vec<RouterError>,
}

impl StartupReport {
    /// Human-readable summary of what is reachable.
    pub fn summary(&self) -> String {
        render_summary(&self.started)
    }
}

/// Render summaries as YAML documents joined by `###`.
pub fn render_summary(started: &[BackendSummary]) -> String {
    if started.is_empty() {
        return NO_BACKENDS_SUMMARY.to_string();
    }
    started
        .iter()
        .map(|entry| {
            serde_yaml::to_string(entry).unwrap_or_else(|_| {
                format!(
                    "name: {}\ndescription: {}\nnumber_of_tools: {}\n",
                    entry.name, entry.description, entry.number_of_tools
                )
            })
        })
        .collect::<Vec<_>>()
        .join(SUMMARY_SEPARATOR)
}

/// Start every backend concurrently, each bounded by its own timeout.
///
/// Entries in the report keep configuration order.
pub async fn start_all(
    descriptors: &[BackendDescriptor],
    launcher: &dyn SessionLauncher,
) -> StartupReport {
    let attempts = descriptors
        .iter()
        .map(|descriptor| start_backend(descriptor, launcher));
    let results = futures::future::join_all(attempts).await;

    let mut registry = SessionRegistry::new();
    let mut started = Vec::new();
    let mut failures = Vec::new();

    for (descriptor, result) in descriptors.iter().zip(results) {
        match result {
            Ok((session, number_of_tools)) => {
                registry.insert(descriptor.name.clone(), session);
                started.push(BackendSummary {
                    name: descriptor.name.clone(),
                    description: descriptor.description.clone(),
                    number_of_tools,
                });
            }
            Err(e) => {
                tracing::error!(server = %descriptor.name, error = %e, "backend excluded from registry");
                failures.push(e);
            }
        }
    }

    tracing::info!(
        started = registry.len(),
        failed = failures.len(),
        servers = ?registry.names(),
        "backend startup finished"
    );

    StartupReport {
        registry,
        started,
        failures,
    }
}

/// Launch one backend and count its capabilities, all within its deadline.
async fn start_backend(
    descriptor: &BackendDescriptor,
    launcher: &dyn SessionLauncher,
) -> Result<(Arc<dyn Session>, usize), RouterError> {
    let name = descriptor.name.clone();
    tracing::info!(server = %name, timeout_secs = descriptor.timeout, "starting backend");

    let deadline = Duration::try_from_secs_f64(descriptor.timeout).map_err(|e| {
        RouterError::BackendStartupFailure {
            name: name.clone(),
            reason: format!("invalid timeout {}: {e}", descriptor.timeout),
        }
    })?;

    let attempt = async {
        let session = launcher.launch(descriptor).await?;
        match session.list_capabilities().await {
            Ok(capabilities) => Ok::<_, McpError>((session, capabilities.len())),
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    };

    match tokio::time::timeout(deadline, attempt).await {
        Err(_) => Err(RouterError::BackendStartupTimeout {
            name,
            timeout_secs: descriptor.timeout,
        }),
        Ok(Err(e)) => Err(RouterError::BackendStartupFailure {
            name,
            reason: e.to_string(),
        }),
        Ok(Ok((session, number_of_tools))) => {
            tracing::info!(server = %name, tools = number_of_tools, "backend started");
            Ok((session, number_of_tools))
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
