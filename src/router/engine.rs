//! Engine — startup and teardown around the dispatcher.
//!
//! `start` brings up every configured backend and builds the dispatcher over
//! the resulting registry. `shutdown` stops background work before it
//! releases sessions, so no unit ever talks to a closed backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use super::dispatcher::Dispatcher;
use super::errors::RouterError;
use super::instructions;
use super::registry::{start_all, SessionRegistry};
use super::tasks::TaskManager;
use super::types::RouteRequest;
use crate::config::RouterConfig;
use crate::mcp_client::{ContentBlock, SessionLauncher};

pub struct Engine {
    registry: Arc<SessionRegistry>,
    tasks: Arc<TaskManager>,
    dispatcher: Dispatcher,
    summary: String,
    startup_failures: Vec<RouterError>,
    shut_down: AtomicBool,
}

impl Engine {
    /// Start all configured backends. Never fails: backends that do not come
    /// up are logged and left out.
    pub async fn start(config: &RouterConfig, launcher: &dyn SessionLauncher) -> Self {
        let report = start_all(&config.mcp_servers, launcher).await;
        let summary = report.summary();

        let registry = Arc::new(report.registry);
        let tasks = Arc::new(TaskManager::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry), Arc::clone(&tasks));

        Self {
            registry,
            tasks,
            dispatcher,
            summary,
            startup_failures: report.failures,
            shut_down: AtomicBool::new(false),
        }
    }

    /// YAML summary of the started backends.
    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn startup_failures(&self) -> &[RouterError] {
        &self.startup_failures
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    /// Route one call. Fails with `ShuttingDown` once `shutdown` has begun.
    pub async fn route(&self, request: RouteRequest) -> Result<Vec<ContentBlock>, RouterError> {
        if self.is_shut_down() {
            return Err(RouterError::ShuttingDown);
        }
        self.dispatcher.route(request).await
    }

    /// Server instructions advertised to the hosting client.
    pub fn instructions(&self) -> String {
        instructions::server_instructions(&self.summary)
    }

    /// The `mcp_router` tool definition advertised to the hosting client.
    pub fn tool_definition(&self) -> Value {
        instructions::tool_definition(&self.summary)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Cancel background work, then close every session. Safe to call twice.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(servers = self.registry.len(), "shutting down router");

        let cancelled = self.tasks.shutdown().await;
        self.registry.close_all().await;

        tracing::info!(cancelled, "router shut down");
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::router::tasks::CANCELLED_MESSAGE;
    use crate::router::testing::{descriptor, FakeLauncher};
    use crate::router::types::TaskStatus;

    fn config(names: &[(&str, f64)]) -> RouterConfig {
        RouterConfig {
            mcp_servers: names.iter().map(|(n, t)| descriptor(n, *t)).collect(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_excludes_slow_backend() {
        let launcher = FakeLauncher::new().with_delay("slow", Duration::from_secs(5));
        let engine = Engine::start(&config(&[("slow", 1.0), ("fast", 30.0)]), &launcher).await;

        assert_eq!(engine.backend_names(), vec!["fast"]);
        assert_eq!(engine.startup_failures().len(), 1);
        assert!(engine.instructions().contains("name: fast"));
        assert!(!engine.instructions().contains("name: slow"));

        let err = engine
            .route(RouteRequest::new("slow", "list_tools"))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::UnknownBackend { .. }));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_tool_definition_embeds_summary() {
        let engine = Engine::start(&config(&[("fast", 5.0)]), &FakeLauncher::new()).await;
        let def = engine.tool_definition();
        let description = def["description"].as_str().unwrap();
        assert!(description.contains("description: fast backend"));
        assert!(description.contains("number_of_tools: 2"));
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_outstanding_tasks_before_closing() {
        let launcher = FakeLauncher::new();
        let engine = Engine::start(&config(&[("fast", 5.0)]), &launcher).await;

        let mut ids = Vec::new();
        for _ in 0..4 {
            let blocks = engine
                .route(
                    RouteRequest::new("fast", "spawn_tool_in_background")
                        .with_tool("echo")
                        .with_arguments(r#"{"sleep_ms":60000}"#)
                        .with_timeout(120.0),
                )
                .await
                .unwrap();
            let text = blocks[0]["text"].as_str().unwrap();
            ids.push(text.trim_start_matches("tool_call_id: ").to_string());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        engine.shutdown().await;

        let session = launcher.session("fast").unwrap();
        assert!(session.is_closed());
        assert!(!session.was_used_after_close());
        assert_eq!(session.completed_invocations(), 0);
        assert_eq!(engine.tasks().in_flight(), 0);

        for id in &ids {
            assert_eq!(
                engine.tasks().table().status(&id.as_str().into()),
                Some(TaskStatus::Failed)
            );
        }
        let blocks = engine
            .dispatcher()
            .route(RouteRequest::new("fast", "poll_tool_result").with_task_id(ids[0].clone()))
            .await
            .unwrap();
        assert_eq!(
            blocks[0]["text"],
            format!("Status: FAILED. Error Message: {CANCELLED_MESSAGE}")
        );
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let engine = Engine::start(&config(&[("fast", 5.0)]), &FakeLauncher::new()).await;
        engine.shutdown().await;
        engine.shutdown().await;
        assert!(engine.is_shut_down());
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_are_refused() {
        let launcher = FakeLauncher::new();
        let engine = Engine::start(&config(&[("fast", 5.0)]), &launcher).await;
        engine.shutdown().await;

        let spawn = RouteRequest::new("fast", "spawn_tool_in_background")
            .with_tool("echo")
            .with_arguments(r#"{"x":1}"#);
        let err = engine.route(spawn.clone()).await.unwrap_err();
        assert!(matches!(err, RouterError::ShuttingDown));

        let err = engine
            .route(RouteRequest::new("fast", "list_tools"))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::ShuttingDown));

        // The task manager refuses on its own too.
        let err = engine.dispatcher().route(spawn).await.unwrap_err();
        assert!(matches!(err, RouterError::ShuttingDown));

        assert_eq!(engine.tasks().in_flight(), 0);
        assert!(engine.tasks().table().is_empty());
        let session = launcher.session("fast").unwrap();
        assert!(!session.was_used_after_close());
        assert_eq!(session.completed_invocations(), 0);
    }

    #[tokio::test]
    async fn test_no_backends_started() {
        let launcher = FakeLauncher::new().with_failure("a").with_failure("b");
        let engine = Engine::start(&config(&[("a", 5.0), ("b", 5.0)]), &launcher).await;
        assert!(engine.backend_names().is_empty());
        assert_eq!(engine.summary(), "No MCP servers started successfully.");
        engine.shutdown().await;
    }
}
