//! Router core — one tool in front of many MCP backends.
//!
//! - `registry`: backend startup and the name → session map
//! - `dispatcher`: the six actions behind the `mcp_router` tool
//! - `tasks`: background invocations and their read-once result table
//! - `engine`: startup and ordered shutdown of all of the above

pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod instructions;
pub mod registry;
pub mod tasks;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::Dispatcher;
pub use engine::Engine;
pub use errors::RouterError;
pub use registry::{start_all, BackendSummary, SessionRegistry, StartupReport};
pub use tasks::{BackgroundTaskTable, PollOutcome, TaskManager};
pub use types::{Action, RouteRequest, TaskId, TaskRecord, TaskStatus};
