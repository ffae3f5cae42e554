//! MCP Client — the backend side of the router.
//!
//! This module handles:
//! - Spawning and shutting down backend MCP server child processes
//! - JSON-RPC 2.0 communication over process stdio
//! - The `Session` abstraction the router dispatches through
//!
//! Nothing here knows about actions or background tasks; that lives in
//! `crate::router`.

pub mod errors;
pub mod lifecycle;
pub mod session;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use errors::McpError;
pub use lifecycle::StdioLauncher;
pub use session::{Session, SessionLauncher};
pub use types::{CapabilityDefinition, ContentBlock};
