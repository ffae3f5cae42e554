//! The seam between the router and a live backend.
//!
//! The router only ever sees `dyn Session`; how a backend is reached (child
//! process over stdio in production, in-memory fakes in tests) is decided by
//! the `SessionLauncher` handed to startup.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::errors::McpError;
use super::types::{CapabilityDefinition, ContentBlock};
use crate::config::BackendDescriptor;

/// A live handle to one backend.
#[async_trait]
pub trait Session: Send + Sync {
    /// Backend name as configured.
    fn name(&self) -> &str;

    /// Query the backend's current capability set. Never cached.
    async fn list_capabilities(&self) -> Result<Vec<CapabilityDefinition>, McpError>;

    /// Invoke a capability and return its raw content blocks.
    async fn invoke(
        &self,
        capability: &str,
        arguments: Value,
    ) -> Result<Vec<ContentBlock>, McpError>;

    /// Release the backend. Calls after `close` fail.
    async fn close(&self);
}

/// Brings backends up. Deadlines are applied by the caller.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self, descriptor: &BackendDescriptor) -> Result<Arc<dyn Session>, McpError>;
}
