//! Background tool execution.
//!
//! - `BackgroundTaskTable`: id → record, the only state shared between the
//!   spawning call, the running unit, and a later poll.
//! - `run_invocation`: one unit of work: invoke under a deadline, then write
//!   exactly one terminal state.
//! - `TaskManager`: owns the table and the set of in-flight units, so
//!   shutdown can cancel and await every one of them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinSet;

use super::errors::RouterError;
use super::types::{TaskId, TaskOutcome, TaskRecord, TaskStatus};
use crate::mcp_client::types::strip_internal_metadata;
use crate::mcp_client::{ContentBlock, McpError, Session};

/// Message recorded on tasks still pending when the router shuts down.
pub const CANCELLED_MESSAGE: &str = "Tool execution was cancelled because the router is shutting down.";

// ─── Shared invocation path ──────────────────────────────────────────────────

/// Invoke a capability and strip transport-internal fields from the result.
///
/// Used by both synchronous execution and background units.
pub async fn invoke_and_clean(
    session: &dyn Session,
    capability: &str,
    arguments: Value,
) -> Result<Vec<ContentBlock>, McpError> {
    let blocks = session.invoke(capability, arguments).await?;
    Ok(blocks.into_iter().map(strip_internal_metadata).collect())
}

// ─── BackgroundTaskTable ─────────────────────────────────────────────────────

/// What a poll found.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Still running; the record stays in the table.
    Pending,
    /// Terminal; the record has been removed and is returned to the caller.
    Finished(TaskRecord),
}

/// In-memory map of background task records.
///
/// Each operation holds the lock for its whole check-and-mutate step, so a
/// terminal write and a poll are totally ordered per id and two pollers can
/// never both retrieve the same result.
#[derive(Debug, Default)]
pub struct BackgroundTaskTable {
    records: StdMutex<HashMap<TaskId, TaskRecord>>,
}

impl BackgroundTaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, TaskRecord>> {
        // Records are plain data; a panic elsewhere cannot leave one half-written.
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new task in the PENDING state.
    pub fn insert_pending(&self, id: TaskId) {
        let previous = self.lock().insert(id, TaskRecord::pending());
        debug_assert!(previous.is_none(), "task ids are never reused");
    }

    /// Write the terminal state for a task.
    ///
    /// Only a PENDING record is transitioned; returns `false` when the id is
    /// unknown or already terminal, leaving the table unchanged.
    pub fn finish(&self, id: &TaskId, outcome: TaskOutcome) -> bool {
        let mut records = self.lock();
        match records.get_mut(id) {
            Some(record) if record.status == TaskStatus::Pending => {
                record.resolve(outcome);
                true
            }
            _ => false,
        }
    }

    /// Read a task's state, removing it if terminal (read-once-then-delete).
    pub fn take_if_terminal(&self, id: &TaskId) -> Result<PollOutcome, RouterError> {
        let mut records = self.lock();
        let status = records
            .get(id)
            .map(|record| record.status)
            .ok_or_else(|| RouterError::UnknownTaskId {
                id: id.to_string(),
            })?;

        if !status.is_terminal() {
            return Ok(PollOutcome::Pending);
        }
        records
            .remove(id)
            .map(PollOutcome::Finished)
            .ok_or_else(|| RouterError::UnknownTaskId {
                id: id.to_string(),
            })
    }

    /// Mark every still-pending task FAILED with `message`. Returns how many.
    pub fn fail_pending(&self, message: &str) -> usize {
        let mut records = self.lock();
        let mut count = 0;
        for record in records.values_mut() {
            if record.status == TaskStatus::Pending {
                record.resolve(TaskOutcome::Failed(message.to_string()));
                count += 1;
            }
        }
        count
    }

    /// Current status of a task without consuming it.
    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.lock().get(id).map(|record| record.status)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

// ─── TaskRunner ──────────────────────────────────────────────────────────────

/// One background unit: invoke under `timeout`, then record the outcome.
///
/// The table write is the last thing the unit does.
pub async fn run_invocation(
    table: Arc<BackgroundTaskTable>,
    id: TaskId,
    session: Arc<dyn Session>,
    capability: String,
    arguments: Value,
    timeout: Duration,
) {
    let outcome = match tokio::time::timeout(
        timeout,
        invoke_and_clean(session.as_ref(), &capability, arguments),
    )
    .await
    {
        Err(_) => {
            let err = RouterError::InvocationTimeout {
                tool: capability.clone(),
                timeout_secs: timeout.as_secs_f64(),
            };
            tracing::warn!(
                tool_call_id = %id,
                server = session.name(),
                tool = %capability,
                error = %err,
                "background tool call timed out"
            );
            TaskOutcome::TimedOut(err.to_string())
        }
        Ok(Err(e)) => {
            tracing::error!(
                tool_call_id = %id,
                server = session.name(),
                tool = %capability,
                error = %e,
                "background tool call failed"
            );
            TaskOutcome::Failed(e.message())
        }
        Ok(Ok(blocks)) => TaskOutcome::Completed(blocks),
    };

    let written = table.finish(&id, outcome);
    tracing::debug!(tool_call_id = %id, written, "background tool call finished");
}

// ─── TaskManager ─────────────────────────────────────────────────────────────

/// Owner of the task table and every in-flight background unit.
#[derive(Debug, Default)]
pub struct TaskManager {
    table: Arc<BackgroundTaskTable>,
    in_flight: StdMutex<JoinSet<()>>,
    /// Set by `shutdown`; written only while `in_flight` is locked.
    closed: AtomicBool,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self) -> &BackgroundTaskTable {
        &self.table
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the manager closed under the `in_flight` lock, so no `spawn`
    /// can slip a unit in after the drain below has started.
    fn close(&self) {
        let _in_flight = self.lock_in_flight();
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Start a background invocation and return its id immediately.
    ///
    /// The PENDING record is inserted before the unit is launched, so a
    /// poll with the returned id always finds it. Fails with `ShuttingDown`
    /// once `shutdown` has started. Must be called from within a tokio
    /// runtime.
    pub fn spawn(
        &self,
        session: Arc<dyn Session>,
        capability: String,
        arguments: Value,
        timeout: Duration,
    ) -> Result<TaskId, RouterError> {
        let mut in_flight = self.lock_in_flight();
        if self.closed.load(Ordering::SeqCst) {
            return Err(RouterError::ShuttingDown);
        }

        let id = TaskId::generate();
        self.table.insert_pending(id.clone());

        let unit = run_invocation(
            Arc::clone(&self.table),
            id.clone(),
            session,
            capability,
            arguments,
            timeout,
        );

        // Reap handles of units that already finished.
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(unit);
        Ok(id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Poll a task; see [`BackgroundTaskTable::take_if_terminal`].
    pub fn poll(&self, id: &str) -> Result<PollOutcome, RouterError> {
        self.table.take_if_terminal(&TaskId::from(id))
    }

    /// Number of units not yet reaped. May include finished ones.
    pub fn in_flight(&self) -> usize {
        self.lock_in_flight().len()
    }

    /// Refuse new units, cancel every in-flight one and wait until all of
    /// them have stopped.
    ///
    /// Records left PENDING are marked FAILED. Returns the number of units
    /// that were cancelled before finishing.
    pub async fn shutdown(&self) -> usize {
        self.close();
        let mut cancelled = 0;
        loop {
            let mut units = std::mem::take(&mut *self.lock_in_flight());
            if units.is_empty() {
                break;
            }
            units.abort_all();
            while let Some(joined) = units.join_next().await {
                match joined {
                    Err(e) if e.is_cancelled() => cancelled += 1,
                    Err(e) => tracing::error!(error = %e, "background unit panicked"),
                    Ok(()) => {}
                }
            }
        }

        let marked = self.table.fail_pending(CANCELLED_MESSAGE);
        tracing::info!(cancelled, marked, "background tasks stopped");
        cancelled
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
