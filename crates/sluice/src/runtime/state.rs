//! The synchronously readable status of an invocation.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use sluice_common::ExitOutcome;

/// Best-effort view of an invocation, updated as soon as the child is reaped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Whether the child has exited.
    pub done: bool,
    /// Exit code, once known.
    pub exit_code: Option<i32>,
    /// Success, once known.
    pub success: Option<bool>,
}

/// Shared cell holding the latest [`StatusSnapshot`].
#[derive(Debug, Clone, Default)]
pub struct StatusCell {
    inner: Arc<RwLock<StatusSnapshot>>,
}

impl StatusCell {
    /// Read the current snapshot without waiting.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        *self.inner.read()
    }

    /// Record how the child exited.
    pub fn record_exit(&self, exit: &ExitOutcome) {
        let mut status = self.inner.write();
        status.done = true;
        status.exit_code = Some(exit.code);
        status.success = Some(exit.success);
    }

    /// Mark the invocation done without an exit status.
    pub fn record_failure(&self) {
        self.inner.write().done = true;
    }
}
