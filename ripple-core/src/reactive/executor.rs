//! Deferred Flush Execution
//!
//! Writes outside an explicit batch do not propagate immediately. The
//! runtime asks its [`Executor`] to run a [`FlushTask`] later, coalescing
//! every write made before the task runs into a single flush. This is the
//! host's "end of the current turn" primitive.
//!
//! The runtime requests at most one task per pending period. A task that
//! runs after the work was already flushed (by [`Runtime::sync`] or a batch
//! exit) does nothing.
//!
//! [`Runtime::sync`]: super::Runtime::sync

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use super::runtime::RuntimeInner;
use crate::error::Result;

/// A pending request to flush one runtime.
pub struct FlushTask {
    runtime: Weak<RuntimeInner>,
}

impl FlushTask {
    pub(crate) fn new(runtime: Weak<RuntimeInner>) -> Self {
        Self { runtime }
    }

    /// Flush the runtime, if it still exists.
    pub fn run(self) -> Result<()> {
        match self.runtime.upgrade() {
            Some(runtime) => runtime.run_deferred_flush(),
            None => Ok(()),
        }
    }

    /// Flush and treat failure as fatal. Used by executors that have no
    /// caller to hand the error to.
    fn run_or_panic(self) {
        if let Err(err) = self.run() {
            tracing::error!(error = %err, "deferred flush failed");
            panic!("deferred flush failed: {err}");
        }
    }
}

impl fmt::Debug for FlushTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushTask")
            .field("alive", &(self.runtime.strong_count() > 0))
            .finish()
    }
}

/// Host primitive for running a flush after the current synchronous work.
pub trait Executor {
    fn schedule_flush(&self, task: FlushTask);
}

/// Queues flush tasks until the host calls [`run_pending`](Self::run_pending).
///
/// Clones share one queue, so the host can keep a clone after handing one
/// to the runtime.
#[derive(Clone, Default)]
pub struct ManualExecutor {
    queue: Rc<RefCell<VecDeque<FlushTask>>>,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Run queued tasks, including ones queued while running.
    /// Returns how many tasks ran.
    pub fn run_pending(&self) -> Result<usize> {
        let mut ran = 0;
        loop {
            let task = self.queue.borrow_mut().pop_front();
            let Some(task) = task else {
                return Ok(ran);
            };
            task.run()?;
            ran += 1;
        }
    }
}

impl Executor for ManualExecutor {
    fn schedule_flush(&self, task: FlushTask) {
        self.queue.borrow_mut().push_back(task);
    }
}

impl fmt::Debug for ManualExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualExecutor")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Runs the flush as soon as it is requested.
///
/// The runtime only requests a flush once the outermost batch or evaluation
/// has returned, so this flushes at the end of each synchronous write.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateExecutor;

impl Executor for ImmediateExecutor {
    fn schedule_flush(&self, task: FlushTask) {
        task.run_or_panic();
    }
}

/// Spawns the flush onto the current tokio `LocalSet`.
///
/// Nodes are not `Send`, so the task must stay on this thread; scheduling a
/// flush outside a `LocalSet` context panics.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioExecutor;

impl Executor for TokioExecutor {
    fn schedule_flush(&self, task: FlushTask) {
        tokio::task::spawn_local(async move {
            task.run_or_panic();
        });
    }
}
