//! Bounded worker pool shared by asynchronous script operations.
//!
//! The pool owns a dedicated tokio runtime whose blocking pool is capped at
//! the configured width. Script calls run through `spawn_blocking`, and each
//! call is handed back as a [`ScriptFuture`] around its join handle.

use crate::error::{ScriptError, ScriptResult};
use std::fmt;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error};

/// Default number of worker threads.
pub const DEFAULT_WORKER_THREADS: usize = 10;

/// Fixed-width pool backed by a private multi-thread runtime.
///
/// Dropping the pool shuts the runtime down in the background; tasks that
/// never started resolve as [`ScriptError::TaskAborted`].
pub struct WorkerPool {
    runtime: Option<Runtime>,
    size: usize,
}

impl WorkerPool {
    /// Starts a runtime with `size` blocking workers (at least one).
    ///
    /// If the runtime cannot be built the failure is logged and every
    /// submitted task resolves as [`ScriptError::TaskAborted`].
    pub fn new(size: usize) -> Self {
        let requested = size.max(1);
        let built = Builder::new_multi_thread()
            .worker_threads(requested)
            .max_blocking_threads(requested)
            .thread_name("rcscript-worker")
            .enable_time()
            .build();

        match built {
            Ok(runtime) => {
                debug!("Started script worker pool with {} threads", requested);
                Self {
                    runtime: Some(runtime),
                    size: requested,
                }
            }
            Err(e) => {
                error!("Failed to start script worker pool: {}", e);
                Self {
                    runtime: None,
                    size: 0,
                }
            }
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `task` on a worker. A panic inside `task` resolves the future
    /// with [`ScriptError::TaskAborted`] and leaves the pool usable.
    pub fn submit<T, F>(&self, task: F) -> ScriptFuture<T>
    where
        T: Send + 'static,
        F: FnOnce() -> ScriptResult<T> + Send + 'static,
    {
        match &self.runtime {
            Some(runtime) => ScriptFuture {
                state: State::Pending {
                    join: runtime.spawn_blocking(task),
                    handle: runtime.handle().clone(),
                },
            },
            None => ScriptFuture::ready(Err(aborted())),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // a task may hold the last reference to the pool, and async callers
        // may drop it too; neither context may block on shutdown
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool").field("size", &self.size).finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}

fn join_outcome<T>(joined: Result<ScriptResult<T>, JoinError>) -> ScriptResult<T> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            let reason = panic_message(e.into_panic().as_ref());
            error!("Script task panicked: {}", reason);
            Err(ScriptError::TaskAborted(reason))
        }
        Err(_) => Err(aborted()),
    }
}

enum State<T> {
    Ready(ScriptResult<T>),
    Pending {
        join: JoinHandle<ScriptResult<T>>,
        handle: Handle,
    },
}

/// Pending result of an asynchronous script operation.
///
/// The blocking accessors panic when called from inside an async runtime,
/// as tokio's own blocking receivers do; use [`ScriptFuture::wait`] there.
pub struct ScriptFuture<T> {
    state: State<T>,
}

impl<T> ScriptFuture<T> {
    /// A future that is already resolved.
    pub fn ready(result: ScriptResult<T>) -> Self {
        Self {
            state: State::Ready(result),
        }
    }

    /// Blocks until the task finishes.
    pub fn get(self) -> ScriptResult<T> {
        match self.state {
            State::Ready(result) => result,
            State::Pending { join, handle } => join_outcome(handle.block_on(join)),
        }
    }

    /// Blocks for at most `timeout`.
    pub fn get_timeout(self, timeout: Duration) -> ScriptResult<T> {
        match self.state {
            State::Ready(result) => result,
            State::Pending { join, handle } => {
                match handle.block_on(async { tokio::time::timeout(timeout, join).await }) {
                    Ok(joined) => join_outcome(joined),
                    Err(_) => Err(ScriptError::Timeout(timeout)),
                }
            }
        }
    }

    /// Returns the result if the task has finished, or the future back.
    pub fn try_get(self) -> Result<ScriptResult<T>, Self> {
        if self.is_done() {
            Ok(self.get())
        } else {
            Err(self)
        }
    }

    /// Whether a result is available without blocking.
    pub fn is_done(&self) -> bool {
        match &self.state {
            State::Ready(_) => true,
            State::Pending { join, .. } => join.is_finished(),
        }
    }

    /// Awaits the task from async code.
    pub async fn wait(self) -> ScriptResult<T> {
        match self.state {
            State::Ready(result) => result,
            State::Pending { join, .. } => join_outcome(join.await),
        }
    }
}

impl<T> fmt::Debug for ScriptFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFuture")
            .field("done", &self.is_done())
            .finish()
    }
}

fn aborted() -> ScriptError {
    ScriptError::TaskAborted("task ended without a result".to_string())
}
