//! Typed errors and exception handlers for the script subsystem.
//!
//! Build-time failures come back as `Err` from
//! [`ScriptBuilder::build`](crate::ScriptBuilder::build).
//! Execution-time failures are routed to an [`ExceptionHandler`] and the
//! call yields `None`, unless the caller uses one of the `try_*` methods.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

/// Errors that can occur while building or running scripts.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScriptError {
    /// The builder or script was used in a way its configuration does not allow.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The script variant cannot perform the requested operation.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Reading or opening a script source failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine rejected the source.
    #[error("Compile error: {0}")]
    Compile(String),

    /// The engine failed while evaluating or invoking.
    #[error("Execution error: {0}")]
    Execution(String),

    /// The requested function is not defined by the script.
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    /// The result could not be converted into the requested type.
    #[error("Cannot convert {found} into {expected}")]
    Coercion {
        expected: &'static str,
        found: String,
    },

    /// A timed wait on a [`ScriptFuture`](crate::ScriptFuture) elapsed.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The async task ended without producing a result.
    #[error("Task aborted: {0}")]
    TaskAborted(String),
}

impl ScriptError {
    /// Errors a caller is expected to fix in code rather than handle at runtime.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ScriptError::Configuration(_) | ScriptError::UnsupportedOperation(_)
        )
    }

    pub fn is_coercion(&self) -> bool {
        matches!(self, ScriptError::Coercion { .. })
    }
}

/// Convenience result alias for the script subsystem.
pub type ScriptResult<T> = Result<T, ScriptError>;

/// A stored callback that receives errors at the site where they happen.
///
/// The default handler logs the error and lets the operation continue.
pub struct ExceptionHandler<E: ?Sized> {
    handler: Arc<dyn Fn(&E) + Send + Sync>,
}

impl<E: ?Sized + 'static> ExceptionHandler<E> {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Handler that drops every error without logging.
    pub fn silent() -> Self {
        Self::new(|_| {})
    }

    pub fn handle(&self, err: &E) {
        (self.handler)(err)
    }
}

impl<E: fmt::Display + ?Sized + 'static> ExceptionHandler<E> {
    /// Logs through `tracing` and continues.
    pub fn log_and_continue() -> Self {
        Self::new(|err: &E| error!("Script subsystem error: {}", err))
    }
}

impl<E: fmt::Display + ?Sized + 'static> Default for ExceptionHandler<E> {
    fn default() -> Self {
        Self::log_and_continue()
    }
}

impl<E: ?Sized> Clone for ExceptionHandler<E> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<E: ?Sized> fmt::Debug for ExceptionHandler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionHandler").finish_non_exhaustive()
    }
}
