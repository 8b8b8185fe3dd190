//! Processor errors.

use weft_dispatch::{ConfigurationError, DispatchError};
use weft_event::{JobError, OwningProcess};
use weft_iteration::IterationError;

/// Errors that can occur while building or invoking a processor.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
  /// Inputs could not be expanded into jobs.
  #[error("iteration failed: {0}")]
  Iteration(#[from] IterationError),

  /// The processor definition is invalid.
  #[error("invalid processor configuration: {0}")]
  Configuration(#[from] ConfigurationError),

  /// The dispatch stack is gone.
  #[error("dispatch failed: {0}")]
  Dispatch(#[from] DispatchError),

  /// An invocation under the same owning process is still running.
  #[error("'{owning_process}' is already running")]
  AlreadyRunning { owning_process: OwningProcess },

  /// A process-scoped error ended the invocation.
  #[error("invocation failed: {error}")]
  Failed { error: JobError },

  /// Events arrived in an order the pipeline guarantees never happens.
  #[error("protocol violation: {message}")]
  Protocol { message: String },

  /// Execution was cancelled.
  #[error("invocation cancelled")]
  Cancelled,
}
