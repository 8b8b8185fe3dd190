use thiserror::Error;

/// Invalid dispatch stack configuration, detected while assembling a stack.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
  #[error("the parallelize layer must be the first layer of the stack, found at position {position}")]
  ParallelizeNotFirst { position: usize },

  #[error("the stack contains more than one parallelize layer")]
  DuplicateParallelize,

  #[error("loop layer at position {loop_position} sits below the retry layer at position {retry_position}")]
  LoopBelowRetry {
    loop_position: usize,
    retry_position: usize,
  },

  #[error("processor has no activities to dispatch to")]
  NoActivities,

  #[error("unknown activity '{name}'")]
  UnknownActivity { name: String },

  #[error("invalid {layer} layer: {message}")]
  InvalidLayer { layer: &'static str, message: String },
}

/// Errors raised by a running dispatch stack.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
  #[error("dispatch stack has shut down")]
  StackClosed,
}
