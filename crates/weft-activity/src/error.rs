use thiserror::Error;
use weft_event::ErrorKind;

/// Failure reported by an activity invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActivityError {
  /// The invocation may succeed if attempted again.
  #[error("transient activity failure: {message}")]
  Transient { message: String },

  /// The invocation will not succeed on retry.
  #[error("activity failed: {message}")]
  Fatal { message: String },
}

impl ActivityError {
  pub fn transient(message: impl Into<String>) -> Self {
    ActivityError::Transient {
      message: message.into(),
    }
  }

  pub fn fatal(message: impl Into<String>) -> Self {
    ActivityError::Fatal {
      message: message.into(),
    }
  }

  /// The dispatch error kind this failure maps to.
  pub fn kind(&self) -> ErrorKind {
    match self {
      ActivityError::Transient { .. } => ErrorKind::Transient,
      ActivityError::Fatal { .. } => ErrorKind::Fatal,
    }
  }

  pub fn message(&self) -> &str {
    match self {
      ActivityError::Transient { message } | ActivityError::Fatal { message } => message,
    }
  }
}
