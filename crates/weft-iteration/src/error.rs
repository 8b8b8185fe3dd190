//! Iteration errors.

use thiserror::Error;
use weft_event::Index;

/// Configuration errors raised while building or instantiating a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IterationError {
  /// A leaf names a port the processor does not declare.
  #[error("iteration strategy references unknown input port '{port}'")]
  UnknownPort { port: String },

  /// The same port appears twice in the tree.
  #[error("input port '{port}' appears more than once in the iteration strategy")]
  DuplicatePort { port: String },

  /// A dot product with no children.
  #[error("dot product node has no children")]
  EmptyNode,

  /// An iterated port has no input data.
  #[error("no input data for iterated port '{port}'")]
  MissingInput { port: String },

  /// Dot product children differ in depth or element count.
  #[error("cardinality mismatch in dot product over {ports}: expected {expected}, found {actual}")]
  CardinalityMismatch {
    ports: String,
    expected: usize,
    actual: usize,
  },

  /// Dot product children agree in depth and count but not in the positions
  /// of their elements, as with ragged nested lists.
  #[error("element positions differ in dot product over {ports}: {expected} against {actual}")]
  IndexMismatch {
    ports: String,
    expected: Index,
    actual: Index,
  },
}
