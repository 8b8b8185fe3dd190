//! Weft Processor
//!
//! Ties the pieces together for one processor definition: its activities are
//! resolved from a registry, its inputs are expanded by the iteration
//! strategy, the resulting job queue runs through the dispatch stack and the
//! results are folded back into one collection per output port.
//!
//! ```ignore
//! let processor = Processor::new(def, &registry)?;
//!
//! let mut inputs = DataMap::new();
//! inputs.insert("url".to_string(), Data::list([Data::value("a"), Data::value("b")]));
//!
//! let output = processor.invoke(inputs)?.wait().await?;
//! ```

mod error;
mod invocation;
mod processor;

pub use error::ProcessorError;
pub use invocation::{ProcessorInvocation, ProcessorOutput};
pub use processor::Processor;
