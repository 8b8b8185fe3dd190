//! Weft Config
//!
//! This crate contains the serializable configuration types for a weft
//! processor: its ports, its iteration strategy and its dispatch stack.
//! These types describe a processor before its activities are resolved and
//! its stack is assembled.
//!
//! Configuration is plain JSON, for example:
//!
//! ```json
//! {
//!   "name": "fetch",
//!   "activities": ["http_fetch", "cached_fetch"],
//!   "input_ports": [{ "name": "url" }, { "name": "headers", "depth": 1 }],
//!   "output_ports": [{ "name": "body" }],
//!   "iteration": { "type": "port", "name": "url" },
//!   "dispatch": [
//!     { "type": "parallelize", "max_jobs": 4 },
//!     { "type": "failover" },
//!     { "type": "retry", "max_attempts": 3, "initial_delay_ms": 100 }
//!   ]
//! }
//! ```

mod enums;
mod iteration;
mod layer;
mod processor;

pub use enums::{Comparison, RetryBackoff};
pub use iteration::IterationDef;
pub use layer::{LayerDef, LoopDef, ParallelizeDef, RetryDef};
pub use processor::{PortDef, ProcessorDef};

/// Name of the loop-control port on a loop condition activity.
pub const LOOP_PORT: &str = "loop";
