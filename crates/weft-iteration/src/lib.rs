//! Weft Iteration
//!
//! An iteration strategy is a small combinator tree over a processor's input
//! ports. Given the named input collections of one invocation it produces the
//! ordered, finite sequence of scalar jobs for that invocation.
//!
//! ```text
//! cross(a, b)   a=[x,y] b=[p,q]   →  [0,0]{a:x,b:p} [0,1]{a:x,b:q}
//!                                     [1,0]{a:y,b:p} [1,1]{a:y,b:q}
//!
//! dot(a, b)     a=[x,y] b=[p,q]   →  [0]{a:x,b:p} [1]{a:y,b:q}
//! ```
//!
//! Cross products enumerate in row-major order with the leftmost child
//! varying slowest; dot products walk their children in lock-step and reject
//! children of different shape before producing any job.

mod error;
mod strategy;

pub use error::IterationError;
pub use strategy::{IterationNode, IterationStrategy};
