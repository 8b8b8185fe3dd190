mod error_bounce;
mod failover;
mod looping;
mod parallelize;
mod retry;

pub use error_bounce::ErrorBounce;
pub use failover::Failover;
pub use looping::{ConditionOutcome, Loop, LoopCondition, LoopDecision};
pub use parallelize::Parallelize;
pub use retry::{Retry, RetryClassifier, RetryPolicy};
