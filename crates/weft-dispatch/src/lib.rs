//! Weft Dispatch
//!
//! A dispatch stack sits between a processor's iteration strategy and its
//! activities. A job queue enters at the top; each layer may split, delay,
//! repeat or redirect jobs on their way down, and may absorb, rewrite or
//! annotate the results, completions and errors coming back up:
//!
//! ```text
//!   JobQueue ──▶ ┌──────────────┐ ──▶ report (Result / Completion / Error)
//!                │ parallelize  │
//!                ├──────────────┤
//!                │ error_bounce │
//!                ├──────────────┤
//!                │ failover     │
//!                ├──────────────┤
//!                │ retry        │
//!                ├──────────────┤
//!                │ invoke       │ ──▶ activities[job.activity]
//!                └──────────────┘
//! ```
//!
//! Every layer runs as its own task with a private inbox and only talks to
//! its neighbors through channels. Timers and loop conditions report back to
//! the layer that scheduled them through the same inbox.

mod error;
mod health;
mod invoke;
mod layer;
pub mod layers;
mod report;
mod stack;

pub use error::{ConfigurationError, DispatchError};
pub use health::{HealthWarning, check_loop_condition, check_stack};
pub use invoke::Invoker;
pub use layer::{DispatchLayer, LayerContext, Wake};
pub use report::{ChannelReport, NoopReport, ProcessReport};
pub use stack::DispatchStack;
