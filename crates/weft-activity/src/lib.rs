//! Weft Activity
//!
//! The activity contract consumed by the dispatch stack: given the data for
//! one job, produce named outputs or fail. Activities are supplied by the
//! embedding application; this crate only defines the trait, its error type,
//! a closure adapter and a name-keyed registry.

mod activity;
mod error;
mod registry;

pub use activity::{Activity, ActivityRef, FnActivity};
pub use error::ActivityError;
pub use registry::ActivityRegistry;
