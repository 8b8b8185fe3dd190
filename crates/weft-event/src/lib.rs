//! Weft Event Model
//!
//! This crate defines the messages that flow through a processor's dispatch
//! stack and the addressing scheme they share.
//!
//! Every event is keyed by an [`OwningProcess`] (which nested invocation it
//! belongs to) and an [`Index`] (which position of the iteration space it
//! describes). Jobs flow down the stack, results, completions and errors flow
//! back up:
//!
//! ```text
//!            DownEvent                      UpEvent
//!   ┌──────────────────────┐      ┌──────────────────────┐
//!   │ JobQueue             │      │ Result               │
//!   │ Job                  │      │ Completion           │
//!   │ FinishedWith         │      │ Error                │
//!   └──────────────────────┘      └──────────────────────┘
//! ```

mod data;
mod event;
mod index;
mod process;

pub use data::{Data, DataMap, ErrorDocument};
pub use event::{
  Completion, DownEvent, ErrorKind, ErrorScope, Job, JobError, JobQueue, JobResult, UpEvent,
};
pub use index::Index;
pub use process::OwningProcess;
