//! Relay pipeline
//!
//! Concatenates a session's queued videos into one outgoing stream: one
//! publish process for the whole run, one decode process per item, and a
//! bounded copy loop between them.

pub mod copy;
pub mod error;
pub mod worker;

pub use copy::{copy_item, CopyOutcome};
pub use error::PipelineError;
pub use worker::RelayJob;
