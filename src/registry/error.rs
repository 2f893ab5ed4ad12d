//! Registry error types
//!
//! Admission errors are returned synchronously from `start` and never reach
//! a worker.

use crate::session::OwnerId;

/// Reason a start request was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// Owner identity is empty
    #[error("owner identity is missing")]
    InvalidOwner,

    /// No source URLs were queued
    #[error("no videos were queued")]
    EmptyUrlList,

    /// Destination credential is empty or absent
    #[error("stream key is missing")]
    MissingCredential,

    /// The owner already has a run in progress
    #[error("a relay is already active for {0}")]
    AlreadyActive(OwnerId),
}
