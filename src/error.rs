//! Error types
//!
//! Each module carries its own error enum. Failures inside a run never cross
//! the registry boundary; they surface as the session's `last_error`. What
//! remains for callers is configuration and admission.

use crate::config::ConfigError;
use crate::registry::AdmissionError;

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("request rejected: {0}")]
    Admission(#[from] AdmissionError),
}
