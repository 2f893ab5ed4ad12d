//! Session lifecycle
//!
//! One [`Session`] per owner records where that owner's relay run is:
//!
//! ```text
//!  Idle ──► Resolving ──► Streaming ──► Stopping ──► Stopped
//!              │  │           │  │                     │
//!              │  └──────────────┴──────► Stopped      │
//!              └──────► Error ◄──┘                     │
//!                        │                             │
//!                        └──────► Resolving ◄──────────┘  (next run)
//! ```

pub mod state;
pub mod status;

use std::fmt;

pub use state::{PublishHandle, Session, SessionPhase, StopSignal, TransitionError};
pub use status::{SessionStats, SessionStatus, NOW_PLAYING_NONE};

/// Authenticated user identity a session belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(String);

impl OwnerId {
    /// Create an owner id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is empty or whitespace
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for OwnerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
