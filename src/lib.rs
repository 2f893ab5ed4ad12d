//! VOD relay engine
//!
//! Queues previously recorded videos for a user and re-broadcasts them,
//! back-to-back, as one continuous live stream to an RTMP ingest endpoint.
//!
//! # Architecture
//!
//! ```text
//!   start/stop/status                Arc<SessionRegistry>
//!   (HTTP layer, CLI)  ───────►  ┌──────────────────────────┐
//!                                │ owner ─► RwLock<Session> │
//!                                └────────────┬─────────────┘
//!                                             │ one worker per run
//!                                             ▼
//!          MediaResolver ◄── resolve ── [relay worker] ── spawn ──► publish process
//!                                             │                     (stdin ◄── bytes)
//!                                             └── spawn per item ─► decode process
//!                                                                    (stdout ──► bytes)
//! ```
//!
//! The registry owns every session behind a per-owner lock. Workers never
//! hold a lock across process I/O; they apply short state mutations between
//! suspension points, and `status` always observes a consistent snapshot.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod registry;
pub mod resolver;
pub mod session;

pub use config::RelayConfig;
pub use error::{Error, Result};
pub use registry::{SessionRegistry, StartRequest, StartResponse, StopOutcome};
pub use session::{OwnerId, SessionPhase, SessionStatus};
