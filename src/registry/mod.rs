//! Session registry
//!
//! The registry is the control surface of the relay engine: it admits runs,
//! signals stops and answers status queries, one session per owner.
//!
//! # Architecture
//!
//! ```text
//!                     Arc<SessionRegistry>
//!                ┌──────────────────────────────┐
//!                │ sessions: HashMap<OwnerId,   │
//!                │   Arc<RwLock<Session>>       │
//!                │ >                            │
//!                └──────────────┬───────────────┘
//!                               │
//!        ┌──────────────────────┼──────────────────────┐
//!        │                      │                      │
//!        ▼                      ▼                      ▼
//!     start()                 stop()                status()
//!   begin_run +           cancel token           read snapshot
//!   spawn worker ──► [relay worker] writes phase, now_playing, stats
//! ```
//!
//! Admission checks and the `Resolving` transition happen under the same
//! per-owner write lock, so two concurrent starts for one owner can never
//! both be admitted.

pub mod error;
pub mod request;
pub mod store;

pub use error::AdmissionError;
pub use request::{StartRequest, StartResponse, StatusQuery, StopOutcome, StopRequest, StopResponse};
pub use store::SessionRegistry;
