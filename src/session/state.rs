//! Session state machine
//!
//! Tracks one owner's relay run from admission to its terminal state, and
//! keeps the data-model invariants:
//!
//! - a [`PublishHandle`] is present iff the phase is `Streaming` or `Stopping`
//! - the pending queue is empty whenever the phase is `Idle`, `Stopped` or
//!   `Error`

use std::collections::VecDeque;
use std::fmt;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::status::{SessionStats, SessionStatus, NOW_PLAYING_NONE};
use super::OwnerId;

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// Never started
    Idle,
    /// Admitted; resolving the first playable item
    Resolving,
    /// Publish process running, items being relayed
    Streaming,
    /// Stop requested; publish process being shut down
    Stopping,
    /// Run finished normally or on request
    Stopped,
    /// Run failed; see `last_error`
    Error,
}

impl SessionPhase {
    /// Whether a run is in progress (a new start must be rejected)
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionPhase::Resolving | SessionPhase::Streaming | SessionPhase::Stopping
        )
    }

    /// Whether a publish process belongs to the session in this phase
    pub fn holds_publisher(self) -> bool {
        matches!(self, SessionPhase::Streaming | SessionPhase::Stopping)
    }

    /// Whether the transition `self -> to` is allowed
    pub fn can_transition(self, to: SessionPhase) -> bool {
        use SessionPhase::*;

        match (self, to) {
            (Idle | Stopped | Error, Resolving) => true,
            (Resolving, Streaming | Stopped) => true,
            (Streaming, Stopping | Stopped) => true,
            (Stopping, Stopped) => true,
            (from, Error) => from != Error,
            _ => false,
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Resolving => "resolving",
            SessionPhase::Streaming => "streaming",
            SessionPhase::Stopping => "stopping",
            SessionPhase::Stopped => "stopped",
            SessionPhase::Error => "error",
        };
        f.write_str(name)
    }
}

/// Rejected phase change
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot move session from {from} to {to}")]
pub struct TransitionError {
    pub from: SessionPhase,
    pub to: SessionPhase,
}

/// The session's claim on its publish process
///
/// The process itself lives with the relay worker that writes into it; the
/// session holds this record for as long as that process is its publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishHandle {
    /// OS process id of the publisher
    pub pid: Option<u32>,
    /// When the publisher was spawned
    pub spawned_at: Instant,
}

impl PublishHandle {
    /// Create a handle for a freshly spawned publisher
    pub fn new(pid: Option<u32>) -> Self {
        Self {
            pid,
            spawned_at: Instant::now(),
        }
    }
}

/// Result of asking a session to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Stop signalled; the worker is shutting down
    Signalled,
    /// A stop was already in progress
    AlreadyStopping,
    /// No run in progress
    Inactive,
}

/// One owner's session
#[derive(Debug)]
pub struct Session {
    owner: OwnerId,
    phase: SessionPhase,
    pending: VecDeque<String>,
    now_playing: Option<String>,
    publisher: Option<PublishHandle>,
    last_error: Option<String>,
    publisher_exit_code: Option<i32>,
    quality: String,
    stats: SessionStats,
    started_at_ms: Option<u64>,
    run_id: u64,
    cancel: CancellationToken,
}

impl Session {
    /// Create an idle session for `owner`
    pub fn new(owner: OwnerId) -> Self {
        Self {
            owner,
            phase: SessionPhase::Idle,
            pending: VecDeque::new(),
            now_playing: None,
            publisher: None,
            last_error: None,
            publisher_exit_code: None,
            quality: String::new(),
            stats: SessionStats::new(),
            started_at_ms: None,
            run_id: 0,
            cancel: CancellationToken::new(),
        }
    }

    /// Current phase
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Whether a run is in progress
    pub fn is_active(&self) -> bool {
        self.phase.is_active()
    }

    /// Identifier of the current run; bumps on every admitted start
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Cancellation token of the current run
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Publisher record, present while streaming or stopping
    pub fn publisher(&self) -> Option<&PublishHandle> {
        self.publisher.as_ref()
    }

    /// Number of URLs not yet taken from the queue
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn transition(&mut self, to: SessionPhase) -> Result<(), TransitionError> {
        if !self.phase.can_transition(to) {
            return Err(TransitionError {
                from: self.phase,
                to,
            });
        }

        tracing::debug!(owner = %self.owner, from = %self.phase, to = %to, "Session transition");
        self.phase = to;
        Ok(())
    }

    /// Admit a new run: `Idle | Stopped | Error -> Resolving`
    ///
    /// Re-initialises the queue, now-playing pointer, counters and
    /// diagnostics, and returns the new run id.
    pub fn begin_run(
        &mut self,
        urls: impl IntoIterator<Item = String>,
        quality: impl Into<String>,
    ) -> Result<u64, TransitionError> {
        self.transition(SessionPhase::Resolving)?;

        self.pending = urls.into_iter().collect();
        self.now_playing = None;
        self.publisher = None;
        self.last_error = None;
        self.publisher_exit_code = None;
        self.quality = quality.into();
        self.stats = SessionStats::new();
        self.started_at_ms = Some(unix_millis());
        self.cancel = CancellationToken::new();
        self.run_id += 1;

        Ok(self.run_id)
    }

    /// Take the next URL, front to back
    pub fn next_pending(&mut self) -> Option<String> {
        self.pending.pop_front()
    }

    /// Publisher spawned: `Resolving -> Streaming`
    pub fn begin_streaming(&mut self, handle: PublishHandle) -> Result<(), TransitionError> {
        self.transition(SessionPhase::Streaming)?;
        self.publisher = Some(handle);
        Ok(())
    }

    /// Point `now_playing` at an item's source URL
    pub fn set_now_playing(&mut self, source_url: impl Into<String>) {
        self.now_playing = Some(source_url.into());
    }

    /// Count bytes written into the publisher
    pub fn add_bytes(&mut self, bytes: u64) {
        self.stats.bytes_relayed += bytes;
    }

    /// Count an item that was relayed to its end
    pub fn item_relayed(&mut self) {
        self.stats.items_relayed += 1;
    }

    /// Count an item dropped because it failed to resolve
    pub fn item_skipped(&mut self) {
        self.stats.items_skipped += 1;
    }

    /// Ask the current run to stop
    ///
    /// While streaming this moves to `Stopping`. While resolving the phase is
    /// left alone: the worker observes the cancellation and finishes the run
    /// itself, so a new run can never be admitted alongside it.
    pub fn request_stop(&mut self) -> StopSignal {
        match self.phase {
            SessionPhase::Streaming => match self.transition(SessionPhase::Stopping) {
                Ok(()) => {
                    self.cancel.cancel();
                    StopSignal::Signalled
                }
                Err(_) => StopSignal::Inactive,
            },
            SessionPhase::Resolving => {
                if self.cancel.is_cancelled() {
                    return StopSignal::AlreadyStopping;
                }
                self.cancel.cancel();
                StopSignal::Signalled
            }
            SessionPhase::Stopping => StopSignal::AlreadyStopping,
            SessionPhase::Idle | SessionPhase::Stopped | SessionPhase::Error => {
                StopSignal::Inactive
            }
        }
    }

    /// Publisher exited on its own while streaming: `Streaming -> Stopping`
    pub fn publisher_gone(&mut self) -> Result<(), TransitionError> {
        self.transition(SessionPhase::Stopping)
    }

    /// Finish the run normally or on request: `-> Stopped`
    pub fn finish(&mut self, publisher_exit_code: Option<i32>) -> Result<(), TransitionError> {
        self.transition(SessionPhase::Stopped)?;
        self.clear_run(publisher_exit_code);
        Ok(())
    }

    /// Fail the run with a diagnostic: `-> Error`
    pub fn fail(
        &mut self,
        diagnostic: impl Into<String>,
        publisher_exit_code: Option<i32>,
    ) -> Result<(), TransitionError> {
        self.transition(SessionPhase::Error)?;
        self.last_error = Some(diagnostic.into());
        self.clear_run(publisher_exit_code);
        Ok(())
    }

    fn clear_run(&mut self, publisher_exit_code: Option<i32>) {
        self.pending.clear();
        self.now_playing = None;
        self.publisher = None;
        if publisher_exit_code.is_some() {
            self.publisher_exit_code = publisher_exit_code;
        }
        // Anything still watching this run's token is done.
        self.cancel.cancel();
    }

    /// Consistent snapshot for status queries
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.phase,
            now_playing: self
                .now_playing
                .clone()
                .unwrap_or_else(|| NOW_PLAYING_NONE.to_string()),
            last_error: self.last_error.clone(),
            quality: (self.run_id > 0).then(|| self.quality.clone()),
            items_pending: self.pending.len(),
            stats: self.stats,
            publisher_exit_code: self.publisher_exit_code,
            started_at_ms: self.started_at_ms,
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
