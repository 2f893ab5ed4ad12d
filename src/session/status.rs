//! Status snapshots and relay counters

use serde::Serialize;

use super::state::SessionPhase;

/// `now_playing` value when nothing is being relayed
pub const NOW_PLAYING_NONE: &str = "none";

/// Per-run relay counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Items that reached the publisher (including empty ones)
    pub items_relayed: u64,
    /// Items dropped because they failed to resolve
    pub items_skipped: u64,
    /// Bytes written into the publish process
    pub bytes_relayed: u64,
}

impl SessionStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }
}

/// Point-in-time view of a session, safe to hand to clients
///
/// Never carries the destination credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    /// Lifecycle phase
    pub state: SessionPhase,
    /// Source URL of the item being relayed, or [`NOW_PLAYING_NONE`]
    pub now_playing: String,
    /// Diagnostic of the last failed run
    pub last_error: Option<String>,
    /// Quality requested for the current or last run
    pub quality: Option<String>,
    /// URLs still waiting to be resolved
    pub items_pending: usize,
    /// Relay counters of the current or last run
    #[serde(flatten)]
    pub stats: SessionStats,
    /// Exit code of the last publish process, once reaped
    pub publisher_exit_code: Option<i32>,
    /// Wall-clock start of the current or last run (ms since the epoch)
    pub started_at_ms: Option<u64>,
}

impl SessionStatus {
    /// Snapshot for an owner that never started a session
    pub fn idle() -> Self {
        Self {
            state: SessionPhase::Idle,
            now_playing: NOW_PLAYING_NONE.to_string(),
            last_error: None,
            quality: None,
            items_pending: 0,
            stats: SessionStats::new(),
            publisher_exit_code: None,
            started_at_ms: None,
        }
    }

    /// Whether the snapshot shows a run in progress
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_status() {
        let status = SessionStatus::idle();

        assert_eq!(status.state, SessionPhase::Idle);
        assert_eq!(status.now_playing, NOW_PLAYING_NONE);
        assert!(status.last_error.is_none());
        assert!(!status.is_active());
        assert_eq!(status.stats, SessionStats::new());
    }

    #[test]
    fn test_status_serializes_flat() {
        let mut status = SessionStatus::idle();
        status.stats.items_relayed = 2;
        status.stats.bytes_relayed = 1024;

        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["state"], "idle");
        assert_eq!(json["now_playing"], "none");
        assert_eq!(json["items_relayed"], 2);
        assert_eq!(json["bytes_relayed"], 1024);
        assert!(json["last_error"].is_null());
    }
}
