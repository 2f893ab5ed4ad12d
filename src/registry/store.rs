//! Session registry implementation
//!
//! The central registry that owns every owner's session and launches relay
//! workers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use super::error::AdmissionError;
use super::request::{
    StartRequest, StartResponse, StatusQuery, StopOutcome, StopRequest, StopResponse,
};
use crate::config::RelayConfig;
use crate::pipeline::{worker, RelayJob};
use crate::process::{Credential, FfmpegToolchain, PublishTarget, Toolchain};
use crate::resolver::{MediaResolver, StreamlinkResolver, BEST_QUALITY};
use crate::session::{OwnerId, Session, SessionStatus, StopSignal};

/// How often shutdown and waiters re-check session state
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Central registry for all sessions
///
/// Thread-safe via `RwLock`: the outer map is only write-locked to insert a
/// new owner, and each session has its own lock, so operations on different
/// owners proceed in parallel. Entries are never removed; a finished session
/// stays `Stopped`/`Error` until its owner starts again.
pub struct SessionRegistry {
    /// Map of owner to session
    sessions: RwLock<HashMap<OwnerId, Arc<RwLock<Session>>>>,

    /// Configuration
    config: RelayConfig,

    resolver: Arc<dyn MediaResolver>,
    toolchain: Arc<dyn Toolchain>,
}

impl SessionRegistry {
    /// Create a registry using streamlink and ffmpeg as configured
    pub fn new(config: RelayConfig) -> Self {
        let resolver = Arc::new(StreamlinkResolver::from_config(&config));
        let toolchain = Arc::new(FfmpegToolchain::from_config(&config));
        Self::with_components(config, resolver, toolchain)
    }

    /// Create a registry with custom resolver and toolchain
    pub fn with_components(
        config: RelayConfig,
        resolver: Arc<dyn MediaResolver>,
        toolchain: Arc<dyn Toolchain>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            resolver,
            toolchain,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    async fn entry(&self, owner: &OwnerId) -> Option<Arc<RwLock<Session>>> {
        self.sessions.read().await.get(owner).cloned()
    }

    async fn entry_or_insert(&self, owner: &OwnerId) -> Arc<RwLock<Session>> {
        if let Some(entry) = self.entry(owner).await {
            return entry;
        }

        let mut sessions = self.sessions.write().await;
        Arc::clone(
            sessions
                .entry(owner.clone())
                .or_insert_with(|| Arc::new(RwLock::new(Session::new(owner.clone())))),
        )
    }

    /// Start relaying `urls` for `owner`
    ///
    /// Returns as soon as the run is admitted; the worker runs in the
    /// background and its progress is visible through [`status`].
    ///
    /// [`status`]: SessionRegistry::status
    pub async fn start(
        &self,
        owner: OwnerId,
        urls: Vec<String>,
        quality: &str,
        credential: Credential,
    ) -> Result<(), AdmissionError> {
        if owner.is_blank() {
            return Err(AdmissionError::InvalidOwner);
        }

        let urls: Vec<String> = urls
            .into_iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if urls.is_empty() {
            return Err(AdmissionError::EmptyUrlList);
        }
        if credential.is_blank() {
            return Err(AdmissionError::MissingCredential);
        }

        let quality = match quality.trim() {
            "" => BEST_QUALITY.to_string(),
            q => q.to_string(),
        };
        let item_count = urls.len();

        let entry = self.entry_or_insert(&owner).await;
        let job = {
            let mut session = entry.write().await;
            if session.is_active() {
                tracing::info!(owner = %owner, state = %session.phase(), "Start rejected: already active");
                return Err(AdmissionError::AlreadyActive(owner));
            }

            let run_id = session
                .begin_run(urls, quality.clone())
                .map_err(|_| AdmissionError::AlreadyActive(owner.clone()))?;

            RelayJob {
                owner: owner.clone(),
                run_id,
                session: Arc::clone(&entry),
                resolver: Arc::clone(&self.resolver),
                toolchain: Arc::clone(&self.toolchain),
                target: PublishTarget::new(self.config.rtmp_base.clone(), credential),
                quality: quality.clone(),
                chunk_size: self.config.chunk_size,
                kill_grace: self.config.kill_grace,
                cancel: session.cancel_token(),
            }
        };

        tracing::info!(
            owner = %owner,
            run_id = job.run_id,
            items = item_count,
            quality = %quality,
            "Session admitted"
        );

        worker::spawn(job);
        Ok(())
    }

    /// Stop the owner's current run
    ///
    /// Idempotent: stopping an owner with no session, or one that already
    /// ended, reports [`StopOutcome::NotActive`]. Does not wait for shutdown.
    pub async fn stop(&self, owner: &OwnerId) -> StopOutcome {
        let Some(entry) = self.entry(owner).await else {
            tracing::debug!(owner = %owner, "Stop for unknown owner");
            return StopOutcome::NotActive;
        };

        let mut session = entry.write().await;
        let outcome = match session.request_stop() {
            StopSignal::Signalled => StopOutcome::Stopping,
            StopSignal::AlreadyStopping => StopOutcome::AlreadyStopping,
            StopSignal::Inactive => StopOutcome::NotActive,
        };

        tracing::info!(owner = %owner, state = %session.phase(), outcome = ?outcome, "Stop requested");
        outcome
    }

    /// Snapshot of the owner's session
    ///
    /// Owners that never started get an `Idle` snapshot.
    pub async fn status(&self, owner: &OwnerId) -> SessionStatus {
        match self.entry(owner).await {
            Some(entry) => entry.read().await.status(),
            None => SessionStatus::idle(),
        }
    }

    /// Wait until the owner's session is no longer active
    ///
    /// Returns the final snapshot, or `None` if `timeout` ran out first.
    pub async fn wait_inactive(&self, owner: &OwnerId, timeout: Duration) -> Option<SessionStatus> {
        let wait = async {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            loop {
                ticker.tick().await;
                let status = self.status(owner).await;
                if !status.is_active() {
                    return status;
                }
            }
        };

        tokio::time::timeout(timeout, wait).await.ok()
    }

    /// Get total number of sessions, active or not
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Get number of sessions with a run in progress
    pub async fn active_count(&self) -> usize {
        let entries: Vec<_> = self.sessions.read().await.values().cloned().collect();

        let mut active = 0;
        for entry in entries {
            if entry.read().await.is_active() {
                active += 1;
            }
        }
        active
    }

    /// Stop every active session and wait for them to wind down
    ///
    /// Returns `true` if all sessions became inactive within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let owners: Vec<OwnerId> = self.sessions.read().await.keys().cloned().collect();

        for owner in &owners {
            self.stop(owner).await;
        }

        let drained = tokio::time::timeout(timeout, async {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            loop {
                ticker.tick().await;
                if self.active_count().await == 0 {
                    break;
                }
            }
        })
        .await
        .is_ok();

        if drained {
            tracing::info!(sessions = owners.len(), "Registry shut down");
        } else {
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Registry shutdown timed out with sessions still active"
            );
        }
        drained
    }

    /// Handle a boundary start request
    pub async fn handle_start(&self, request: StartRequest) -> StartResponse {
        let StartRequest {
            owner_token,
            source_urls,
            quality_label,
            destination_credential,
        } = request;
        let count = source_urls.len();

        match self
            .start(
                OwnerId::new(owner_token),
                source_urls,
                &quality_label,
                destination_credential,
            )
            .await
        {
            Ok(()) => StartResponse {
                accepted: true,
                message: format!("relay started with {} video(s) at quality {}", count, quality_label),
            },
            Err(e) => StartResponse {
                accepted: false,
                message: e.to_string(),
            },
        }
    }

    /// Handle a boundary stop request
    pub async fn handle_stop(&self, request: StopRequest) -> StopResponse {
        let outcome = self.stop(&OwnerId::new(request.owner_token)).await;
        StopResponse {
            message: outcome.message().to_string(),
        }
    }

    /// Handle a boundary status query
    pub async fn handle_status(&self, query: StatusQuery) -> SessionStatus {
        self.status(&OwnerId::new(query.owner_token)).await
    }
}
