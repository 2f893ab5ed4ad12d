//! Boundary request and response shapes
//!
//! What an HTTP layer exchanges with the registry. Wire format and routing
//! live outside this crate; these only fix the shapes.

use serde::{Deserialize, Serialize};

use crate::process::Credential;
use crate::resolver::BEST_QUALITY;

fn default_quality() -> String {
    BEST_QUALITY.to_string()
}

/// Start re-broadcasting a list of videos
#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest {
    /// Authenticated owner identity
    pub owner_token: String,
    /// Video page URLs, relayed in this order
    pub source_urls: Vec<String>,
    /// Requested quality label; `best` when omitted
    #[serde(default = "default_quality")]
    pub quality_label: String,
    /// Stream key of the destination channel
    #[serde(default)]
    pub destination_credential: Credential,
}

/// Answer to a start request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartResponse {
    pub accepted: bool,
    pub message: String,
}

/// Stop the owner's current run
#[derive(Debug, Clone, Deserialize)]
pub struct StopRequest {
    pub owner_token: String,
}

/// Answer to a stop request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopResponse {
    pub message: String,
}

/// Ask for the owner's session status
#[derive(Debug, Clone, Deserialize)]
pub struct StatusQuery {
    pub owner_token: String,
}

/// Result of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// Stop signalled; poll status to see it complete
    Stopping,
    /// A stop was already under way
    AlreadyStopping,
    /// Nothing to stop (no session, or it already ended)
    NotActive,
}

impl StopOutcome {
    /// Human-readable message for clients
    pub fn message(self) -> &'static str {
        match self {
            StopOutcome::Stopping => "relay is stopping",
            StopOutcome::AlreadyStopping => "relay is already stopping",
            StopOutcome::NotActive => "relay is already inactive",
        }
    }
}
