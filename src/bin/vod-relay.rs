//! Relay a list of recorded videos to an RTMP ingest as one live stream
//!
//! Usage:
//!   vod-relay --stream-key <KEY> [--quality 720p] <URL>...
//!
//! The stream key may also come from `RELAY_STREAM_KEY`. Ctrl+C stops the
//! relay gracefully; a second Ctrl+C exits immediately.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use vod_relay::process::Credential;
use vod_relay::{OwnerId, RelayConfig, SessionPhase, SessionRegistry, SessionStatus};

/// How often the session status is polled for progress logging
const STATUS_POLL: Duration = Duration::from_millis(500);

/// How long a graceful stop may take before the process gives up
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "vod-relay")]
#[command(about = "Re-broadcast recorded videos back-to-back as one live stream", long_about = None)]
struct Args {
    /// Session owner name
    #[arg(long, default_value = "local")]
    owner: String,

    /// Preferred quality label; falls back to "best"
    #[arg(long, default_value = "best")]
    quality: String,

    /// Stream key of the destination channel
    #[arg(long, env = "RELAY_STREAM_KEY", hide_env_values = true)]
    stream_key: String,

    /// Video page URLs, relayed in order
    #[arg(required = true)]
    urls: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vod_relay=info")),
        )
        .init();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "vod-relay failed");
            ExitCode::FAILURE
        }
    }
}

/// Run one relay; `Ok(false)` when it ended in `Error`
async fn run(args: Args) -> vod_relay::Result<bool> {
    let config = RelayConfig::from_env()?;
    tracing::info!(
        rtmp_base = %config.rtmp_base,
        ffmpeg = %config.ffmpeg_program.display(),
        resolver = %config.resolver_program.display(),
        "Configuration loaded"
    );

    let registry = SessionRegistry::new(config);
    let owner = OwnerId::new(args.owner);

    registry
        .start(
            owner.clone(),
            args.urls,
            &args.quality,
            Credential::new(args.stream_key),
        )
        .await?;

    let status = tokio::select! {
        status = watch(&registry, &owner) => status,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping relay");
            registry.stop(&owner).await;

            tokio::select! {
                status = registry.wait_inactive(&owner, SHUTDOWN_TIMEOUT) => match status {
                    Some(status) => status,
                    None => {
                        tracing::error!("Relay did not stop in time");
                        return Ok(false);
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("Interrupted again, exiting");
                    return Ok(false);
                }
            }
        }
    };

    tracing::info!(
        state = %status.state,
        items_relayed = status.stats.items_relayed,
        items_skipped = status.stats.items_skipped,
        bytes = status.stats.bytes_relayed,
        publisher_exit_code = ?status.publisher_exit_code,
        "Relay ended"
    );

    match status.state {
        SessionPhase::Error => {
            tracing::error!(
                error = status.last_error.as_deref().unwrap_or("unknown"),
                "Relay failed"
            );
            Ok(false)
        }
        _ => Ok(true),
    }
}

/// Log progress until the session is no longer active
async fn watch(registry: &SessionRegistry, owner: &OwnerId) -> SessionStatus {
    let mut ticker = tokio::time::interval(STATUS_POLL);
    let mut last: Option<(SessionPhase, String)> = None;

    loop {
        ticker.tick().await;
        let status = registry.status(owner).await;

        let current = (status.state, status.now_playing.clone());
        if last.as_ref() != Some(&current) {
            tracing::info!(
                state = %status.state,
                now_playing = %status.now_playing,
                pending = status.items_pending,
                "Status"
            );
            last = Some(current);
        }

        if !status.is_active() {
            return status;
        }
    }
}
