//! Relay configuration
//!
//! Tool locations, the RTMP ingest base, copy-loop sizing and the bounded
//! waits applied to every external process. Loaded from `RELAY_*`
//! environment variables or built with the chained setters.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default RTMP ingest base (Twitch primary ingest)
pub const DEFAULT_RTMP_BASE: &str = "rtmp://live.twitch.tv/app";

/// Default copy-loop chunk size
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Smallest accepted copy-loop chunk size
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;

/// Largest accepted copy-loop chunk size
pub const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Error raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Relay engine configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// RTMP ingest base; the stream key is appended as `base/key`
    pub rtmp_base: String,

    /// Transcoder executable used for both decode and publish processes
    pub ffmpeg_program: PathBuf,

    /// Resolver executable (streamlink-compatible `--json` output)
    pub resolver_program: PathBuf,

    /// Copy-loop buffer size in bytes
    pub chunk_size: usize,

    /// How long a process may take to exit after its graceful step
    /// before it is force-killed
    pub kill_grace: Duration,

    /// Upper bound on one resolver invocation
    pub resolver_timeout: Duration,

    /// Audio codec for the decode stage (video is passed through)
    pub audio_codec: String,

    /// Audio bitrate for the decode stage
    pub audio_bitrate: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            rtmp_base: DEFAULT_RTMP_BASE.to_string(),
            ffmpeg_program: PathBuf::from("ffmpeg"),
            resolver_program: PathBuf::from("streamlink"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            kill_grace: Duration::from_secs(5),
            resolver_timeout: Duration::from_secs(30),
            audio_codec: "aac".to_string(),
            audio_bitrate: "160k".to_string(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a variable map
    ///
    /// Unset variables keep their defaults.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(base) = vars.get("RELAY_RTMP_BASE") {
            let base = base.trim_end_matches('/');
            if !base.starts_with("rtmp://") && !base.starts_with("rtmps://") {
                return Err(ConfigError::Invalid {
                    var: "RELAY_RTMP_BASE",
                    reason: "must start with rtmp:// or rtmps://".to_string(),
                });
            }
            config.rtmp_base = base.to_string();
        }
        if let Some(program) = vars.get("RELAY_FFMPEG") {
            config.ffmpeg_program = PathBuf::from(program);
        }
        if let Some(program) = vars.get("RELAY_RESOLVER") {
            config.resolver_program = PathBuf::from(program);
        }
        if let Some(value) = vars.get("RELAY_CHUNK_SIZE") {
            let size = parse_number("RELAY_CHUNK_SIZE", value)?;
            if !(MIN_CHUNK_SIZE as u64..=MAX_CHUNK_SIZE as u64).contains(&size) {
                return Err(ConfigError::Invalid {
                    var: "RELAY_CHUNK_SIZE",
                    reason: format!(
                        "must be between {} and {}, got {}",
                        MIN_CHUNK_SIZE, MAX_CHUNK_SIZE, size
                    ),
                });
            }
            config.chunk_size = size as usize;
        }
        if let Some(value) = vars.get("RELAY_KILL_GRACE_MS") {
            config.kill_grace = Duration::from_millis(parse_number("RELAY_KILL_GRACE_MS", value)?);
        }
        if let Some(value) = vars.get("RELAY_RESOLVER_TIMEOUT_MS") {
            let millis = parse_number("RELAY_RESOLVER_TIMEOUT_MS", value)?;
            if millis == 0 {
                return Err(ConfigError::Invalid {
                    var: "RELAY_RESOLVER_TIMEOUT_MS",
                    reason: "must be positive".to_string(),
                });
            }
            config.resolver_timeout = Duration::from_millis(millis);
        }
        if let Some(bitrate) = vars.get("RELAY_AUDIO_BITRATE") {
            config.audio_bitrate = bitrate.clone();
        }

        Ok(config)
    }

    /// Set the RTMP ingest base
    pub fn rtmp_base(mut self, base: impl Into<String>) -> Self {
        self.rtmp_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the transcoder executable
    pub fn ffmpeg_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.ffmpeg_program = program.into();
        self
    }

    /// Set the resolver executable
    pub fn resolver_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.resolver_program = program.into();
        self
    }

    /// Set the copy-loop chunk size
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        self
    }

    /// Set the grace period before a forced kill
    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Set the resolver timeout
    pub fn resolver_timeout(mut self, timeout: Duration) -> Self {
        self.resolver_timeout = timeout;
        self
    }
}

fn parse_number(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|e| ConfigError::Invalid {
        var,
        reason: format!("expected an integer, got '{}': {}", value, e),
    })
}
