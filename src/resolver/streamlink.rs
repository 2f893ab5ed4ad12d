//! Process-backed resolver
//!
//! Runs a streamlink-compatible tool as `<program> [args..] --json <url>` and
//! reads the variant table from its JSON output:
//!
//! ```text
//! {"plugin": "twitch", "streams": {"720p": {"type": "hls", "url": "https://..."}, "best": {...}}}
//! {"error": "No playable streams found on this URL: https://..."}
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::{MediaResolver, ResolutionError, VariantMap};
use crate::config::RelayConfig;

/// Error fragments that mean the source simply has nothing to play
const NO_STREAMS_MARKERS: &[&str] = &["No playable streams", "No plugin can handle URL"];

#[derive(Debug, Deserialize)]
struct StreamlinkOutput {
    #[serde(default)]
    streams: HashMap<String, StreamlinkStream>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamlinkStream {
    #[serde(default)]
    url: Option<String>,
}

/// Resolver that shells out to streamlink
#[derive(Debug, Clone)]
pub struct StreamlinkResolver {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl StreamlinkResolver {
    /// Create a resolver for `program`, bounded by `timeout` per call
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
        }
    }

    /// Create a resolver from relay configuration
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.resolver_program.clone(), config.resolver_timeout)
    }

    /// Add an argument placed before `--json <url>`
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

#[async_trait]
impl MediaResolver for StreamlinkResolver {
    async fn variants(&self, source_url: &str) -> Result<VariantMap, ResolutionError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--json")
            .arg(source_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ResolutionError::ResolverUnavailable(format!(
                    "failed to run {}: {}",
                    self.program.display(),
                    e
                )));
            }
            Err(_) => {
                return Err(ResolutionError::ResolverUnavailable(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        tracing::debug!(
            source = %source_url,
            status = ?output.status.code(),
            stdout_bytes = output.stdout.len(),
            "Resolver finished"
        );

        // streamlink exits non-zero on errors but still prints the JSON body,
        // so the body decides.
        match parse_output(&output.stdout) {
            Err(ResolutionError::ResolverUnavailable(reason)) if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(ResolutionError::ResolverUnavailable(format!(
                    "{} (exit {:?}): {}",
                    reason,
                    output.status.code(),
                    stderr.trim()
                )))
            }
            other => other,
        }
    }
}

/// Parse a streamlink `--json` document into a variant table
pub(crate) fn parse_output(stdout: &[u8]) -> Result<VariantMap, ResolutionError> {
    let parsed: StreamlinkOutput = serde_json::from_slice(stdout).map_err(|e| {
        ResolutionError::ResolverUnavailable(format!("unreadable resolver output: {}", e))
    })?;

    if let Some(error) = parsed.error {
        if NO_STREAMS_MARKERS.iter().any(|m| error.contains(m)) {
            return Err(ResolutionError::NoStreamsFound);
        }
        return Err(ResolutionError::ResolverUnavailable(error));
    }

    let variants: VariantMap = parsed
        .streams
        .into_iter()
        .filter_map(|(label, stream)| stream.url.map(|url| (label, url)))
        .collect();

    if variants.is_empty() {
        return Err(ResolutionError::NoStreamsFound);
    }

    Ok(variants)
}
