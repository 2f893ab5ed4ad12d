//! External tool processes
//!
//! The relay drives two kinds of processes, both built by a [`Toolchain`]:
//!
//! - one **publish** process per session, reading a raw MPEG-TS stream on
//!   stdin and pushing it to the RTMP destination
//! - one **decode** process per item, fetching the resolved media URI and
//!   writing a stream compatible with the publisher to stdout (video passed
//!   through, audio re-encoded to a fixed codec so items concatenate cleanly)

pub mod child;
pub mod target;

use std::path::PathBuf;

use tokio::process::Command;

use crate::config::RelayConfig;
use crate::resolver::ResolvedItem;

pub use child::{ManagedChild, ProcessRole};
pub use target::{Credential, PublishTarget};

/// Builds the commands for the publish and decode processes
///
/// Implementations only describe the command; stdio wiring and lifecycle
/// belong to [`ManagedChild`].
pub trait Toolchain: Send + Sync {
    /// Command for the long-lived publish process bound to `target`
    fn publish_command(&self, target: &PublishTarget) -> Command;

    /// Command for the decode process of one item
    fn decode_command(&self, item: &ResolvedItem) -> Command;
}

/// ffmpeg on both ends of the pipe
#[derive(Debug, Clone)]
pub struct FfmpegToolchain {
    program: PathBuf,
    audio_codec: String,
    audio_bitrate: String,
}

impl FfmpegToolchain {
    /// Create a toolchain from relay configuration
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            program: config.ffmpeg_program.clone(),
            audio_codec: config.audio_codec.clone(),
            audio_bitrate: config.audio_bitrate.clone(),
        }
    }
}

impl Toolchain for FfmpegToolchain {
    fn publish_command(&self, target: &PublishTarget) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(["-hide_banner", "-loglevel", "warning", "-nostats"])
            .args(["-fflags", "+genpts", "-f", "mpegts", "-i", "pipe:0"])
            .args(["-c", "copy", "-f", "flv"])
            .arg(target.url());
        command
    }

    fn decode_command(&self, item: &ResolvedItem) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-re"])
            .arg("-i")
            .arg(&item.media_uri)
            .args(["-map", "0:v:0?", "-map", "0:a:0?"])
            .args(["-c:v", "copy"])
            .args([
                "-c:a",
                self.audio_codec.as_str(),
                "-b:a",
                self.audio_bitrate.as_str(),
                "-ar",
                "44100",
            ])
            .args(["-f", "mpegts", "pipe:1"]);
        command
    }
}
