//! End-to-end relay runs against scripted tools
//!
//! `sh` stands in for both processes: the publisher appends its input to a
//! file, and each decoder prints its media URI.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_test::{assert_err, assert_ok};
use tracing_subscriber::fmt::MakeWriter;

use vod_relay::process::{Credential, ProcessRole, PublishTarget, Toolchain};
use vod_relay::registry::AdmissionError;
use vod_relay::resolver::{MediaResolver, ResolutionError, ResolvedItem, VariantMap};
use vod_relay::{OwnerId, RelayConfig, SessionPhase, SessionRegistry, StopOutcome};

const WAIT: Duration = Duration::from_secs(15);
const SECRET: &str = "live_42_topsecret";

/// Resolver with a fixed answer per URL
///
/// URLs listed in `media` resolve to `{"best": uri}`; anything else has no
/// streams.
struct ScriptedResolver {
    media: HashMap<String, String>,
    calls: AtomicUsize,
}

impl ScriptedResolver {
    fn new(pairs: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            media: pairs
                .iter()
                .map(|(url, uri)| (url.to_string(), uri.to_string()))
                .collect(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MediaResolver for ScriptedResolver {
    async fn variants(&self, source_url: &str) -> Result<VariantMap, ResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match self.media.get(source_url) {
            Some(uri) => Ok(VariantMap::from([("best".to_string(), uri.clone())])),
            None => Err(ResolutionError::NoStreamsFound),
        }
    }
}

/// Shell-script toolchain that counts publish spawns
///
/// Publish scripts get the output file as `$1` and the full publish URL as
/// `$2`; decode scripts get the media URI as `$1`.
struct ShellToolchain {
    publish: String,
    decode: String,
    out: PathBuf,
    publish_spawns: AtomicUsize,
}

impl ShellToolchain {
    /// Publisher writes its input to `out`; decoder prints the media URI
    fn recording(out: &Path) -> Arc<Self> {
        Self::scripted(r#"cat > "$1""#, r#"printf '%s ' "$1""#, out)
    }

    fn scripted(publish: &str, decode: &str, out: &Path) -> Arc<Self> {
        Arc::new(Self {
            publish: publish.to_string(),
            decode: decode.to_string(),
            out: out.to_path_buf(),
            publish_spawns: AtomicUsize::new(0),
        })
    }

    fn spawns(&self) -> usize {
        self.publish_spawns.load(Ordering::SeqCst)
    }
}

impl Toolchain for ShellToolchain {
    fn publish_command(&self, target: &PublishTarget) -> Command {
        self.publish_spawns.fetch_add(1, Ordering::SeqCst);
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&self.publish)
            .arg("sh")
            .arg(&self.out)
            .arg(target.url());
        command
    }

    fn decode_command(&self, item: &ResolvedItem) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(&self.decode).arg("sh").arg(&item.media_uri);
        command
    }
}

/// Toolchain where one of the two programs cannot be started
///
/// The other one behaves like [`ShellToolchain::recording`].
struct BrokenToolchain {
    broken: ProcessRole,
    program: PathBuf,
    out: PathBuf,
    publish_spawns: AtomicUsize,
}

impl BrokenToolchain {
    fn new(broken: ProcessRole, program: impl Into<PathBuf>, out: &Path) -> Arc<Self> {
        Arc::new(Self {
            broken,
            program: program.into(),
            out: out.to_path_buf(),
            publish_spawns: AtomicUsize::new(0),
        })
    }
}

impl Toolchain for BrokenToolchain {
    fn publish_command(&self, _target: &PublishTarget) -> Command {
        self.publish_spawns.fetch_add(1, Ordering::SeqCst);
        if self.broken == ProcessRole::Publish {
            return Command::new(&self.program);
        }
        let mut command = Command::new("sh");
        command.arg("-c").arg(r#"cat > "$1""#).arg("sh").arg(&self.out);
        command
    }

    fn decode_command(&self, item: &ResolvedItem) -> Command {
        if self.broken == ProcessRole::Decode {
            return Command::new(&self.program);
        }
        let mut command = Command::new("sh");
        command.arg("-c").arg(r#"printf '%s ' "$1""#).arg("sh").arg(&item.media_uri);
        command
    }
}

/// Shared buffer collecting formatted log output
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Whether `pid` still exists, zombies included
fn process_exists(pid: &str) -> bool {
    std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("kill -0 {} 2>/dev/null", pid))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn registry<R, T>(resolver: Arc<R>, toolchain: Arc<T>) -> SessionRegistry
where
    R: MediaResolver + 'static,
    T: Toolchain + 'static,
{
    let config = RelayConfig::default()
        .chunk_size(4096)
        .kill_grace(Duration::from_millis(500));
    SessionRegistry::with_components(config, resolver, toolchain)
}

fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

async fn wait_for(registry: &SessionRegistry, owner: &OwnerId, phase: SessionPhase) {
    let reached = tokio::time::timeout(WAIT, async {
        loop {
            if registry.status(owner).await.state == phase {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "session never reached {}", phase);
}

#[tokio::test]
async fn test_unresolvable_items_are_skipped_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("published.ts");
    let resolver = ScriptedResolver::new(&[("https://v/B", "B"), ("https://v/C", "C")]);
    let toolchain = ShellToolchain::recording(&out);
    let registry = registry(resolver.clone(), toolchain.clone());
    let owner = OwnerId::new("streamer");

    assert_ok!(
        registry
            .start(
                owner.clone(),
                urls(&["https://v/A", "https://v/B", "https://v/C"]),
                "720p",
                Credential::new(SECRET),
            )
            .await
    );

    let status = registry.wait_inactive(&owner, WAIT).await.unwrap();
    assert_eq!(status.state, SessionPhase::Stopped);
    assert!(status.last_error.is_none());
    assert_eq!(status.now_playing, "none");
    assert_eq!(status.items_pending, 0);
    assert_eq!(status.stats.items_relayed, 2);
    assert_eq!(status.stats.items_skipped, 1);
    assert_eq!(status.stats.bytes_relayed, 4);
    assert_eq!(status.publisher_exit_code, Some(0));

    // One publisher for the whole run, fed B then C
    assert_eq!(toolchain.spawns(), 1);
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "B C ");

    // Status reads are side-effect free and never carry the key
    let again = registry.status(&owner).await;
    assert_eq!(status, again);
    assert!(!serde_json::to_string(&again).unwrap().contains(SECRET));
}

#[tokio::test]
async fn test_nothing_resolvable_never_spawns_publisher() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = ScriptedResolver::new(&[]);
    let toolchain = ShellToolchain::recording(&dir.path().join("unused.ts"));
    let registry = registry(resolver.clone(), toolchain.clone());
    let owner = OwnerId::new("streamer");

    assert_ok!(
        registry
            .start(
                owner.clone(),
                urls(&["https://v/X", "https://v/Y"]),
                "best",
                Credential::new(SECRET),
            )
            .await
    );

    let status = registry.wait_inactive(&owner, WAIT).await.unwrap();
    assert_eq!(status.state, SessionPhase::Error);
    assert!(status.last_error.unwrap().contains("no valid media"));
    assert_eq!(status.stats.items_skipped, 2);
    assert_eq!(status.publisher_exit_code, None);
    assert_eq!(toolchain.spawns(), 0);
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_publisher_crash_fails_session() {
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("decoder.pid");
    let pid_path = pid_file.to_string_lossy().into_owned();
    let resolver = ScriptedResolver::new(&[("https://v/1", pid_path.as_str())]);
    // The publisher dies the way ffmpeg does on a refused connection,
    // echoing its output URL; the decoder records its pid and streams forever.
    let toolchain = ShellToolchain::scripted(
        r#"echo "[flv @ 0x1] Error opening output $2: I/O error" >&2; exit 3"#,
        r#"echo $$ > "$1"; exec yes"#,
        &dir.path().join("unused.ts"),
    );
    let registry = registry(resolver, toolchain);
    let owner = OwnerId::new("streamer");

    assert_ok!(
        registry
            .start(owner.clone(), urls(&["https://v/1"]), "best", Credential::new(SECRET))
            .await
    );

    let status = registry.wait_inactive(&owner, WAIT).await.unwrap();
    assert_eq!(status.state, SessionPhase::Error);
    let error = status.last_error.unwrap();
    assert!(error.contains("publish process died"), "got: {}", error);
    assert!(!error.contains(SECRET));
    assert_eq!(status.publisher_exit_code, Some(3));
    assert_eq!(status.now_playing, "none");

    // The in-flight decoder was reaped, not left behind as a zombie
    let decoder_pid = std::fs::read_to_string(&pid_file).unwrap();
    let decoder_pid = decoder_pid.trim();
    assert!(!decoder_pid.is_empty());
    assert!(!process_exists(decoder_pid), "decoder {} still exists", decoder_pid);

    // The publisher's diagnostics are logged with the key masked
    let output = logs.contents();
    assert!(output.contains("Error opening output rtmp://live.twitch.tv/app/[REDACTED]"));
    assert!(!output.contains(SECRET), "stream key leaked into logs");
}

#[tokio::test]
async fn test_missing_decoder_fails_session_and_reaps_publisher() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("published.ts");
    let resolver = ScriptedResolver::new(&[("https://v/1", "one"), ("https://v/2", "two")]);
    let toolchain = BrokenToolchain::new(ProcessRole::Decode, "/nonexistent/ffmpeg", &out);
    let registry = registry(resolver.clone(), toolchain.clone());
    let owner = OwnerId::new("streamer");

    assert_ok!(
        registry
            .start(
                owner.clone(),
                urls(&["https://v/1", "https://v/2"]),
                "best",
                Credential::new(SECRET),
            )
            .await
    );

    let status = registry.wait_inactive(&owner, WAIT).await.unwrap();
    assert_eq!(status.state, SessionPhase::Error);
    let error = status.last_error.unwrap();
    assert!(error.contains("tool not found: /nonexistent/ffmpeg"), "got: {}", error);
    assert_eq!(status.stats.items_relayed, 0);
    assert_eq!(status.items_pending, 0);

    // The publisher got EOF and exited cleanly; the rest of the queue was abandoned
    assert_eq!(status.publisher_exit_code, Some(0));
    assert_eq!(toolchain.publish_spawns.load(Ordering::SeqCst), 1);
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "");
}

#[tokio::test]
async fn test_unstartable_decoder_fails_session() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("published.ts");
    // Exists but is not executable
    let not_executable = dir.path().join("ffmpeg");
    std::fs::write(&not_executable, "not a program").unwrap();

    let resolver = ScriptedResolver::new(&[("https://v/1", "one")]);
    let toolchain = BrokenToolchain::new(ProcessRole::Decode, &not_executable, &out);
    let registry = registry(resolver, toolchain);
    let owner = OwnerId::new("streamer");

    assert_ok!(
        registry
            .start(owner.clone(), urls(&["https://v/1"]), "best", Credential::new(SECRET))
            .await
    );

    let status = registry.wait_inactive(&owner, WAIT).await.unwrap();
    assert_eq!(status.state, SessionPhase::Error);
    let error = status.last_error.unwrap();
    assert!(error.contains("decode process failed"), "got: {}", error);
    assert_eq!(status.publisher_exit_code, Some(0));
}

#[tokio::test]
async fn test_missing_publisher_fails_session() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = ScriptedResolver::new(&[("https://v/1", "one"), ("https://v/2", "two")]);
    let toolchain = BrokenToolchain::new(
        ProcessRole::Publish,
        "/nonexistent/ffmpeg",
        &dir.path().join("unused.ts"),
    );
    let registry = registry(resolver.clone(), toolchain.clone());
    let owner = OwnerId::new("streamer");

    assert_ok!(
        registry
            .start(
                owner.clone(),
                urls(&["https://v/1", "https://v/2"]),
                "best",
                Credential::new(SECRET),
            )
            .await
    );

    let status = registry.wait_inactive(&owner, WAIT).await.unwrap();
    assert_eq!(status.state, SessionPhase::Error);
    let error = status.last_error.unwrap();
    assert!(error.contains("tool not found"), "got: {}", error);
    assert_eq!(status.publisher_exit_code, None);
    assert_eq!(status.items_pending, 0);
    assert_eq!(toolchain.publish_spawns.load(Ordering::SeqCst), 1);
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

    // A failed run does not block the next one
    assert_eq!(registry.stop(&owner).await, StopOutcome::NotActive);
}

#[tokio::test]
async fn test_empty_item_advances_queue() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("published.ts");
    let resolver = ScriptedResolver::new(&[
        ("https://v/1", "one"),
        ("https://v/2", "empty"),
        ("https://v/3", "three"),
    ]);
    // The middle item's decoder exits without writing anything
    let toolchain = ShellToolchain::scripted(
        r#"cat > "$1""#,
        r#"[ "$1" = empty ] || printf '%s ' "$1""#,
        &out,
    );
    let registry = registry(resolver, toolchain);
    let owner = OwnerId::new("streamer");

    assert_ok!(
        registry
            .start(
                owner.clone(),
                urls(&["https://v/1", "https://v/2", "https://v/3"]),
                "best",
                Credential::new(SECRET),
            )
            .await
    );

    let status = registry.wait_inactive(&owner, WAIT).await.unwrap();
    assert_eq!(status.state, SessionPhase::Stopped);
    assert!(status.last_error.is_none());
    assert_eq!(status.stats.items_relayed, 3);
    assert_eq!(status.stats.bytes_relayed, 10);
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "one three ");
}

#[tokio::test]
async fn test_decoder_exit_code_after_output_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("published.ts");
    let resolver = ScriptedResolver::new(&[("https://v/1", "one"), ("https://v/2", "two")]);
    let toolchain = ShellToolchain::scripted(r#"cat > "$1""#, r#"printf '%s ' "$1"; exit 1"#, &out);
    let registry = registry(resolver, toolchain);
    let owner = OwnerId::new("streamer");

    assert_ok!(
        registry
            .start(
                owner.clone(),
                urls(&["https://v/1", "https://v/2"]),
                "best",
                Credential::new(SECRET),
            )
            .await
    );

    let status = registry.wait_inactive(&owner, WAIT).await.unwrap();
    assert_eq!(status.state, SessionPhase::Stopped);
    assert_eq!(status.stats.items_relayed, 2);
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "one two ");
}

#[tokio::test]
async fn test_stop_while_streaming_then_restart() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = ScriptedResolver::new(&[("https://v/1", "endless")]);
    let toolchain = ShellToolchain::scripted("cat > /dev/null", "yes", &dir.path().join("unused.ts"));
    let registry = registry(resolver, toolchain.clone());
    let owner = OwnerId::new("streamer");

    assert_ok!(
        registry
            .start(owner.clone(), urls(&["https://v/1"]), "best", Credential::new(SECRET))
            .await
    );
    wait_for(&registry, &owner, SessionPhase::Streaming).await;

    let status = registry.status(&owner).await;
    assert_eq!(status.now_playing, "https://v/1");

    // A second start while streaming is rejected and changes nothing
    let rejected = assert_err!(
        registry
            .start(owner.clone(), urls(&["https://v/2"]), "best", Credential::new(SECRET))
            .await
    );
    assert_eq!(rejected, AdmissionError::AlreadyActive(owner.clone()));
    assert_eq!(registry.status(&owner).await.now_playing, "https://v/1");

    assert_eq!(registry.stop(&owner).await, StopOutcome::Stopping);
    let again = registry.stop(&owner).await;
    assert!(matches!(again, StopOutcome::AlreadyStopping | StopOutcome::NotActive));

    let status = registry.wait_inactive(&owner, WAIT).await.unwrap();
    assert_eq!(status.state, SessionPhase::Stopped);
    assert!(status.last_error.is_none());
    assert!(status.stats.bytes_relayed > 0);
    assert_eq!(registry.stop(&owner).await, StopOutcome::NotActive);

    // The finished session admits a fresh run
    assert_ok!(
        registry
            .start(owner.clone(), urls(&["https://v/1"]), "best", Credential::new(SECRET))
            .await
    );
    wait_for(&registry, &owner, SessionPhase::Streaming).await;
    assert_eq!(toolchain.spawns(), 2);

    assert!(registry.shutdown(WAIT).await);
    assert_eq!(registry.status(&owner).await.state, SessionPhase::Stopped);
}

#[tokio::test]
async fn test_owners_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = ScriptedResolver::new(&[("https://v/1", "endless")]);
    let toolchain = ShellToolchain::scripted("cat > /dev/null", "yes", &dir.path().join("unused.ts"));
    let registry = registry(resolver, toolchain);
    let alice = OwnerId::new("alice");
    let bob = OwnerId::new("bob");

    for owner in [&alice, &bob] {
        assert_ok!(
            registry
                .start(owner.clone(), urls(&["https://v/1"]), "best", Credential::new(SECRET))
                .await
        );
    }
    wait_for(&registry, &alice, SessionPhase::Streaming).await;
    wait_for(&registry, &bob, SessionPhase::Streaming).await;

    assert_eq!(registry.stop(&alice).await, StopOutcome::Stopping);
    let status = registry.wait_inactive(&alice, WAIT).await.unwrap();
    assert_eq!(status.state, SessionPhase::Stopped);
    assert_eq!(registry.status(&bob).await.state, SessionPhase::Streaming);
    assert_eq!(registry.active_count().await, 1);

    assert!(registry.shutdown(WAIT).await);
    assert_eq!(registry.active_count().await, 0);
}
