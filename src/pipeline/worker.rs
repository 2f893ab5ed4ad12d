//! Per-session relay worker
//!
//! One worker drives one run of one session:
//!
//! 1. take URLs from the queue and resolve them until one succeeds (failures
//!    are skipped); none at all ends the run with `NoValidMedia` before any
//!    process is spawned
//! 2. spawn the publish process and move the session to `Streaming`
//! 3. for each item, in queue order: point `now_playing` at it, spawn its
//!    decode process, copy its output into the publisher, reap it
//! 4. resolve the next URL only once the previous item is done
//! 5. close the publisher's input, reap it, record its exit code
//!
//! The session lock is only taken for short mutations between suspension
//! points, never across process I/O.

use std::sync::Arc;
use std::time::Duration;

use tokio::process::ChildStdin;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::copy::{copy_item, CopyOutcome};
use super::error::PipelineError;
use crate::process::{ManagedChild, ProcessRole, PublishTarget, Toolchain};
use crate::resolver::{MediaResolver, ResolvedItem};
use crate::session::{OwnerId, PublishHandle, Session, SessionPhase};

/// Everything one run needs, detached from the registry
pub struct RelayJob {
    pub owner: OwnerId,
    pub run_id: u64,
    pub session: Arc<RwLock<Session>>,
    pub resolver: Arc<dyn MediaResolver>,
    pub toolchain: Arc<dyn Toolchain>,
    pub target: PublishTarget,
    pub quality: String,
    pub chunk_size: usize,
    pub kill_grace: Duration,
    pub cancel: CancellationToken,
}

/// Next step of the queue
enum Next {
    Item(ResolvedItem),
    Exhausted,
    Cancelled,
}

/// How one item ended
enum ItemEnd {
    Done,
    Cancelled,
    Failed(PipelineError),
}

/// How the whole run ended
enum RunEnd {
    Finished,
    Cancelled,
    Failed(PipelineError),
}

/// Spawn the worker for `job` under a supervisor
///
/// If the worker panics the supervisor fails the session, so it can never
/// stay active without a worker behind it.
pub fn spawn(job: RelayJob) -> JoinHandle<()> {
    let session = Arc::clone(&job.session);
    let owner = job.owner.clone();
    let run_id = job.run_id;
    let worker = tokio::spawn(run(job));

    tokio::spawn(async move {
        if let Err(e) = worker.await {
            tracing::error!(owner = %owner, run_id = run_id, error = %e, "Relay worker aborted");

            let mut session = session.write().await;
            if session.run_id() == run_id && session.is_active() {
                if let Err(e) = session.fail(format!("relay worker aborted: {}", e), None) {
                    tracing::error!(owner = %owner, error = %e, "Failed to record worker abort");
                }
            }
        }
    })
}

/// Drive one run to completion
pub async fn run(job: RelayJob) {
    tracing::info!(
        owner = %job.owner,
        run_id = job.run_id,
        quality = %job.quality,
        target = %job.target,
        "Relay run started"
    );

    let first = match job.next_item().await {
        Next::Item(item) => item,
        Next::Exhausted => {
            job.conclude(RunEnd::Failed(PipelineError::NoValidMedia), None)
                .await;
            return;
        }
        Next::Cancelled => {
            job.conclude(RunEnd::Cancelled, None).await;
            return;
        }
    };

    let command = job.toolchain.publish_command(&job.target);
    let program = program_name(&command);
    let secret = Some(job.target.secret().to_string());
    let mut publisher = match ManagedChild::spawn_redacted(ProcessRole::Publish, command, secret) {
        Ok(child) => child,
        Err(e) => {
            let error = PipelineError::spawn_failed(ProcessRole::Publish, &program, &e);
            job.conclude(RunEnd::Failed(error), None).await;
            return;
        }
    };

    let Some(mut stdin) = publisher.take_stdin() else {
        let status = publisher.reap(job.kill_grace).await.ok();
        let error = PipelineError::Io("publish process has no input pipe".to_string());
        job.conclude(RunEnd::Failed(error), status.and_then(|s| s.code()))
            .await;
        return;
    };

    let pid = publisher.pid();
    let admitted = job
        .update(|session| {
            let started = session.begin_streaming(PublishHandle::new(pid));
            if started.is_ok() {
                session.set_now_playing(first.source_url.clone());
            }
            started
        })
        .await;
    if !matches!(admitted, Some(Ok(()))) {
        tracing::error!(owner = %job.owner, "Session left Resolving before publisher start");
        drop(stdin);
        if let Err(e) = publisher.reap(job.kill_grace).await {
            tracing::error!(owner = %job.owner, error = %e, "Failed to reap publisher");
        }
        return;
    }

    tracing::info!(
        owner = %job.owner,
        pid = ?pid,
        program = %publisher.program(),
        target = %job.target,
        "Publisher started"
    );

    let end = job.relay_queue(first, &mut publisher, &mut stdin).await;

    // Graceful step: EOF on the publisher's input lets it flush and exit.
    drop(stdin);
    let exit_code = match publisher.reap(job.kill_grace).await {
        Ok(status) => {
            tracing::info!(owner = %job.owner, status = %status, "Publisher exited");
            status.code()
        }
        Err(e) => {
            tracing::error!(owner = %job.owner, error = %e, "Failed to reap publisher");
            None
        }
    };

    job.conclude(end, exit_code).await;
}

impl RelayJob {
    /// Apply `f` to the session if it still belongs to this run
    async fn update<T>(&self, f: impl FnOnce(&mut Session) -> T) -> Option<T> {
        let mut session = self.session.write().await;
        if session.run_id() != self.run_id {
            tracing::warn!(
                owner = %self.owner,
                run_id = self.run_id,
                current = session.run_id(),
                "Stale relay worker ignored"
            );
            return None;
        }
        Some(f(&mut session))
    }

    /// Resolve queued URLs until one succeeds
    async fn next_item(&self) -> Next {
        loop {
            if self.cancel.is_cancelled() {
                return Next::Cancelled;
            }

            let Some(url) = self.update(|s| s.next_pending()).await.flatten() else {
                return Next::Exhausted;
            };

            let resolved = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Next::Cancelled,
                resolved = self.resolver.resolve(&url, &self.quality) => resolved,
            };

            match resolved {
                Ok(item) => {
                    tracing::debug!(
                        owner = %self.owner,
                        item = %item.source_url,
                        variant = %item.variant,
                        "Item resolved"
                    );
                    return Next::Item(item);
                }
                Err(e) => {
                    tracing::warn!(owner = %self.owner, item = %url, error = %e, "Skipping item");
                    self.update(|s| s.item_skipped()).await;
                }
            }
        }
    }

    /// Relay `first` and every item after it, strictly in order
    async fn relay_queue(
        &self,
        first: ResolvedItem,
        publisher: &mut ManagedChild,
        stdin: &mut ChildStdin,
    ) -> RunEnd {
        let mut item = first;

        loop {
            match self.relay_item(&item, publisher, stdin).await {
                ItemEnd::Done => {
                    self.update(|s| s.item_relayed()).await;
                }
                ItemEnd::Cancelled => return RunEnd::Cancelled,
                ItemEnd::Failed(e) => return RunEnd::Failed(e),
            }

            item = match self.next_item().await {
                Next::Item(next) => next,
                Next::Exhausted => return RunEnd::Finished,
                Next::Cancelled => return RunEnd::Cancelled,
            };
        }
    }

    /// Relay one item through its own decode process
    async fn relay_item(
        &self,
        item: &ResolvedItem,
        publisher: &mut ManagedChild,
        stdin: &mut ChildStdin,
    ) -> ItemEnd {
        self.update(|s| s.set_now_playing(item.source_url.clone()))
            .await;
        tracing::info!(owner = %self.owner, item = %item.source_url, "Now playing");

        let command = self.toolchain.decode_command(item);
        let program = program_name(&command);
        let mut decoder = match ManagedChild::spawn(ProcessRole::Decode, command) {
            Ok(child) => child,
            Err(e) => {
                return ItemEnd::Failed(PipelineError::spawn_failed(
                    ProcessRole::Decode,
                    &program,
                    &e,
                ))
            }
        };

        let Some(mut stdout) = decoder.take_stdout() else {
            if let Err(e) = decoder.reap(self.kill_grace).await {
                tracing::error!(owner = %self.owner, error = %e, "Failed to reap decode process");
            }
            return ItemEnd::Failed(PipelineError::DecodeProcessFailed(
                "decode process has no output pipe".to_string(),
            ));
        };

        let mut copied = 0u64;
        let end = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => ItemEnd::Cancelled,
            status = publisher.wait() => {
                let detail = match status {
                    Ok(status) => format!("exited with {}", status),
                    Err(e) => e.to_string(),
                };
                ItemEnd::Failed(PipelineError::PublishProcessDied(detail))
            }
            outcome = copy_item(&mut stdout, stdin, self.chunk_size, &mut copied) => match outcome {
                CopyOutcome::EndOfItem => ItemEnd::Done,
                CopyOutcome::BrokenDestination(e) => {
                    ItemEnd::Failed(PipelineError::PublishProcessDied(format!("input closed: {}", e)))
                }
                CopyOutcome::SourceError(e) => {
                    ItemEnd::Failed(PipelineError::DecodeProcessFailed(format!("read failed: {}", e)))
                }
            },
        };

        // Detach the decoder's output; it exits on its own or is killed after
        // the grace period.
        drop(stdout);
        match decoder.reap(self.kill_grace).await {
            Ok(status) if !status.success() && matches!(end, ItemEnd::Done) => {
                tracing::warn!(
                    owner = %self.owner,
                    item = %item.source_url,
                    status = %status,
                    bytes = copied,
                    "Decode process exited abnormally"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(owner = %self.owner, error = %e, "Failed to reap decode process");
            }
        }

        self.update(|s| s.add_bytes(copied)).await;
        tracing::debug!(owner = %self.owner, item = %item.source_url, bytes = copied, "Item ended");

        if let ItemEnd::Failed(PipelineError::PublishProcessDied(_)) = &end {
            self.update(|s| {
                if s.phase() == SessionPhase::Streaming {
                    if let Err(e) = s.publisher_gone() {
                        tracing::error!(owner = %self.owner, error = %e, "Could not record publisher exit");
                    }
                }
            })
            .await;
        }

        end
    }

    /// Write the run's terminal state
    async fn conclude(&self, end: RunEnd, exit_code: Option<i32>) {
        let owner = &self.owner;
        let result = self
            .update(|session| match &end {
                RunEnd::Finished | RunEnd::Cancelled => session.finish(exit_code),
                RunEnd::Failed(e) => session.fail(e.to_string(), exit_code),
            })
            .await;

        match (&end, result) {
            (_, Some(Err(e))) => {
                tracing::error!(owner = %owner, error = %e, "Could not record end of run");
            }
            (_, None) => {}
            (RunEnd::Finished, _) => {
                tracing::info!(owner = %owner, exit_code = ?exit_code, "Relay run finished");
            }
            (RunEnd::Cancelled, _) => {
                tracing::info!(owner = %owner, exit_code = ?exit_code, "Relay run stopped");
            }
            (RunEnd::Failed(e), _) => {
                tracing::error!(owner = %owner, exit_code = ?exit_code, error = %e, "Relay run failed");
            }
        }
    }
}

fn program_name(command: &tokio::process::Command) -> String {
    command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned()
}
