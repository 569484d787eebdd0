//! Session relay pipeline: compiler process ↔ client event bridging.
//!
//! Data flow:
//! ```text
//! compiler stdout → OutputCodec ─┐
//! compiler stderr → lines ───────┴→ RelayEvent → mpsc → gateway
//! client input → InputChannel (slot the compiler polls)
//! ```
//!
//! Each `start` owns exactly one process, supervised by one task. The task is
//! the only place the process is waited on, and it always finishes with a
//! single terminal `Exited` event.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use pseudorun_core::ndjson::{OutputCodec, OutputCodecError, OutputEvent};

use crate::input::InputChannel;
use crate::subprocess::{ProcessHandle, ProcessLauncher};

use super::types::{
    RelayConfig, RelayError, RelayEvent, STDERR_MARKER, STREAM_ERROR_MARKER, SessionPhase,
};

/// Relay for one client session.
///
/// Owns at most one compiler process at a time. Dropping the relay cancels the
/// current run, which terminates its process.
pub struct SessionRelay {
    session_id: String,
    config: Arc<RelayConfig>,
    launcher: Arc<ProcessLauncher>,
    input: Arc<dyn InputChannel>,
    event_tx: mpsc::Sender<RelayEvent>,
    phase_tx: Arc<watch::Sender<SessionPhase>>,
    /// Serialises `start`/`shutdown` so two processes are never alive at once.
    current: Mutex<Option<ActiveRun>>,
}

struct ActiveRun {
    process_id: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// What the supervising task needs from its relay.
struct RunContext {
    event_tx: mpsc::Sender<RelayEvent>,
    phase_tx: Arc<watch::Sender<SessionPhase>>,
    config: Arc<RelayConfig>,
}

impl SessionRelay {
    /// Create a relay that reports events on `event_tx`.
    pub fn new(
        session_id: impl Into<String>,
        config: Arc<RelayConfig>,
        launcher: Arc<ProcessLauncher>,
        input: Arc<dyn InputChannel>,
        event_tx: mpsc::Sender<RelayEvent>,
    ) -> Self {
        let (phase_tx, _) = watch::channel(SessionPhase::Idle);
        Self {
            session_id: session_id.into(),
            config,
            launcher,
            input,
            event_tx,
            phase_tx: Arc::new(phase_tx),
            current: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase_tx.borrow()
    }

    /// Watch phase transitions.
    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase_tx.subscribe()
    }

    /// Start a new run of `code`.
    ///
    /// A run that is still alive is terminated first, and its `Exited` event is
    /// emitted before anything from the new run. A failure to start is reported
    /// as a `Failed` event before the error is returned.
    pub async fn start(&self, code: &str) -> Result<(), RelayError> {
        let mut current = self.current.lock().await;
        if let Some(run) = current.take() {
            info!(
                session_id = %self.session_id,
                process_id = %run.process_id,
                "Superseding previous run"
            );
            stop_run(run).await;
        }

        let handle = match self.launch(code).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Failed to start program");
                self.phase_tx.send_replace(SessionPhase::Terminated);
                // A closed receiver means the client is gone; nobody to tell.
                let _ = self
                    .event_tx
                    .send(RelayEvent::Failed {
                        message: e.to_string(),
                    })
                    .await;
                return Err(e);
            }
        };

        let process_id = handle.id().to_string();
        let cancel = CancellationToken::new();
        self.phase_tx.send_replace(SessionPhase::Running);

        let ctx = RunContext {
            event_tx: self.event_tx.clone(),
            phase_tx: Arc::clone(&self.phase_tx),
            config: Arc::clone(&self.config),
        };
        let span = info_span!("run", session_id = %self.session_id, process_id = %process_id);
        let task = tokio::spawn(supervise(ctx, handle, cancel.clone()).instrument(span));

        info!(session_id = %self.session_id, process_id = %process_id, "Run started");
        *current = Some(ActiveRun {
            process_id,
            cancel,
            task,
        });
        Ok(())
    }

    /// Deliver `value` to the running program's input slot.
    ///
    /// Fire-and-forget: succeeds once the slot is written, whether or not the
    /// program ever reads it.
    pub async fn submit_input(&self, value: &str) -> Result<(), RelayError> {
        if self.phase() != SessionPhase::Running {
            return Err(RelayError::NoActiveProcess {
                session_id: self.session_id.clone(),
            });
        }

        let input = Arc::clone(&self.input);
        let value_owned = value.to_string();
        tokio::task::spawn_blocking(move || input.write(&value_owned))
            .await
            .map_err(|e| RelayError::Task(e.to_string()))??;

        debug!(session_id = %self.session_id, len = value.len(), "Submitted input");
        Ok(())
    }

    /// Terminate the current run, if any, and wait until its process is reaped.
    pub async fn shutdown(&self) {
        let run = self.current.lock().await.take();
        if let Some(run) = run {
            info!(session_id = %self.session_id, process_id = %run.process_id, "Shutting down run");
            stop_run(run).await;
        }
    }

    /// Claim a pool slot, then reset the input slot, write the source file and
    /// spawn the compiler.
    ///
    /// The slot comes first: the source and input files are shared by every
    /// session, so a start that cannot run must leave them alone.
    async fn launch(&self, code: &str) -> Result<ProcessHandle, RelayError> {
        let slot = self.launcher.reserve()?;

        let input = Arc::clone(&self.input);
        tokio::task::spawn_blocking(move || input.reset())
            .await
            .map_err(|e| RelayError::Task(e.to_string()))??;

        let source_path = &self.config.source_path;
        let source_err = |source| RelayError::SourceWrite {
            path: source_path.clone(),
            source,
        };
        if let Some(parent) = source_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(source_err)?;
        }
        tokio::fs::write(source_path, code)
            .await
            .map_err(source_err)?;

        Ok(slot.spawn(&self.config.launch)?)
    }
}

impl Drop for SessionRelay {
    fn drop(&mut self) {
        if let Some(run) = self.current.get_mut().take() {
            debug!(session_id = %self.session_id, process_id = %run.process_id, "Relay dropped, cancelling run");
            run.cancel.cancel();
        }
    }
}

async fn stop_run(run: ActiveRun) {
    run.cancel.cancel();
    if let Err(e) = run.task.await {
        warn!(process_id = %run.process_id, error = %e, "Run task did not finish cleanly");
    }
}

/// How long output may keep arriving after the compiler itself has exited.
///
/// A leftover child that inherited the pipes would otherwise hold the run open.
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

enum Step {
    Cancelled,
    Stdout(Option<Result<OutputEvent, OutputCodecError>>),
    Stderr(Option<Result<Bytes, AnyDelimiterCodecError>>),
    Exited(std::io::Result<Option<i32>>),
    DrainExpired,
}

async fn next_item<S>(stream: &mut Option<S>) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Drive one process to completion.
async fn supervise(ctx: RunContext, mut handle: ProcessHandle, cancel: CancellationToken) {
    let max_line = ctx.config.max_line_bytes;
    let mut stdout = handle
        .take_stdout()
        .map(|s| FramedRead::new(s, OutputCodec::with_max_line_bytes(max_line)));
    let mut stderr = handle.take_stderr().map(|s| {
        FramedRead::new(
            s,
            // One extra byte for a trailing `\r`, which is stripped below.
            AnyDelimiterCodec::new_with_max_length(
                vec![b'\n'],
                Vec::new(),
                max_line.saturating_add(1),
            ),
        )
    });
    let mut interrupted = false;
    // Set once the process has been reaped inside the loop.
    let mut exited: Option<Option<i32>> = None;
    let mut drain_deadline: Option<Instant> = None;
    let mut drain_expired = false;

    while !interrupted && !drain_expired && (stdout.is_some() || stderr.is_some()) {
        let step = tokio::select! {
            biased;
            () = cancel.cancelled() => Step::Cancelled,
            item = next_item(&mut stdout) => Step::Stdout(item),
            item = next_item(&mut stderr) => Step::Stderr(item),
            result = handle.wait(), if exited.is_none() => Step::Exited(result),
            () = sleep_until(drain_deadline) => Step::DrainExpired,
        };

        let event = match step {
            Step::Cancelled => {
                debug!("Run cancelled");
                interrupted = true;
                None
            }
            Step::Stdout(Some(Ok(event))) => {
                debug!(?event, "stdout");
                Some(RelayEvent::from(event))
            }
            Step::Stdout(Some(Err(e))) => {
                warn!(error = %e, "stdout read failed");
                interrupted = true;
                Some(RelayEvent::output(format!("{STREAM_ERROR_MARKER}{e}")))
            }
            Step::Stdout(None) => {
                stdout = None;
                None
            }
            Step::Stderr(Some(Ok(raw))) => {
                let raw = raw.strip_suffix(b"\r").unwrap_or(&raw[..]);
                let line = String::from_utf8_lossy(raw);
                warn!("stderr: {}", line);
                (!line.trim().is_empty())
                    .then(|| RelayEvent::output(format!("{STDERR_MARKER}{line}")))
            }
            Step::Stderr(Some(Err(e))) => {
                warn!(error = %e, "stderr read failed");
                interrupted = true;
                Some(RelayEvent::output(format!("{STREAM_ERROR_MARKER}{e}")))
            }
            Step::Stderr(None) => {
                stderr = None;
                None
            }
            Step::Exited(Ok(code)) => {
                debug!(exit_code = ?code, "Compiler exited, draining output");
                exited = Some(code);
                drain_deadline = Some(Instant::now() + EXIT_DRAIN_TIMEOUT);
                None
            }
            Step::Exited(Err(e)) => {
                warn!(error = %e, "Failed to wait for compiler");
                interrupted = true;
                Some(RelayEvent::output(format!("{STREAM_ERROR_MARKER}{e}")))
            }
            Step::DrainExpired => {
                warn!("Output pipes still open after compiler exit, closing them");
                drain_expired = true;
                None
            }
        };

        if let Some(event) = event {
            if ctx.event_tx.send(event).await.is_err() {
                debug!("Event receiver dropped, stopping run");
                interrupted = true;
            }
        }
    }

    let code = if let Some(code) = exited {
        code
    } else if interrupted {
        handle.terminate(ctx.config.terminate_timeout).await
    } else {
        // Both streams are closed; the process may still be running.
        let waited = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = handle.wait() => Some(result),
        };
        match waited {
            Some(Ok(code)) => code,
            Some(Err(e)) => {
                warn!(error = %e, "Failed to wait for compiler");
                let _ = ctx
                    .event_tx
                    .send(RelayEvent::output(format!("{STREAM_ERROR_MARKER}{e}")))
                    .await;
                handle.terminate(ctx.config.terminate_timeout).await
            }
            None => handle.terminate(ctx.config.terminate_timeout).await,
        }
    };

    // Free the pool slot before anyone can observe the exit.
    drop(handle);
    info!(exit_code = ?code, "Run finished");
    ctx.phase_tx.send_replace(SessionPhase::Terminated);
    let _ = ctx.event_tx.send(RelayEvent::Exited { code }).await;
}
