//! Executor: dispatches actions as bounded, cancellable, streaming
//! subprocess tasks.
//!
//! A single worker drains the action queue, so at most one task is active
//! per pipeline instance and later requests queue instead of interleaving.
//! Output is streamed line by line as it arrives; a task that exceeds its
//! ceiling is killed and reported as a timeout, never left hanging.

use crate::compute::ComputeTarget;
use crate::error::{Result, WingmanError};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Terminal result of one dispatched action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Exited with status zero.
    Success,
    /// Exited non-zero.
    Failure { code: Option<i32> },
    /// Killed after exceeding the execution ceiling.
    Timeout,
    /// Killed by barge-in or shutdown; logged for audit, not an error.
    Canceled,
}

impl Outcome {
    /// Whether the action completed normally.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure { code: Some(code) } => write!(f, "failure({})", code),
            Outcome::Failure { code: None } => write!(f, "failure(signal)"),
            Outcome::Timeout => write!(f, "timeout"),
            Outcome::Canceled => write!(f, "canceled"),
        }
    }
}

/// Which stream a chunk arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One streamed line of action output.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    /// Exchange the action belongs to.
    pub exchange_id: Uuid,
    /// The output line, without trailing newline.
    pub line: String,
    /// Source stream.
    pub stream: OutputStream,
}

/// A queued action dispatch.
#[derive(Debug)]
pub struct ActionRequest {
    /// Exchange the action belongs to, for outcome correlation.
    pub exchange_id: Uuid,
    /// The action string, run through the configured shell.
    pub action: String,
    /// Compute target selected for the action, exported to the child.
    pub target: Option<ComputeTarget>,
    /// Execution ceiling.
    pub timeout: Duration,
    /// Cancellation token; set by the orchestrator on barge-in/shutdown.
    pub cancel: Arc<AtomicBool>,
}

/// Events emitted by the executor worker.
#[derive(Debug)]
pub enum ExecEvent {
    /// The action's subprocess started.
    Started { exchange_id: Uuid },
    /// A line of output arrived.
    Output(OutputChunk),
    /// The action reached a terminal outcome.
    Finished {
        exchange_id: Uuid,
        outcome: Outcome,
        elapsed_ms: u64,
    },
    /// Worker has shut down.
    Shutdown,
}

/// Executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Shell prefix the action string is appended to.
    pub shell: Vec<String>,
    /// Default execution ceiling in seconds.
    pub timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: vec!["/bin/sh".into(), "-c".into()],
            timeout_secs: 120,
        }
    }
}

impl ExecutorConfig {
    /// Default ceiling as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Worker that drains the action queue one task at a time.
pub struct ExecutorWorker {
    config: ExecutorConfig,
    request_rx: Receiver<ActionRequest>,
    event_tx: Sender<ExecEvent>,
}

impl ExecutorWorker {
    /// Create a worker over the action queue.
    pub fn new(
        config: ExecutorConfig,
        request_rx: Receiver<ActionRequest>,
        event_tx: Sender<ExecEvent>,
    ) -> Self {
        Self {
            config,
            request_rx,
            event_tx,
        }
    }

    /// Start the worker thread with its own runtime.
    pub fn start(self) -> Result<JoinHandle<()>> {
        if self.config.shell.is_empty() {
            return Err(WingmanError::ConfigError("executor shell is empty".into()));
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| WingmanError::ConfigError(format!("runtime creation failed: {}", e)))?;

        Ok(thread::spawn(move || {
            info!(shell = ?self.config.shell, "executor worker starting");

            while let Ok(request) = self.request_rx.recv() {
                let exchange_id = request.exchange_id;
                let started = Instant::now();

                // Barge-in may have landed while the request sat queued.
                let outcome = if request.cancel.load(Ordering::SeqCst) {
                    debug!(id = %exchange_id, "action canceled before dispatch");
                    Outcome::Canceled
                } else {
                    runtime.block_on(self.run_action(&request))
                };

                info!(id = %exchange_id, %outcome, "action finished");
                let finished = ExecEvent::Finished {
                    exchange_id,
                    outcome,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
                if self.event_tx.send(finished).is_err() {
                    break;
                }
            }

            let _ = self.event_tx.send(ExecEvent::Shutdown);
            info!("executor worker stopped");
        }))
    }

    async fn run_action(&self, request: &ActionRequest) -> Outcome {
        let mut command = tokio::process::Command::new(&self.config.shell[0]);
        command
            .args(&self.config.shell[1..])
            .arg(&request.action)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(target) = request.target {
            command.env("WINGMAN_COMPUTE_TARGET", target.to_string());
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(id = %request.exchange_id, "failed to spawn action: {}", e);
                return Outcome::Failure { code: None };
            }
        };

        let _ = self.event_tx.send(ExecEvent::Started {
            exchange_id: request.exchange_id,
        });

        let mut stdout_lines = child
            .stdout
            .take()
            .map(|s| BufReader::new(s).lines())
            .expect("stdout was piped");
        let mut stderr_lines = child
            .stderr
            .take()
            .map(|s| BufReader::new(s).lines())
            .expect("stderr was piped");

        let deadline = tokio::time::Instant::now() + request.timeout;
        let mut cancel_poll = tokio::time::interval(Duration::from_millis(10));
        let mut stdout_done = false;
        let mut stderr_done = false;

        // Stream until both pipes close, then collect the exit status.
        while !(stdout_done && stderr_done) {
            tokio::select! {
                line = stdout_lines.next_line(), if !stdout_done => {
                    match line {
                        Ok(Some(line)) => self.emit(request.exchange_id, line, OutputStream::Stdout),
                        _ => stdout_done = true,
                    }
                }
                line = stderr_lines.next_line(), if !stderr_done => {
                    match line {
                        Ok(Some(line)) => self.emit(request.exchange_id, line, OutputStream::Stderr),
                        _ => stderr_done = true,
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(id = %request.exchange_id, "action exceeded its ceiling, killing");
                    let _ = child.kill().await;
                    return Outcome::Timeout;
                }
                _ = cancel_poll.tick() => {
                    if request.cancel.load(Ordering::SeqCst) {
                        debug!(id = %request.exchange_id, "cancellation requested, killing action");
                        let _ = child.kill().await;
                        return Outcome::Canceled;
                    }
                }
            }
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, child.wait()).await {
            Ok(Ok(status)) => {
                if request.cancel.load(Ordering::SeqCst) {
                    Outcome::Canceled
                } else if status.success() {
                    Outcome::Success
                } else {
                    Outcome::Failure {
                        code: status.code(),
                    }
                }
            }
            Ok(Err(e)) => {
                warn!(id = %request.exchange_id, "failed to reap action: {}", e);
                Outcome::Failure { code: None }
            }
            Err(_) => {
                let _ = child.kill().await;
                Outcome::Timeout
            }
        }
    }

    fn emit(&self, exchange_id: Uuid, line: String, stream: OutputStream) {
        let _ = self.event_tx.send(ExecEvent::Output(OutputChunk {
            exchange_id,
            line,
            stream,
        }));
    }
}
