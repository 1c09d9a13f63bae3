//! Speech feedback: plays the "speak" half of a decision, interruptible
//! the moment the operator starts talking again.
//!
//! At most one playback is active; barge-in kills the synthesis process
//! immediately rather than letting it finish the sentence.

use crate::error::{Result, WingmanError};
use crate::state::SharedPipelineState;
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Speech synthesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Synthesis command; `{text}` is substituted, otherwise the text is
    /// appended as the final argument.
    pub command: Vec<String>,
    /// Disable playback entirely (one-shot mode prints instead).
    pub enabled: bool,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            command: vec!["say".into()],
            enabled: true,
        }
    }
}

/// One playback request.
#[derive(Debug)]
pub struct SpeakRequest {
    /// Exchange the speech belongs to.
    pub exchange_id: Uuid,
    /// Text to synthesize.
    pub text: String,
    /// Cancellation token; set on barge-in or shutdown.
    pub cancel: Arc<AtomicBool>,
}

/// Events emitted by the speech worker.
#[derive(Debug)]
pub enum SpeechEvent {
    /// Playback started.
    Started { exchange_id: Uuid },
    /// Playback ended, normally or by interruption.
    Finished {
        exchange_id: Uuid,
        interrupted: bool,
    },
    /// Worker has shut down.
    Shutdown,
}

/// Worker that plays queued speech one request at a time.
pub struct SpeechWorker {
    config: SpeechConfig,
    state: SharedPipelineState,
    request_rx: Receiver<SpeakRequest>,
    event_tx: Sender<SpeechEvent>,
}

impl SpeechWorker {
    /// Create a worker over the speech queue.
    pub fn new(
        config: SpeechConfig,
        state: SharedPipelineState,
        request_rx: Receiver<SpeakRequest>,
        event_tx: Sender<SpeechEvent>,
    ) -> Self {
        Self {
            config,
            state,
            request_rx,
            event_tx,
        }
    }

    /// Start the worker thread.
    pub fn start(self) -> Result<JoinHandle<()>> {
        if self.config.enabled && self.config.command.is_empty() {
            return Err(WingmanError::ConfigError("speech command is empty".into()));
        }

        Ok(thread::spawn(move || {
            info!(
                enabled = self.config.enabled,
                command = ?self.config.command.first(),
                "speech worker starting"
            );

            while let Ok(request) = self.request_rx.recv() {
                let exchange_id = request.exchange_id;

                // Don't start talking into a shutdown, and honor barge-ins
                // that landed while the request was queued.
                if self.state.snapshot().is_shutdown()
                    || request.cancel.load(Ordering::SeqCst)
                    || !self.config.enabled
                {
                    let _ = self.event_tx.send(SpeechEvent::Finished {
                        exchange_id,
                        interrupted: true,
                    });
                    continue;
                }

                let _ = self.event_tx.send(SpeechEvent::Started { exchange_id });
                let interrupted = self.play(&request);
                debug!(id = %exchange_id, interrupted, "playback finished");

                if self
                    .event_tx
                    .send(SpeechEvent::Finished {
                        exchange_id,
                        interrupted,
                    })
                    .is_err()
                {
                    break;
                }
            }

            let _ = self.event_tx.send(SpeechEvent::Shutdown);
            info!("speech worker stopped");
        }))
    }

    /// Run the synthesis command, polling the cancellation token.
    ///
    /// Returns true if playback was interrupted.
    fn play(&self, request: &SpeakRequest) -> bool {
        let mut command: Vec<String> = self.config.command.clone();
        let mut substituted = false;
        for arg in &mut command {
            if arg.contains("{text}") {
                *arg = arg.replace("{text}", &request.text);
                substituted = true;
            }
        }
        if !substituted {
            command.push(request.text.clone());
        }

        let mut child = match Command::new(&command[0])
            .args(&command[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!("failed to start synthesis: {}", e);
                return false;
            }
        };

        loop {
            if request.cancel.load(Ordering::SeqCst) || self.state.snapshot().is_shutdown() {
                let _ = child.kill();
                let _ = child.wait();
                return true;
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    if !status.success() {
                        warn!("synthesis exited with {}", status);
                    }
                    return false;
                }
                Ok(None) => thread::sleep(Duration::from_millis(10)),
                Err(e) => {
                    warn!("failed to poll synthesis: {}", e);
                    let _ = child.kill();
                    let _ = child.wait();
                    return false;
                }
            }
        }
    }
}
