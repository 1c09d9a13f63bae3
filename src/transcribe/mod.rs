//! Transcription adapter: wraps the external speech-to-text engine behind a
//! uniform interface and rejects spurious outputs before they reach
//! reasoning.
//!
//! Rejection is silent to the user: a hallucinated transcript is logged and
//! counted, never promoted into an exchange.

use crate::audio::wav::write_wav;
use crate::error::{Result, WingmanError};
use crate::segment::Utterance;
use crossbeam_channel::{Receiver, Sender};
use serde::Deserialize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Raw engine output for one utterance.
#[derive(Debug, Clone)]
pub enum SttOutcome {
    /// Recognized text with engine confidence.
    Text { text: String, confidence: f32 },
    /// The engine explicitly reported no speech.
    NoSpeech,
}

/// Speech-to-text engine seam.
///
/// Implementations must enforce their own latency ceiling and surface it as
/// `WingmanError::TranscriptionTimeout`.
pub trait SpeechToText: Send + Sync {
    /// Transcribe 16 kHz mono PCM, biased by the domain hint list.
    fn transcribe(&self, audio: &[i16], hints: &[String]) -> Result<SttOutcome>;

    /// Engine name for logging.
    fn name(&self) -> &str;
}

impl<T: SpeechToText> SpeechToText for Arc<T> {
    fn transcribe(&self, audio: &[i16], hints: &[String]) -> Result<SttOutcome> {
        (**self).transcribe(audio, hints)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Transcription configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TranscriberConfig {
    /// External recognizer invocation; `{wav}` and `{hints}` are
    /// substituted per call.
    pub command: Vec<String>,
    /// Domain-term hint list passed to the engine.
    pub hints: Vec<String>,
    /// Hard latency ceiling in milliseconds.
    pub timeout_ms: u64,
    /// Exact phrases (case-insensitive) treated as hallucinations.
    pub hallucination_phrases: Vec<String>,
    /// Mean utterance RMS below which non-empty text is rejected.
    pub min_energy: f32,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "whisper-cli".into(),
                "-f".into(),
                "{wav}".into(),
                "--prompt".into(),
                "{hints}".into(),
                "--no-timestamps".into(),
            ],
            hints: vec![
                "git".into(),
                "cargo".into(),
                "rebase".into(),
                "refactor".into(),
                "ticket".into(),
                "deploy".into(),
                "rollback".into(),
                "regression".into(),
                "benchmark".into(),
            ],
            timeout_ms: 5000,
            hallucination_phrases: vec![
                "thank you.".into(),
                "thanks for watching.".into(),
                "bye.".into(),
            ],
            min_energy: 0.005,
        }
    }
}

/// A promoted transcript ready for routing and reasoning.
#[derive(Debug, Clone)]
pub struct Transcript {
    /// Utterance this transcript was produced from.
    pub utterance_id: Uuid,
    /// Cleaned recognized text.
    pub text: String,
    /// Engine confidence, 0.0..=1.0.
    pub confidence: f32,
    /// Hints that were supplied to the engine.
    pub hints_used: Vec<String>,
}

/// Why a transcript was rejected rather than promoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Engine reported no speech.
    NoSpeech,
    /// Cleaned text was empty.
    Empty,
    /// Non-empty text over near-silent audio.
    SilenceHallucination,
    /// Exact match against the hallucinated-phrase list.
    HallucinatedPhrase,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::NoSpeech => write!(f, "no speech"),
            RejectReason::Empty => write!(f, "empty text"),
            RejectReason::SilenceHallucination => write!(f, "silence hallucination"),
            RejectReason::HallucinatedPhrase => write!(f, "hallucinated phrase"),
        }
    }
}

/// Adapter decision for one utterance.
#[derive(Debug, Clone)]
pub enum AdapterOutcome {
    /// Transcript promoted to the pipeline.
    Accepted(Transcript),
    /// Transcript suppressed; logged only.
    Rejected(RejectReason),
}

/// Strips recognizer non-speech annotations.
///
/// Engines wrap annotations in `[…]`, `*…*`, or `(…)`; these never contain
/// real speech. Unmatched opening delimiters are kept as-is.
pub fn clean_transcription(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            '[' | '(' | '*' => {
                let close = match ch {
                    '[' => ']',
                    '(' => ')',
                    '*' => '*',
                    _ => unreachable!(),
                };
                chars.next();
                let mut buf = String::new();
                let mut found_close = false;
                while let Some(&inner) = chars.peek() {
                    if inner == close {
                        chars.next();
                        found_close = true;
                        break;
                    }
                    buf.push(inner);
                    chars.next();
                }
                if !found_close {
                    result.push(ch);
                    result.push_str(&buf);
                }
            }
            _ => {
                result.push(ch);
                chars.next();
            }
        }
    }

    let mut prev_space = false;
    let collapsed: String = result
        .chars()
        .filter(|&c| {
            if c == ' ' {
                if prev_space {
                    return false;
                }
                prev_space = true;
            } else {
                prev_space = false;
            }
            true
        })
        .collect();
    collapsed.trim().to_string()
}

/// The adapter: engine call plus promotion/rejection policy.
pub struct TranscriptionAdapter<E: SpeechToText> {
    engine: E,
    config: TranscriberConfig,
}

impl<E: SpeechToText> TranscriptionAdapter<E> {
    /// Wrap an engine with the given policy configuration.
    pub fn new(engine: E, config: TranscriberConfig) -> Self {
        Self { engine, config }
    }

    /// Transcribe one utterance, applying the rejection heuristics.
    pub fn transcribe(&self, utterance: &Utterance) -> Result<AdapterOutcome> {
        let outcome = self
            .engine
            .transcribe(&utterance.samples, &self.config.hints)?;

        let (raw_text, confidence) = match outcome {
            SttOutcome::NoSpeech => {
                return Ok(AdapterOutcome::Rejected(RejectReason::NoSpeech));
            }
            SttOutcome::Text { text, confidence } => (text, confidence),
        };

        let text = clean_transcription(&raw_text);
        if text.is_empty() {
            return Ok(AdapterOutcome::Rejected(RejectReason::Empty));
        }

        // Non-empty text over near-silent audio is the classic engine
        // hallucination shape.
        if utterance.mean_rms < self.config.min_energy {
            debug!(
                mean_rms = utterance.mean_rms,
                text = %text,
                "rejecting transcript over near-silent audio"
            );
            return Ok(AdapterOutcome::Rejected(RejectReason::SilenceHallucination));
        }

        let lower = text.to_lowercase();
        if self
            .config
            .hallucination_phrases
            .iter()
            .any(|p| p.to_lowercase() == lower)
        {
            debug!(text = %text, "rejecting hallucinated phrase");
            return Ok(AdapterOutcome::Rejected(RejectReason::HallucinatedPhrase));
        }

        Ok(AdapterOutcome::Accepted(Transcript {
            utterance_id: utterance.id,
            text,
            confidence,
            hints_used: self.config.hints.clone(),
        }))
    }
}

/// JSON shape some recognizers emit; plain text is accepted as well.
#[derive(Deserialize)]
struct EngineJson {
    text: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

/// Engine that shells out to an external recognizer over a temp WAV.
pub struct CommandSpeechToText {
    command: Vec<String>,
    timeout: Duration,
    runtime: tokio::runtime::Runtime,
}

impl CommandSpeechToText {
    /// Build from the transcriber configuration.
    pub fn new(config: &TranscriberConfig) -> Result<Self> {
        if config.command.is_empty() {
            return Err(WingmanError::ConfigError(
                "transcriber command is empty".into(),
            ));
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| WingmanError::ConfigError(format!("runtime creation failed: {}", e)))?;

        Ok(Self {
            command: config.command.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            runtime,
        })
    }

    fn parse_output(stdout: &str) -> SttOutcome {
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return SttOutcome::NoSpeech;
        }
        if let Ok(json) = serde_json::from_str::<EngineJson>(trimmed) {
            if json.text.trim().is_empty() {
                return SttOutcome::NoSpeech;
            }
            return SttOutcome::Text {
                text: json.text,
                confidence: json.confidence.clamp(0.0, 1.0),
            };
        }
        SttOutcome::Text {
            text: trimmed.to_string(),
            confidence: 1.0,
        }
    }
}

impl SpeechToText for CommandSpeechToText {
    fn transcribe(&self, audio: &[i16], hints: &[String]) -> Result<SttOutcome> {
        let wav_path = std::env::temp_dir().join(format!("wingman-{}.wav", Uuid::new_v4()));
        write_wav(&wav_path, audio)?;

        let hints_joined = hints.join(", ");
        let args: Vec<String> = self.command[1..]
            .iter()
            .map(|a| {
                a.replace("{wav}", &wav_path.to_string_lossy())
                    .replace("{hints}", &hints_joined)
            })
            .collect();

        let result = self.runtime.block_on(async {
            let mut command = tokio::process::Command::new(&self.command[0]);
            command
                .args(&args)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::null())
                .kill_on_drop(true);

            let child = command.spawn().map_err(|e| {
                WingmanError::TranscriptionError(format!(
                    "failed to spawn {}: {}",
                    self.command[0], e
                ))
            })?;

            match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
                Ok(Ok(output)) => {
                    if !output.status.success() {
                        return Err(WingmanError::TranscriptionError(format!(
                            "recognizer exited with {}",
                            output.status
                        )));
                    }
                    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
                }
                Ok(Err(e)) => Err(WingmanError::TranscriptionError(e.to_string())),
                Err(_) => Err(WingmanError::TranscriptionTimeout(
                    self.timeout.as_millis() as u64,
                )),
            }
        });

        let _ = std::fs::remove_file(&wav_path);
        result.map(|stdout| Self::parse_output(&stdout))
    }

    fn name(&self) -> &str {
        &self.command[0]
    }
}

/// Mock engine for tests and offline runs.
///
/// Returns a fixed transcript, or a scripted sequence (one response per
/// call, repeating the last once exhausted).
#[derive(Debug)]
pub struct MockSpeechToText {
    responses: parking_lot::Mutex<std::collections::VecDeque<String>>,
    last: parking_lot::Mutex<String>,
    confidence: f32,
    fail: bool,
    timeout: bool,
    no_speech: bool,
}

impl MockSpeechToText {
    /// Create a mock returning a fixed transcript.
    pub fn new(response: &str) -> Self {
        Self {
            responses: parking_lot::Mutex::new(std::collections::VecDeque::new()),
            last: parking_lot::Mutex::new(response.to_string()),
            confidence: 0.95,
            fail: false,
            timeout: false,
            no_speech: false,
        }
    }

    /// Create a mock returning one response per call, in order.
    pub fn scripted(responses: &[&str]) -> Self {
        let mock = Self::new(responses.last().copied().unwrap_or(""));
        *mock.responses.lock() = responses.iter().map(|r| r.to_string()).collect();
        mock
    }

    /// Configure the returned engine confidence.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Configure the mock to fail.
    pub fn with_failure(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Configure the mock to exceed the hard ceiling.
    pub fn with_timeout(mut self) -> Self {
        self.timeout = true;
        self
    }

    /// Configure the mock to report no speech.
    pub fn with_no_speech(mut self) -> Self {
        self.no_speech = true;
        self
    }
}

impl SpeechToText for MockSpeechToText {
    fn transcribe(&self, _audio: &[i16], _hints: &[String]) -> Result<SttOutcome> {
        if self.timeout {
            return Err(WingmanError::TranscriptionTimeout(5000));
        }
        if self.fail {
            return Err(WingmanError::TranscriptionError(
                "mock transcription failure".into(),
            ));
        }
        if self.no_speech {
            return Ok(SttOutcome::NoSpeech);
        }
        let text = match self.responses.lock().pop_front() {
            Some(next) => {
                *self.last.lock() = next.clone();
                next
            }
            None => self.last.lock().clone(),
        };
        Ok(SttOutcome::Text {
            text,
            confidence: self.confidence,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Events emitted by the transcription worker.
#[derive(Debug)]
pub enum SttEvent {
    /// Transcript promoted for routing.
    Transcribed(Transcript),
    /// Transcript suppressed.
    Rejected { utterance_id: Uuid, reason: RejectReason },
    /// Engine exceeded the hard ceiling; utterance discarded.
    TimedOut { utterance_id: Uuid },
    /// Engine failure; utterance discarded.
    Failed { utterance_id: Uuid, error: String },
    /// Worker has shut down.
    Shutdown,
}

/// Worker that drains the utterance queue strictly in enqueue order.
pub struct TranscriptionWorker<E: SpeechToText + 'static> {
    adapter: TranscriptionAdapter<E>,
    utterance_rx: Receiver<Utterance>,
    event_tx: Sender<SttEvent>,
}

impl<E: SpeechToText + 'static> TranscriptionWorker<E> {
    /// Create a worker over the utterance queue.
    pub fn new(
        adapter: TranscriptionAdapter<E>,
        utterance_rx: Receiver<Utterance>,
        event_tx: Sender<SttEvent>,
    ) -> Self {
        Self {
            adapter,
            utterance_rx,
            event_tx,
        }
    }

    /// Start the worker thread.
    pub fn start(self) -> JoinHandle<()> {
        thread::spawn(move || {
            info!(engine = self.adapter.engine.name(), "transcription worker starting");

            while let Ok(utterance) = self.utterance_rx.recv() {
                let utterance_id = utterance.id;
                let event = match self.adapter.transcribe(&utterance) {
                    Ok(AdapterOutcome::Accepted(transcript)) => {
                        info!(id = %utterance_id, text = %transcript.text, "transcript accepted");
                        SttEvent::Transcribed(transcript)
                    }
                    Ok(AdapterOutcome::Rejected(reason)) => {
                        info!(id = %utterance_id, %reason, "transcript rejected");
                        SttEvent::Rejected {
                            utterance_id,
                            reason,
                        }
                    }
                    Err(WingmanError::TranscriptionTimeout(ms)) => {
                        warn!(id = %utterance_id, ceiling_ms = ms, "transcription timed out");
                        SttEvent::TimedOut { utterance_id }
                    }
                    Err(e) => {
                        error!(id = %utterance_id, "transcription failed: {}", e);
                        SttEvent::Failed {
                            utterance_id,
                            error: e.to_string(),
                        }
                    }
                };

                if self.event_tx.send(event).is_err() {
                    break;
                }
            }

            let _ = self.event_tx.send(SttEvent::Shutdown);
            info!("transcription worker stopped");
        })
    }
}
