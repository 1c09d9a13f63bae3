//! Orchestrator: the top-level state machine and task-scheduling fabric.
//!
//! One event loop owns the pipeline state and the history store; every
//! stage worker reports back over its event channel and receives work over
//! a bounded queue. All state transitions, exchange appends, and outcome
//! records happen on this thread; it is the pipeline's critical section.

use crate::audio::ring::FrameQueue;
use crate::brain::{BrainEvent, BrainRequest, BrainWorker, Decision, Reasoner};
use crate::compute;
use crate::config::WingmanConfig;
use crate::error::{Result, WingmanError};
use crate::exec::{ActionRequest, ExecEvent, ExecutorWorker, Outcome, OutputChunk};
use crate::history::{Exchange, SharedHistory};
use crate::routing::ModelRouter;
use crate::segment::{SegmenterEvent, SegmenterWorker, Utterance};
use crate::speech::{SpeakRequest, SpeechEvent, SpeechWorker};
use crate::state::{PipelineState, SharedPipelineState};
use crate::status::{PipelineMetrics, StatusBroadcaster, StatusUpdate};
use crate::transcribe::{
    SpeechToText, SttEvent, Transcript, TranscriptionAdapter, TranscriptionWorker,
};
use chrono::Utc;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// External control commands.
#[derive(Debug, Clone)]
pub enum PipelineCommand {
    /// Feed text directly into routing and reasoning, bypassing the audio
    /// stages (one-shot mode, tests).
    SubmitText(String),
    /// Clean terminal shutdown: cancel in-flight work, drain workers.
    Shutdown,
}

/// User-facing pipeline notifications.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// The authoritative state changed.
    StateChanged(PipelineState),
    /// A transcript was accepted.
    Transcript(String),
    /// Reasoning produced a decision.
    DecisionMade(Decision),
    /// A line of action output arrived.
    ActionOutput(OutputChunk),
    /// A dispatched action reached its terminal outcome.
    ActionFinished {
        exchange_id: Uuid,
        outcome: Outcome,
    },
    /// A recoverable error was absorbed.
    Error(String),
    /// Shutdown completed.
    Shutdown,
}

/// Handle for controlling and observing a running pipeline.
pub struct OrchestratorHandle {
    command_tx: Sender<PipelineCommand>,
    event_rx: Receiver<PipelineEvent>,
    state: SharedPipelineState,
    history: SharedHistory,
    metrics: Arc<PipelineMetrics>,
    status: StatusBroadcaster,
    handoff: FrameQueue,
}

impl OrchestratorHandle {
    /// Submit text directly, bypassing audio capture.
    pub fn submit_text(&self, text: impl Into<String>) -> Result<()> {
        self.command_tx
            .send(PipelineCommand::SubmitText(text.into()))
            .map_err(|e| WingmanError::ChannelError(format!("failed to submit text: {}", e)))
    }

    /// Request clean shutdown.
    pub fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(PipelineCommand::Shutdown)
            .map_err(|e| WingmanError::ChannelError(format!("failed to request shutdown: {}", e)))
    }

    /// A command sender for signal handlers and other detached control.
    pub fn command_sender(&self) -> Sender<PipelineCommand> {
        self.command_tx.clone()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv_event(&self) -> Option<PipelineEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Receive an event (blocking).
    pub fn recv_event(&self) -> Result<PipelineEvent> {
        self.event_rx
            .recv()
            .map_err(|e| WingmanError::ChannelError(format!("event channel closed: {}", e)))
    }

    /// Receive an event with a deadline.
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<PipelineEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// Read-only pipeline state.
    pub fn state(&self) -> PipelineState {
        self.state.snapshot()
    }

    /// Read-only history view.
    pub fn history(&self) -> &SharedHistory {
        &self.history
    }

    /// Shared metrics counters.
    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Register a status observer.
    pub fn subscribe_status(&self) -> Receiver<StatusUpdate> {
        self.status.subscribe()
    }

    /// Fresh status snapshot, for observers reconnecting after loss.
    pub fn status_snapshot(&self) -> StatusUpdate {
        StatusUpdate {
            state: self.state.snapshot(),
            healthy: self.metrics.is_healthy(),
            metrics: self.metrics.snapshot(),
        }
    }

    /// The raw-audio hand-off queue a capture source pushes into.
    pub fn frame_queue(&self) -> FrameQueue {
        self.handoff.clone()
    }
}

/// The orchestrator, generic over the transcription and reasoning seams.
pub struct Orchestrator<E: SpeechToText + 'static, R: Reasoner + 'static> {
    config: WingmanConfig,
    audio_enabled: bool,

    state: SharedPipelineState,
    history: SharedHistory,
    metrics: Arc<PipelineMetrics>,
    status: StatusBroadcaster,
    router: ModelRouter,
    max_context: usize,

    handoff: FrameQueue,
    seg_stop: Arc<AtomicBool>,

    command_rx: Receiver<PipelineCommand>,
    event_tx: Sender<PipelineEvent>,

    seg_event_rx: Receiver<SegmenterEvent>,
    stt_event_rx: Receiver<SttEvent>,
    brain_event_rx: Receiver<BrainEvent>,
    exec_event_rx: Receiver<ExecEvent>,
    speech_event_rx: Receiver<SpeechEvent>,

    utterance_tx: Option<Sender<Utterance>>,
    brain_tx: Option<Sender<BrainRequest>>,
    action_tx: Option<Sender<ActionRequest>>,
    speak_tx: Option<Sender<SpeakRequest>>,

    segmenter_worker: Option<SegmenterWorker>,
    stt_worker: Option<TranscriptionWorker<E>>,
    brain_worker: Option<BrainWorker<R>>,
    exec_worker: Option<ExecutorWorker>,
    speech_worker: Option<SpeechWorker>,

    /// Running-or-queued action tokens, dispatch order. Barge-in cancels
    /// them all; entries clear as their outcomes arrive.
    outstanding_execs: Vec<(Uuid, Arc<AtomicBool>)>,
    /// Running-or-queued playback tokens.
    outstanding_speech: Vec<(Uuid, Arc<AtomicBool>)>,
}

impl<E: SpeechToText + 'static, R: Reasoner + 'static> Orchestrator<E, R> {
    /// Wire up the pipeline around the given boundary implementations.
    ///
    /// `audio_enabled` controls whether the segmenter stage is engaged;
    /// one-shot mode runs without it and feeds text via the handle.
    pub fn new(
        config: WingmanConfig,
        engine: E,
        reasoner: R,
        audio_enabled: bool,
    ) -> Result<(Self, OrchestratorHandle)> {
        let state = SharedPipelineState::new();
        let history = SharedHistory::new(config.pipeline.history_capacity);
        let metrics = PipelineMetrics::new();
        let status = StatusBroadcaster::new();

        let router = if config.templates.is_empty() {
            ModelRouter::default()
        } else {
            ModelRouter::new(config.templates.clone())
        };
        let max_context = config
            .reasoner
            .fast
            .context_exchanges
            .max(config.reasoner.standard.context_exchanges)
            .max(config.reasoner.deep.context_exchanges);

        let (command_tx, command_rx) = bounded(32);
        let (event_tx, event_rx) = bounded(256);

        let handoff = FrameQueue::new(config.pipeline.frame_handoff_capacity);
        let seg_stop = Arc::new(AtomicBool::new(false));
        let (seg_event_tx, seg_event_rx) = bounded(32);
        let segmenter_worker = SegmenterWorker::new(
            config.segmenter.clone(),
            handoff.clone(),
            seg_event_tx,
            Arc::clone(&seg_stop),
        );

        let (utterance_tx, utterance_rx) = bounded(config.pipeline.transcript_queue_capacity);
        let (stt_event_tx, stt_event_rx) = bounded(64);
        let stt_worker = TranscriptionWorker::new(
            TranscriptionAdapter::new(engine, config.transcriber.clone()),
            utterance_rx,
            stt_event_tx,
        );

        let (brain_tx, brain_rx) = bounded(config.pipeline.transcript_queue_capacity);
        let (brain_event_tx, brain_event_rx) = bounded(64);
        let brain_worker = BrainWorker::new(
            config.reasoner.clone(),
            reasoner,
            brain_rx,
            brain_event_tx,
        );

        let (action_tx, action_rx) = bounded(config.pipeline.action_queue_capacity);
        let (exec_event_tx, exec_event_rx) = bounded(256);
        let exec_worker = ExecutorWorker::new(config.executor.clone(), action_rx, exec_event_tx);

        let (speak_tx, speak_rx) = bounded(8);
        let (speech_event_tx, speech_event_rx) = bounded(64);
        let speech_worker = SpeechWorker::new(
            config.speech.clone(),
            state.clone(),
            speak_rx,
            speech_event_tx,
        );

        let handle = OrchestratorHandle {
            command_tx,
            event_rx,
            state: state.clone(),
            history: history.clone(),
            metrics: Arc::clone(&metrics),
            status: status.clone(),
            handoff: handoff.clone(),
        };

        let orchestrator = Self {
            config,
            audio_enabled,
            state,
            history,
            metrics,
            status,
            router,
            max_context,
            handoff,
            seg_stop,
            command_rx,
            event_tx,
            seg_event_rx,
            stt_event_rx,
            brain_event_rx,
            exec_event_rx,
            speech_event_rx,
            utterance_tx: Some(utterance_tx),
            brain_tx: Some(brain_tx),
            action_tx: Some(action_tx),
            speak_tx: Some(speak_tx),
            segmenter_worker: Some(segmenter_worker),
            stt_worker: Some(stt_worker),
            brain_worker: Some(brain_worker),
            exec_worker: Some(exec_worker),
            speech_worker: Some(speech_worker),
            outstanding_execs: Vec::new(),
            outstanding_speech: Vec::new(),
        };

        Ok((orchestrator, handle))
    }

    /// Spawn all stage workers and the orchestrator loop.
    ///
    /// Consumes the orchestrator and returns the join handles.
    pub fn start(mut self) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();

        if self.audio_enabled {
            let segmenter = self
                .segmenter_worker
                .take()
                .ok_or_else(|| WingmanError::ChannelError("segmenter already taken".into()))?;
            handles.push(segmenter.start());
            info!("segmenter worker started");
        }
        // Without audio the unstarted segmenter stays in place: its event
        // sender must outlive the loop or the select arm would spin on a
        // disconnected channel.

        let stt = self
            .stt_worker
            .take()
            .ok_or_else(|| WingmanError::ChannelError("transcription worker already taken".into()))?;
        handles.push(stt.start());
        info!("transcription worker started");

        let brain = self
            .brain_worker
            .take()
            .ok_or_else(|| WingmanError::ChannelError("brain worker already taken".into()))?;
        handles.push(brain.start());
        info!("brain worker started");

        let exec = self
            .exec_worker
            .take()
            .ok_or_else(|| WingmanError::ChannelError("executor worker already taken".into()))?;
        handles.push(exec.start()?);
        info!("executor worker started");

        let speech = self
            .speech_worker
            .take()
            .ok_or_else(|| WingmanError::ChannelError("speech worker already taken".into()))?;
        handles.push(speech.start()?);
        info!("speech worker started");

        let loop_handle = thread::spawn(move || {
            self.run();
        });
        handles.push(loop_handle);
        info!("orchestrator loop started");

        Ok(handles)
    }

    fn run(mut self) {
        if self.audio_enabled {
            self.transition(PipelineState::Listening);
        }

        // Local endpoints so arm bodies can borrow self mutably.
        let command_rx = self.command_rx.clone();
        let seg_event_rx = self.seg_event_rx.clone();
        let stt_event_rx = self.stt_event_rx.clone();
        let brain_event_rx = self.brain_event_rx.clone();
        let exec_event_rx = self.exec_event_rx.clone();
        let speech_event_rx = self.speech_event_rx.clone();

        loop {
            select! {
                recv(command_rx) -> cmd => match cmd {
                    Ok(PipelineCommand::SubmitText(text)) => self.handle_text(text),
                    Ok(PipelineCommand::Shutdown) => {
                        self.shutdown();
                        return;
                    }
                    Err(_) => {
                        warn!("command channel disconnected, shutting down");
                        self.shutdown();
                        return;
                    }
                },
                recv(seg_event_rx) -> event => {
                    if let Ok(event) = event {
                        self.handle_segmenter_event(event);
                    }
                },
                recv(stt_event_rx) -> event => {
                    if let Ok(event) = event {
                        self.handle_stt_event(event);
                    }
                },
                recv(brain_event_rx) -> event => {
                    if let Ok(event) = event {
                        self.handle_brain_event(event);
                    }
                },
                recv(exec_event_rx) -> event => {
                    if let Ok(event) = event {
                        self.handle_exec_event(event);
                    }
                },
                recv(speech_event_rx) -> event => {
                    if let Ok(event) = event {
                        self.handle_speech_event(event);
                    }
                },
            }
        }
    }

    // === Stage event handlers ===

    fn handle_segmenter_event(&mut self, event: SegmenterEvent) {
        match event {
            SegmenterEvent::UtteranceClosed(utterance) => {
                if self.state.snapshot().is_shutdown() {
                    return;
                }

                // Barge-in: the operator spoke over running work. Cancel it
                // and take the new utterance immediately; the canceled
                // outcome still arrives later for audit.
                if self.state.snapshot().is_executing() || !self.outstanding_speech.is_empty() {
                    info!(id = %utterance.id, "barge-in, canceling in-flight work");
                    self.metrics.barge_ins.fetch_add(1, Ordering::Relaxed);
                    self.cancel_in_flight();
                }

                self.transition(PipelineState::Transcribing);
                if let Some(tx) = &self.utterance_tx {
                    if tx.send(utterance).is_err() {
                        error!("transcription worker unavailable");
                    }
                }
            }
            SegmenterEvent::CaptureStalled => {
                self.metrics.set_healthy(false);
                self.publish_status();
            }
            SegmenterEvent::CaptureRecovered => {
                self.metrics.set_healthy(true);
                self.publish_status();
            }
            SegmenterEvent::Shutdown => {
                debug!("segmenter shutdown event received");
            }
        }
    }

    fn handle_stt_event(&mut self, event: SttEvent) {
        match event {
            SttEvent::Transcribed(transcript) => {
                let _ = self
                    .event_tx
                    .send(PipelineEvent::Transcript(transcript.text.clone()));
                self.dispatch_transcript(transcript);
            }
            SttEvent::Rejected { utterance_id, reason } => {
                debug!(id = %utterance_id, %reason, "transcript rejected, resuming");
                self.metrics
                    .transcripts_rejected
                    .fetch_add(1, Ordering::Relaxed);
                self.recover();
            }
            SttEvent::TimedOut { utterance_id } => {
                warn!(id = %utterance_id, "transcription timeout, discarding utterance");
                self.metrics
                    .transcription_timeouts
                    .fetch_add(1, Ordering::Relaxed);
                self.recover();
            }
            SttEvent::Failed { utterance_id, error } => {
                warn!(id = %utterance_id, "transcription failed: {}", error);
                let _ = self.event_tx.send(PipelineEvent::Error(error));
                self.recover();
            }
            SttEvent::Shutdown => {
                debug!("transcription shutdown event received");
            }
        }
    }

    fn handle_brain_event(&mut self, event: BrainEvent) {
        match event {
            BrainEvent::DecisionReady {
                transcript,
                routing,
                tier,
                decision,
                elapsed_ms,
                timed_out,
            } => {
                if timed_out {
                    self.metrics
                        .reasoning_timeouts
                        .fetch_add(1, Ordering::Relaxed);
                }
                self.metrics
                    .last_decision_ms
                    .store(elapsed_ms, Ordering::Relaxed);
                debug!(
                    tier = %tier,
                    elapsed_ms,
                    needs_input = decision.needs_input,
                    "decision ready"
                );
                let _ = self
                    .event_tx
                    .send(PipelineEvent::DecisionMade(decision.clone()));

                let exchange_id = Uuid::new_v4();
                let target = match (&decision.action, decision.profile) {
                    (Some(_), Some(hint)) => Some(compute::route(&hint.to_profile())),
                    _ => None,
                };

                self.history.write().append(Exchange {
                    id: exchange_id,
                    utterance_id: transcript.utterance_id,
                    transcript: transcript.text,
                    routing,
                    tier,
                    decision: decision.clone(),
                    compute_target: target,
                    outcome: None,
                    created_at: Utc::now(),
                });

                if let Some(text) = &decision.speak {
                    self.start_speech(exchange_id, text);
                }

                if let Some(action) = &decision.action {
                    self.metrics
                        .actions_dispatched
                        .fetch_add(1, Ordering::Relaxed);
                    let cancel = Arc::new(AtomicBool::new(false));
                    self.outstanding_execs.push((exchange_id, Arc::clone(&cancel)));
                    self.transition(PipelineState::Executing);
                    if let Some(tx) = &self.action_tx {
                        let request = ActionRequest {
                            exchange_id,
                            action: action.clone(),
                            target,
                            timeout: self.config.executor.timeout(),
                            cancel,
                        };
                        if tx.send(request).is_err() {
                            error!("executor worker unavailable");
                            self.outstanding_execs.retain(|(id, _)| *id != exchange_id);
                            self.recover();
                        }
                    }
                } else {
                    // needs_input and speak-only decisions return to
                    // listening without touching the executor.
                    self.recover();
                }
            }
            BrainEvent::Shutdown => {
                debug!("brain shutdown event received");
            }
        }
    }

    fn handle_exec_event(&mut self, event: ExecEvent) {
        match event {
            ExecEvent::Started { exchange_id } => {
                debug!(id = %exchange_id, "action started");
            }
            ExecEvent::Output(chunk) => {
                let _ = self.event_tx.send(PipelineEvent::ActionOutput(chunk));
            }
            ExecEvent::Finished {
                exchange_id,
                outcome,
                elapsed_ms,
            } => {
                info!(id = %exchange_id, %outcome, elapsed_ms, "action outcome recorded");
                self.metrics
                    .last_action_ms
                    .store(elapsed_ms, Ordering::Relaxed);
                self.history.write().record_outcome(exchange_id, outcome.clone());

                match outcome {
                    Outcome::Timeout => {
                        self.metrics
                            .execution_timeouts
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    Outcome::Failure { .. } => {
                        self.metrics
                            .execution_failures
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }

                let was_tracked = self
                    .outstanding_execs
                    .iter()
                    .any(|(id, _)| *id == exchange_id);
                self.outstanding_execs.retain(|(id, _)| *id != exchange_id);

                // Failures are surfaced to the operator; cancellations are
                // not, since the operator caused them.
                if matches!(outcome, Outcome::Timeout | Outcome::Failure { .. }) {
                    self.start_speech(exchange_id, "That didn't work.");
                }

                let _ = self.event_tx.send(PipelineEvent::ActionFinished {
                    exchange_id,
                    outcome,
                });

                // Stay in EXECUTING while queued actions remain.
                if was_tracked
                    && self.outstanding_execs.is_empty()
                    && self.state.snapshot().is_executing()
                {
                    self.recover();
                }
            }
            ExecEvent::Shutdown => {
                debug!("executor shutdown event received");
            }
        }
    }

    fn handle_speech_event(&mut self, event: SpeechEvent) {
        match event {
            SpeechEvent::Started { exchange_id } => {
                debug!(id = %exchange_id, "playback started");
            }
            SpeechEvent::Finished {
                exchange_id,
                interrupted,
            } => {
                debug!(id = %exchange_id, interrupted, "playback finished");
                self.outstanding_speech
                    .retain(|(id, _)| *id != exchange_id);
            }
            SpeechEvent::Shutdown => {
                debug!("speech shutdown event received");
            }
        }
    }

    // === Dispatch helpers ===

    fn handle_text(&mut self, text: String) {
        if self.state.snapshot().is_shutdown() {
            return;
        }
        debug!(text = %text, "direct text submitted");
        self.dispatch_transcript(Transcript {
            utterance_id: Uuid::new_v4(),
            text,
            confidence: 1.0,
            hints_used: Vec::new(),
        });
    }

    fn dispatch_transcript(&mut self, transcript: Transcript) {
        let routing = {
            let history = self.history.read();
            self.router.classify(&transcript.text, &history)
        };
        let history_lines = self.history.recent_lines(self.max_context);

        debug!(routing = %routing, text = %transcript.text, "transcript routed");
        self.transition(PipelineState::Thinking);

        if let Some(tx) = &self.brain_tx {
            let request = BrainRequest {
                transcript,
                routing,
                history_lines,
            };
            if tx.send(request).is_err() {
                error!("brain worker unavailable");
                self.recover();
            }
        }
    }

    fn start_speech(&mut self, exchange_id: Uuid, text: &str) {
        let cancel = Arc::new(AtomicBool::new(false));
        self.outstanding_speech.push((exchange_id, Arc::clone(&cancel)));
        if let Some(tx) = &self.speak_tx {
            let request = SpeakRequest {
                exchange_id,
                text: text.to_string(),
                cancel,
            };
            if tx.send(request).is_err() {
                warn!("speech worker unavailable");
                self.outstanding_speech
                    .retain(|(id, _)| *id != exchange_id);
            }
        }
    }

    fn cancel_in_flight(&self) {
        for (id, cancel) in &self.outstanding_execs {
            debug!(id = %id, "canceling in-flight action");
            cancel.store(true, Ordering::SeqCst);
        }
        for (id, cancel) in &self.outstanding_speech {
            debug!(id = %id, "canceling in-flight playback");
            cancel.store(true, Ordering::SeqCst);
        }
    }

    /// Return to listening (or idle without audio) after a unit of work.
    fn recover(&mut self) {
        if self.state.snapshot().is_shutdown() {
            return;
        }
        self.transition(PipelineState::Idle);
        if self.audio_enabled {
            self.transition(PipelineState::Listening);
        }
    }

    fn transition(&self, to: PipelineState) {
        let from = self.state.snapshot();
        if from == to {
            return;
        }
        if !from.can_transition(to) {
            warn!(%from, %to, "illegal state transition requested, ignoring");
            return;
        }
        self.state.set(to);
        debug!(%from, %to, "state transition");
        self.publish_status();
        let _ = self.event_tx.send(PipelineEvent::StateChanged(to));
    }

    fn publish_status(&self) {
        self.metrics
            .frames_dropped
            .store(self.handoff.dropped_count(), Ordering::Relaxed);
        self.status.publish(StatusUpdate {
            state: self.state.snapshot(),
            healthy: self.metrics.is_healthy(),
            metrics: self.metrics.snapshot(),
        });
    }

    // === Shutdown ===

    fn shutdown(&mut self) {
        info!("shutdown requested");
        self.transition(PipelineState::Shutdown);
        self.cancel_in_flight();
        self.seg_stop.store(true, Ordering::SeqCst);

        // Dropping the work queues lets each worker drain and exit.
        self.utterance_tx = None;
        self.brain_tx = None;
        self.action_tx = None;
        self.speak_tx = None;

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seg_down = !self.audio_enabled;
        let mut stt_down = false;
        let mut brain_down = false;
        let mut exec_down = false;
        let mut speech_down = false;

        while !(seg_down && stt_down && brain_down && exec_down && speech_down) {
            if Instant::now() > deadline {
                warn!("shutdown drain timed out, forcing exit");
                break;
            }

            if !seg_down {
                if let Ok(event) = self.seg_event_rx.recv_timeout(Duration::from_millis(20)) {
                    seg_down = matches!(event, SegmenterEvent::Shutdown);
                }
            }
            if !stt_down {
                if let Ok(event) = self.stt_event_rx.recv_timeout(Duration::from_millis(20)) {
                    stt_down = matches!(event, SttEvent::Shutdown);
                }
            }
            if !brain_down {
                if let Ok(event) = self.brain_event_rx.recv_timeout(Duration::from_millis(20)) {
                    brain_down = matches!(event, BrainEvent::Shutdown);
                }
            }
            if !exec_down {
                if let Ok(event) = self.exec_event_rx.recv_timeout(Duration::from_millis(20)) {
                    if let ExecEvent::Finished {
                        exchange_id,
                        outcome,
                        ..
                    } = &event
                    {
                        // Canceled work still gets its audit record.
                        self.history
                            .write()
                            .record_outcome(*exchange_id, outcome.clone());
                    }
                    exec_down = matches!(event, ExecEvent::Shutdown);
                }
            }
            if !speech_down {
                if let Ok(event) = self.speech_event_rx.recv_timeout(Duration::from_millis(20)) {
                    speech_down = matches!(event, SpeechEvent::Shutdown);
                }
            }
        }

        info!(
            exchanges = self.history.len(),
            "history flushed, shutdown complete"
        );
        self.publish_status();
        let _ = self.event_tx.send(PipelineEvent::Shutdown);
    }
}
