//! End-to-end pipeline tests over mock transcription and reasoning
//! boundaries, with real frames driven through the energy-based segmenter.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use wingman::audio::{AudioFrame, FrameQueue, FRAME_SAMPLES};
use wingman::brain::{Decision, MockReasoner, ReasoningTier};
use wingman::config::WingmanConfig;
use wingman::exec::Outcome;
use wingman::orchestrator::{Orchestrator, OrchestratorHandle, PipelineEvent};
use wingman::routing::RoutingClass;
use wingman::segment::{SegmenterConfig, VadBackend};
use wingman::state::PipelineState;
use wingman::transcribe::MockSpeechToText;

fn test_config() -> WingmanConfig {
    let mut config = WingmanConfig::default();
    config.pipeline.frame_handoff_capacity = 256;
    config.segmenter = SegmenterConfig {
        backend: VadBackend::Energy,
        trailing_silence_ms: 90,
        min_speech_ms: 60,
        preroll_ms: 90,
        // Keep the watchdog quiet during slow CI runs
        watchdog_ms: 120_000,
        ..Default::default()
    };
    // Synthesis stub: completes instantly, no audio device required
    config.speech.command = vec!["true".to_string()];
    config
}

fn speech_frame(seq: u64) -> AudioFrame {
    AudioFrame::new(seq, vec![3000i16; FRAME_SAMPLES])
}

fn silence_frame(seq: u64) -> AudioFrame {
    AudioFrame::new(seq, vec![0i16; FRAME_SAMPLES])
}

/// Push one complete speech region (5 voiced + 3 trailing silence frames).
fn push_region(queue: &FrameQueue, base: u64) {
    for seq in 0..5 {
        queue.push(speech_frame(base + seq));
    }
    for seq in 5..8 {
        queue.push(silence_frame(base + seq));
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

fn shutdown_and_join(handle: &OrchestratorHandle, handles: Vec<std::thread::JoinHandle<()>>) {
    handle.shutdown().expect("shutdown accepted");
    for h in handles {
        h.join().expect("worker joined cleanly");
    }
}

#[test]
fn trivial_command_speaks_without_executing() {
    let decision = Decision::speak_only("all clear", 0.95);
    let (orchestrator, handle) = Orchestrator::new(
        test_config(),
        MockSpeechToText::new("status check"),
        MockReasoner::deciding(&decision),
        true,
    )
    .unwrap();
    let workers = orchestrator.start().unwrap();

    push_region(&handle.frame_queue(), 0);

    assert!(wait_until(Duration::from_secs(5), || handle.history().len() == 1));

    {
        let history = handle.history().read();
        let exchange = history.recent(1)[0];
        assert_eq!(exchange.transcript, "status check");
        assert_eq!(exchange.routing, RoutingClass::Trivial);
        assert_eq!(exchange.tier, ReasoningTier::Fast);
        assert_eq!(exchange.decision.speak.as_deref(), Some("all clear"));
        assert!(exchange.decision.action.is_none());
        assert!(exchange.outcome.is_none());
    }

    // No executor task was dispatched and the pipeline resumed listening.
    assert_eq!(
        handle.metrics().actions_dispatched.load(Ordering::Relaxed),
        0
    );
    assert!(wait_until(Duration::from_secs(5), || {
        handle.state() == PipelineState::Listening
    }));

    shutdown_and_join(&handle, workers);
}

#[test]
fn exchanges_append_in_utterance_close_order() {
    let (orchestrator, handle) = Orchestrator::new(
        test_config(),
        MockSpeechToText::scripted(&["first request", "second request", "third request"]),
        MockReasoner::deciding(&Decision::speak_only("ok", 0.9))
            .with_delay(Duration::from_millis(50)),
        true,
    )
    .unwrap();
    let workers = orchestrator.start().unwrap();

    let queue = handle.frame_queue();
    for region in 0..3 {
        push_region(&queue, region * 100);
        // Space the regions so each closes separately
        std::thread::sleep(Duration::from_millis(50));
    }

    assert!(wait_until(Duration::from_secs(10), || {
        handle.history().len() == 3
    }));

    let history = handle.history().read();
    let transcripts: Vec<String> = history
        .recent(3)
        .iter()
        .map(|e| e.transcript.clone())
        .collect();
    assert_eq!(
        transcripts,
        vec!["first request", "second request", "third request"]
    );
    drop(history);

    shutdown_and_join(&handle, workers);
}

#[test]
fn hallucinated_transcript_never_becomes_an_exchange() {
    let (orchestrator, handle) = Orchestrator::new(
        test_config(),
        MockSpeechToText::new("Thank you."),
        MockReasoner::deciding(&Decision::speak_only("ok", 0.9)),
        true,
    )
    .unwrap();
    let workers = orchestrator.start().unwrap();

    push_region(&handle.frame_queue(), 0);

    assert!(wait_until(Duration::from_secs(5), || {
        handle
            .metrics()
            .transcripts_rejected
            .load(Ordering::Relaxed)
            == 1
    }));

    // Rejection is silent: no exchange, pipeline back to listening.
    assert!(handle.history().is_empty());
    assert!(wait_until(Duration::from_secs(5), || {
        handle.state() == PipelineState::Listening
    }));

    shutdown_and_join(&handle, workers);
}

#[test]
fn needs_input_dispatches_no_executor_task() {
    let (orchestrator, handle) = Orchestrator::new(
        test_config(),
        MockSpeechToText::new("do the thing"),
        MockReasoner::deciding(&Decision::clarification()),
        true,
    )
    .unwrap();
    let workers = orchestrator.start().unwrap();

    push_region(&handle.frame_queue(), 0);

    assert!(wait_until(Duration::from_secs(5), || handle.history().len() == 1));

    {
        let history = handle.history().read();
        let exchange = history.recent(1)[0];
        assert!(exchange.decision.needs_input);
        assert!(exchange.decision.action.is_none());
    }
    assert_eq!(
        handle.metrics().actions_dispatched.load(Ordering::Relaxed),
        0
    );
    assert!(wait_until(Duration::from_secs(5), || {
        handle.state() == PipelineState::Listening
    }));

    shutdown_and_join(&handle, workers);
}

#[test]
fn reasoning_timeout_increments_metric_exactly_once() {
    let (orchestrator, handle) = Orchestrator::new(
        test_config(),
        MockSpeechToText::new("something ambitious"),
        MockReasoner::new("ignored").with_timeout(),
        true,
    )
    .unwrap();
    let workers = orchestrator.start().unwrap();

    push_region(&handle.frame_queue(), 0);

    assert!(wait_until(Duration::from_secs(5), || handle.history().len() == 1));

    {
        let history = handle.history().read();
        let exchange = history.recent(1)[0];
        assert!(exchange.decision.needs_input);
        assert!(exchange.decision.action.is_none());
    }

    // Exactly once, and no action dispatched.
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(
        handle.metrics().reasoning_timeouts.load(Ordering::Relaxed),
        1
    );
    assert_eq!(
        handle.metrics().actions_dispatched.load(Ordering::Relaxed),
        0
    );
    assert!(wait_until(Duration::from_secs(5), || {
        handle.state() == PipelineState::Listening
    }));

    shutdown_and_join(&handle, workers);
}

#[test]
fn transcription_timeout_discards_utterance() {
    let (orchestrator, handle) = Orchestrator::new(
        test_config(),
        MockSpeechToText::new("unused").with_timeout(),
        MockReasoner::deciding(&Decision::speak_only("ok", 0.9)),
        true,
    )
    .unwrap();
    let workers = orchestrator.start().unwrap();

    push_region(&handle.frame_queue(), 0);

    assert!(wait_until(Duration::from_secs(5), || {
        handle
            .metrics()
            .transcription_timeouts
            .load(Ordering::Relaxed)
            == 1
    }));
    assert!(handle.history().is_empty());
    assert!(wait_until(Duration::from_secs(5), || {
        handle.state() == PipelineState::Listening
    }));

    shutdown_and_join(&handle, workers);
}

#[test]
fn barge_in_cancels_running_action() {
    let (orchestrator, handle) = Orchestrator::new(
        test_config(),
        MockSpeechToText::scripted(&["run the long job", "actually stop"]),
        MockReasoner::scripted(&[
            Decision::act("sleep 30", Some("starting"), 0.9),
            Decision::speak_only("stopped", 0.9),
        ]),
        true,
    )
    .unwrap();
    let workers = orchestrator.start().unwrap();

    let queue = handle.frame_queue();
    push_region(&queue, 0);

    // Wait until the first action is actually executing.
    assert!(wait_until(Duration::from_secs(10), || {
        handle.state() == PipelineState::Executing
    }));

    // Operator speaks over it.
    push_region(&queue, 100);

    // The prior task's outcome is recorded as canceled, and the new
    // utterance produced its own exchange.
    assert!(wait_until(Duration::from_secs(10), || {
        let history = handle.history().read();
        history.recent(2).first().map(|e| e.outcome.clone()) == Some(Some(Outcome::Canceled))
    }));
    assert!(wait_until(Duration::from_secs(10), || {
        handle.history().len() == 2
    }));
    assert_eq!(handle.metrics().barge_ins.load(Ordering::Relaxed), 1);

    {
        let history = handle.history().read();
        let exchanges = history.recent(2);
        assert_eq!(exchanges[0].transcript, "run the long job");
        assert_eq!(exchanges[0].outcome, Some(Outcome::Canceled));
        assert_eq!(exchanges[1].transcript, "actually stop");
    }

    shutdown_and_join(&handle, workers);
}

#[test]
fn saturated_handoff_drops_oldest_without_blocking() {
    let mut config = test_config();
    config.pipeline.frame_handoff_capacity = 5;

    let (orchestrator, handle) = Orchestrator::new(
        config,
        MockSpeechToText::new("still alive"),
        MockReasoner::deciding(&Decision::speak_only("ok", 0.9)),
        true,
    )
    .unwrap();
    let workers = orchestrator.start().unwrap();

    // Flood the hand-off far past its capacity, then close the region.
    let queue = handle.frame_queue();
    for seq in 0..40 {
        queue.push(speech_frame(seq));
    }
    std::thread::sleep(Duration::from_millis(100));
    for seq in 40..44 {
        queue.push(silence_frame(seq));
    }

    assert!(queue.dropped_count() > 0, "overload must drop oldest frames");

    // The pipeline still progresses: an utterance closes and is processed.
    assert!(wait_until(Duration::from_secs(10), || {
        handle.history().len() == 1
    }));

    shutdown_and_join(&handle, workers);
}

#[test]
fn one_shot_text_executes_and_records_outcome() {
    let mut config = test_config();
    config.speech.enabled = false;

    let (orchestrator, handle) = Orchestrator::new(
        config,
        MockSpeechToText::new("unused"),
        MockReasoner::deciding(&Decision::act("echo done", Some("running it"), 0.9)),
        false,
    )
    .unwrap();
    let workers = orchestrator.start().unwrap();

    handle.submit_text("run my command").unwrap();

    let mut output_lines = Vec::new();
    let mut finished = None;
    while finished.is_none() {
        match handle
            .recv_event_timeout(Duration::from_secs(10))
            .expect("pipeline should produce events")
        {
            PipelineEvent::ActionOutput(chunk) => output_lines.push(chunk.line),
            PipelineEvent::ActionFinished { outcome, .. } => finished = Some(outcome),
            _ => {}
        }
    }

    assert_eq!(output_lines, vec!["done"]);
    assert_eq!(finished, Some(Outcome::Success));

    assert!(wait_until(Duration::from_secs(5), || {
        let history = handle.history().read();
        history.recent(1).first().map(|e| e.outcome.clone()) == Some(Some(Outcome::Success))
    }));

    shutdown_and_join(&handle, workers);
}

#[test]
fn failed_action_is_surfaced_and_counted() {
    let (orchestrator, handle) = Orchestrator::new(
        test_config(),
        MockSpeechToText::new("break something"),
        MockReasoner::deciding(&Decision::act("exit 2", None, 0.8)),
        true,
    )
    .unwrap();
    let workers = orchestrator.start().unwrap();

    push_region(&handle.frame_queue(), 0);

    assert!(wait_until(Duration::from_secs(10), || {
        let history = handle.history().read();
        history.recent(1).first().map(|e| e.outcome.clone())
            == Some(Some(Outcome::Failure { code: Some(2) }))
    }));
    assert_eq!(
        handle
            .metrics()
            .execution_failures
            .load(Ordering::Relaxed),
        1
    );

    // Failure is recoverable: back to listening, never fatal.
    assert!(wait_until(Duration::from_secs(5), || {
        handle.state() == PipelineState::Listening
    }));

    shutdown_and_join(&handle, workers);
}

#[test]
fn shutdown_from_executing_cancels_in_flight_work() {
    let (orchestrator, handle) = Orchestrator::new(
        test_config(),
        MockSpeechToText::new("run the long job"),
        MockReasoner::deciding(&Decision::act("sleep 30", None, 0.9)),
        true,
    )
    .unwrap();
    let workers = orchestrator.start().unwrap();

    push_region(&handle.frame_queue(), 0);
    assert!(wait_until(Duration::from_secs(10), || {
        handle.state() == PipelineState::Executing
    }));

    let begun = Instant::now();
    shutdown_and_join(&handle, workers);

    // The sleeping action was killed rather than awaited.
    assert!(begun.elapsed() < Duration::from_secs(10));
    assert_eq!(handle.state(), PipelineState::Shutdown);
}

#[test]
fn status_observer_sees_transitions_and_tolerates_loss() {
    let (orchestrator, handle) = Orchestrator::new(
        test_config(),
        MockSpeechToText::new("status check"),
        MockReasoner::deciding(&Decision::speak_only("all clear", 0.95)),
        true,
    )
    .unwrap();
    let status_rx = handle.subscribe_status();
    let workers = orchestrator.start().unwrap();

    push_region(&handle.frame_queue(), 0);
    assert!(wait_until(Duration::from_secs(5), || handle.history().len() == 1));

    let mut states = Vec::new();
    while let Ok(update) = status_rx.try_recv() {
        states.push(update.state);
    }
    assert!(states.contains(&PipelineState::Transcribing));
    assert!(states.contains(&PipelineState::Thinking));

    // A fresh snapshot resynchronizes an observer after loss.
    let snapshot = handle.status_snapshot();
    assert!(snapshot.healthy);

    shutdown_and_join(&handle, workers);
}
