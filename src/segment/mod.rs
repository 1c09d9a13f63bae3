//! Segmenter: turns the raw frame stream into bounded utterances.
//!
//! A VAD-driven state machine with a pre-speech buffer so onsets are not
//! clipped. Produces each utterance exactly once when its speech region
//! closes after the trailing-silence timeout; runs for the pipeline's
//! lifetime. A watchdog reports capture stalls without failing anything.

pub mod vad;

use crate::audio::frame::{calculate_rms, AudioFrame, FRAME_DURATION_MS};
use crate::audio::ring::{FrameQueue, PrerollBuffer};
use crate::error::Result;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use vad::{Sensitivity, VadVerdict, VoiceDetector};

/// Classifier seam so the segmenter state machine is testable without a
/// live VAD session.
pub trait SpeechClassifier {
    /// Classify one frame of samples.
    fn classify(&mut self, samples: &[i16]) -> Result<VadVerdict>;

    /// Reset session state between utterances.
    fn reset(&mut self);
}

impl SpeechClassifier for VoiceDetector {
    fn classify(&mut self, samples: &[i16]) -> Result<VadVerdict> {
        VoiceDetector::classify(self, samples)
    }

    fn reset(&mut self) {
        VoiceDetector::reset(self);
    }
}

/// RMS-threshold classifier. Cheaper and fully deterministic; used when the
/// `energy` backend is configured and throughout the test suite.
pub struct EnergyClassifier {
    threshold: f32,
}

impl EnergyClassifier {
    /// Create a classifier with the given RMS threshold.
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for EnergyClassifier {
    fn default() -> Self {
        Self { threshold: 0.02 }
    }
}

impl SpeechClassifier for EnergyClassifier {
    fn classify(&mut self, samples: &[i16]) -> Result<VadVerdict> {
        let level = calculate_rms(samples);
        Ok(VadVerdict {
            is_speech: level > self.threshold,
            level,
        })
    }

    fn reset(&mut self) {}
}

/// Which VAD backend the segmenter uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadBackend {
    /// WebRTC VAD with four-level sensitivity.
    Webrtc,
    /// RMS energy threshold.
    Energy,
}

impl Default for VadBackend {
    fn default() -> Self {
        VadBackend::Webrtc
    }
}

/// Segmenter configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// VAD backend selection.
    pub backend: VadBackend,
    /// Detection sensitivity (webrtc backend).
    pub sensitivity: Sensitivity,
    /// RMS threshold (energy backend).
    pub energy_threshold: f32,
    /// Trailing silence that closes an utterance, in milliseconds.
    pub trailing_silence_ms: u32,
    /// Minimum utterance length; shorter regions are discarded.
    pub min_speech_ms: u32,
    /// Pre-speech buffer length, in milliseconds.
    pub preroll_ms: u32,
    /// Frame-arrival watchdog interval, in milliseconds.
    pub watchdog_ms: u64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            backend: VadBackend::default(),
            sensitivity: Sensitivity::default(),
            energy_threshold: 0.02,
            trailing_silence_ms: 800,
            min_speech_ms: 300,
            preroll_ms: 300,
            watchdog_ms: 2000,
        }
    }
}

impl SegmenterConfig {
    fn preroll_frames(&self) -> usize {
        (self.preroll_ms / FRAME_DURATION_MS).max(1) as usize
    }
}

/// One bounded span of detected speech, consumed once by transcription.
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Unique id carried through the exchange lifecycle.
    pub id: Uuid,
    /// Mono 16-bit PCM at the pipeline sample rate.
    pub samples: Vec<i16>,
    /// Capture instant of the first buffered frame.
    pub started_at: Instant,
    /// Capture instant of the closing frame.
    pub ended_at: Instant,
    /// Fraction of frames the VAD classified as voiced.
    pub speech_confidence: f32,
    /// Mean per-frame RMS across the utterance.
    pub mean_rms: f32,
}

impl Utterance {
    /// Utterance length in milliseconds.
    pub fn duration_ms(&self) -> u32 {
        (self.samples.len() as u64 * 1000 / crate::audio::SAMPLE_RATE as u64) as u32
    }
}

/// Events emitted by the segmenter worker.
#[derive(Debug)]
pub enum SegmenterEvent {
    /// A speech region closed.
    UtteranceClosed(Utterance),
    /// No frames arrived within the watchdog interval.
    CaptureStalled,
    /// Frames resumed after a stall.
    CaptureRecovered,
    /// Worker has shut down.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    InSpeech,
}

/// The VAD-bounded segmentation state machine.
///
/// Pure frame-in / utterance-out; the worker wraps it with queue polling
/// and the watchdog.
pub struct Segmenter<C: SpeechClassifier> {
    config: SegmenterConfig,
    classifier: C,
    preroll: PrerollBuffer,
    phase: Phase,

    samples: Vec<i16>,
    started_at: Option<Instant>,
    last_at: Option<Instant>,
    voiced_frames: u32,
    total_frames: u32,
    rms_sum: f32,
    silence_run_ms: u32,
}

impl<C: SpeechClassifier> Segmenter<C> {
    /// Create a segmenter around the given classifier.
    pub fn with_classifier(config: SegmenterConfig, classifier: C) -> Self {
        let preroll = PrerollBuffer::new(config.preroll_frames());
        Self {
            config,
            classifier,
            preroll,
            phase: Phase::Idle,
            samples: Vec::new(),
            started_at: None,
            last_at: None,
            voiced_frames: 0,
            total_frames: 0,
            rms_sum: 0.0,
            silence_run_ms: 0,
        }
    }

    /// Feed one frame; returns a closed utterance when a speech region ends.
    pub fn push_frame(&mut self, frame: AudioFrame) -> Result<Option<Utterance>> {
        let verdict = self.classifier.classify(&frame.samples)?;
        let frame_ms = frame.duration_ms();

        match self.phase {
            Phase::Idle => {
                if verdict.is_speech {
                    self.begin_utterance(&frame, verdict);
                } else {
                    self.preroll.push(frame);
                }
                Ok(None)
            }
            Phase::InSpeech => {
                self.accumulate(&frame, verdict);

                if verdict.is_speech {
                    self.silence_run_ms = 0;
                    Ok(None)
                } else {
                    self.silence_run_ms += frame_ms;
                    if self.silence_run_ms >= self.config.trailing_silence_ms {
                        Ok(self.close_utterance())
                    } else {
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Return to idle, dropping any partial region.
    pub fn reset(&mut self) {
        self.classifier.reset();
        self.preroll.clear();
        self.clear_accumulation();
        self.phase = Phase::Idle;
    }

    fn begin_utterance(&mut self, frame: &AudioFrame, verdict: VadVerdict) {
        self.clear_accumulation();
        self.phase = Phase::InSpeech;

        // Flush pre-speech context so the onset is not clipped.
        let buffered = self.preroll.drain();
        self.started_at = Some(
            buffered
                .first()
                .map(|f| f.timestamp)
                .unwrap_or(frame.timestamp),
        );
        for old in buffered {
            self.samples.extend_from_slice(&old.samples);
        }

        self.accumulate(frame, verdict);
        debug!(
            sequence = frame.sequence,
            preroll_samples = self.samples.len() - frame.samples.len(),
            "speech started"
        );
    }

    fn accumulate(&mut self, frame: &AudioFrame, verdict: VadVerdict) {
        self.samples.extend_from_slice(&frame.samples);
        self.last_at = Some(frame.timestamp);
        self.total_frames += 1;
        if verdict.is_speech {
            self.voiced_frames += 1;
        }
        self.rms_sum += verdict.level;
    }

    fn close_utterance(&mut self) -> Option<Utterance> {
        let speech_ms = self
            .total_frames
            .saturating_sub(self.silence_run_ms / FRAME_DURATION_MS)
            * FRAME_DURATION_MS;

        let utterance = if speech_ms < self.config.min_speech_ms {
            debug!(
                speech_ms,
                min = self.config.min_speech_ms,
                "speech region too short, discarding"
            );
            None
        } else {
            let confidence = if self.total_frames > 0 {
                self.voiced_frames as f32 / self.total_frames as f32
            } else {
                0.0
            };
            let mean_rms = if self.total_frames > 0 {
                self.rms_sum / self.total_frames as f32
            } else {
                0.0
            };
            let utterance = Utterance {
                id: Uuid::new_v4(),
                samples: std::mem::take(&mut self.samples),
                started_at: self.started_at.unwrap_or_else(Instant::now),
                ended_at: self.last_at.unwrap_or_else(Instant::now),
                speech_confidence: confidence,
                mean_rms,
            };
            info!(
                id = %utterance.id,
                duration_ms = utterance.duration_ms(),
                confidence = utterance.speech_confidence,
                "utterance closed"
            );
            Some(utterance)
        };

        self.classifier.reset();
        self.clear_accumulation();
        self.phase = Phase::Idle;
        utterance
    }

    fn clear_accumulation(&mut self) {
        self.samples.clear();
        self.started_at = None;
        self.last_at = None;
        self.voiced_frames = 0;
        self.total_frames = 0;
        self.rms_sum = 0.0;
        self.silence_run_ms = 0;
    }
}

/// Worker that drives the segmenter from the frame hand-off queue.
pub struct SegmenterWorker {
    config: SegmenterConfig,
    handoff: FrameQueue,
    event_tx: Sender<SegmenterEvent>,
    stop: Arc<AtomicBool>,
}

impl SegmenterWorker {
    /// Create a worker over the hand-off queue.
    pub fn new(
        config: SegmenterConfig,
        handoff: FrameQueue,
        event_tx: Sender<SegmenterEvent>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            handoff,
            event_tx,
            stop,
        }
    }

    /// Start the worker thread.
    ///
    /// The VAD session is constructed on the worker thread; frame
    /// processing itself never blocks; only the emission of a closed
    /// utterance applies backpressure.
    pub fn start(self) -> JoinHandle<()> {
        thread::spawn(move || {
            info!(backend = ?self.config.backend, "segmenter worker starting");
            match self.config.backend {
                VadBackend::Webrtc => {
                    let classifier = VoiceDetector::new(self.config.sensitivity);
                    self.run(Segmenter::with_classifier(self.config.clone(), classifier));
                }
                VadBackend::Energy => {
                    let classifier = EnergyClassifier::new(self.config.energy_threshold);
                    self.run(Segmenter::with_classifier(self.config.clone(), classifier));
                }
            }
        })
    }

    fn run<C: SpeechClassifier>(&self, mut segmenter: Segmenter<C>) {
        let watchdog = Duration::from_millis(self.config.watchdog_ms);
        let mut last_frame = Instant::now();
        let mut stalled = false;

        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            match self.handoff.pop() {
                Some(frame) => {
                    last_frame = Instant::now();
                    if stalled {
                        stalled = false;
                        info!("capture recovered");
                        let _ = self.event_tx.send(SegmenterEvent::CaptureRecovered);
                    }

                    match segmenter.push_frame(frame) {
                        Ok(Some(utterance)) => {
                            if self
                                .event_tx
                                .send(SegmenterEvent::UtteranceClosed(utterance))
                                .is_err()
                            {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!("frame classification failed: {}", e);
                            segmenter.reset();
                        }
                    }
                }
                None => {
                    if !stalled && last_frame.elapsed() >= watchdog {
                        stalled = true;
                        warn!(
                            elapsed_ms = last_frame.elapsed().as_millis() as u64,
                            "no frames within watchdog interval"
                        );
                        let _ = self.event_tx.send(SegmenterEvent::CaptureStalled);
                    }
                    thread::sleep(Duration::from_millis(5));
                }
            }
        }

        let _ = self.event_tx.send(SegmenterEvent::Shutdown);
        info!("segmenter worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::FRAME_SAMPLES;

    fn silence_frame(seq: u64) -> AudioFrame {
        AudioFrame::new(seq, vec![0i16; FRAME_SAMPLES])
    }

    fn speech_frame(seq: u64) -> AudioFrame {
        AudioFrame::new(seq, vec![3000i16; FRAME_SAMPLES])
    }

    fn segmenter(config: SegmenterConfig) -> Segmenter<EnergyClassifier> {
        Segmenter::with_classifier(config, EnergyClassifier::default())
    }

    fn short_config() -> SegmenterConfig {
        SegmenterConfig {
            backend: VadBackend::Energy,
            trailing_silence_ms: 90, // 3 frames
            min_speech_ms: 60,       // 2 frames
            preroll_ms: 90,
            ..Default::default()
        }
    }

    #[test]
    fn test_silence_produces_nothing() {
        let mut seg = segmenter(short_config());
        for seq in 0..50 {
            assert!(seg.push_frame(silence_frame(seq)).unwrap().is_none());
        }
    }

    #[test]
    fn test_utterance_closes_after_trailing_silence() {
        let mut seg = segmenter(short_config());

        for seq in 0..5 {
            assert!(seg.push_frame(speech_frame(seq)).unwrap().is_none());
        }
        // Two silence frames: not yet closed
        assert!(seg.push_frame(silence_frame(5)).unwrap().is_none());
        assert!(seg.push_frame(silence_frame(6)).unwrap().is_none());
        // Third silence frame reaches 90ms of trailing silence
        let utterance = seg.push_frame(silence_frame(7)).unwrap();
        assert!(utterance.is_some());

        let utterance = utterance.unwrap();
        // 5 speech + 3 silence frames accumulated
        assert_eq!(utterance.samples.len(), 8 * FRAME_SAMPLES);
        assert!(utterance.speech_confidence > 0.5);
    }

    #[test]
    fn test_each_region_emits_exactly_once() {
        let mut seg = segmenter(short_config());
        let mut emitted = 0;

        for region in 0..3 {
            let base = region * 20;
            for seq in 0..5 {
                if seg.push_frame(speech_frame(base + seq)).unwrap().is_some() {
                    emitted += 1;
                }
            }
            for seq in 5..10 {
                if seg
                    .push_frame(silence_frame(base + seq))
                    .unwrap()
                    .is_some()
                {
                    emitted += 1;
                }
            }
        }

        assert_eq!(emitted, 3);
    }

    #[test]
    fn test_preroll_included_at_speech_start() {
        let mut seg = segmenter(short_config());

        // 3 frames of silence fill the 90ms preroll
        for seq in 0..3 {
            seg.push_frame(silence_frame(seq)).unwrap();
        }
        for seq in 3..8 {
            seg.push_frame(speech_frame(seq)).unwrap();
        }
        let mut closed = None;
        for seq in 8..14 {
            if let Some(u) = seg.push_frame(silence_frame(seq)).unwrap() {
                closed = Some(u);
                break;
            }
        }

        // 3 preroll + 5 speech + 3 trailing silence frames
        let utterance = closed.expect("utterance should close");
        assert_eq!(utterance.samples.len(), 11 * FRAME_SAMPLES);
    }

    #[test]
    fn test_too_short_region_discarded() {
        let config = SegmenterConfig {
            backend: VadBackend::Energy,
            trailing_silence_ms: 90,
            min_speech_ms: 300, // 10 frames of speech required
            preroll_ms: 30,
            ..Default::default()
        };
        let mut seg = segmenter(config);

        // Only 2 speech frames
        seg.push_frame(speech_frame(0)).unwrap();
        seg.push_frame(speech_frame(1)).unwrap();
        for seq in 2..10 {
            assert!(seg.push_frame(silence_frame(seq)).unwrap().is_none());
        }
    }

    #[test]
    fn test_speech_resumes_during_trailing_silence() {
        let mut seg = segmenter(short_config());

        for seq in 0..5 {
            seg.push_frame(speech_frame(seq)).unwrap();
        }
        // Silence run interrupted before the timeout
        seg.push_frame(silence_frame(5)).unwrap();
        seg.push_frame(speech_frame(6)).unwrap();
        seg.push_frame(silence_frame(7)).unwrap();
        seg.push_frame(silence_frame(8)).unwrap();
        let closed = seg.push_frame(silence_frame(9)).unwrap();

        // Region closes only on the uninterrupted 3-frame run
        assert!(closed.is_some());
        assert_eq!(closed.unwrap().samples.len(), 10 * FRAME_SAMPLES);
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let mut seg = segmenter(short_config());
        seg.push_frame(speech_frame(0)).unwrap();
        seg.reset();

        // A fresh region still closes correctly after reset
        for seq in 1..6 {
            seg.push_frame(speech_frame(seq)).unwrap();
        }
        let mut closed = None;
        for seq in 6..10 {
            if let Some(u) = seg.push_frame(silence_frame(seq)).unwrap() {
                closed = Some(u);
                break;
            }
        }
        assert!(closed.is_some());
    }

    #[test]
    fn test_worker_emits_utterance_from_queue() {
        let handoff = FrameQueue::new(64);
        let (event_tx, event_rx) = crossbeam_channel::bounded(16);
        let stop = Arc::new(AtomicBool::new(false));

        for seq in 0..5 {
            handoff.push(speech_frame(seq));
        }
        for seq in 5..10 {
            handoff.push(silence_frame(seq));
        }

        let worker =
            SegmenterWorker::new(short_config(), handoff, event_tx, Arc::clone(&stop));
        let handle = worker.start();

        let event = event_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("worker should emit an utterance");
        assert!(matches!(event, SegmenterEvent::UtteranceClosed(_)));

        stop.store(true, Ordering::SeqCst);
        handle.join().unwrap();
    }
}
