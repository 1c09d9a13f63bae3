//! WAV replay source
//!
//! Feeds a recorded file through the same frame hand-off as live capture,
//! for offline runs and integration tests. Replay is paced in real time by
//! default so segmenter timing behaves as it would live.

use crate::audio::frame::{AudioFrame, FRAME_DURATION_MS, FRAME_SAMPLES, SAMPLE_RATE};
use crate::audio::ring::FrameQueue;
use crate::error::{Result, WingmanError};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

/// Read a 16 kHz mono WAV file into PCM samples.
pub fn read_wav(path: &Path) -> Result<Vec<i16>> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| WingmanError::IOError(format!("Failed to open {}: {}", path.display(), e)))?;

    let spec = reader.spec();
    if spec.channels != 1 || spec.sample_rate != SAMPLE_RATE {
        return Err(WingmanError::ConfigError(format!(
            "Expected {} Hz mono WAV, got {} Hz / {} channel(s)",
            SAMPLE_RATE, spec.sample_rate, spec.channels
        )));
    }

    let samples: std::result::Result<Vec<i16>, _> = match spec.sample_format {
        hound::SampleFormat::Int => reader.samples::<i16>().collect(),
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect(),
    };

    samples.map_err(|e| WingmanError::IOError(format!("Failed to decode WAV: {}", e)))
}

/// Write PCM samples to a 16 kHz mono WAV file.
pub fn write_wav(path: &Path, samples: &[i16]) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| WingmanError::IOError(format!("Failed to create WAV: {}", e)))?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| WingmanError::IOError(format!("Failed to write WAV: {}", e)))?;
    }
    writer
        .finalize()
        .map_err(|e| WingmanError::IOError(format!("Failed to finalize WAV: {}", e)))?;
    Ok(())
}

/// Replay source that feeds a WAV file into the frame hand-off.
pub struct WavSource {
    samples: Vec<i16>,
    /// Sleep one frame period between pushes to mimic live capture.
    realtime: bool,
}

impl WavSource {
    /// Load a replay source from a WAV file.
    pub fn open(path: &Path) -> Result<Self> {
        let samples = read_wav(path)?;
        info!(
            "Loaded {} ({:.2}s of audio)",
            path.display(),
            samples.len() as f32 / SAMPLE_RATE as f32
        );
        Ok(Self {
            samples,
            realtime: true,
        })
    }

    /// Build directly from samples (used by tests).
    pub fn from_samples(samples: Vec<i16>) -> Self {
        Self {
            samples,
            realtime: false,
        }
    }

    /// Disable real-time pacing.
    pub fn without_pacing(mut self) -> Self {
        self.realtime = false;
        self
    }

    /// Start the replay thread.
    ///
    /// Pushes frames until the file is exhausted or `stop` is set. The
    /// trailing partial frame is zero-padded so the final utterance closes.
    pub fn start(self, handoff: FrameQueue, stop: Arc<AtomicBool>) -> JoinHandle<()> {
        thread::spawn(move || {
            let mut sequence: u64 = 0;
            for chunk in self.samples.chunks(FRAME_SAMPLES) {
                if stop.load(Ordering::SeqCst) {
                    info!("WAV replay stopped early at frame {}", sequence);
                    return;
                }

                let mut samples = chunk.to_vec();
                samples.resize(FRAME_SAMPLES, 0);

                if handoff.push(AudioFrame::new(sequence, samples)) {
                    warn!("WAV replay saturated the hand-off at frame {}", sequence);
                }
                sequence += 1;

                if self.realtime {
                    thread::sleep(Duration::from_millis(FRAME_DURATION_MS as u64));
                }
            }
            info!("WAV replay complete ({} frames)", sequence);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");

        let samples: Vec<i16> = (0..FRAME_SAMPLES * 3).map(|i| (i % 100) as i16).collect();
        write_wav(&path, &samples).unwrap();

        let loaded = read_wav(&path).unwrap();
        assert_eq!(loaded, samples);
    }

    #[test]
    fn test_replay_pushes_all_frames() {
        let handoff = FrameQueue::new(64);
        let samples = vec![100i16; FRAME_SAMPLES * 2 + 10];
        let source = WavSource::from_samples(samples);

        let stop = Arc::new(AtomicBool::new(false));
        source.start(handoff.clone(), stop).join().unwrap();

        // Two full frames plus a zero-padded tail
        assert_eq!(handoff.len(), 3);
        let first = handoff.pop().unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(first.samples.len(), FRAME_SAMPLES);

        handoff.pop();
        let tail = handoff.pop().unwrap();
        assert_eq!(tail.samples.len(), FRAME_SAMPLES);
        assert_eq!(tail.samples[FRAME_SAMPLES - 1], 0);
    }

    #[test]
    fn test_replay_honors_stop_flag() {
        let handoff = FrameQueue::new(64);
        let source = WavSource::from_samples(vec![0i16; FRAME_SAMPLES * 10]);

        let stop = Arc::new(AtomicBool::new(true));
        source.start(handoff.clone(), stop).join().unwrap();

        assert!(handoff.is_empty());
    }
}
