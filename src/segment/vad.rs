//! Voice activity classification over 30 ms frames.
//!
//! Wraps WebRTC VAD, which accepts 10/20/30 ms windows at 16 kHz and offers
//! four aggressiveness modes. The RMS level of each frame is carried along
//! so downstream stages can apply energy heuristics.

use crate::audio::frame::{calculate_rms, FRAME_SAMPLES, SAMPLE_RATE};
use crate::error::{Result, WingmanError};
use webrtc_vad::{SampleRate as VadSampleRate, Vad, VadMode};

/// Detection sensitivity, least to most aggressive at declaring silence.
///
/// `Relaxed` admits the most audio as speech; `Aggressive` rejects
/// everything but clear voicing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Relaxed,
    Balanced,
    Sensitive,
    Aggressive,
}

impl Default for Sensitivity {
    fn default() -> Self {
        Sensitivity::Sensitive
    }
}

impl Sensitivity {
    fn mode(self) -> VadMode {
        match self {
            Sensitivity::Relaxed => VadMode::Quality,
            Sensitivity::Balanced => VadMode::LowBitrate,
            Sensitivity::Sensitive => VadMode::Aggressive,
            Sensitivity::Aggressive => VadMode::VeryAggressive,
        }
    }
}

impl std::fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sensitivity::Relaxed => write!(f, "relaxed"),
            Sensitivity::Balanced => write!(f, "balanced"),
            Sensitivity::Sensitive => write!(f, "sensitive"),
            Sensitivity::Aggressive => write!(f, "aggressive"),
        }
    }
}

/// Per-frame classification result.
#[derive(Debug, Clone, Copy)]
pub struct VadVerdict {
    /// Whether the frame contains speech.
    pub is_speech: bool,
    /// Normalized RMS level of the frame.
    pub level: f32,
}

/// Frame classifier. Not `Send`; construct it on the thread that uses it.
pub struct VoiceDetector {
    vad: Vad,
    sensitivity: Sensitivity,
}

impl VoiceDetector {
    /// Create a detector with the given sensitivity.
    pub fn new(sensitivity: Sensitivity) -> Self {
        let mut vad = Vad::new();
        vad.set_mode(sensitivity.mode());
        vad.set_sample_rate(VadSampleRate::Rate16kHz);
        Self { vad, sensitivity }
    }

    /// Classify one 30 ms frame.
    pub fn classify(&mut self, samples: &[i16]) -> Result<VadVerdict> {
        if samples.len() != FRAME_SAMPLES {
            return Err(WingmanError::AudioDeviceError(format!(
                "VAD expects {} samples per frame, got {}",
                FRAME_SAMPLES,
                samples.len()
            )));
        }

        let is_speech = self
            .vad
            .is_voice_segment(samples)
            .map_err(|e| WingmanError::AudioDeviceError(format!("VAD failure: {:?}", e)))?;

        Ok(VadVerdict {
            is_speech,
            level: calculate_rms(samples),
        })
    }

    /// Reset the detector session state.
    pub fn reset(&mut self) {
        // WebRTC VAD has no explicit reset; rebuild the session.
        let mut vad = Vad::new();
        vad.set_mode(self.sensitivity.mode());
        vad.set_sample_rate(VadSampleRate::Rate16kHz);
        self.vad = vad;
    }

    /// Current sensitivity level.
    pub fn sensitivity(&self) -> Sensitivity {
        self.sensitivity
    }

    /// Sample rate the detector operates at.
    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_rejects_wrong_frame_size() {
        let mut detector = VoiceDetector::new(Sensitivity::Balanced);
        let result = detector.classify(&vec![0i16; 100]);
        assert!(result.is_err());
    }

    #[test]
    fn test_silence_is_not_speech() {
        let mut detector = VoiceDetector::new(Sensitivity::Aggressive);
        let verdict = detector.classify(&vec![0i16; FRAME_SAMPLES]).unwrap();
        assert!(!verdict.is_speech);
        assert_eq!(verdict.level, 0.0);
    }

    #[test]
    fn test_all_four_sensitivities_construct() {
        for sensitivity in [
            Sensitivity::Relaxed,
            Sensitivity::Balanced,
            Sensitivity::Sensitive,
            Sensitivity::Aggressive,
        ] {
            let detector = VoiceDetector::new(sensitivity);
            assert_eq!(detector.sensitivity(), sensitivity);
        }
    }

    #[test]
    fn test_reset_preserves_sensitivity() {
        let mut detector = VoiceDetector::new(Sensitivity::Relaxed);
        detector.reset();
        assert_eq!(detector.sensitivity(), Sensitivity::Relaxed);
    }

    #[test]
    fn test_sensitivity_display() {
        assert_eq!(Sensitivity::Balanced.to_string(), "balanced");
        assert_eq!(Sensitivity::Aggressive.to_string(), "aggressive");
    }
}
