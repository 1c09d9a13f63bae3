//! Microphone capture bridge
//!
//! Bridges the real-time cpal callback thread into the cooperative pipeline
//! via the lossy frame hand-off queue. The callback only chunks and pushes;
//! it never blocks.

use crate::audio::frame::{AudioFrame, FRAME_SAMPLES, SAMPLE_RATE};
use crate::audio::ring::FrameQueue;
use crate::error::{Result, WingmanError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Audio input device information
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    /// Device name
    pub name: String,
    /// Whether this is the default input device
    pub is_default: bool,
}

/// List available input devices.
pub fn list_input_devices() -> Result<Vec<AudioDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();

    let devices = host
        .input_devices()
        .map_err(|e| WingmanError::AudioDeviceError(format!("Failed to list devices: {}", e)))?;

    Ok(devices
        .filter_map(|d| d.name().ok())
        .map(|name| AudioDeviceInfo {
            is_default: name == default_name,
            name,
        })
        .collect())
}

/// Capture source feeding the frame hand-off queue.
///
/// Requests 16 kHz mono directly from the device; the pipeline performs no
/// resampling. Stereo input is averaged down to mono in the callback.
pub struct CaptureSource {
    stream: Option<Stream>,
    device: Device,
    config: StreamConfig,
    is_capturing: Arc<AtomicBool>,
}

impl CaptureSource {
    /// Create a capture source on the default input device.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| WingmanError::AudioDeviceError("No input device available".into()))?;

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using input device: {}", device_name);

        // The pipeline contract is 16 kHz mono frames. Prefer a native mono
        // config; accept stereo and fold it down.
        let supported = device
            .supported_input_configs()
            .map_err(|e| {
                WingmanError::AudioDeviceError(format!("Failed to query input configs: {}", e))
            })?
            .filter(|c| {
                c.channels() <= 2
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .min_by_key(|c| c.channels());

        let supported = supported.ok_or_else(|| {
            WingmanError::AudioDeviceError(format!(
                "Device '{}' does not support {} Hz capture",
                device_name, SAMPLE_RATE
            ))
        })?;

        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            "Audio config: {}Hz, {} channel(s)",
            config.sample_rate.0, config.channels
        );

        Ok(Self {
            stream: None,
            device,
            config,
            is_capturing: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Start capturing into the hand-off queue.
    ///
    /// Frames are `FRAME_SAMPLES` long; a partial tail is carried over to
    /// the next callback invocation.
    pub fn start(&mut self, handoff: FrameQueue) -> Result<()> {
        if self.is_capturing.load(Ordering::SeqCst) {
            warn!("Already capturing, ignoring start request");
            return Ok(());
        }

        let channels = self.config.channels as usize;
        let is_capturing = Arc::clone(&self.is_capturing);

        let mut pending: Vec<i16> = Vec::with_capacity(FRAME_SAMPLES * 2);
        let mut sequence: u64 = 0;

        let err_fn = |err| {
            error!("Audio input stream error: {}", err);
        };

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !is_capturing.load(Ordering::SeqCst) {
                        return;
                    }

                    if channels == 1 {
                        pending.extend(data.iter().map(|&s| to_i16(s)));
                    } else {
                        // Average channels to mono
                        pending.extend(data.chunks_exact(channels).map(|frame| {
                            let sum: f32 = frame.iter().sum();
                            to_i16(sum / channels as f32)
                        }));
                    }

                    while pending.len() >= FRAME_SAMPLES {
                        let samples: Vec<i16> = pending.drain(..FRAME_SAMPLES).collect();
                        let dropped = handoff.push(AudioFrame::new(sequence, samples));
                        if dropped {
                            warn!("Capture hand-off saturated, dropped oldest frame");
                        }
                        sequence += 1;
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| {
                WingmanError::AudioDeviceError(format!("Failed to build input stream: {}", e))
            })?;

        stream.play().map_err(|e| {
            WingmanError::AudioDeviceError(format!("Failed to start input stream: {}", e))
        })?;

        self.is_capturing.store(true, Ordering::SeqCst);
        self.stream = Some(stream);
        info!("Capture started");
        Ok(())
    }

    /// Stop capturing and drop the stream.
    pub fn stop(&mut self) {
        self.is_capturing.store(false, Ordering::SeqCst);
        if self.stream.take().is_some() {
            info!("Capture stopped");
        }
    }

    /// Check whether capture is active.
    pub fn is_capturing(&self) -> bool {
        self.is_capturing.load(Ordering::SeqCst)
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_i16_clamps() {
        assert_eq!(to_i16(2.0), i16::MAX);
        assert_eq!(to_i16(-2.0), -i16::MAX);
        assert_eq!(to_i16(0.0), 0);
    }
}
