//! Audio capture boundary: frame types, the lossy hand-off queue, and the
//! live/replay sources that feed it.

#[cfg(feature = "audio-io")]
pub mod capture;
pub mod frame;
pub mod ring;
pub mod wav;

#[cfg(feature = "audio-io")]
pub use capture::{list_input_devices, AudioDeviceInfo, CaptureSource};
pub use frame::{calculate_rms, AudioFrame, FRAME_DURATION_MS, FRAME_SAMPLES, SAMPLE_RATE};
pub use ring::{FrameQueue, PrerollBuffer};
pub use wav::WavSource;
