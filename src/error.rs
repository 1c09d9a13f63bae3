//! Error types for the Wingman pipeline
//!
//! Variants map onto the pipeline's error taxonomy: transient upstream
//! failures recover locally, execution failures are surfaced to the user,
//! and only device loss is treated as fatal.

use thiserror::Error;

/// Wingman pipeline errors
#[derive(Error, Debug, Clone)]
pub enum WingmanError {
    /// Audio capture device initialization or operation error
    #[error("Audio device error: {0}")]
    AudioDeviceError(String),

    /// Speech-to-text transcription error
    #[error("Transcription error: {0}")]
    TranscriptionError(String),

    /// Transcription exceeded the hard ceiling
    #[error("Transcription timed out after {0}ms")]
    TranscriptionTimeout(u64),

    /// Reasoning service error
    #[error("Reasoning error: {0}")]
    ReasoningError(String),

    /// Reasoning call exceeded its bounded timeout
    #[error("Reasoning timed out after {0}ms")]
    ReasoningTimeout(u64),

    /// Action execution error
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Speech synthesis or playback error
    #[error("Speech error: {0}")]
    SpeechError(String),

    /// Channel communication error
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// File system I/O error
    #[error("IO error: {0}")]
    IOError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for WingmanError {
    fn from(e: std::io::Error) -> Self {
        WingmanError::IOError(e.to_string())
    }
}

impl WingmanError {
    /// Check if this error is recoverable
    ///
    /// Recoverable errors return the pipeline to listening; non-recoverable
    /// errors require user intervention or restart.
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Device loss may require user intervention
            WingmanError::AudioDeviceError(_) => false,
            // Upstream boundaries are transient by design
            WingmanError::TranscriptionError(_) => true,
            WingmanError::TranscriptionTimeout(_) => true,
            WingmanError::ReasoningError(_) => true,
            WingmanError::ReasoningTimeout(_) => true,
            // Execution failures are surfaced, never fatal
            WingmanError::ExecutionError(_) => true,
            WingmanError::SpeechError(_) => true,
            // Channel breakage means a worker died
            WingmanError::ChannelError(_) => false,
            WingmanError::IOError(_) => false,
            WingmanError::ConfigError(_) => false,
        }
    }

    /// Get a user-friendly description suitable for speech feedback
    pub fn user_message(&self) -> String {
        match self {
            WingmanError::AudioDeviceError(_) => {
                "Audio device error. Please check your microphone.".to_string()
            }
            WingmanError::TranscriptionError(_) | WingmanError::TranscriptionTimeout(_) => {
                "I didn't catch that. Please try again.".to_string()
            }
            WingmanError::ReasoningError(_) | WingmanError::ReasoningTimeout(_) => {
                "I couldn't work that out. Could you rephrase?".to_string()
            }
            WingmanError::ExecutionError(_) => "That didn't work.".to_string(),
            WingmanError::SpeechError(_) => {
                "Speech output failed. Response shown as text.".to_string()
            }
            WingmanError::ChannelError(_) => {
                "Internal communication error. Please restart.".to_string()
            }
            WingmanError::IOError(_) => "File system error occurred.".to_string(),
            WingmanError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
        }
    }
}

/// Result type alias for Wingman operations
pub type Result<T> = std::result::Result<T, WingmanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_recoverable() {
        assert!(WingmanError::TranscriptionError("x".into()).is_recoverable());
        assert!(WingmanError::TranscriptionTimeout(5000).is_recoverable());
        assert!(WingmanError::ReasoningTimeout(30000).is_recoverable());
        assert!(WingmanError::ExecutionError("exit 1".into()).is_recoverable());
    }

    #[test]
    fn test_device_and_channel_errors_are_not() {
        assert!(!WingmanError::AudioDeviceError("gone".into()).is_recoverable());
        assert!(!WingmanError::ChannelError("closed".into()).is_recoverable());
        assert!(!WingmanError::ConfigError("bad toml".into()).is_recoverable());
    }

    #[test]
    fn test_execution_user_message() {
        let err = WingmanError::ExecutionError("exit status 2".into());
        assert_eq!(err.user_message(), "That didn't work.");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: WingmanError = io.into();
        assert!(matches!(err, WingmanError::IOError(_)));
    }
}
