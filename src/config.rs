//! Configuration: one TOML file, every section defaultable.
//!
//! Resolution order: explicit path, then `$XDG_CONFIG_HOME/wingman/
//! config.toml`, then built-in defaults. A missing file is not an error;
//! a malformed one is.

use crate::brain::ReasonerConfig;
use crate::error::{Result, WingmanError};
use crate::exec::ExecutorConfig;
use crate::routing::TaskTemplate;
use crate::segment::SegmenterConfig;
use crate::speech::SpeechConfig;
use crate::transcribe::TranscriberConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Queue capacities and history depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Raw audio hand-off capacity, in frames. This queue drops oldest
    /// under overload; all others block.
    pub frame_handoff_capacity: usize,
    /// Utterances awaiting transcription.
    pub transcript_queue_capacity: usize,
    /// Actions awaiting execution.
    pub action_queue_capacity: usize,
    /// Exchanges retained as reasoning context.
    pub history_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_handoff_capacity: 5,
            transcript_queue_capacity: 10,
            action_queue_capacity: 10,
            history_capacity: 32,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WingmanConfig {
    pub pipeline: PipelineConfig,
    pub segmenter: SegmenterConfig,
    pub transcriber: TranscriberConfig,
    pub reasoner: ReasonerConfig,
    pub executor: ExecutorConfig,
    pub speech: SpeechConfig,
    /// Task templates for the model router; empty means the built-in set.
    pub templates: Vec<TaskTemplate>,
}

impl WingmanConfig {
    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("wingman").join("config.toml"))
    }

    /// Load from the given path, or the default location when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let resolved = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path(),
        };

        let Some(resolved) = resolved else {
            debug!("no config directory available, using defaults");
            return Ok(Self::default());
        };

        if !resolved.exists() {
            // Only an explicitly requested file must exist.
            if path.is_some() {
                return Err(WingmanError::ConfigError(format!(
                    "config file not found: {}",
                    resolved.display()
                )));
            }
            debug!("no config file at {}, using defaults", resolved.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&resolved)
            .map_err(|e| WingmanError::ConfigError(format!("failed to read config: {}", e)))?;
        let config = Self::parse(&raw)?;
        info!("loaded config from {}", resolved.display());
        Ok(config)
    }

    /// Parse a TOML document.
    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|e| WingmanError::ConfigError(format!("invalid config: {}", e)))
    }
}
