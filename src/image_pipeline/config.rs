//! Pipeline-wide configuration file

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::image_pipeline::capture::CaptureConfig;
use crate::image_pipeline::common::error::ConfigError;
use crate::image_pipeline::composite::{CompositorConfig, Layout};
use crate::image_pipeline::correction::CorrectionConfig;
use crate::image_pipeline::tiff::EncodingConfig;

/// All runtime settings of a capture pipeline.
///
/// Every section falls back to its defaults, so a partial file is valid.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub capture: CaptureConfig,
    pub correction: CorrectionConfig,
    pub compositor: CompositorConfig,
    pub encoding: EncodingConfig,
}

impl PipelineConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Reads and validates a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        info!(path = %path.display(), layout = config.compositor.layout.name(), "Pipeline config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.frame_timeout.is_zero() {
            return Err(ConfigError::Value("frame timeout must be positive".to_string()));
        }
        if self.capture.retries > CaptureConfig::MAX_RETRIES {
            return Err(ConfigError::Value(format!(
                "{} retries exceeds the limit of {}",
                self.capture.retries,
                CaptureConfig::MAX_RETRIES
            )));
        }
        let tolerance = self.compositor.tolerance;
        if !tolerance.is_finite() || !(0.0..1.0).contains(&tolerance) {
            return Err(ConfigError::Value(format!(
                "dimension tolerance {tolerance} must lie in [0, 1)"
            )));
        }
        if let Layout::Blend { overlap: 0, .. } = self.compositor.layout {
            return Err(ConfigError::Value("blend overlap must be positive".to_string()));
        }
        self.capture.naming.validate()
    }
}
