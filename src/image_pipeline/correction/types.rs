//! Correction stage types

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::image_pipeline::calibration::{OutputGeometry, ProfileVersion};
use crate::image_pipeline::frame::{BorderPolicy, CameraId, Image};

/// A frame resampled into rectified geometry.
///
/// Carries the crop/rotation of the profile that produced it so the
/// compositor never has to consult calibration again.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectedFrame {
    pub camera: CameraId,
    pub captured_at: DateTime<Local>,
    /// Version of the calibration profile that was applied.
    pub profile_version: ProfileVersion,
    pub geometry: OutputGeometry,
    pub image: Image,
}

impl CorrectedFrame {
    pub fn width(&self) -> usize {
        self.image.width()
    }

    pub fn height(&self) -> usize {
        self.image.height()
    }
}

/// Configuration shared by the distortion and perspective correctors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorrectionConfig {
    /// Fill for destination pixels whose source location is off-frame.
    pub border: BorderPolicy,
    /// Demosaic Bayer input to RGB; mosaics are rejected when disabled.
    pub demosaic: bool,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            border: BorderPolicy::Black,
            demosaic: true,
        }
    }
}

impl CorrectionConfig {
    pub fn builder() -> CorrectionConfigBuilder {
        CorrectionConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct CorrectionConfigBuilder {
    border: Option<BorderPolicy>,
    demosaic: Option<bool>,
}

impl CorrectionConfigBuilder {
    pub fn border(mut self, border: BorderPolicy) -> Self {
        self.border = Some(border);
        self
    }

    pub fn demosaic(mut self, enable: bool) -> Self {
        self.demosaic = Some(enable);
        self
    }

    pub fn build(self) -> CorrectionConfig {
        let default = CorrectionConfig::default();
        CorrectionConfig {
            border: self.border.unwrap_or(default.border),
            demosaic: self.demosaic.unwrap_or(default.demosaic),
        }
    }
}
