//! Composition types

use std::f64::consts::PI;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::image_pipeline::calibration::{CropRect, ProfileVersion, Rotation};
use crate::image_pipeline::frame::{BorderPolicy, CameraId, Image};

/// How the two corrected frames are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Layout {
    /// Frame A left of frame B; heights must agree.
    #[default]
    Horizontal,
    /// Frame A above frame B; widths must agree.
    Vertical,
    /// Horizontal join where the last `overlap` columns of A cross-fade into
    /// the first `overlap` columns of B.
    Blend {
        overlap: usize,
        #[serde(default)]
        curve: BlendCurve,
    },
}

impl Layout {
    pub fn name(&self) -> &'static str {
        match self {
            Layout::Horizontal => "horizontal",
            Layout::Vertical => "vertical",
            Layout::Blend { .. } => "blend",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendCurve {
    #[default]
    Linear,
    Cosine,
    Smoothstep,
}

impl BlendCurve {
    /// Weight of frame B at seam position `t` in `[0, 1]`.
    pub fn weight(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            BlendCurve::Linear => t,
            BlendCurve::Cosine => 0.5 - 0.5 * (PI * t).cos(),
            BlendCurve::Smoothstep => t * t * (3.0 - 2.0 * t),
        }
    }
}

/// Configuration for [`FrameCompositor`](super::FrameCompositor)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompositorConfig {
    pub layout: Layout,
    /// Largest relative size difference resize-to-match may absorb.
    pub tolerance: f64,
    /// Fill used by arbitrary-angle rotation.
    pub border: BorderPolicy,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            layout: Layout::Horizontal,
            tolerance: 0.05,
            border: BorderPolicy::Black,
        }
    }
}

impl CompositorConfig {
    pub fn builder() -> CompositorConfigBuilder {
        CompositorConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct CompositorConfigBuilder {
    layout: Option<Layout>,
    tolerance: Option<f64>,
    border: Option<BorderPolicy>,
}

impl CompositorConfigBuilder {
    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn border(mut self, border: BorderPolicy) -> Self {
        self.border = Some(border);
        self
    }

    pub fn build(self) -> CompositorConfig {
        let default = CompositorConfig::default();
        CompositorConfig {
            layout: self.layout.unwrap_or(default.layout),
            tolerance: self.tolerance.unwrap_or(default.tolerance),
            border: self.border.unwrap_or(default.border),
        }
    }
}

/// What was actually done to one input frame on its way into the composite.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameProvenance {
    pub camera: CameraId,
    pub captured_at: DateTime<Local>,
    pub profile_version: ProfileVersion,
    /// Size of the corrected frame before crop/rotate.
    pub input_size: (usize, usize),
    /// Crop after clamping to the frame.
    pub crop: Option<CropRect>,
    pub rotation: Rotation,
    /// Target size when resize-to-match scaled this frame.
    pub resized_to: Option<(usize, usize)>,
    /// Size the frame entered the join with.
    pub placed_size: (usize, usize),
}

/// The joined image and how it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeArtifact {
    pub image: Image,
    pub layout: Layout,
    /// Frame A then frame B.
    pub frames: [FrameProvenance; 2],
}

impl CompositeArtifact {
    pub fn width(&self) -> usize {
        self.image.width()
    }

    pub fn height(&self) -> usize {
        self.image.height()
    }

    pub fn captured_at(&self) -> [DateTime<Local>; 2] {
        [self.frames[0].captured_at, self.frames[1].captured_at]
    }
}
