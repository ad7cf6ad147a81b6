//! Composite module
//!
//! Crop, rotation and joining of two corrected frames into one artifact.

mod compositor;
mod transform;
pub mod types;


pub use compositor::FrameCompositor;
pub use types::{
    BlendCurve, CompositeArtifact, CompositorConfig, CompositorConfigBuilder, FrameProvenance,
    Layout,
};
