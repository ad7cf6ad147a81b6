//! Correction module
//!
//! Lens distortion removal and perspective rectification of single frames.

mod distortion;
mod perspective;
pub(crate) mod resample;
pub mod types;


pub use distortion::DistortionCorrector;
pub use perspective::PerspectiveCorrector;
pub use types::{CorrectedFrame, CorrectionConfig, CorrectionConfigBuilder};
