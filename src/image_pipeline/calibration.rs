//! Calibration module
//!
//! Per-camera geometric calibration: loading, structural validation, default
//! fallback and guarded reload.

mod document;
mod store;
pub mod types;


pub use document::{CalibrationDocument, CameraEntry, CoefficientUnits, DistortionEntry};
pub use store::{CalibrationStore, read_calibration};
pub use types::{
    CalibratedProfile, CalibrationProfile, CalibrationSet, CalibrationSource, CanvasPadding,
    CropRect, Distortion, DistortionModel, Homography, OutputGeometry, ProfileVersion, Rotation,
    SensorResolution,
};
