//! Dual-sensor capture with geometric correction and compositing.

pub mod image_pipeline;
pub mod logger;
